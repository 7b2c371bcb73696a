//! Test doubles for inputs, outputs, writers and clocks

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::buffer::{PixelBuffer, PixelFormat};
use crate::errors::{FramemuxError, ProducerError, WriterError};
use crate::gpu::ColorProperties;
use crate::output::{
    AudioSettings, ContainerWriter, FileType, ImageOrientation, Muxer, TrackId, TrackSettings,
    VideoTransform, WriterFactory, WriterStatus,
};
use crate::session::{
    AudioConsumer, AudioInput, AudioSamples, AudioSink, VideoConsumer, VideoFormat, VideoInput,
    VideoSink,
};
use crate::timing::MonotonicClock;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

impl MonotonicClock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Video input whose frames are pushed by the test
pub struct ManualVideoInput {
    format: Mutex<VideoFormat>,
    sink: Mutex<Option<VideoSink>>,
    running: AtomicBool,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl ManualVideoInput {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            format: Mutex::new(VideoFormat {
                size: (width, height),
                transform: VideoTransform::IDENTITY,
                orientation: ImageOrientation::Up,
                color_properties: ColorProperties::standard(),
            }),
            sink: Mutex::new(None),
            running: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn set_orientation(&self, orientation: ImageOrientation) {
        lock(&self.format).orientation = orientation;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Deliver a frame if the input is running; returns whether it was delivered
    pub fn emit(&self, result: Result<PixelBuffer, ProducerError>, time: f64) -> bool {
        if !self.is_running() {
            return false;
        }
        let sink = lock(&self.sink).clone();
        match sink {
            Some(sink) => {
                sink(result, time);
                true
            }
            None => false,
        }
    }

    /// Deliver a blank frame of the input's size
    pub fn emit_frame(&self, time: f64) -> bool {
        let (width, height) = lock(&self.format).size;
        match PixelBuffer::new(width, height, PixelFormat::Bgra32) {
            Ok(buffer) => self.emit(Ok(buffer), time),
            Err(_) => false,
        }
    }
}

impl VideoInput for ManualVideoInput {
    fn start(&self) -> Result<(), FramemuxError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn set_sink(&self, sink: Option<VideoSink>) {
        *lock(&self.sink) = sink;
    }

    fn format(&self) -> VideoFormat {
        lock(&self.format).clone()
    }
}

/// Audio input whose batches are pushed by the test
#[derive(Default)]
pub struct ManualAudioInput {
    sink: Mutex<Option<AudioSink>>,
    running: AtomicBool,
    starts: AtomicUsize,
}

impl ManualAudioInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn emit(&self, samples: AudioSamples) -> bool {
        if !self.is_running() {
            return false;
        }
        let sink = lock(&self.sink).clone();
        match sink {
            Some(sink) => {
                sink(samples);
                true
            }
            None => false,
        }
    }
}

impl AudioInput for ManualAudioInput {
    fn start(&self) -> Result<(), FramemuxError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn set_sink(&self, sink: Option<AudioSink>) {
        *lock(&self.sink) = sink;
    }

    fn recommended_settings(&self, _file_type: FileType) -> AudioSettings {
        AudioSettings::default()
    }
}

/// Output that keeps everything it receives
#[derive(Default)]
pub struct CollectingConsumer {
    video: Mutex<Vec<(PixelBuffer, f64)>>,
    audio: Mutex<Vec<AudioSamples>>,
}

impl CollectingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffers(&self) -> Vec<(PixelBuffer, f64)> {
        lock(&self.video).clone()
    }

    pub fn times(&self) -> Vec<f64> {
        lock(&self.video).iter().map(|(_, time)| *time).collect()
    }

    pub fn audio(&self) -> Vec<AudioSamples> {
        lock(&self.audio).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.video).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VideoConsumer for CollectingConsumer {
    fn append_video_buffer(&self, buffer: PixelBuffer, time: f64) {
        lock(&self.video).push((buffer, time));
    }
}

impl AudioConsumer for CollectingConsumer {
    fn append_audio_samples(&self, samples: &AudioSamples) {
        lock(&self.audio).push(samples.clone());
    }
}

/// Side effect seen by a [`RecordingMuxer`]
#[derive(Debug, Clone, PartialEq)]
pub enum MuxerCall {
    StartSession(f64),
    EndSession(f64),
    Video(f64),
    Audio(f64),
    Finish,
    Cancel,
}

/// Scriptable [`Muxer`] recording every call
#[derive(Debug, Clone, Default)]
pub struct RecordingMuxer {
    calls: Vec<MuxerCall>,
    video_before_failure: Option<usize>,
    video_error: Option<WriterError>,
    rejected_video: usize,
    finish_error: Option<WriterError>,
}

impl RecordingMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<MuxerCall> {
        self.calls.clone()
    }

    /// Times of every attempted video append, including failed ones
    pub fn video_times(&self) -> Vec<f64> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                MuxerCall::Video(time) => Some(*time),
                _ => None,
            })
            .collect()
    }

    /// Let `count` video appends succeed, then fail every later one
    pub fn fail_video_after(&mut self, count: usize, error: WriterError) {
        self.video_before_failure = Some(count);
        self.video_error = Some(error);
    }

    /// Report "not ready" for the next `count` video appends
    pub fn reject_next_video(&mut self, count: usize) {
        self.rejected_video = count;
    }

    pub fn fail_finish(&mut self, error: WriterError) {
        self.finish_error = Some(error);
    }
}

impl Muxer for RecordingMuxer {
    fn start_session(&mut self, time: f64) {
        self.calls.push(MuxerCall::StartSession(time));
    }

    fn end_session(&mut self, time: f64) {
        self.calls.push(MuxerCall::EndSession(time));
    }

    fn append_video(&mut self, _buffer: &PixelBuffer, time: f64) -> Result<bool, WriterError> {
        self.calls.push(MuxerCall::Video(time));
        if self.rejected_video > 0 {
            self.rejected_video -= 1;
            return Ok(false);
        }
        match self.video_before_failure.as_mut() {
            Some(0) => Err(self.video_error.clone().unwrap_or(WriterError::Unknown)),
            Some(remaining) => {
                *remaining -= 1;
                Ok(true)
            }
            None => Ok(true),
        }
    }

    fn append_audio(&mut self, _samples: &AudioSamples, time: f64) -> Result<bool, WriterError> {
        self.calls.push(MuxerCall::Audio(time));
        Ok(true)
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        self.calls.push(MuxerCall::Finish);
        match &self.finish_error {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn cancel(&mut self) {
        self.calls.push(MuxerCall::Cancel);
    }
}

/// Call made on a [`MemoryWriter`]
#[derive(Debug, Clone, PartialEq)]
pub enum WriterEvent {
    AddVideoTrack,
    AddAudioTrack,
    StartWriting,
    StartSession(f64),
    Video(f64),
    Audio(f64),
    EndSession(f64),
    Finish,
    Cancel,
}

#[derive(Debug)]
struct WriterLog {
    path: PathBuf,
    file_type: FileType,
    tracks: Vec<TrackSettings>,
    events: Vec<WriterEvent>,
    status: WriterStatus,
    error: Option<WriterError>,
}

/// Shared view of what one [`MemoryWriter`] received
#[derive(Debug, Clone)]
pub struct WriterRecord {
    log: Arc<Mutex<WriterLog>>,
}

impl WriterRecord {
    pub fn path(&self) -> PathBuf {
        lock(&self.log).path.clone()
    }

    pub fn file_type(&self) -> FileType {
        lock(&self.log).file_type
    }

    pub fn tracks(&self) -> Vec<TrackSettings> {
        lock(&self.log).tracks.clone()
    }

    pub fn events(&self) -> Vec<WriterEvent> {
        lock(&self.log).events.clone()
    }

    pub fn status(&self) -> WriterStatus {
        lock(&self.log).status
    }

    pub fn video_times(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                WriterEvent::Video(time) => Some(time),
                _ => None,
            })
            .collect()
    }

    pub fn audio_times(&self) -> Vec<f64> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                WriterEvent::Audio(time) => Some(time),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Default, Clone)]
struct WriterScript {
    open_error: Option<WriterError>,
    reject_audio: bool,
    not_ready: usize,
    fail_append: Option<(usize, WriterError)>,
    finish_error: Option<WriterError>,
}

#[derive(Debug, Default)]
struct FactoryState {
    script: WriterScript,
    writers: Vec<WriterRecord>,
}

/// Opens [`MemoryWriter`]s; clones share the script and the writer records
#[derive(Debug, Clone, Default)]
pub struct MemoryWriterFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MemoryWriterFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_open(&self, error: WriterError) {
        lock(&self.state).script.open_error = Some(error);
    }

    pub fn reject_audio_tracks(&self) {
        lock(&self.state).script.reject_audio = true;
    }

    /// Writers report "not ready" for their first `count` readiness checks
    pub fn not_ready_for(&self, count: usize) {
        lock(&self.state).script.not_ready = count;
    }

    /// Writers accept `count` video appends, then fail
    pub fn fail_append_after(&self, count: usize, error: WriterError) {
        lock(&self.state).script.fail_append = Some((count, error));
    }

    pub fn fail_finish(&self, error: WriterError) {
        lock(&self.state).script.finish_error = Some(error);
    }

    pub fn writer_count(&self) -> usize {
        lock(&self.state).writers.len()
    }

    pub fn last_writer(&self) -> Option<WriterRecord> {
        lock(&self.state).writers.last().cloned()
    }
}

impl WriterFactory for MemoryWriterFactory {
    fn open(
        &self,
        path: &Path,
        file_type: FileType,
    ) -> Result<Box<dyn ContainerWriter>, WriterError> {
        let mut state = lock(&self.state);
        if let Some(error) = &state.script.open_error {
            return Err(error.clone());
        }
        let record = WriterRecord {
            log: Arc::new(Mutex::new(WriterLog {
                path: path.to_path_buf(),
                file_type,
                tracks: Vec::new(),
                events: Vec::new(),
                status: WriterStatus::Unknown,
                error: None,
            })),
        };
        state.writers.push(record.clone());
        let script = state.script.clone();
        Ok(Box::new(MemoryWriter {
            not_ready: AtomicUsize::new(script.not_ready),
            script,
            record,
            video_appends: 0,
        }))
    }
}

/// Container writer that only logs what it is asked to do
pub struct MemoryWriter {
    script: WriterScript,
    record: WriterRecord,
    not_ready: AtomicUsize,
    video_appends: usize,
}

impl MemoryWriter {
    fn push(&self, event: WriterEvent) {
        lock(&self.record.log).events.push(event);
    }

    fn fail(&self, error: WriterError) {
        let mut log = lock(&self.record.log);
        log.status = WriterStatus::Failed;
        log.error = Some(error);
    }
}

impl ContainerWriter for MemoryWriter {
    fn add_track(&mut self, settings: TrackSettings) -> Result<TrackId, WriterError> {
        let event = match &settings {
            TrackSettings::Audio(_) if self.script.reject_audio => {
                return Err(WriterError::UnsupportedTrack("audio".into()));
            }
            TrackSettings::Audio(_) => WriterEvent::AddAudioTrack,
            TrackSettings::Video(_) => WriterEvent::AddVideoTrack,
        };
        let mut log = lock(&self.record.log);
        log.tracks.push(settings);
        log.events.push(event);
        Ok(TrackId(log.tracks.len() as u32))
    }

    fn start_writing(&mut self) -> Result<(), WriterError> {
        lock(&self.record.log).status = WriterStatus::Writing;
        self.push(WriterEvent::StartWriting);
        Ok(())
    }

    fn start_session(&mut self, time: f64) {
        self.push(WriterEvent::StartSession(time));
    }

    fn is_ready_for_more_media_data(&self, _track: TrackId) -> bool {
        self.not_ready
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    fn append_video(&mut self, _track: TrackId, _buffer: &PixelBuffer, time: f64) -> bool {
        if let Some((count, error)) = &self.script.fail_append {
            if self.video_appends >= *count {
                self.fail(error.clone());
                return false;
            }
        }
        self.video_appends += 1;
        self.push(WriterEvent::Video(time));
        true
    }

    fn append_audio(&mut self, _track: TrackId, _samples: &AudioSamples, time: f64) -> bool {
        self.push(WriterEvent::Audio(time));
        true
    }

    fn end_session(&mut self, time: f64) {
        self.push(WriterEvent::EndSession(time));
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        if let Some(error) = self.script.finish_error.clone() {
            self.fail(error.clone());
            return Err(error);
        }
        lock(&self.record.log).status = WriterStatus::Completed;
        self.push(WriterEvent::Finish);
        Ok(())
    }

    fn cancel(&mut self) {
        lock(&self.record.log).status = WriterStatus::Cancelled;
        self.push(WriterEvent::Cancel);
    }

    fn status(&self) -> WriterStatus {
        lock(&self.record.log).status
    }

    fn error(&self) -> Option<WriterError> {
        lock(&self.record.log).error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), 0.0);
        clock.set(1.5);
        clock.advance(0.25);
        assert_eq!(clock.now(), 1.75);
    }

    #[test]
    fn test_memory_writer_script() {
        let factory = MemoryWriterFactory::new();
        factory.reject_audio_tracks();
        factory.fail_append_after(1, WriterError::Append("full".into()));

        let mut writer = factory.open(Path::new("a.mov"), FileType::Mov).unwrap();
        assert!(writer
            .add_track(TrackSettings::Audio(AudioSettings::default()))
            .is_err());
        let frame = PixelBuffer::new(2, 2, PixelFormat::Bgra32).unwrap();
        assert!(writer.append_video(TrackId(1), &frame, 0.0));
        assert!(!writer.append_video(TrackId(1), &frame, 0.1));
        assert_eq!(writer.status(), WriterStatus::Failed);
        assert_eq!(factory.last_writer().unwrap().video_times(), vec![0.0]);
    }
}
