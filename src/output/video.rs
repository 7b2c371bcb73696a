//! Video output: a recording driven by the state machine on the session queue

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::settings::{AudioSettings, FileType, VideoSettings};
use super::state::{Message, Muxer, RecordingState, State};
use super::writer::{ContainerWriter, TrackId, TrackSettings, WriterFactory, WriterStatus};
use crate::buffer::PixelBuffer;
use crate::errors::WriterError;
use crate::observable::Observable;
use crate::queue::SerialQueue;
use crate::session::{AudioConsumer, AudioSamples, VideoConsumer};
use crate::timing::MonotonicClock;

type FinishHandler = Box<dyn FnOnce(RecordingSummary) + Send + 'static>;

/// Outcome of a recording, handed to every `finish` completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub id: Uuid,
    pub path: PathBuf,
    pub file_type: FileType,
    pub state: RecordingState,
    /// Seconds of media appended, pauses excluded
    pub duration: f64,
    pub video_frames: u64,
    pub audio_batches: u64,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct MuxerStats {
    video_frames: u64,
    audio_batches: u64,
    duration: f64,
}

/// [`Muxer`] over an opened container writer
struct WriterMuxer {
    writer: Box<dyn ContainerWriter>,
    video_track: TrackId,
    audio_track: Option<TrackId>,
    last_video_time: Option<f64>,
    stats: MuxerStats,
    closed: bool,
}

impl WriterMuxer {
    fn open(
        factory: &dyn WriterFactory,
        path: &Path,
        settings: &VideoSettings,
        audio_settings: Option<AudioSettings>,
    ) -> Result<Self, WriterError> {
        let mut writer = factory.open(path, settings.file_type)?;
        let video_track = writer.add_track(TrackSettings::Video(settings.clone()))?;
        let audio_track = match audio_settings {
            Some(audio) => match writer.add_track(TrackSettings::Audio(audio)) {
                Ok(track) => Some(track),
                Err(e) => {
                    log::warn!("Writer refused the audio track, recording video only: {}", e);
                    None
                }
            },
            None => None,
        };
        writer.start_writing()?;
        Ok(Self {
            writer,
            video_track,
            audio_track,
            last_video_time: None,
            stats: MuxerStats::default(),
            closed: false,
        })
    }

    fn failure(&self) -> Option<WriterError> {
        if self.writer.status() == WriterStatus::Failed {
            Some(self.writer.error().unwrap_or(WriterError::Unknown))
        } else {
            None
        }
    }
}

impl Muxer for WriterMuxer {
    fn start_session(&mut self, time: f64) {
        log::debug!("Muxing session opened at {:.3}s", time);
        self.writer.start_session(time);
    }

    fn end_session(&mut self, time: f64) {
        log::debug!("Muxing session closed at {:.3}s", time);
        self.writer.end_session(time);
    }

    fn append_video(&mut self, buffer: &PixelBuffer, time: f64) -> Result<bool, WriterError> {
        if !self.writer.is_ready_for_more_media_data(self.video_track) {
            log::trace!("Writer not ready, skipping video at {:.3}s", time);
            return Ok(false);
        }
        if self.writer.append_video(self.video_track, buffer, time) {
            if let Some(last) = self.last_video_time {
                self.stats.duration += time - last;
            }
            self.last_video_time = Some(time);
            self.stats.video_frames += 1;
            return Ok(true);
        }
        match self.failure() {
            Some(error) => Err(error),
            None => Ok(false),
        }
    }

    fn append_audio(&mut self, samples: &AudioSamples, time: f64) -> Result<bool, WriterError> {
        let Some(track) = self.audio_track else {
            return Ok(false);
        };
        if !self.writer.is_ready_for_more_media_data(track) {
            return Ok(false);
        }
        if self.writer.append_audio(track, samples, time) {
            self.stats.audio_batches += 1;
            return Ok(true);
        }
        match self.failure() {
            Some(error) => Err(error),
            None => Ok(false),
        }
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        self.writer.finish()?;
        self.closed = true;
        Ok(())
    }

    fn cancel(&mut self) {
        self.writer.cancel();
        self.closed = true;
    }
}

/// Stands in while the writer is still opening
struct NullMuxer;

impl Muxer for NullMuxer {
    fn start_session(&mut self, _time: f64) {}

    fn end_session(&mut self, _time: f64) {}

    fn append_video(&mut self, _buffer: &PixelBuffer, _time: f64) -> Result<bool, WriterError> {
        Ok(false)
    }

    fn append_audio(&mut self, _samples: &AudioSamples, _time: f64) -> Result<bool, WriterError> {
        Ok(false)
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        Ok(())
    }

    fn cancel(&mut self) {}
}

struct OutputCore {
    state: State,
    muxer: Option<WriterMuxer>,
    stats: MuxerStats,
    finish_handlers: Vec<FinishHandler>,
    finished_at: Option<DateTime<Utc>>,
    on_final: Option<Box<dyn FnOnce() + Send + 'static>>,
}

/// A single recording registered with a media session
pub struct VideoOutput {
    id: Uuid,
    path: PathBuf,
    settings: VideoSettings,
    audio_settings: Option<AudioSettings>,
    queue: Arc<SerialQueue>,
    clock: Arc<dyn MonotonicClock>,
    core: Mutex<OutputCore>,
    state: Observable<RecordingState>,
    duration: Observable<f64>,
}

impl VideoOutput {
    pub(crate) fn new(
        path: PathBuf,
        settings: VideoSettings,
        audio_settings: Option<AudioSettings>,
        queue: Arc<SerialQueue>,
        clock: Arc<dyn MonotonicClock>,
        on_final: Box<dyn FnOnce() + Send + 'static>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            settings,
            audio_settings,
            queue,
            clock,
            core: Mutex::new(OutputCore {
                state: State::new(),
                muxer: None,
                stats: MuxerStats::default(),
                finish_handlers: Vec::new(),
                finished_at: None,
                on_final: Some(on_final),
            }),
            state: Observable::new(RecordingState::Starting),
            duration: Observable::new(0.0),
        }
    }

    /// Open the writer on the queue
    pub(crate) fn begin(self: &Arc<Self>, factory: Arc<dyn WriterFactory>) {
        let output = self.clone();
        self.queue.dispatch(move || {
            let opened = WriterMuxer::open(
                factory.as_ref(),
                &output.path,
                &output.settings,
                output.audio_settings,
            );
            let result = match opened {
                Ok(muxer) => {
                    output.lock_core().muxer = Some(muxer);
                    Ok(())
                }
                Err(e) => {
                    log::error!("Failed to open writer for {}: {}", output.path.display(), e);
                    Err(e)
                }
            };
            output.process(Message::Opened(result));
        });
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &VideoSettings {
        &self.settings
    }

    pub fn audio_settings(&self) -> Option<&AudioSettings> {
        self.audio_settings.as_ref()
    }

    pub fn state(&self) -> RecordingState {
        self.state.get()
    }

    pub fn state_observable(&self) -> &Observable<RecordingState> {
        &self.state
    }

    pub fn duration_observable(&self) -> &Observable<f64> {
        &self.duration
    }

    pub(crate) fn resume(self: &Arc<Self>) {
        let mark = self.clock.now();
        self.post(Message::Resume { mark });
    }

    pub(crate) fn pause(self: &Arc<Self>) {
        let mark = self.clock.now();
        self.post(Message::Pause { mark });
    }

    pub(crate) fn cancel(self: &Arc<Self>) {
        self.post(Message::Cancel);
    }

    pub(crate) fn finish(self: &Arc<Self>, handler: FinishHandler) {
        let output = self.clone();
        self.queue.dispatch(move || {
            output.lock_core().finish_handlers.push(handler);
            output.process(Message::Finish);
        });
    }

    /// Summary of the recording as it stands
    pub fn summary(&self) -> RecordingSummary {
        let core = self.lock_core();
        self.summary_of(&core)
    }

    fn post(self: &Arc<Self>, message: Message) {
        let output = self.clone();
        self.queue.dispatch(move || output.process(message));
    }

    fn lock_core(&self) -> std::sync::MutexGuard<'_, OutputCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn summary_of(&self, core: &OutputCore) -> RecordingSummary {
        RecordingSummary {
            id: self.id,
            path: self.path.clone(),
            file_type: self.settings.file_type,
            state: core.state.public(),
            duration: core.stats.duration,
            video_frames: core.stats.video_frames,
            audio_batches: core.stats.audio_batches,
            finished_at: core.finished_at.unwrap_or_else(Utc::now),
        }
    }

    /// Run one message through the state machine
    fn process(&self, message: Message) {
        let mut core = self.lock_core();
        let was_terminal = core.state.is_terminal();

        let state = std::mem::replace(&mut core.state, State::Canceled);
        let next = {
            let OutputCore { muxer, .. } = &mut *core;
            match muxer.as_mut() {
                Some(muxer) => state.apply(message, muxer),
                None => state.apply(message, &mut NullMuxer),
            }
        };
        core.state = next;
        if let Some(muxer) = &core.muxer {
            core.stats = muxer.stats;
        }

        let mut on_final = None;
        if core.state.is_terminal() {
            if let Some(mut muxer) = core.muxer.take() {
                if !muxer.closed {
                    log::debug!("Discarding writer for {}", self.path.display());
                    muxer.cancel();
                }
            }
            if !was_terminal {
                core.finished_at = Some(Utc::now());
                on_final = core.on_final.take();
            }
        }

        let public = core.state.public();
        let duration = core.stats.duration;
        let handlers = if core.state.is_terminal() {
            std::mem::take(&mut core.finish_handlers)
        } else {
            Vec::new()
        };
        let summary = self.summary_of(&core);
        drop(core);

        self.state.set_if_changed(public.clone());
        self.duration.set_if_changed(duration);

        if let Some(on_final) = on_final {
            match &public {
                RecordingState::Failed(e) => {
                    log::error!("Recording {} failed: {}", self.id, e)
                }
                state => log::info!(
                    "Recording {} ended {:?} after {:.3}s",
                    self.id,
                    state,
                    duration
                ),
            }
            on_final();
        }
        for handler in handlers {
            handler(summary.clone());
        }
    }
}

impl VideoConsumer for VideoOutput {
    fn append_video_buffer(&self, buffer: PixelBuffer, time: f64) {
        self.process(Message::Video { buffer, time });
    }
}

impl AudioConsumer for VideoOutput {
    fn append_audio_samples(&self, samples: &AudioSamples) {
        self.process(Message::Audio {
            samples: samples.clone(),
        });
    }
}

impl std::fmt::Debug for VideoOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoOutput")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("state", &self.state())
            .finish()
    }
}

/// Caller's handle on a recording
///
/// Control calls are queued behind media already in flight. Dropping the
/// handle of an unfinished recording cancels it.
pub struct RecordingHandle {
    output: Arc<VideoOutput>,
}

impl RecordingHandle {
    pub(crate) fn new(output: Arc<VideoOutput>) -> Self {
        Self { output }
    }

    pub fn id(&self) -> Uuid {
        self.output.id()
    }

    pub fn path(&self) -> &Path {
        self.output.path()
    }

    pub fn file_type(&self) -> FileType {
        self.output.settings().file_type
    }

    /// Settings resolved against the video input
    pub fn settings(&self) -> &VideoSettings {
        self.output.settings()
    }

    pub fn state(&self) -> RecordingState {
        self.output.state()
    }

    /// Seconds of media recorded so far
    pub fn duration(&self) -> f64 {
        self.output.duration_observable().get()
    }

    pub fn error(&self) -> Option<WriterError> {
        self.state().error().cloned()
    }

    pub fn state_observable(&self) -> &Observable<RecordingState> {
        self.output.state_observable()
    }

    pub fn duration_observable(&self) -> &Observable<f64> {
        self.output.duration_observable()
    }

    pub fn resume(&self) {
        self.output.resume();
    }

    pub fn pause(&self) {
        self.output.pause();
    }

    pub fn cancel(&self) {
        self.output.cancel();
    }

    /// Finalize the file; `handler` runs exactly once with the outcome
    pub fn finish<F>(&self, handler: F)
    where
        F: FnOnce(RecordingSummary) + Send + 'static,
    {
        self.output.finish(Box::new(handler));
    }

    pub async fn finish_async(&self) -> RecordingSummary {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.finish(move |summary| {
            let _ = tx.send(summary);
        });
        match rx.await {
            Ok(summary) => summary,
            Err(_) => self.output.summary(),
        }
    }
}

impl Drop for RecordingHandle {
    fn drop(&mut self) {
        if !self.state().is_terminal() {
            log::info!("Recording handle dropped, canceling {}", self.id());
            self.output.cancel();
        }
    }
}

impl std::fmt::Debug for RecordingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RecordingHandle").field(&self.output).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;
    use crate::testing::{ManualClock, MemoryWriterFactory, WriterEvent};

    fn output(factory: &MemoryWriterFactory, clock: Arc<ManualClock>) -> Arc<VideoOutput> {
        let queue = Arc::new(SerialQueue::new("test-output").unwrap());
        let output = Arc::new(VideoOutput::new(
            PathBuf::from("clip.mp4"),
            VideoSettings::default().with_size(4, 4),
            None,
            queue,
            clock,
            Box::new(|| {}),
        ));
        output.begin(Arc::new(factory.clone()));
        output
    }

    fn frame() -> PixelBuffer {
        PixelBuffer::new(4, 4, PixelFormat::Bgra32).unwrap()
    }

    fn append(output: &Arc<VideoOutput>, time: f64) {
        let target = output.clone();
        let buffer = frame();
        output
            .queue
            .dispatch(move || target.append_video_buffer(buffer, time));
    }

    #[test]
    fn test_finish_handler_called_once_per_call() {
        let factory = MemoryWriterFactory::new();
        let output = output(&factory, Arc::new(ManualClock::new()));
        let (tx, rx) = std::sync::mpsc::channel();

        output.resume();
        append(&output, 0.0);
        append(&output, 0.1);
        for _ in 0..3 {
            let tx = tx.clone();
            output.finish(Box::new(move |summary| tx.send(summary).unwrap()));
        }
        output.queue.barrier();
        drop(tx);

        let summaries: Vec<_> = rx.iter().collect();
        assert_eq!(summaries.len(), 3);
        assert!(summaries.iter().all(|s| s.state == RecordingState::Finished));
        assert_eq!(summaries[0].video_frames, 2);
        assert!((summaries[0].duration - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_discards_writer() {
        let factory = MemoryWriterFactory::new();
        let output = output(&factory, Arc::new(ManualClock::new()));
        output.resume();
        append(&output, 0.0);
        output.cancel();
        output.queue.barrier();

        assert_eq!(output.state(), RecordingState::Canceled);
        let writer = factory.last_writer().unwrap();
        assert_eq!(writer.events().last(), Some(&WriterEvent::Cancel));
    }

    #[test]
    fn test_open_failure_reported() {
        let factory = MemoryWriterFactory::new();
        factory.fail_open(WriterError::Open("read-only volume".into()));
        let output = output(&factory, Arc::new(ManualClock::new()));
        output.queue.barrier();
        assert_eq!(
            output.state(),
            RecordingState::Failed(WriterError::Open("read-only volume".into()))
        );
    }

    #[test]
    fn test_pause_marks_come_from_clock() {
        let factory = MemoryWriterFactory::new();
        let clock = Arc::new(ManualClock::new());
        let output = output(&factory, clock.clone());

        output.resume();
        append(&output, 10.0);
        clock.set(1.0);
        output.pause();
        clock.set(4.0);
        output.resume();
        append(&output, 13.5);
        output.queue.barrier();

        let writer = factory.last_writer().unwrap();
        assert_eq!(writer.video_times(), vec![10.0, 10.5]);
        assert!((output.duration_observable().get() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_writer_not_ready_skips_frames() {
        let factory = MemoryWriterFactory::new();
        factory.not_ready_for(2);
        let output = output(&factory, Arc::new(ManualClock::new()));
        output.resume();
        for i in 0..4 {
            append(&output, i as f64 * 0.1);
        }
        output.queue.barrier();

        assert_eq!(output.state(), RecordingState::Recording);
        assert_eq!(factory.last_writer().unwrap().video_times().len(), 2);
    }
}
