//! Media session: routes one video input and an optional audio input to any
//! number of outputs
//!
//! All routing happens on the session's [`SerialQueue`]. Input sinks only
//! hold a weak reference to the session and hop onto the queue before
//! touching it. Inputs are started when their first output is registered and
//! stopped when the last one goes away.
//!
//! When a frame fans out to several outputs, the first output gets the
//! produced buffer and every other output gets its own pooled copy, so no
//! output can observe another one's writes.

mod input;

pub use input::{
    AudioConsumer, AudioInput, AudioSamples, AudioSink, Input, SurfaceVideoInput, VideoConsumer,
    VideoFormat, VideoInput, VideoSink,
};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::buffer::{PixelBuffer, PoolFactory};
use crate::errors::{FramemuxError, ProducerError, UsageError};
use crate::observable::Observable;
use crate::output::{
    AudioSettings, CaptureToken, ImageOrientation, OneShotOutput, Photo, PixelBufferOutput,
    RecordingHandle, VideoOutput, VideoSettings, WriterFactory,
};
use crate::queue::SerialQueue;
use crate::timing::{MonotonicClock, PTSClock};

/// Identifies a registered output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u64);

/// Construction options for [`MediaSession`]
#[derive(Clone)]
pub struct SessionOptions {
    pub pools: Arc<PoolFactory>,
    pub clock: Arc<dyn MonotonicClock>,
    pub queue_label: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            pools: Arc::new(PoolFactory::default()),
            clock: Arc::new(PTSClock::new()),
            queue_label: "framemux-session".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct MediaSession {
    inner: Arc<SessionInner>,
}

/// Non-owning session reference held by outputs and tokens
#[derive(Clone)]
pub(crate) struct WeakSession(Weak<SessionInner>);

impl WeakSession {
    pub(crate) fn upgrade(&self) -> Option<MediaSession> {
        self.0.upgrade().map(|inner| MediaSession { inner })
    }
}

struct SessionInner {
    queue: Arc<SerialQueue>,
    pools: Arc<PoolFactory>,
    writer_factory: Arc<dyn WriterFactory>,
    clock: Arc<dyn MonotonicClock>,
    video_input: Arc<dyn VideoInput>,
    audio_input: Mutex<Option<Arc<dyn AudioInput>>>,
    video_outputs: Mutex<Vec<(OutputId, Arc<dyn VideoConsumer>)>>,
    audio_outputs: Mutex<Vec<(OutputId, Arc<dyn AudioConsumer>)>>,
    next_output_id: AtomicU64,
    active_recording: Mutex<Option<Weak<VideoOutput>>>,
    error: Observable<Option<FramemuxError>>,
}

impl MediaSession {
    pub fn new(
        video_input: Arc<dyn VideoInput>,
        writer_factory: Arc<dyn WriterFactory>,
    ) -> Result<Self, FramemuxError> {
        Self::with_options(video_input, writer_factory, SessionOptions::default())
    }

    pub fn with_options(
        video_input: Arc<dyn VideoInput>,
        writer_factory: Arc<dyn WriterFactory>,
        options: SessionOptions,
    ) -> Result<Self, FramemuxError> {
        let queue = Arc::new(SerialQueue::new(options.queue_label)?);
        let inner = Arc::new(SessionInner {
            queue,
            pools: options.pools,
            writer_factory,
            clock: options.clock,
            video_input,
            audio_input: Mutex::new(None),
            video_outputs: Mutex::new(Vec::new()),
            audio_outputs: Mutex::new(Vec::new()),
            next_output_id: AtomicU64::new(1),
            active_recording: Mutex::new(None),
            error: Observable::new(None),
        });

        let session = Arc::downgrade(&inner);
        let queue = inner.queue.clone();
        let sink: VideoSink = Arc::new(move |result, time| {
            let session = session.clone();
            queue.dispatch(move || {
                if let Some(inner) = session.upgrade() {
                    inner.deliver_video(result, time);
                }
            });
        });
        inner.video_input.set_sink(Some(sink));

        Ok(Self { inner })
    }

    pub(crate) fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.inner))
    }

    pub fn pools(&self) -> &Arc<PoolFactory> {
        &self.inner.pools
    }

    pub fn clock(&self) -> &Arc<dyn MonotonicClock> {
        &self.inner.clock
    }

    pub fn queue(&self) -> &Arc<SerialQueue> {
        &self.inner.queue
    }

    pub fn video_input(&self) -> &Arc<dyn VideoInput> {
        &self.inner.video_input
    }

    pub fn audio_input(&self) -> Option<Arc<dyn AudioInput>> {
        self.inner
            .audio_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Last error raised while routing media
    pub fn error(&self) -> &Observable<Option<FramemuxError>> {
        &self.inner.error
    }

    /// Replace the audio input
    ///
    /// A new input is started right away when audio outputs are registered.
    pub fn set_audio_input(&self, input: Option<Arc<dyn AudioInput>>) {
        let outputs = self
            .inner
            .audio_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut current = self
            .inner
            .audio_input
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(old) = current.take() {
            old.set_sink(None);
            if !outputs.is_empty() {
                Input::Audio(old).stop();
            }
        }

        if let Some(new) = input {
            let session = Arc::downgrade(&self.inner);
            let queue = self.inner.queue.clone();
            new.set_sink(Some(Arc::new(move |samples| {
                let session = session.clone();
                queue.dispatch(move || {
                    if let Some(inner) = session.upgrade() {
                        inner.deliver_audio(&samples);
                    }
                });
            })));
            if !outputs.is_empty() {
                self.inner.start_input(Input::Audio(new.clone()));
            }
            *current = Some(new);
        }
    }

    pub fn add_video_output(&self, consumer: Arc<dyn VideoConsumer>) -> OutputId {
        let id = self.allocate_output_id();
        self.register_video_output(id, consumer);
        id
    }

    pub fn remove_video_output(&self, id: OutputId) -> bool {
        let mut outputs = self
            .inner
            .video_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = outputs.len();
        outputs.retain(|(output_id, _)| *output_id != id);
        let removed = outputs.len() != before;
        if removed && outputs.is_empty() {
            Input::Video(self.inner.video_input.clone()).stop();
        }
        removed
    }

    pub fn add_audio_output(&self, consumer: Arc<dyn AudioConsumer>) -> OutputId {
        let id = self.allocate_output_id();
        self.register_audio_output(id, consumer);
        id
    }

    pub fn remove_audio_output(&self, id: OutputId) -> bool {
        let mut outputs = self
            .inner
            .audio_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = outputs.len();
        outputs.retain(|(output_id, _)| *output_id != id);
        let removed = outputs.len() != before;
        if removed && outputs.is_empty() {
            if let Some(input) = self.audio_input() {
                Input::Audio(input).stop();
            }
        }
        removed
    }

    pub fn video_output_count(&self) -> usize {
        self.inner
            .video_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn audio_output_count(&self) -> usize {
        self.inner
            .audio_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn allocate_output_id(&self) -> OutputId {
        OutputId(self.inner.next_output_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register_video_output(&self, id: OutputId, consumer: Arc<dyn VideoConsumer>) {
        let mut outputs = self
            .inner
            .video_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        outputs.push((id, consumer));
        if outputs.len() == 1 {
            self.inner
                .start_input(Input::Video(self.inner.video_input.clone()));
        }
    }

    pub(crate) fn register_audio_output(&self, id: OutputId, consumer: Arc<dyn AudioConsumer>) {
        let mut outputs = self
            .inner
            .audio_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        outputs.push((id, consumer));
        if outputs.len() == 1 {
            if let Some(input) = self.audio_input() {
                self.inner.start_input(Input::Audio(input));
            }
        }
    }

    /// Start recording to `path`
    ///
    /// `audio_settings` of `None` records audio with the input's recommended
    /// settings when an audio input is attached, and video only otherwise.
    pub fn start_video_recording(
        &self,
        path: impl Into<PathBuf>,
        settings: VideoSettings,
        audio_settings: Option<AudioSettings>,
    ) -> Result<RecordingHandle, FramemuxError> {
        settings.validate()?;

        let audio_input = self.audio_input();
        let audio_settings = match (audio_settings, &audio_input) {
            (Some(_), None) => return Err(UsageError::NoAudioInput.into()),
            (Some(audio), Some(_)) => Some(audio),
            (None, Some(input)) => Some(input.recommended_settings(settings.file_type)),
            (None, None) => None,
        };

        let mut active = self
            .inner
            .active_recording
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(output) = active.as_ref().and_then(Weak::upgrade) {
            if !output.state().is_terminal() {
                return Err(UsageError::RecordingInProgress.into());
            }
        }

        let settings = settings.resolved(&self.inner.video_input.format());
        let path = path.into();
        let video_id = self.allocate_output_id();
        let audio_id = audio_settings.map(|_| self.allocate_output_id());

        let session = self.downgrade();
        let output = Arc::new(VideoOutput::new(
            path,
            settings,
            audio_settings,
            self.inner.queue.clone(),
            self.inner.clock.clone(),
            Box::new(move || {
                if let Some(session) = session.upgrade() {
                    session.remove_video_output(video_id);
                    if let Some(audio_id) = audio_id {
                        session.remove_audio_output(audio_id);
                    }
                }
            }),
        ));

        self.register_video_output(video_id, output.clone());
        if let Some(audio_id) = audio_id {
            self.register_audio_output(audio_id, output.clone());
        }
        output.begin(self.inner.writer_factory.clone());
        *active = Some(Arc::downgrade(&output));

        log::info!(
            "Recording {} started: {}",
            output.id(),
            output.path().display()
        );
        Ok(RecordingHandle::new(output))
    }

    /// Capture the next frame as a photo
    ///
    /// `orientation` defaults to the video input's orientation.
    pub fn take_photo<F>(&self, scale: f64, orientation: Option<ImageOrientation>, handler: F)
    where
        F: FnOnce(Result<Photo, FramemuxError>) + Send + 'static,
    {
        let orientation = orientation.unwrap_or_else(|| self.inner.video_input.format().orientation);
        self.take_pixel_buffer(move |buffer, _time| {
            handler(Photo::from_buffer(&buffer, scale, orientation));
        });
    }

    /// Deliver the next frame to `handler`, then detach
    pub fn take_pixel_buffer<F>(&self, handler: F)
    where
        F: FnOnce(PixelBuffer, f64) + Send + 'static,
    {
        let id = self.allocate_output_id();
        let output = OneShotOutput::new(id, self.downgrade(), Box::new(handler));
        self.register_video_output(id, Arc::new(output));
    }

    /// Deliver every frame to `handler` until the token is stopped or dropped
    pub fn capture_pixel_buffers<F>(&self, handler: F) -> CaptureToken
    where
        F: Fn(PixelBuffer, f64) + Send + Sync + 'static,
    {
        let id = self.allocate_output_id();
        self.register_video_output(id, Arc::new(PixelBufferOutput::new(Arc::new(handler))));
        CaptureToken::new(id, self.downgrade())
    }
}

impl SessionInner {
    fn start_input(&self, input: Input) {
        if let Err(e) = input.start() {
            log::error!("Failed to start {} input: {}", input.kind(), e);
            self.error.set(Some(e));
        }
    }

    fn deliver_video(&self, result: Result<PixelBuffer, ProducerError>, time: f64) {
        let buffer = match result {
            Ok(buffer) => buffer,
            Err(e) => {
                log::debug!("Frame at {:.3}s failed: {}", time, e);
                self.error.set(Some(e.into()));
                return;
            }
        };

        let outputs: Vec<Arc<dyn VideoConsumer>> = self
            .video_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, output)| output.clone())
            .collect();
        let Some((first, rest)) = outputs.split_first() else {
            return;
        };

        let mut copies = Vec::with_capacity(rest.len());
        for output in rest {
            match self.pools.copy_buffer(&buffer) {
                Ok(copy) => copies.push((output, copy)),
                Err(e) => {
                    log::warn!("Dropping frame copy for an output: {}", e);
                    self.error.set(Some(e.into()));
                }
            }
        }

        log::trace!("Delivering frame at {:.3}s to {} outputs", time, outputs.len());
        first.append_video_buffer(buffer, time);
        for (output, copy) in copies {
            output.append_video_buffer(copy, time);
        }
    }

    fn deliver_audio(&self, samples: &AudioSamples) {
        let outputs: Vec<Arc<dyn AudioConsumer>> = self
            .audio_outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, output)| output.clone())
            .collect();
        for output in outputs {
            output.append_audio_samples(samples);
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.video_input.set_sink(None);
        let video_outputs = self
            .video_outputs
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if !video_outputs.is_empty() {
            self.video_input.stop();
        }

        let audio_running = !self
            .audio_outputs
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty();
        if let Some(input) = self
            .audio_input
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            input.set_sink(None);
            if audio_running {
                input.stop();
            }
        }
        log::debug!("Media session dropped");
    }
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("queue", &self.inner.queue)
            .field("video_outputs", &self.video_output_count())
            .field("audio_outputs", &self.audio_output_count())
            .finish()
    }
}
