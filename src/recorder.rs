//! Surface recorder: the pipeline assembled for one render surface
//!
//! Owns the pool factory, the GPU device, the frame producer and the media
//! session. The render loop calls [`SurfaceRecorder::render`] once per
//! presented frame; everything else happens off the render thread.

use std::path::PathBuf;
use std::sync::Arc;

use crate::buffer::{PixelBuffer, PoolFactory};
use crate::config::FramemuxConfig;
use crate::errors::FramemuxError;
use crate::gpu::{GpuDevice, SoftwareDevice};
use crate::observable::Observable;
use crate::output::{
    AudioSettings, CaptureToken, ImageOrientation, Photo, RecordingHandle, VideoSettings,
    WriterFactory,
};
use crate::producer::FrameProducer;
use crate::session::{AudioInput, MediaSession, SessionOptions, SurfaceVideoInput};
use crate::surface::RenderSurface;
use crate::timing::{MonotonicClock, PTSClock};

/// Builder for [`SurfaceRecorder`]
pub struct SurfaceRecorderBuilder {
    surface: Arc<dyn RenderSurface>,
    config: FramemuxConfig,
    clock: Option<Arc<dyn MonotonicClock>>,
    device: Option<Arc<dyn GpuDevice>>,
    writer_factory: Option<Arc<dyn WriterFactory>>,
}

impl SurfaceRecorderBuilder {
    pub fn config(mut self, config: FramemuxConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock for pause marks; must share a timebase with `render` times
    pub fn clock(mut self, clock: Arc<dyn MonotonicClock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn device(mut self, device: Arc<dyn GpuDevice>) -> Self {
        self.device = Some(device);
        self
    }

    pub fn writer_factory(mut self, factory: Arc<dyn WriterFactory>) -> Self {
        self.writer_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<SurfaceRecorder, FramemuxError> {
        self.config.validate().map_err(FramemuxError::Config)?;

        let writer_factory = match self.writer_factory {
            Some(factory) => factory,
            None => default_writer_factory()?,
        };
        let device: Arc<dyn GpuDevice> = match self.device {
            Some(device) => device,
            None => Arc::new(SoftwareDevice::new()?),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(PTSClock::new()));
        let pools = Arc::new(PoolFactory::new(self.config.pool.allocation_threshold));

        let producer = Arc::new(FrameProducer::new(
            self.surface,
            device.clone(),
            pools.clone(),
            self.config.conversion_options(),
        ));
        let input = Arc::new(SurfaceVideoInput::new(producer));
        let session = MediaSession::with_options(
            input.clone(),
            writer_factory,
            SessionOptions {
                pools,
                clock,
                ..SessionOptions::default()
            },
        )?;

        log::info!("Surface recorder ready on {} device", device.name());
        Ok(SurfaceRecorder {
            input,
            session,
            device,
            config: self.config,
        })
    }
}

#[cfg(feature = "recording")]
fn default_writer_factory() -> Result<Arc<dyn WriterFactory>, FramemuxError> {
    Ok(Arc::new(crate::recording::Mp4WriterFactory::new()))
}

#[cfg(not(feature = "recording"))]
fn default_writer_factory() -> Result<Arc<dyn WriterFactory>, FramemuxError> {
    Err(FramemuxError::Config(
        "no writer factory given and the recording feature is disabled".into(),
    ))
}

/// Records, photographs and samples one render surface
pub struct SurfaceRecorder {
    input: Arc<SurfaceVideoInput>,
    session: MediaSession,
    device: Arc<dyn GpuDevice>,
    config: FramemuxConfig,
}

impl SurfaceRecorder {
    pub fn builder(surface: Arc<dyn RenderSurface>) -> SurfaceRecorderBuilder {
        SurfaceRecorderBuilder {
            surface,
            config: FramemuxConfig::default(),
            clock: None,
            device: None,
            writer_factory: None,
        }
    }

    /// Called by the render loop after presenting the frame for `time`
    ///
    /// Never blocks; does nothing while no output is registered.
    pub fn render(&self, time: f64) {
        self.input.render(time);
    }

    pub fn session(&self) -> &MediaSession {
        &self.session
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn config(&self) -> &FramemuxConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn MonotonicClock> {
        self.session.clock()
    }

    pub fn error(&self) -> &Observable<Option<FramemuxError>> {
        self.session.error()
    }

    pub fn set_audio_input(&self, input: Option<Arc<dyn AudioInput>>) {
        self.session.set_audio_input(input);
    }

    pub fn start_video_recording(
        &self,
        path: impl Into<PathBuf>,
        settings: VideoSettings,
        audio_settings: Option<AudioSettings>,
    ) -> Result<RecordingHandle, FramemuxError> {
        self.session
            .start_video_recording(path, settings, audio_settings)
    }

    /// Record with the configured video and audio settings
    pub fn start_configured_recording(
        &self,
        path: impl Into<PathBuf>,
    ) -> Result<RecordingHandle, FramemuxError> {
        let audio = match self.session.audio_input() {
            Some(_) => self.config.audio_settings(),
            None => None,
        };
        self.session
            .start_video_recording(path, self.config.video_settings(), audio)
    }

    pub fn take_photo<F>(&self, scale: f64, orientation: Option<ImageOrientation>, handler: F)
    where
        F: FnOnce(Result<Photo, FramemuxError>) + Send + 'static,
    {
        self.session.take_photo(scale, orientation, handler);
    }

    pub fn take_pixel_buffer<F>(&self, handler: F)
    where
        F: FnOnce(PixelBuffer, f64) + Send + 'static,
    {
        self.session.take_pixel_buffer(handler);
    }

    pub fn capture_pixel_buffers<F>(&self, handler: F) -> CaptureToken
    where
        F: Fn(PixelBuffer, f64) + Send + Sync + 'static,
    {
        self.session.capture_pixel_buffers(handler)
    }
}

impl std::fmt::Debug for SurfaceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceRecorder")
            .field("input", &self.input)
            .field("device", &self.device.name())
            .finish()
    }
}
