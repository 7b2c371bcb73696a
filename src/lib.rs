//! framemux: capture rendered GPU surfaces and audio into pausable,
//! resumable video recordings
//!
//! The crate is built around a capture-and-mux pipeline:
//!
//! - pooled pixel buffers and GPU textures ([`buffer`])
//! - a frame producer converting the last rendered surface into an
//!   encodable buffer off the render thread ([`producer`], [`gpu`])
//! - a media session fanning frames and audio out to any number of outputs,
//!   starting inputs only while someone listens ([`session`])
//! - a recording state machine that keeps the media timeline continuous
//!   across pause and resume ([`output`])
//!
//! # Features
//! - `recording`: MP4 files through openh264 and muxide
//! - `audio`: microphone input through cpal
//!
//! # Usage
//! ```rust,ignore
//! use framemux::{SurfaceRecorder, VideoSettings, FileType};
//!
//! let recorder = SurfaceRecorder::builder(surface).build()?;
//! let recording = recorder.start_video_recording(
//!     "take.mp4",
//!     VideoSettings::new(FileType::Mp4),
//!     None,
//! )?;
//!
//! // In the render loop, after presenting:
//! recorder.render(presentation_time);
//!
//! recording.pause();
//! recording.resume();
//! recording.finish(|summary| println!("{:?}", summary.state));
//! ```

pub mod buffer;
pub mod config;
pub mod errors;
pub mod gpu;
pub mod observable;
pub mod output;
pub mod producer;
pub mod queue;
pub mod recorder;
pub mod session;
pub mod surface;
pub mod timing;

#[cfg(feature = "recording")]
pub mod recording;

#[cfg(feature = "audio")]
pub mod audio;

// Testing utilities - synthetic surfaces and scriptable doubles
pub mod testing;

pub use buffer::{PixelBuffer, PixelBufferPool, PixelFormat, PoolFactory, PoolKey};
pub use config::FramemuxConfig;
pub use errors::{FramemuxError, PoolError, ProducerError, TextureError, UsageError, WriterError};
pub use gpu::{GpuDevice, SoftwareDevice, SurfaceFormat};
pub use observable::Observable;
pub use output::{
    AudioSettings, CaptureToken, FileType, ImageOrientation, Photo, RecordingHandle,
    RecordingState, RecordingSummary, VideoSettings,
};
pub use producer::FrameProducer;
pub use recorder::{SurfaceRecorder, SurfaceRecorderBuilder};
pub use session::{MediaSession, SessionOptions};
pub use surface::{RenderSurface, SurfaceSlot};
pub use timing::{MonotonicClock, PTSClock};

/// Initialize logging, defaulting to `framemux=info`
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "framemux=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        recording: cfg!(feature = "recording"),
        audio: cfg!(feature = "audio"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Built with the MP4 writer
    pub recording: bool,
    /// Built with microphone input
    pub audio: bool,
}
