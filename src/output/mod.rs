//! Outputs a media session fans frames out to
//!
//! - [`VideoOutput`] records to a container through the state machine in
//!   [`state`], controlled by a [`RecordingHandle`]
//! - one-shot photo and pixel-buffer outputs detach after their first frame
//! - [`CaptureToken`] keeps a continuous pixel-buffer capture registered

mod photo;
mod settings;
pub mod state;
mod video;
mod writer;

pub use photo::{CaptureToken, ImageOrientation, Photo};
#[cfg(feature = "recording")]
pub(crate) use photo::buffer_to_rgba;
pub(crate) use photo::{OneShotOutput, PixelBufferOutput};
pub use settings::{
    AudioSettings, Codec, CompressionProperties, EntropyMode, FileType, H264ProfileLevel,
    H264Properties, HevcProfileLevel, HevcProperties, JpegProperties, Placement,
    RecordingQuality, Rect, ScalingMode, VideoSettings, VideoTransform,
};
pub use state::{Message, Muxer, RecordingState, State};
pub use video::{RecordingHandle, RecordingSummary, VideoOutput};
pub use writer::{ContainerWriter, TrackId, TrackSettings, WriterFactory, WriterStatus};
