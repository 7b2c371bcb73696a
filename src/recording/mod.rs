//! File-backed container writing
//!
//! This module provides a [`WriterFactory`](crate::output::WriterFactory)
//! that records H.264 video into MP4 files using:
//! - openh264 for H.264 encoding
//! - muxide for MP4 muxing
//!
//! # Example
//! ```rust,ignore
//! use framemux::recording::Mp4WriterFactory;
//!
//! let session = MediaSession::new(input, Arc::new(Mp4WriterFactory::new()))?;
//! let recording = session.start_video_recording("out.mp4", settings, None)?;
//! ```

mod encoder;
mod writer;

pub use encoder::{EncodedFrame, H264Encoder};
pub use writer::{Mp4Writer, Mp4WriterFactory};
