//! Error types for the capture-and-mux pipeline
//!
//! Errors are grouped by where they originate. Allocation errors come back
//! synchronously from pools, producer errors are reported through the media
//! session's error observable, writer errors end a recording in the failed
//! state, and usage errors are returned to callers of the public API.
//!
//! Every type is `Clone + PartialEq` so errors can be stored in observables
//! and in recording states.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pixel buffer pool failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("invalid buffer geometry {width}x{height}")]
    InvalidGeometry { width: u32, height: u32 },
    #[error("pool allocation threshold of {threshold} live buffers exceeded")]
    AllocationThresholdExceeded { threshold: usize },
    #[error("buffer format mismatch: {0}")]
    FormatMismatch(String),
    #[error("buffer lock poisoned by a previous panic")]
    PoisonedLock,
}

/// GPU texture pool failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TextureError {
    #[error("texture cache creation failed: {0}")]
    CacheCreation(String),
    #[error("texture creation failed: {0}")]
    TextureCreation(String),
    #[error("texture backing allocation failed: {0}")]
    Allocation(#[from] PoolError),
}

/// Frame producer failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProducerError {
    #[error("no rendered surface available yet")]
    NoSurface,
    #[error("surface is framebuffer-only and cannot be read")]
    FramebufferOnly,
    #[error("conversion pass failed: {0}")]
    Conversion(String),
    #[error(transparent)]
    Texture(#[from] TextureError),
}

impl From<PoolError> for ProducerError {
    fn from(error: PoolError) -> Self {
        ProducerError::Texture(TextureError::Allocation(error))
    }
}

/// Container writer failures, terminal for a recording
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum WriterError {
    #[error("failed to open container: {0}")]
    Open(String),
    #[error("track rejected: {0}")]
    UnsupportedTrack(String),
    #[error("failed to start writing: {0}")]
    StartWriting(String),
    #[error("append failed: {0}")]
    Append(String),
    #[error("failed to finalize container: {0}")]
    Finish(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("writer failed without reporting an error")]
    Unknown,
}

impl From<std::io::Error> for WriterError {
    fn from(error: std::io::Error) -> Self {
        WriterError::Io(error.to_string())
    }
}

/// Misuse of the public API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("a recording is already in progress")]
    RecordingInProgress,
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("no audio input is attached to the session")]
    NoAudioInput,
}

/// Top-level error for the crate
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramemuxError {
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("texture error: {0}")]
    Texture(#[from] TextureError),
    #[error("producer error: {0}")]
    Producer(#[from] ProducerError),
    #[error("writer error: {0}")]
    Writer(#[from] WriterError),
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("audio error: {0}")]
    Audio(String),
    #[error("image error: {0}")]
    Image(String),
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for FramemuxError {
    fn from(error: std::io::Error) -> Self {
        FramemuxError::Io(error.to_string())
    }
}

impl From<image::ImageError> for FramemuxError {
    fn from(error: image::ImageError) -> Self {
        FramemuxError::Image(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_message() {
        let err = PoolError::AllocationThresholdExceeded { threshold: 10 };
        assert_eq!(
            err.to_string(),
            "pool allocation threshold of 10 live buffers exceeded"
        );
    }

    #[test]
    fn test_pool_error_wraps_into_producer() {
        let err: ProducerError = PoolError::PoisonedLock.into();
        assert_eq!(
            err,
            ProducerError::Texture(TextureError::Allocation(PoolError::PoisonedLock))
        );
    }

    #[test]
    fn test_top_level_display() {
        let err: FramemuxError = UsageError::RecordingInProgress.into();
        assert_eq!(
            err.to_string(),
            "usage error: a recording is already in progress"
        );

        let err: FramemuxError = WriterError::Unknown.into();
        assert!(err.to_string().starts_with("writer error:"));
    }
}
