//! Container writer contract
//!
//! A writer is opened per recording and driven exclusively from the
//! recording's serial queue. Appends return `false` either because the
//! writer is momentarily not ready (transient) or because it failed, in which
//! case [`ContainerWriter::status`] reports [`WriterStatus::Failed`] and
//! [`ContainerWriter::error`] carries the cause.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::settings::{AudioSettings, FileType, VideoSettings};
use crate::buffer::PixelBuffer;
use crate::errors::WriterError;
use crate::session::AudioSamples;

/// Track description passed to [`ContainerWriter::add_track`]
#[derive(Debug, Clone, PartialEq)]
pub enum TrackSettings {
    /// Video settings are always resolved (size, transform, colour)
    Video(VideoSettings),
    Audio(AudioSettings),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriterStatus {
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

pub trait ContainerWriter: Send {
    fn add_track(&mut self, settings: TrackSettings) -> Result<TrackId, WriterError>;

    fn start_writing(&mut self) -> Result<(), WriterError>;

    /// Open a sub-session; the first one fixes the file's time origin
    fn start_session(&mut self, time: f64);

    fn is_ready_for_more_media_data(&self, track: TrackId) -> bool;

    fn append_video(&mut self, track: TrackId, buffer: &PixelBuffer, time: f64) -> bool;

    fn append_audio(&mut self, track: TrackId, samples: &AudioSamples, time: f64) -> bool;

    fn end_session(&mut self, time: f64);

    fn finish(&mut self) -> Result<(), WriterError>;

    /// Abort and discard the partial file
    fn cancel(&mut self);

    fn status(&self) -> WriterStatus;

    fn error(&self) -> Option<WriterError>;
}

/// Opens container writers for new recordings
pub trait WriterFactory: Send + Sync {
    fn open(&self, path: &Path, file_type: FileType)
        -> Result<Box<dyn ContainerWriter>, WriterError>;
}
