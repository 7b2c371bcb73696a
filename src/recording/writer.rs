//! MP4 container writer: openh264 for H.264, muxide for the container

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::RgbaImage;
use muxide::api::{Metadata, MuxerBuilder, VideoCodec};

use super::encoder::H264Encoder;
use crate::buffer::PixelBuffer;
use crate::errors::WriterError;
use crate::output::{
    buffer_to_rgba, Codec, ContainerWriter, FileType, ScalingMode, TrackId, TrackSettings, VideoSettings,
    WriterFactory, WriterStatus,
};
use crate::session::AudioSamples;

const DEFAULT_FRAME_RATE: f64 = 30.0;
const DEFAULT_KEY_FRAME_INTERVAL: u32 = 30;

/// Opens [`Mp4Writer`]s for mp4, m4v and mov paths
#[derive(Debug, Clone)]
pub struct Mp4WriterFactory {
    fast_start: bool,
    title: Option<String>,
}

impl Mp4WriterFactory {
    pub fn new() -> Self {
        Self {
            fast_start: true,
            title: None,
        }
    }

    /// Put the movie header before the media data
    pub fn with_fast_start(mut self, fast_start: bool) -> Self {
        self.fast_start = fast_start;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

impl Default for Mp4WriterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterFactory for Mp4WriterFactory {
    fn open(
        &self,
        path: &Path,
        file_type: FileType,
    ) -> Result<Box<dyn ContainerWriter>, WriterError> {
        if file_type == FileType::Mobile3gpp {
            return Err(WriterError::Open("3gp containers are not supported".into()));
        }
        let file = File::create(path)
            .map_err(|e| WriterError::Open(format!("{}: {}", path.display(), e)))?;
        log::debug!("Opened {} for {} output", path.display(), file_type.extension());

        Ok(Box::new(Mp4Writer {
            path: path.to_path_buf(),
            fast_start: self.fast_start,
            title: self.title.clone(),
            file: Some(BufWriter::new(file)),
            muxer: None,
            encoder: None,
            video: None,
            origin: None,
            frames: 0,
            status: WriterStatus::Unknown,
            error: None,
        }))
    }
}

type Mp4Muxer = muxide::api::Muxer<BufWriter<File>>;

/// Single video track H.264 writer
///
/// Frames are scaled to the track size with the track's scaling mode and
/// timed relative to the first session start.
pub struct Mp4Writer {
    path: PathBuf,
    fast_start: bool,
    title: Option<String>,
    file: Option<BufWriter<File>>,
    muxer: Option<Mp4Muxer>,
    encoder: Option<H264Encoder>,
    video: Option<VideoSettings>,
    origin: Option<f64>,
    frames: u64,
    status: WriterStatus,
    error: Option<WriterError>,
}

impl Mp4Writer {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Encoded frames handed to the muxer so far
    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    fn fail(&mut self, error: WriterError) {
        log::error!("Writing {} failed: {}", self.path.display(), error);
        self.muxer = None;
        self.status = WriterStatus::Failed;
        self.error = Some(error);
    }

    fn encode(&mut self, buffer: &PixelBuffer, time: f64) -> Result<(), WriterError> {
        let (Some(encoder), Some(muxer), Some(video)) =
            (self.encoder.as_mut(), self.muxer.as_mut(), self.video.as_ref())
        else {
            return Err(WriterError::Append("writer is not writing".into()));
        };

        let image = buffer_to_rgba(buffer).map_err(|e| WriterError::Append(e.to_string()))?;
        let image = fit_frame(
            image,
            (encoder.width(), encoder.height()),
            video.scaling_mode,
        );
        let encoded = encoder.encode_rgba(image.as_raw())?;
        if encoded.data.is_empty() {
            log::trace!("Encoder skipped frame at {:.3}s", time);
            return Ok(());
        }

        let origin = *self.origin.get_or_insert(time);
        let pts = (time - origin).max(0.0);
        muxer
            .write_video(pts, &encoded.data, encoded.is_keyframe)
            .map_err(|e| WriterError::Append(format!("Failed to write frame: {}", e)))?;
        self.frames += 1;
        Ok(())
    }
}

impl ContainerWriter for Mp4Writer {
    fn add_track(&mut self, settings: TrackSettings) -> Result<TrackId, WriterError> {
        let video = match settings {
            TrackSettings::Audio(_) => {
                return Err(WriterError::UnsupportedTrack(
                    "audio tracks are not supported by the mp4 writer".into(),
                ))
            }
            TrackSettings::Video(video) => video,
        };
        if self.video.is_some() {
            return Err(WriterError::UnsupportedTrack("only one video track is supported".into()));
        }
        if !matches!(video.codec, Codec::H264(_)) {
            return Err(WriterError::UnsupportedTrack(format!(
                "{} video is not supported by the mp4 writer",
                video.codec.name()
            )));
        }
        if video.output_size().is_none() {
            return Err(WriterError::UnsupportedTrack("video track has no size".into()));
        }
        self.video = Some(video);
        Ok(TrackId(1))
    }

    fn start_writing(&mut self) -> Result<(), WriterError> {
        let video = self
            .video
            .as_ref()
            .ok_or_else(|| WriterError::StartWriting("no video track".into()))?;
        let (width, height) = video
            .output_size()
            .ok_or_else(|| WriterError::StartWriting("video track has no size".into()))?;
        let fps = video.expected_frame_rate().unwrap_or(DEFAULT_FRAME_RATE);
        let key_frame_interval = video
            .codec
            .compression()
            .and_then(|c| c.max_key_frame_interval)
            .unwrap_or(DEFAULT_KEY_FRAME_INTERVAL);

        let file = self
            .file
            .take()
            .ok_or_else(|| WriterError::StartWriting("writing already started".into()))?;
        let encoder = H264Encoder::new(width, height, key_frame_interval)
            .map_err(|e| WriterError::StartWriting(e.to_string()))?;

        let mut metadata = Metadata::new().with_current_time();
        if let Some(title) = &self.title {
            metadata = metadata.with_title(title);
        }
        let muxer = MuxerBuilder::new(file)
            .video(VideoCodec::H264, width, height, fps)
            .with_fast_start(self.fast_start)
            .with_metadata(metadata)
            .build()
            .map_err(|e| WriterError::StartWriting(format!("Failed to create muxer: {}", e)))?;

        self.encoder = Some(encoder);
        self.muxer = Some(muxer);
        self.status = WriterStatus::Writing;
        log::debug!(
            "Writing {}x{} H.264 at {} fps to {}",
            width,
            height,
            fps,
            self.path.display()
        );
        Ok(())
    }

    fn start_session(&mut self, time: f64) {
        if self.origin.is_none() {
            self.origin = Some(time);
        }
    }

    fn is_ready_for_more_media_data(&self, _track: TrackId) -> bool {
        self.status == WriterStatus::Writing
    }

    fn append_video(&mut self, _track: TrackId, buffer: &PixelBuffer, time: f64) -> bool {
        if self.status != WriterStatus::Writing {
            return false;
        }
        match self.encode(buffer, time) {
            Ok(()) => true,
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn append_audio(&mut self, _track: TrackId, _samples: &AudioSamples, _time: f64) -> bool {
        false
    }

    fn end_session(&mut self, time: f64) {
        log::trace!("Session on {} ends at {:.3}s", self.path.display(), time);
    }

    fn finish(&mut self) -> Result<(), WriterError> {
        let muxer = match self.muxer.take() {
            Some(muxer) => muxer,
            None => {
                let error = self
                    .error
                    .clone()
                    .unwrap_or_else(|| WriterError::Finish("writer is not writing".into()));
                return Err(error);
            }
        };
        match muxer.finish_with_stats() {
            Ok(stats) => {
                self.status = WriterStatus::Completed;
                log::info!(
                    "Finalized {}: {} frames, {:.2}s, {} bytes",
                    self.path.display(),
                    stats.video_frames,
                    stats.duration_secs,
                    stats.bytes_written
                );
                Ok(())
            }
            Err(e) => {
                let error = WriterError::Finish(format!("Failed to finalize recording: {}", e));
                self.fail(error.clone());
                Err(error)
            }
        }
    }

    fn cancel(&mut self) {
        self.muxer = None;
        self.file = None;
        self.encoder = None;
        self.status = WriterStatus::Cancelled;
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("Removed cancelled recording {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Could not remove {}: {}", self.path.display(), e),
        }
    }

    fn status(&self) -> WriterStatus {
        self.status
    }

    fn error(&self) -> Option<WriterError> {
        self.error.clone()
    }
}

/// Scale `image` into `size` following `mode`, padding with black
fn fit_frame(image: RgbaImage, size: (u32, u32), mode: ScalingMode) -> RgbaImage {
    if image.dimensions() == size {
        return image;
    }
    let placement = mode.placement(image.dimensions(), size);
    let source = placement.source;
    let destination = placement.destination;

    let cropped = imageops::crop_imm(&image, source.x, source.y, source.width, source.height)
        .to_image();
    let scaled = imageops::resize(
        &cropped,
        destination.width,
        destination.height,
        FilterType::Triangle,
    );
    if (destination.width, destination.height) == size {
        return scaled;
    }

    let mut canvas = RgbaImage::from_pixel(size.0, size.1, image::Rgba([0, 0, 0, 255]));
    imageops::overlay(
        &mut canvas,
        &scaled,
        destination.x as i64,
        destination.y as i64,
    );
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::AudioSettings;

    #[test]
    fn test_fit_frame_letterboxes() {
        let image = RgbaImage::from_pixel(8, 4, image::Rgba([255, 255, 255, 255]));
        let fitted = fit_frame(image, (8, 8), ScalingMode::ResizeAspect);
        assert_eq!(fitted.dimensions(), (8, 8));
        assert_eq!(fitted.get_pixel(4, 0).0, [0, 0, 0, 255]);
        assert_eq!(fitted.get_pixel(4, 4).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_fit_frame_same_size_untouched() {
        let image = RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 255]));
        let fitted = fit_frame(image.clone(), (4, 4), ScalingMode::Resize);
        assert_eq!(fitted, image);
    }

    #[test]
    fn test_rejects_audio_and_3gp() {
        let dir = tempfile::tempdir().unwrap();
        let factory = Mp4WriterFactory::new();
        assert!(matches!(
            factory.open(&dir.path().join("a.3gp"), FileType::Mobile3gpp),
            Err(WriterError::Open(_))
        ));

        let mut writer = factory.open(&dir.path().join("a.mp4"), FileType::Mp4).unwrap();
        assert!(matches!(
            writer.add_track(TrackSettings::Audio(AudioSettings::default())),
            Err(WriterError::UnsupportedTrack(_))
        ));
    }

    #[test]
    fn test_cancel_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cancelled.mp4");
        let mut writer = Mp4WriterFactory::new().open(&path, FileType::Mp4).unwrap();
        assert!(path.exists());
        writer.cancel();
        assert!(!path.exists());
        assert_eq!(writer.status(), WriterStatus::Cancelled);
    }
}
