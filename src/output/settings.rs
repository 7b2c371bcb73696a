//! Video and audio settings for recordings

use serde::{Deserialize, Serialize};

use crate::errors::UsageError;
use crate::gpu::ColorProperties;
use crate::session::VideoFormat;

/// Container file type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Mov,
    Mp4,
    M4v,
    #[serde(rename = "3gp")]
    Mobile3gpp,
}

impl FileType {
    pub fn extension(&self) -> &'static str {
        match self {
            FileType::Mov => "mov",
            FileType::Mp4 => "mp4",
            FileType::M4v => "m4v",
            FileType::Mobile3gpp => "3gp",
        }
    }
}

impl Default for FileType {
    fn default() -> Self {
        FileType::Mp4
    }
}

/// Compression parameters shared by every codec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionProperties {
    /// Bits per second
    pub average_bit_rate: Option<u32>,
    pub max_key_frame_interval: Option<u32>,
    /// Seconds between key frames
    pub max_key_frame_interval_duration: Option<f64>,
    pub allow_frame_reordering: Option<bool>,
    pub expected_source_frame_rate: Option<f64>,
    pub average_non_droppable_frame_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum H264ProfileLevel {
    Baseline30,
    Baseline31,
    Baseline41,
    BaselineAutoLevel,
    Main30,
    Main31,
    Main41,
    MainAutoLevel,
    High40,
    High41,
    HighAutoLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntropyMode {
    Cavlc,
    Cabac,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct H264Properties {
    #[serde(flatten)]
    pub compression: CompressionProperties,
    pub profile_level: Option<H264ProfileLevel>,
    pub entropy_mode: Option<EntropyMode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HevcProfileLevel {
    MainAutoLevel,
    Main10AutoLevel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HevcProperties {
    #[serde(flatten)]
    pub compression: CompressionProperties,
    pub profile_level: Option<HevcProfileLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JpegProperties {
    /// 0.0 (smallest) to 1.0 (best)
    pub quality: Option<f32>,
}

/// Codec family with its codec-specific properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Codec {
    H264(H264Properties),
    Hevc(HevcProperties),
    Jpeg(JpegProperties),
}

impl Codec {
    pub fn name(&self) -> &'static str {
        match self {
            Codec::H264(_) => "h264",
            Codec::Hevc(_) => "hevc",
            Codec::Jpeg(_) => "jpeg",
        }
    }

    /// Common compression properties, `None` for intra-only codecs
    pub fn compression(&self) -> Option<&CompressionProperties> {
        match self {
            Codec::H264(properties) => Some(&properties.compression),
            Codec::Hevc(properties) => Some(&properties.compression),
            Codec::Jpeg(_) => None,
        }
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::H264(H264Properties::default())
    }
}

/// How source frames are fitted into the output size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScalingMode {
    /// Stretch to fill
    Resize,
    /// Preserve aspect ratio, letterbox
    ResizeAspect,
    /// Preserve aspect ratio, crop to fill
    #[default]
    ResizeAspectFill,
}

/// Integer rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Where a scaled frame lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Region of the source to sample
    pub source: Rect,
    /// Region of the destination to fill; the rest is black
    pub destination: Rect,
}

impl ScalingMode {
    pub fn placement(&self, source: (u32, u32), destination: (u32, u32)) -> Placement {
        let (sw, sh) = source;
        let (dw, dh) = destination;
        let full_source = Rect { x: 0, y: 0, width: sw, height: sh };
        let full_destination = Rect { x: 0, y: 0, width: dw, height: dh };
        if sw == 0 || sh == 0 || dw == 0 || dh == 0 {
            return Placement {
                source: full_source,
                destination: full_destination,
            };
        }

        // compare sw/sh with dw/dh without rounding
        let source_wider = sw as u64 * dh as u64 > dw as u64 * sh as u64;
        match self {
            ScalingMode::Resize => Placement {
                source: full_source,
                destination: full_destination,
            },
            ScalingMode::ResizeAspect => {
                let destination = if source_wider {
                    let height = ((sh as u64 * dw as u64) / sw as u64).max(1) as u32;
                    Rect { x: 0, y: (dh - height) / 2, width: dw, height }
                } else {
                    let width = ((sw as u64 * dh as u64) / sh as u64).max(1) as u32;
                    Rect { x: (dw - width) / 2, y: 0, width, height: dh }
                };
                Placement {
                    source: full_source,
                    destination,
                }
            }
            ScalingMode::ResizeAspectFill => {
                let source = if source_wider {
                    let width = ((dw as u64 * sh as u64) / dh as u64).max(1) as u32;
                    Rect { x: (sw - width) / 2, y: 0, width, height: sh }
                } else {
                    let height = ((dh as u64 * sw as u64) / dw as u64).max(1) as u32;
                    Rect { x: 0, y: (sh - height) / 2, width: sw, height }
                };
                Placement {
                    source,
                    destination: full_destination,
                }
            }
        }
    }
}

/// Affine transform stored in the video track header
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl VideoTransform {
    pub const IDENTITY: VideoTransform = VideoTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn rotation(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for VideoTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Quality presets for video recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordingQuality {
    /// Lower bitrate, good for previews
    Low,
    /// Standard bitrate
    #[default]
    Medium,
    High,
}

impl RecordingQuality {
    /// Recommended bitrate in bits per second
    pub fn bit_rate(&self) -> u32 {
        match self {
            RecordingQuality::Low => 2_500_000,
            RecordingQuality::Medium => 5_000_000,
            RecordingQuality::High => 10_000_000,
        }
    }

    pub fn key_frame_interval(&self) -> u32 {
        match self {
            RecordingQuality::Low => 60,
            RecordingQuality::Medium | RecordingQuality::High => 30,
        }
    }
}

/// Output video description handed to a recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSettings {
    pub file_type: FileType,
    pub codec: Codec,
    /// `None` inherits the video input's size
    pub size: Option<(u32, u32)>,
    pub scaling_mode: ScalingMode,
    /// `None` inherits the video input's transform
    pub transform: Option<VideoTransform>,
    /// Filled from the video input when recording starts
    pub color_properties: Option<ColorProperties>,
}

impl VideoSettings {
    pub fn new(file_type: FileType) -> Self {
        Self {
            file_type,
            ..Self::default()
        }
    }

    /// H.264 settings from a quality preset
    pub fn from_quality(quality: RecordingQuality, expected_frame_rate: f64) -> Self {
        let properties = H264Properties {
            compression: CompressionProperties {
                average_bit_rate: Some(quality.bit_rate()),
                max_key_frame_interval: Some(quality.key_frame_interval()),
                expected_source_frame_rate: Some(expected_frame_rate),
                ..CompressionProperties::default()
            },
            ..H264Properties::default()
        };
        Self {
            codec: Codec::H264(properties),
            ..Self::default()
        }
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }

    pub fn with_scaling_mode(mut self, scaling_mode: ScalingMode) -> Self {
        self.scaling_mode = scaling_mode;
        self
    }

    pub fn with_transform(mut self, transform: VideoTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn validate(&self) -> Result<(), UsageError> {
        if let Some((width, height)) = self.size {
            if width == 0 || height == 0 {
                return Err(UsageError::InvalidSettings(format!(
                    "output size {}x{} is empty",
                    width, height
                )));
            }
            if width % 2 != 0 || height % 2 != 0 {
                return Err(UsageError::InvalidSettings(format!(
                    "output size {}x{} must be even",
                    width, height
                )));
            }
        }

        match (&self.codec, self.file_type) {
            (Codec::Jpeg(_), file_type) if file_type != FileType::Mov => {
                return Err(UsageError::InvalidSettings(format!(
                    "jpeg video requires a mov container, not {}",
                    file_type.extension()
                )));
            }
            (Codec::Hevc(_), FileType::Mobile3gpp) => {
                return Err(UsageError::InvalidSettings(
                    "hevc is not supported in 3gp containers".into(),
                ));
            }
            (Codec::Jpeg(JpegProperties { quality: Some(q) }), _) if !(0.0..=1.0).contains(q) => {
                return Err(UsageError::InvalidSettings(format!(
                    "jpeg quality {} outside 0..=1",
                    q
                )));
            }
            _ => {}
        }

        if let Some(compression) = self.codec.compression() {
            if compression.average_bit_rate == Some(0) {
                return Err(UsageError::InvalidSettings("bit rate must be positive".into()));
            }
            if let Some(fps) = compression.expected_source_frame_rate {
                if !(fps > 0.0) {
                    return Err(UsageError::InvalidSettings(format!(
                        "expected frame rate {} must be positive",
                        fps
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fill inherited fields from the input's format
    pub fn resolved(&self, format: &VideoFormat) -> VideoSettings {
        VideoSettings {
            size: Some(self.size.unwrap_or(format.size)),
            transform: Some(self.transform.unwrap_or(format.transform)),
            color_properties: Some(format.color_properties.clone()),
            ..self.clone()
        }
    }

    /// Output size, once resolved
    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.size
    }

    pub fn expected_frame_rate(&self) -> Option<f64> {
        self.codec
            .compression()
            .and_then(|c| c.expected_source_frame_rate)
    }
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            file_type: FileType::default(),
            codec: Codec::default(),
            size: None,
            scaling_mode: ScalingMode::default(),
            transform: None,
            color_properties: None,
        }
    }
}

/// Audio track description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bits per second
    pub bit_rate: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bit_rate: 128_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aspect_fill_crops_wide_source() {
        let placement = ScalingMode::ResizeAspectFill.placement((1920, 1080), (1080, 1080));
        assert_eq!(placement.source, Rect { x: 420, y: 0, width: 1080, height: 1080 });
        assert_eq!(placement.destination, Rect { x: 0, y: 0, width: 1080, height: 1080 });
    }

    #[test]
    fn test_aspect_letterboxes_wide_source() {
        let placement = ScalingMode::ResizeAspect.placement((1920, 1080), (1080, 1080));
        assert_eq!(placement.destination, Rect { x: 0, y: 236, width: 1080, height: 607 });
    }

    #[test]
    fn test_resize_stretches() {
        let placement = ScalingMode::Resize.placement((640, 480), (1280, 720));
        assert_eq!(placement.source.width, 640);
        assert_eq!(placement.destination.width, 1280);
    }

    #[test]
    fn test_odd_size_is_invalid() {
        let settings = VideoSettings::default().with_size(641, 480);
        assert!(matches!(settings.validate(), Err(UsageError::InvalidSettings(_))));
    }

    #[test]
    fn test_jpeg_requires_mov() {
        let settings = VideoSettings::new(FileType::Mp4).with_codec(Codec::Jpeg(JpegProperties::default()));
        assert!(settings.validate().is_err());
        let settings = VideoSettings::new(FileType::Mov).with_codec(Codec::Jpeg(JpegProperties::default()));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_resolved_inherits_from_input() {
        let format = VideoFormat {
            size: (1280, 720),
            transform: VideoTransform::rotation(std::f64::consts::FRAC_PI_2),
            orientation: crate::output::ImageOrientation::Up,
            color_properties: ColorProperties::wide_gamut(),
        };
        let resolved = VideoSettings::default().resolved(&format);
        assert_eq!(resolved.size, Some((1280, 720)));
        assert_eq!(resolved.transform, Some(format.transform));
        assert_eq!(resolved.color_properties, Some(ColorProperties::wide_gamut()));

        let explicit = VideoSettings::default().with_size(640, 360).resolved(&format);
        assert_eq!(explicit.size, Some((640, 360)));
    }

    #[test]
    fn test_quality_preset() {
        let settings = VideoSettings::from_quality(RecordingQuality::High, 60.0);
        assert_eq!(settings.expected_frame_rate(), Some(60.0));
        assert_eq!(
            settings.codec.compression().unwrap().average_bit_rate,
            Some(10_000_000)
        );
    }

    #[test]
    fn test_settings_json_roundtrip() {
        let settings = VideoSettings::from_quality(RecordingQuality::Low, 30.0).with_size(640, 480);
        let text = serde_json::to_string(&settings).unwrap();
        let parsed: VideoSettings = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, settings);
    }
}
