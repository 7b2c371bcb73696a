//! Surface formats, colour semantics and destination selection

use serde::{Deserialize, Serialize};

use crate::buffer::{keys, AttachmentValue, Attachments, PixelFormat};

/// Pixel format of a rendering surface texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SurfaceFormat {
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Rgb10a2Unorm,
    /// 10-bit extended range, linear values, no alpha
    Bgr10Xr,
    /// 10-bit extended range, sRGB-encoded values, no alpha
    Bgr10XrSrgb,
    Bgra10Xr,
    Bgra10XrSrgb,
}

impl SurfaceFormat {
    pub const ALL: [SurfaceFormat; 9] = [
        SurfaceFormat::Bgra8Unorm,
        SurfaceFormat::Bgra8UnormSrgb,
        SurfaceFormat::Rgba8Unorm,
        SurfaceFormat::Rgba8UnormSrgb,
        SurfaceFormat::Rgb10a2Unorm,
        SurfaceFormat::Bgr10Xr,
        SurfaceFormat::Bgr10XrSrgb,
        SurfaceFormat::Bgra10Xr,
        SurfaceFormat::Bgra10XrSrgb,
    ];

    /// Buffer layout backing a texture of this format
    pub fn storage_format(&self) -> PixelFormat {
        match self {
            SurfaceFormat::Bgra8Unorm | SurfaceFormat::Bgra8UnormSrgb => PixelFormat::Bgra32,
            SurfaceFormat::Rgba8Unorm | SurfaceFormat::Rgba8UnormSrgb => PixelFormat::Rgba32,
            SurfaceFormat::Rgb10a2Unorm => PixelFormat::Rgb10A2,
            SurfaceFormat::Bgr10Xr | SurfaceFormat::Bgr10XrSrgb => PixelFormat::Rgb30WideGamut,
            SurfaceFormat::Bgra10Xr | SurfaceFormat::Bgra10XrSrgb => PixelFormat::Bgra64Xr,
        }
    }

    /// Surface format used to read and write a buffer of the given layout
    pub fn for_storage(format: PixelFormat, color_space: ColorSpace) -> SurfaceFormat {
        let linear = color_space == ColorSpace::ExtendedLinearSrgb;
        match format {
            PixelFormat::Bgra32 => SurfaceFormat::Bgra8Unorm,
            PixelFormat::Rgba32 => SurfaceFormat::Rgba8Unorm,
            PixelFormat::Rgb10A2 => SurfaceFormat::Rgb10a2Unorm,
            PixelFormat::Rgb30WideGamut if linear => SurfaceFormat::Bgr10Xr,
            PixelFormat::Rgb30WideGamut => SurfaceFormat::Bgr10XrSrgb,
            PixelFormat::Bgra64Xr if linear => SurfaceFormat::Bgra10Xr,
            PixelFormat::Bgra64Xr => SurfaceFormat::Bgra10XrSrgb,
        }
    }

    pub fn color_space(&self) -> ColorSpace {
        match self {
            SurfaceFormat::Bgr10Xr | SurfaceFormat::Bgra10Xr => ColorSpace::ExtendedLinearSrgb,
            SurfaceFormat::Bgr10XrSrgb | SurfaceFormat::Bgra10XrSrgb => ColorSpace::ExtendedSrgb,
            _ => ColorSpace::Srgb,
        }
    }

    pub fn has_alpha(&self) -> bool {
        self.storage_format().has_alpha()
    }

    pub fn is_extended_range(&self) -> bool {
        self.storage_format().is_wide_gamut()
    }
}

/// How colour values of a surface are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorSpace {
    /// sRGB transfer, values clamped to [0, 1]
    Srgb,
    /// sRGB transfer mirrored for negative values, range beyond [0, 1]
    ExtendedSrgb,
    /// Linear light, range beyond [0, 1]
    ExtendedLinearSrgb,
}

impl ColorSpace {
    pub fn is_extended(&self) -> bool {
        !matches!(self, ColorSpace::Srgb)
    }

    pub fn to_linear(&self, value: f32) -> f32 {
        match self {
            ColorSpace::Srgb => srgb_to_linear(value.clamp(0.0, 1.0)),
            ColorSpace::ExtendedSrgb => value.signum() * srgb_to_linear(value.abs()),
            ColorSpace::ExtendedLinearSrgb => value,
        }
    }

    pub fn from_linear(&self, value: f32) -> f32 {
        match self {
            ColorSpace::Srgb => linear_to_srgb(value.clamp(0.0, 1.0)),
            ColorSpace::ExtendedSrgb => value.signum() * linear_to_srgb(value.abs()),
            ColorSpace::ExtendedLinearSrgb => value,
        }
    }

    /// Stream tags written for buffers in this colour space
    pub fn color_properties(&self) -> ColorProperties {
        match self {
            ColorSpace::Srgb => ColorProperties::standard(),
            ColorSpace::ExtendedSrgb => ColorProperties {
                transfer_function: TransferFunction::Srgb,
                ..ColorProperties::wide_gamut()
            },
            ColorSpace::ExtendedLinearSrgb => ColorProperties::wide_gamut(),
        }
    }
}

fn srgb_to_linear(v: f32) -> f32 {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Meaning of a surface's alpha channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlphaType {
    /// Colour already multiplied by alpha
    Premultiplied,
    /// Colour independent of alpha
    Straight,
    /// Alpha is ignored and treated as one
    Opaque,
}

impl AlphaType {
    /// Value stored under the alpha type attachment
    pub fn tag(&self) -> &'static str {
        match self {
            AlphaType::Premultiplied => "Premultiplied",
            AlphaType::Straight => "Straight",
            AlphaType::Opaque => "Opaque",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Premultiplied" => Some(AlphaType::Premultiplied),
            "Straight" => Some(AlphaType::Straight),
            "Opaque" => Some(AlphaType::Opaque),
            _ => None,
        }
    }

    /// Alpha type recorded on a buffer, if any
    pub fn from_attachments(attachments: &Attachments) -> Option<Self> {
        attachments
            .get(keys::ALPHA_TYPE)
            .and_then(|value| value.as_text())
            .and_then(Self::from_tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorPrimaries {
    ItuR709,
    P3D65,
}

impl ColorPrimaries {
    pub fn tag(&self) -> &'static str {
        match self {
            ColorPrimaries::ItuR709 => "ITU_R_709_2",
            ColorPrimaries::P3D65 => "P3_D65",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferFunction {
    ItuR709,
    Srgb,
    Linear,
}

impl TransferFunction {
    pub fn tag(&self) -> &'static str {
        match self {
            TransferFunction::ItuR709 => "ITU_R_709_2",
            TransferFunction::Srgb => "IEC_sRGB",
            TransferFunction::Linear => "Linear",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum YCbCrMatrix {
    ItuR709,
    ItuR601,
}

impl YCbCrMatrix {
    pub fn tag(&self) -> &'static str {
        match self {
            YCbCrMatrix::ItuR709 => "ITU_R_709_2",
            YCbCrMatrix::ItuR601 => "ITU_R_601_4",
        }
    }
}

/// Colour tags attached to produced buffers and written into the video track
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColorProperties {
    pub primaries: ColorPrimaries,
    pub transfer_function: TransferFunction,
    pub matrix: YCbCrMatrix,
    pub icc_profile: String,
}

impl ColorProperties {
    pub fn standard() -> Self {
        Self {
            primaries: ColorPrimaries::ItuR709,
            transfer_function: TransferFunction::ItuR709,
            matrix: YCbCrMatrix::ItuR709,
            icc_profile: "sRGB IEC61966-2.1".to_string(),
        }
    }

    pub fn wide_gamut() -> Self {
        Self {
            primaries: ColorPrimaries::P3D65,
            transfer_function: TransferFunction::Linear,
            matrix: YCbCrMatrix::ItuR709,
            icc_profile: "Display P3".to_string(),
        }
    }

    /// Colour space whose buffers carry these tags
    pub fn color_space(&self) -> ColorSpace {
        match (self.primaries, self.transfer_function) {
            (ColorPrimaries::ItuR709, _) => ColorSpace::Srgb,
            (ColorPrimaries::P3D65, TransferFunction::Linear) => ColorSpace::ExtendedLinearSrgb,
            (ColorPrimaries::P3D65, _) => ColorSpace::ExtendedSrgb,
        }
    }

    pub fn to_attachments(&self) -> Attachments {
        let mut attachments = Attachments::new();
        attachments.insert(keys::COLOR_PRIMARIES.into(), self.primaries.tag().into());
        attachments.insert(
            keys::TRANSFER_FUNCTION.into(),
            self.transfer_function.tag().into(),
        );
        attachments.insert(keys::YCBCR_MATRIX.into(), self.matrix.tag().into());
        attachments.insert(
            keys::ICC_PROFILE.into(),
            AttachmentValue::Text(self.icc_profile.clone()),
        );
        attachments
    }

    /// Read tags back from a buffer's attachments
    pub fn from_attachments(attachments: &Attachments) -> Option<Self> {
        let text = |key: &str| attachments.get(key).and_then(|v| v.as_text());

        let primaries = match text(keys::COLOR_PRIMARIES)? {
            "ITU_R_709_2" => ColorPrimaries::ItuR709,
            "P3_D65" => ColorPrimaries::P3D65,
            _ => return None,
        };
        let transfer_function = match text(keys::TRANSFER_FUNCTION)? {
            "ITU_R_709_2" => TransferFunction::ItuR709,
            "IEC_sRGB" => TransferFunction::Srgb,
            "Linear" => TransferFunction::Linear,
            _ => return None,
        };
        let matrix = match text(keys::YCBCR_MATRIX) {
            Some("ITU_R_601_4") => YCbCrMatrix::ItuR601,
            _ => YCbCrMatrix::ItuR709,
        };
        let icc_profile = text(keys::ICC_PROFILE).unwrap_or_default().to_string();

        Some(Self {
            primaries,
            transfer_function,
            matrix,
            icc_profile,
        })
    }
}

impl Default for ColorProperties {
    fn default() -> Self {
        Self::standard()
    }
}

/// Knobs for choosing a conversion destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOptions {
    /// Keep 10-bit extended range output instead of down-converting to 8-bit sRGB
    pub allow_wide_gamut: bool,
    /// Alpha semantics of produced buffers
    pub destination_alpha: AlphaType,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            allow_wide_gamut: false,
            destination_alpha: AlphaType::Opaque,
        }
    }
}

/// Pixel semantics of one end of a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelEncoding {
    pub format: SurfaceFormat,
    pub color_space: ColorSpace,
    pub alpha: AlphaType,
}

impl PixelEncoding {
    pub fn new(format: SurfaceFormat, alpha: AlphaType) -> Self {
        Self {
            format,
            color_space: format.color_space(),
            alpha: if format.has_alpha() {
                alpha
            } else {
                AlphaType::Opaque
            },
        }
    }
}

/// Source and destination semantics of one surface conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversionPlan {
    pub source: PixelEncoding,
    pub destination: PixelEncoding,
}

impl ConversionPlan {
    /// Pick the destination for a surface
    ///
    /// A surface whose storage is encodable keeps its format. Otherwise
    /// 8-bit and 10:10:10:2 surfaces become 8-bit sRGB, and extended range
    /// surfaces become 10-bit wide gamut when allowed, 8-bit sRGB when not.
    pub fn select(source: SurfaceFormat, source_alpha: AlphaType, options: &ConversionOptions) -> Self {
        use SurfaceFormat::*;

        let wide = options.allow_wide_gamut;
        let destination = match source {
            Bgra8Unorm | Bgra8UnormSrgb => source,
            Rgba8Unorm | Rgb10a2Unorm => Bgra8Unorm,
            Rgba8UnormSrgb => Bgra8UnormSrgb,
            Bgr10Xr | Bgr10XrSrgb if wide => source,
            Bgra10Xr if wide => Bgr10Xr,
            Bgra10XrSrgb if wide => Bgr10XrSrgb,
            Bgr10Xr | Bgr10XrSrgb | Bgra10Xr | Bgra10XrSrgb => Bgra8Unorm,
        };

        Self {
            source: PixelEncoding::new(source, source_alpha),
            destination: PixelEncoding::new(destination, options.destination_alpha),
        }
    }

    /// Destination keeps the source's buffer layout
    pub fn is_direct(&self) -> bool {
        self.source.format.storage_format() == self.destination.format.storage_format()
    }

    pub fn destination_format(&self) -> PixelFormat {
        self.destination.format.storage_format()
    }

    pub fn destination_color_properties(&self) -> ColorProperties {
        self.destination.color_space.color_properties()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_destination_is_encodable() {
        for wide in [false, true] {
            let options = ConversionOptions {
                allow_wide_gamut: wide,
                destination_alpha: AlphaType::Premultiplied,
            };
            for format in SurfaceFormat::ALL {
                let plan = ConversionPlan::select(format, AlphaType::Premultiplied, &options);
                assert!(
                    plan.destination_format().is_encodable(),
                    "{:?} -> {:?}",
                    format,
                    plan.destination.format
                );
            }
        }
    }

    #[test]
    fn test_extended_formats_downconvert_to_srgb() {
        let options = ConversionOptions::default();
        for format in [SurfaceFormat::Bgr10Xr, SurfaceFormat::Bgra10XrSrgb] {
            let plan = ConversionPlan::select(format, AlphaType::Premultiplied, &options);
            assert_eq!(plan.destination_format(), PixelFormat::Bgra32);
            assert_eq!(plan.destination.color_space, ColorSpace::Srgb);
            assert_eq!(plan.destination_color_properties(), ColorProperties::standard());
        }
    }

    #[test]
    fn test_wide_gamut_kept_when_allowed() {
        let options = ConversionOptions {
            allow_wide_gamut: true,
            ..ConversionOptions::default()
        };
        let plan = ConversionPlan::select(SurfaceFormat::Bgr10Xr, AlphaType::Opaque, &options);
        assert!(plan.is_direct());
        assert_eq!(plan.destination_format(), PixelFormat::Rgb30WideGamut);
        assert_eq!(plan.destination_color_properties().primaries, ColorPrimaries::P3D65);

        let plan = ConversionPlan::select(SurfaceFormat::Bgra10Xr, AlphaType::Straight, &options);
        assert!(!plan.is_direct());
        // the destination has no alpha channel, so alpha is resolved during conversion
        assert_eq!(plan.destination.alpha, AlphaType::Opaque);
        assert_eq!(plan.source.alpha, AlphaType::Straight);
    }

    #[test]
    fn test_alpha_less_source_is_opaque() {
        let plan = ConversionPlan::select(
            SurfaceFormat::Bgr10Xr,
            AlphaType::Premultiplied,
            &ConversionOptions::default(),
        );
        assert_eq!(plan.source.alpha, AlphaType::Opaque);
    }

    #[test]
    fn test_transfer_round_trip() {
        for space in [ColorSpace::Srgb, ColorSpace::ExtendedSrgb, ColorSpace::ExtendedLinearSrgb] {
            for v in [0.0f32, 0.002, 0.2, 0.5, 1.0] {
                let back = space.from_linear(space.to_linear(v));
                assert!((back - v).abs() < 1e-5, "{:?} {}", space, v);
            }
        }
        assert!(ColorSpace::ExtendedSrgb.to_linear(-0.5) < 0.0);
        assert_eq!(ColorSpace::Srgb.to_linear(1.5), 1.0);
    }

    #[test]
    fn test_color_properties_attachment_round_trip() {
        let props = ColorSpace::ExtendedSrgb.color_properties();
        let parsed = ColorProperties::from_attachments(&props.to_attachments()).unwrap();
        assert_eq!(parsed, props);
        assert_eq!(parsed.color_space(), ColorSpace::ExtendedSrgb);
    }
}
