//! CPU conversion kernels between surface encodings
//!
//! Pixels are decoded to linear light, their alpha is rewritten for the
//! destination alpha type, colours are clamped when the destination cannot
//! hold extended values, and the result is encoded in the destination layout.
//! Premultiplication is applied to linear values.

use super::format::{AlphaType, PixelEncoding, SurfaceFormat};

/// Read-only view over pixel rows
#[derive(Debug, Clone, Copy)]
pub struct ImageView<'a> {
    pub data: &'a [u8],
    pub bytes_per_row: usize,
    pub encoding: PixelEncoding,
}

/// Writable view over pixel rows
#[derive(Debug)]
pub struct ImageViewMut<'a> {
    pub data: &'a mut [u8],
    pub bytes_per_row: usize,
    pub encoding: PixelEncoding,
}

const XR_BIAS: f32 = 384.0;
const XR_SCALE: f32 = 510.0;

#[inline]
fn xr_decode(v: u32) -> f32 {
    (v as f32 - XR_BIAS) / XR_SCALE
}

#[inline]
fn xr_encode(v: f32) -> u32 {
    (v * XR_SCALE + XR_BIAS).round().clamp(0.0, 1023.0) as u32
}

#[inline]
fn unorm_encode(v: f32, max: f32) -> u32 {
    (v.clamp(0.0, 1.0) * max).round() as u32
}

#[inline]
fn word(px: &[u8]) -> u32 {
    u32::from_le_bytes([px[0], px[1], px[2], px[3]])
}

#[inline]
fn half(px: &[u8], index: usize) -> u32 {
    u16::from_le_bytes([px[index * 2], px[index * 2 + 1]]) as u32 >> 6
}

/// Decode one pixel into encoded (not yet linearized) RGBA values
pub fn decode_pixel(format: SurfaceFormat, px: &[u8]) -> [f32; 4] {
    use SurfaceFormat::*;

    match format {
        Bgra8Unorm | Bgra8UnormSrgb => [
            px[2] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[0] as f32 / 255.0,
            px[3] as f32 / 255.0,
        ],
        Rgba8Unorm | Rgba8UnormSrgb => [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
            px[3] as f32 / 255.0,
        ],
        Rgb10a2Unorm => {
            let w = word(px);
            [
                (w & 0x3ff) as f32 / 1023.0,
                ((w >> 10) & 0x3ff) as f32 / 1023.0,
                ((w >> 20) & 0x3ff) as f32 / 1023.0,
                (w >> 30) as f32 / 3.0,
            ]
        }
        Bgr10Xr | Bgr10XrSrgb => {
            let w = word(px);
            [
                xr_decode((w >> 20) & 0x3ff),
                xr_decode((w >> 10) & 0x3ff),
                xr_decode(w & 0x3ff),
                1.0,
            ]
        }
        Bgra10Xr | Bgra10XrSrgb => [
            xr_decode(half(px, 2)),
            xr_decode(half(px, 1)),
            xr_decode(half(px, 0)),
            xr_decode(half(px, 3)).clamp(0.0, 1.0),
        ],
    }
}

/// Encode RGBA values into one pixel
pub fn encode_pixel(format: SurfaceFormat, rgba: [f32; 4], px: &mut [u8]) {
    use SurfaceFormat::*;

    let [r, g, b, a] = rgba;
    match format {
        Bgra8Unorm | Bgra8UnormSrgb => {
            px[0] = unorm_encode(b, 255.0) as u8;
            px[1] = unorm_encode(g, 255.0) as u8;
            px[2] = unorm_encode(r, 255.0) as u8;
            px[3] = unorm_encode(a, 255.0) as u8;
        }
        Rgba8Unorm | Rgba8UnormSrgb => {
            px[0] = unorm_encode(r, 255.0) as u8;
            px[1] = unorm_encode(g, 255.0) as u8;
            px[2] = unorm_encode(b, 255.0) as u8;
            px[3] = unorm_encode(a, 255.0) as u8;
        }
        Rgb10a2Unorm => {
            let w = unorm_encode(r, 1023.0)
                | unorm_encode(g, 1023.0) << 10
                | unorm_encode(b, 1023.0) << 20
                | unorm_encode(a, 3.0) << 30;
            px[..4].copy_from_slice(&w.to_le_bytes());
        }
        Bgr10Xr | Bgr10XrSrgb => {
            let w = xr_encode(b) | xr_encode(g) << 10 | xr_encode(r) << 20;
            px[..4].copy_from_slice(&w.to_le_bytes());
        }
        Bgra10Xr | Bgra10XrSrgb => {
            for (index, value) in [b, g, r, a].into_iter().enumerate() {
                let bits = (xr_encode(value) << 6) as u16;
                px[index * 2..index * 2 + 2].copy_from_slice(&bits.to_le_bytes());
            }
        }
    }
}

/// Convert one decoded pixel between encodings
pub fn convert_pixel(rgba: [f32; 4], source: &PixelEncoding, destination: &PixelEncoding) -> [f32; 4] {
    let alpha = match source.alpha {
        AlphaType::Opaque => 1.0,
        _ => rgba[3].clamp(0.0, 1.0),
    };

    let mut color = [0.0f32; 3];
    for (c, &v) in color.iter_mut().zip(&rgba[..3]) {
        let linear = source.color_space.to_linear(v);
        // straight colour in linear light
        *c = match source.alpha {
            AlphaType::Premultiplied if alpha > 0.0 => linear / alpha,
            AlphaType::Premultiplied => 0.0,
            _ => linear,
        };
    }

    let (factor, out_alpha) = match destination.alpha {
        // composite over black
        AlphaType::Opaque => (alpha, 1.0),
        AlphaType::Premultiplied => (alpha, alpha),
        AlphaType::Straight => (1.0, alpha),
    };

    let mut out = [0.0f32; 4];
    for (o, &c) in out.iter_mut().zip(&color) {
        let mut linear = c * factor;
        if !destination.color_space.is_extended() {
            linear = linear.clamp(0.0, 1.0);
        }
        *o = destination.color_space.from_linear(linear);
    }
    out[3] = out_alpha;
    out
}

/// Convert `width` x `height` pixels from `src` into `dst`
pub fn convert_image(
    src: &ImageView<'_>,
    dst: &mut ImageViewMut<'_>,
    width: u32,
    height: u32,
) -> Result<(), String> {
    let width = width as usize;
    let height = height as usize;
    let src_bpp = src.encoding.format.storage_format().bytes_per_pixel();
    let dst_bpp = dst.encoding.format.storage_format().bytes_per_pixel();

    check_extent("source", src.data.len(), src.bytes_per_row, src_bpp, width, height)?;
    check_extent("destination", dst.data.len(), dst.bytes_per_row, dst_bpp, width, height)?;

    let row_len = width * src_bpp;
    if copies_verbatim(&src.encoding, &dst.encoding) {
        for y in 0..height {
            let s = &src.data[y * src.bytes_per_row..y * src.bytes_per_row + row_len];
            dst.data[y * dst.bytes_per_row..y * dst.bytes_per_row + row_len].copy_from_slice(s);
        }
        return Ok(());
    }

    for y in 0..height {
        let src_row = &src.data[y * src.bytes_per_row..];
        let dst_row = &mut dst.data[y * dst.bytes_per_row..];
        for x in 0..width {
            let decoded = decode_pixel(src.encoding.format, &src_row[x * src_bpp..(x + 1) * src_bpp]);
            let converted = convert_pixel(decoded, &src.encoding, &dst.encoding);
            encode_pixel(
                dst.encoding.format,
                converted,
                &mut dst_row[x * dst_bpp..(x + 1) * dst_bpp],
            );
        }
    }
    Ok(())
}

fn copies_verbatim(source: &PixelEncoding, destination: &PixelEncoding) -> bool {
    if source.format.storage_format() != destination.format.storage_format()
        || source.color_space != destination.color_space
    {
        return false;
    }
    if !source.format.has_alpha() {
        return true;
    }
    // an opaque destination needs its alpha rewritten to one
    source.alpha == destination.alpha && source.alpha != AlphaType::Opaque
}

fn check_extent(
    side: &str,
    len: usize,
    bytes_per_row: usize,
    bytes_per_pixel: usize,
    width: usize,
    height: usize,
) -> Result<(), String> {
    if bytes_per_row < width * bytes_per_pixel {
        return Err(format!(
            "{} rows of {} bytes cannot hold {} pixels",
            side, bytes_per_row, width
        ));
    }
    if height > 0 && len < bytes_per_row * (height - 1) + width * bytes_per_pixel {
        return Err(format!("{} holds {} bytes, too small for {}x{}", side, len, width, height));
    }
    Ok(())
}
