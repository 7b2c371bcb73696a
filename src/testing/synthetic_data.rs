//! Synthetic frames, audio and a self-rendering surface
//!
//! Lets the whole capture path run offline: no GPU, no window, no microphone.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::buffer::{PixelBuffer, PixelBufferPool, PoolKey, Texture, TextureAttributes, TextureUsage};
use crate::errors::PoolError;
use crate::gpu::{encode_pixel, AlphaType, SurfaceFormat};
use crate::output::{ImageOrientation, VideoTransform};
use crate::session::AudioSamples;
use crate::surface::{RenderSurface, SurfaceSlot};

/// Fill `buffer` with a gradient that moves with `frame_number`
///
/// Values are written through the surface format's own encoding, so
/// extended-range formats get in-range values only.
pub fn fill_gradient(buffer: &PixelBuffer, format: SurfaceFormat, frame_number: u64) -> Result<(), PoolError> {
    assert_eq!(format.storage_format(), buffer.format());

    let bpp = buffer.format().bytes_per_pixel();
    let stride = buffer.bytes_per_row();
    let (width, height) = (buffer.width() as usize, buffer.height() as usize);
    let shift = (frame_number % 256) as f32 / 255.0;

    let mut data = buffer.write()?;
    for y in 0..height {
        let row = &mut data[y * stride..];
        for x in 0..width {
            let r = (x as f32 / width.max(1) as f32 + shift).fract();
            let g = (y as f32 / height.max(1) as f32 + shift).fract();
            let b = ((x + y) as f32 / (width + height).max(1) as f32 + shift).fract();
            encode_pixel(format, [r, g, b, 1.0], &mut row[x * bpp..(x + 1) * bpp]);
        }
    }
    Ok(())
}

/// A standalone gradient frame
pub fn synthetic_video_frame(
    frame_number: u64,
    width: u32,
    height: u32,
    format: SurfaceFormat,
) -> Result<PixelBuffer, PoolError> {
    let buffer = PixelBuffer::new(width, height, format.storage_format())?;
    fill_gradient(&buffer, format, frame_number)?;
    Ok(buffer)
}

/// 440 Hz tone at 48 kHz stereo, continuous across consecutive frame numbers
pub fn synthetic_audio_samples(frame_number: u64, samples_per_frame: usize) -> AudioSamples {
    let sample_rate = 48000.0;
    let frequency = 440.0;
    let channels = 2;

    let mut samples = vec![0.0f32; samples_per_frame * channels];
    for i in 0..samples_per_frame {
        let t = (frame_number as f64 * samples_per_frame as f64 + i as f64) / sample_rate;
        let value = (2.0 * std::f64::consts::PI * frequency * t).sin() as f32 * 0.3;
        samples[i * channels] = value;
        samples[i * channels + 1] = value;
    }

    let timestamp = (frame_number as f64 * samples_per_frame as f64) / sample_rate;
    AudioSamples::new(samples, 48000, 2, timestamp)
}

/// Render surface that draws a moving gradient on [`SyntheticSurface::render_next`]
pub struct SyntheticSurface {
    slot: SurfaceSlot,
    pool: PixelBufferPool,
    attributes: TextureAttributes,
    usage: TextureUsage,
    frame: AtomicU64,
}

impl SyntheticSurface {
    pub fn new(width: u32, height: u32, format: SurfaceFormat) -> Result<Self, PoolError> {
        let attributes = TextureAttributes::new(width, height, format);
        Ok(Self {
            slot: SurfaceSlot::new(format, AlphaType::Premultiplied, (width, height)),
            pool: PixelBufferPool::new(PoolKey::new(width, height, format.storage_format()), 0)?,
            attributes,
            usage: TextureUsage::READABLE_RENDER_TARGET,
            frame: AtomicU64::new(0),
        })
    }

    /// Hand out textures the GPU cannot read back
    pub fn framebuffer_only(mut self) -> Self {
        self.usage = TextureUsage::FRAMEBUFFER_ONLY;
        self
    }

    pub fn with_orientation(mut self, orientation: ImageOrientation) -> Self {
        self.slot = self.slot.with_orientation(orientation);
        self
    }

    pub fn with_transform(mut self, transform: VideoTransform) -> Self {
        self.slot = self.slot.with_transform(transform);
        self
    }

    /// Draw and present the next frame; returns its number
    pub fn render_next(&self) -> Result<u64, PoolError> {
        let frame = self.frame.fetch_add(1, Ordering::Relaxed);
        let buffer = self.pool.get_buffer()?;
        fill_gradient(&buffer, self.attributes.format, frame)?;
        self.slot
            .present(Texture::new(buffer, self.attributes, self.usage));
        Ok(frame)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }
}

impl RenderSurface for SyntheticSurface {
    fn last_texture(&self) -> Option<Texture> {
        self.slot.last_texture()
    }

    fn format(&self) -> SurfaceFormat {
        self.slot.format()
    }

    fn alpha_type(&self) -> AlphaType {
        self.slot.alpha_type()
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.slot.drawable_size()
    }

    fn transform(&self) -> VideoTransform {
        self.slot.transform()
    }

    fn orientation(&self) -> ImageOrientation {
        self.slot.orientation()
    }
}
