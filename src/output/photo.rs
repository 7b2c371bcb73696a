//! Still-image and pixel-buffer outputs

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::buffer::{AttachmentMode, PixelBuffer};
use crate::errors::FramemuxError;
use crate::gpu::{
    convert_image, AlphaType, ColorProperties, ColorSpace, ImageView, ImageViewMut,
    PixelEncoding, SurfaceFormat,
};
use crate::session::{OutputId, VideoConsumer, WeakSession};

/// Orientation of stored pixels relative to the upright image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ImageOrientation {
    #[default]
    Up,
    /// Rotated 180 degrees
    Down,
    /// Rotated 90 degrees counterclockwise
    Left,
    /// Rotated 90 degrees clockwise
    Right,
    UpMirrored,
    DownMirrored,
    LeftMirrored,
    RightMirrored,
}

impl ImageOrientation {
    /// EXIF orientation tag value
    pub fn exif(&self) -> u16 {
        match self {
            ImageOrientation::Up => 1,
            ImageOrientation::UpMirrored => 2,
            ImageOrientation::Down => 3,
            ImageOrientation::DownMirrored => 4,
            ImageOrientation::LeftMirrored => 5,
            ImageOrientation::Right => 6,
            ImageOrientation::RightMirrored => 7,
            ImageOrientation::Left => 8,
        }
    }

    /// Width and height swap when the image is displayed upright
    pub fn is_transposed(&self) -> bool {
        matches!(
            self,
            ImageOrientation::Left
                | ImageOrientation::Right
                | ImageOrientation::LeftMirrored
                | ImageOrientation::RightMirrored
        )
    }

    /// Rotate and flip `image` into upright display orientation
    pub fn apply(&self, image: &RgbaImage) -> RgbaImage {
        match self {
            ImageOrientation::Up => image.clone(),
            ImageOrientation::Down => imageops::rotate180(image),
            ImageOrientation::Left => imageops::rotate270(image),
            ImageOrientation::Right => imageops::rotate90(image),
            ImageOrientation::UpMirrored => imageops::flip_horizontal(image),
            ImageOrientation::DownMirrored => imageops::flip_vertical(image),
            ImageOrientation::LeftMirrored => imageops::flip_horizontal(&imageops::rotate270(image)),
            ImageOrientation::RightMirrored => imageops::flip_horizontal(&imageops::rotate90(image)),
        }
    }
}

/// A captured still frame
#[derive(Debug, Clone)]
pub struct Photo {
    image: RgbaImage,
    scale: f64,
    orientation: ImageOrientation,
}

impl Photo {
    pub fn from_buffer(
        buffer: &PixelBuffer,
        scale: f64,
        orientation: ImageOrientation,
    ) -> Result<Self, FramemuxError> {
        Ok(Self {
            image: buffer_to_rgba(buffer)?,
            scale,
            orientation,
        })
    }

    /// Pixels as captured, before orientation is applied
    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Pixels per point
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn orientation(&self) -> ImageOrientation {
        self.orientation
    }

    /// Upright size in points
    pub fn size(&self) -> (f64, f64) {
        let (w, h) = self.image.dimensions();
        let (w, h) = if self.orientation.is_transposed() {
            (h, w)
        } else {
            (w, h)
        };
        let scale = if self.scale > 0.0 { self.scale } else { 1.0 };
        (w as f64 / scale, h as f64 / scale)
    }

    /// Pixels rotated into display orientation
    pub fn oriented(&self) -> RgbaImage {
        self.orientation.apply(&self.image)
    }

    /// Save the upright image; the format follows the file extension
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), FramemuxError> {
        let path = path.as_ref();
        self.oriented().save(path)?;
        log::info!("Saved photo to {}", path.display());
        Ok(())
    }
}

/// Convert a produced buffer to straight-alpha 8-bit sRGB
///
/// Untagged buffers are read as premultiplied.
pub(crate) fn buffer_to_rgba(buffer: &PixelBuffer) -> Result<RgbaImage, FramemuxError> {
    let tags = buffer.attachments(AttachmentMode::ShouldPropagate);
    let color_space = ColorProperties::from_attachments(&tags)
        .map(|properties| properties.color_space())
        .unwrap_or(ColorSpace::Srgb);
    let alpha = AlphaType::from_attachments(&tags).unwrap_or(AlphaType::Premultiplied);
    let format = SurfaceFormat::for_storage(buffer.format(), color_space);

    let (width, height) = (buffer.width(), buffer.height());
    let mut pixels = vec![0u8; width as usize * height as usize * 4];
    {
        let data = buffer.read()?;
        let source = ImageView {
            data: &data,
            bytes_per_row: buffer.bytes_per_row(),
            encoding: PixelEncoding::new(format, alpha),
        };
        let mut destination = ImageViewMut {
            data: &mut pixels,
            bytes_per_row: width as usize * 4,
            encoding: PixelEncoding::new(SurfaceFormat::Rgba8UnormSrgb, AlphaType::Straight),
        };
        convert_image(&source, &mut destination, width, height).map_err(FramemuxError::Image)?;
    }

    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| FramemuxError::Image("pixel data does not fill the image".into()))
}

type OneShotHandler = Box<dyn FnOnce(PixelBuffer, f64) + Send + 'static>;

/// Takes the first frame it sees, then unregisters itself
pub(crate) struct OneShotOutput {
    id: OutputId,
    session: WeakSession,
    handler: Mutex<Option<OneShotHandler>>,
}

impl OneShotOutput {
    pub(crate) fn new(id: OutputId, session: WeakSession, handler: OneShotHandler) -> Self {
        Self {
            id,
            session,
            handler: Mutex::new(Some(handler)),
        }
    }
}

impl VideoConsumer for OneShotOutput {
    fn append_video_buffer(&self, buffer: PixelBuffer, time: f64) {
        let handler = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handler) = handler else {
            return;
        };
        handler(buffer, time);
        if let Some(session) = self.session.upgrade() {
            session.remove_video_output(self.id);
        }
    }
}

type FrameCallback = Arc<dyn Fn(PixelBuffer, f64) + Send + Sync + 'static>;

/// Hands every frame to a callback
pub(crate) struct PixelBufferOutput {
    handler: FrameCallback,
}

impl PixelBufferOutput {
    pub(crate) fn new(handler: FrameCallback) -> Self {
        Self { handler }
    }
}

impl VideoConsumer for PixelBufferOutput {
    fn append_video_buffer(&self, buffer: PixelBuffer, time: f64) {
        (self.handler)(buffer, time);
    }
}

/// Keeps a continuous pixel-buffer capture registered
///
/// The capture stops on [`CaptureToken::stop`] or when the token is dropped.
pub struct CaptureToken {
    id: OutputId,
    session: WeakSession,
    active: AtomicBool,
}

impl CaptureToken {
    pub(crate) fn new(id: OutputId, session: WeakSession) -> Self {
        Self {
            id,
            session,
            active: AtomicBool::new(true),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            if let Some(session) = self.session.upgrade() {
                session.remove_video_output(self.id);
            }
        }
    }
}

impl Drop for CaptureToken {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CaptureToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureToken")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{keys, PixelFormat};

    fn bgra(width: u32, height: u32, pixel: [u8; 4]) -> PixelBuffer {
        let buffer = PixelBuffer::new(width, height, PixelFormat::Bgra32).unwrap();
        {
            let stride = buffer.bytes_per_row();
            let mut data = buffer.write().unwrap();
            for y in 0..height as usize {
                for x in 0..width as usize {
                    data[y * stride + x * 4..y * stride + x * 4 + 4].copy_from_slice(&pixel);
                }
            }
        }
        buffer
    }

    #[test]
    fn test_buffer_to_rgba_swizzles() {
        let image = buffer_to_rgba(&bgra(3, 2, [10, 20, 200, 255])).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(2, 1).0, [200, 20, 10, 255]);
    }

    #[test]
    fn test_buffer_to_rgba_follows_alpha_tag() {
        let straight = bgra(2, 2, [0, 0, 100, 128]);
        straight.set_attachment(keys::ALPHA_TYPE, "Straight".into(), AttachmentMode::ShouldPropagate);
        let [r, _, _, a] = buffer_to_rgba(&straight).unwrap().get_pixel(1, 1).0;
        assert!(r.abs_diff(100) <= 1, "red {}", r);
        assert_eq!(a, 128);

        // untagged is premultiplied, so red is divided by alpha
        let untagged = bgra(2, 2, [0, 0, 100, 128]);
        let [r, _, _, _] = buffer_to_rgba(&untagged).unwrap().get_pixel(1, 1).0;
        assert!(r > 120, "red {}", r);
    }

    #[test]
    fn test_orientation_swaps_dimensions() {
        let photo = Photo::from_buffer(&bgra(4, 2, [0, 0, 0, 255]), 2.0, ImageOrientation::Right).unwrap();
        assert_eq!(photo.oriented().dimensions(), (2, 4));
        assert_eq!(photo.size(), (1.0, 2.0));
    }

    #[test]
    fn test_down_rotates_pixels() {
        let mut image = RgbaImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        let rotated = ImageOrientation::Down.apply(&image);
        assert_eq!(rotated.get_pixel(1, 0).0, [255, 0, 0, 255]);
    }

    #[test]
    fn test_photo_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let photo = Photo::from_buffer(&bgra(8, 8, [0, 255, 0, 255]), 1.0, ImageOrientation::Up).unwrap();
        photo.save(&path).unwrap();

        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.get_pixel(0, 0).0, [0, 255, 0, 255]);
    }
}
