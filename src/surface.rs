//! Rendering surface contract
//!
//! The rendering backend exposes its last presented texture through
//! [`RenderSurface`]. Backends that do not want to implement the trait can
//! hand their textures to a [`SurfaceSlot`] after every present.

use std::sync::{Mutex, PoisonError};

use crate::buffer::Texture;
use crate::gpu::{AlphaType, SurfaceFormat};
use crate::output::{ImageOrientation, VideoTransform};

pub trait RenderSurface: Send + Sync {
    /// Texture of the most recently presented frame
    fn last_texture(&self) -> Option<Texture>;

    fn format(&self) -> SurfaceFormat;

    fn alpha_type(&self) -> AlphaType;

    /// Drawable size in pixels
    fn drawable_size(&self) -> (u32, u32);

    /// Transform a recording of this surface should carry
    fn transform(&self) -> VideoTransform {
        VideoTransform::IDENTITY
    }

    fn orientation(&self) -> ImageOrientation {
        ImageOrientation::Up
    }
}

/// A [`RenderSurface`] fed by the render loop
pub struct SurfaceSlot {
    format: SurfaceFormat,
    alpha_type: AlphaType,
    size: Mutex<(u32, u32)>,
    transform: VideoTransform,
    orientation: ImageOrientation,
    texture: Mutex<Option<Texture>>,
}

impl SurfaceSlot {
    pub fn new(format: SurfaceFormat, alpha_type: AlphaType, size: (u32, u32)) -> Self {
        Self {
            format,
            alpha_type,
            size: Mutex::new(size),
            transform: VideoTransform::IDENTITY,
            orientation: ImageOrientation::Up,
            texture: Mutex::new(None),
        }
    }

    pub fn with_transform(mut self, transform: VideoTransform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_orientation(mut self, orientation: ImageOrientation) -> Self {
        self.orientation = orientation;
        self
    }

    /// Record `texture` as the latest frame
    ///
    /// # Panics
    /// Panics when the texture's format differs from the slot's.
    pub fn present(&self, texture: Texture) {
        assert_eq!(
            texture.format(),
            self.format,
            "presented texture must match the surface format"
        );
        *self.size.lock().unwrap_or_else(PoisonError::into_inner) =
            (texture.width(), texture.height());
        *self.texture.lock().unwrap_or_else(PoisonError::into_inner) = Some(texture);
    }

    pub fn clear(&self) {
        self.texture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl RenderSurface for SurfaceSlot {
    fn last_texture(&self) -> Option<Texture> {
        self.texture
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn format(&self) -> SurfaceFormat {
        self.format
    }

    fn alpha_type(&self) -> AlphaType {
        self.alpha_type
    }

    fn drawable_size(&self) -> (u32, u32) {
        *self.size.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transform(&self) -> VideoTransform {
        self.transform
    }

    fn orientation(&self) -> ImageOrientation {
        self.orientation
    }
}

impl std::fmt::Debug for SurfaceSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceSlot")
            .field("format", &self.format)
            .field("alpha_type", &self.alpha_type)
            .field("size", &self.drawable_size())
            .finish()
    }
}
