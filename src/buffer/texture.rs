//! GPU texture views over pooled pixel buffers

use std::sync::Arc;

use super::factory::PoolFactory;
use super::pixel::{Attachments, PixelBuffer, PoolKey};
use super::pool::PixelBufferPool;
use crate::errors::TextureError;
use crate::gpu::{GpuDevice, SurfaceFormat};

/// Shape of a texture; must match its backing buffer exactly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureAttributes {
    pub width: u32,
    pub height: u32,
    pub format: SurfaceFormat,
    pub plane_index: usize,
}

impl TextureAttributes {
    pub fn new(width: u32, height: u32, format: SurfaceFormat) -> Self {
        Self {
            width,
            height,
            format,
            plane_index: 0,
        }
    }

    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new(self.width, self.height, self.format.storage_format())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureUsage {
    pub shader_read: bool,
    pub shader_write: bool,
    pub render_target: bool,
}

impl TextureUsage {
    /// Destination of a conversion pass
    pub const CONVERSION_TARGET: TextureUsage = TextureUsage {
        shader_read: true,
        shader_write: true,
        render_target: true,
    };

    /// Readable render target, what a recordable surface hands out
    pub const READABLE_RENDER_TARGET: TextureUsage = TextureUsage {
        shader_read: true,
        shader_write: false,
        render_target: true,
    };

    /// Render target the GPU may not read back
    pub const FRAMEBUFFER_ONLY: TextureUsage = TextureUsage {
        shader_read: false,
        shader_write: false,
        render_target: true,
    };
}

/// A GPU view over a pixel buffer
#[derive(Debug, Clone)]
pub struct Texture {
    attributes: TextureAttributes,
    usage: TextureUsage,
    buffer: PixelBuffer,
}

impl Texture {
    /// Wrap `buffer` as a texture
    ///
    /// # Panics
    /// Panics when the attributes do not describe `buffer`.
    pub fn new(buffer: PixelBuffer, attributes: TextureAttributes, usage: TextureUsage) -> Self {
        assert_eq!(
            attributes.pool_key(),
            buffer.key(),
            "texture attributes must match the backing buffer"
        );
        assert_eq!(attributes.plane_index, 0, "packed formats have a single plane");
        Self {
            attributes,
            usage,
            buffer,
        }
    }

    pub fn attributes(&self) -> &TextureAttributes {
        &self.attributes
    }

    pub fn usage(&self) -> TextureUsage {
        self.usage
    }

    pub fn format(&self) -> SurfaceFormat {
        self.attributes.format
    }

    pub fn width(&self) -> u32 {
        self.attributes.width
    }

    pub fn height(&self) -> u32 {
        self.attributes.height
    }

    pub fn is_readable(&self) -> bool {
        self.usage.shader_read
    }

    pub fn buffer(&self) -> &PixelBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> PixelBuffer {
        self.buffer
    }
}

/// Binds pixel buffers to GPU textures
pub trait TextureCache: Send + Sync {
    /// Import `buffer` as a texture described by `attributes`
    fn create_texture(
        &self,
        buffer: &PixelBuffer,
        attributes: &TextureAttributes,
    ) -> Result<Texture, TextureError>;

    /// Release stale texture bindings
    fn flush(&self) {}
}

/// Hands out writable textures backed by one pixel buffer pool
pub struct TexturePool {
    attributes: TextureAttributes,
    pool: PixelBufferPool,
    cache: Arc<dyn TextureCache>,
}

impl TexturePool {
    pub fn new(
        device: &dyn GpuDevice,
        pools: &PoolFactory,
        attributes: TextureAttributes,
    ) -> Result<Self, TextureError> {
        let pool = pools.pool(attributes.pool_key())?;
        let cache = device.create_texture_cache(TextureUsage::CONVERSION_TARGET)?;
        Ok(Self {
            attributes,
            pool,
            cache,
        })
    }

    pub fn attributes(&self) -> &TextureAttributes {
        &self.attributes
    }

    pub fn pool(&self) -> &PixelBufferPool {
        &self.pool
    }

    pub fn get_texture(
        &self,
        propagated: Option<&Attachments>,
        non_propagated: Option<&Attachments>,
    ) -> Result<Texture, TextureError> {
        let buffer = self.pool.get_buffer_with(propagated, non_propagated)?;
        self.cache.create_texture(&buffer, &self.attributes)
    }
}

impl std::fmt::Debug for TexturePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TexturePool")
            .field("attributes", &self.attributes)
            .field("pool", &self.pool)
            .finish()
    }
}
