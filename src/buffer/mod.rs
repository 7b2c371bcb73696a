//! Pixel buffers, buffer pools and GPU texture pools

mod factory;
mod pixel;
mod pool;
mod texture;

pub use factory::{PoolFactory, DEFAULT_ALLOCATION_THRESHOLD};
pub use pixel::{
    keys, AttachmentMode, AttachmentValue, Attachments, PixelBuffer, PixelFormat, PoolKey,
    BYTES_PER_ROW_ALIGNMENT,
};
pub use pool::PixelBufferPool;
pub use texture::{Texture, TextureAttributes, TextureCache, TexturePool, TextureUsage};
