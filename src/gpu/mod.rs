//! GPU device abstraction and surface conversion
//!
//! A [`GpuDevice`] creates texture caches and executes conversion passes
//! asynchronously. [`SoftwareDevice`] runs passes on a CPU worker queue and
//! is what the crate uses when no hardware device is supplied.

mod convert;
mod format;
mod software;

pub use convert::{convert_image, convert_pixel, decode_pixel, encode_pixel, ImageView, ImageViewMut};
pub use format::{
    AlphaType, ColorPrimaries, ColorProperties, ColorSpace, ConversionOptions, ConversionPlan,
    PixelEncoding, SurfaceFormat, TransferFunction, YCbCrMatrix,
};
pub use software::SoftwareDevice;

use std::sync::Arc;

use crate::buffer::{Texture, TextureCache, TextureUsage};
use crate::errors::{ProducerError, TextureError};

/// Called once a submitted pass has finished on the GPU
pub type PassCompletion = Box<dyn FnOnce(Result<(), ProducerError>) + Send + 'static>;

pub trait GpuDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Create a cache that binds pixel buffers to textures with `usage`
    fn create_texture_cache(
        &self,
        usage: TextureUsage,
    ) -> Result<Arc<dyn TextureCache>, TextureError>;

    /// Queue `pass`; `completion` runs when it has executed
    fn submit(&self, pass: ConversionPass, completion: PassCompletion);
}

/// One surface-to-buffer conversion
#[derive(Debug, Clone)]
pub struct ConversionPass {
    pub source: Texture,
    pub destination: Texture,
    pub plan: ConversionPlan,
}

impl ConversionPass {
    pub fn new(source: Texture, destination: Texture, plan: ConversionPlan) -> Self {
        Self {
            source,
            destination,
            plan,
        }
    }

    /// Run the pass on the calling thread
    pub fn execute(&self) -> Result<(), ProducerError> {
        let src = self.source.buffer();
        let dst = self.destination.buffer();
        if src.ptr_eq(dst) {
            return Err(ProducerError::Conversion(
                "source and destination share a buffer".into(),
            ));
        }
        if src.width() != dst.width() || src.height() != dst.height() {
            return Err(ProducerError::Conversion(format!(
                "extent mismatch {}x{} -> {}x{}",
                src.width(),
                src.height(),
                dst.width(),
                dst.height()
            )));
        }

        let source_data = src.read()?;
        let mut destination_data = dst.write()?;
        let source_view = ImageView {
            data: &source_data,
            bytes_per_row: src.bytes_per_row(),
            encoding: self.plan.source,
        };
        let mut destination_view = ImageViewMut {
            data: &mut destination_data,
            bytes_per_row: dst.bytes_per_row(),
            encoding: self.plan.destination,
        };
        convert_image(&source_view, &mut destination_view, src.width(), src.height())
            .map_err(ProducerError::Conversion)
    }
}
