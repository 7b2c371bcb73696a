//! CPU-backed GPU device

use std::sync::Arc;

use super::{ConversionPass, GpuDevice, PassCompletion};
use crate::buffer::{PixelBuffer, Texture, TextureAttributes, TextureCache, TextureUsage};
use crate::errors::TextureError;
use crate::queue::SerialQueue;

const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 16384;

/// Executes conversion passes in submission order on a worker thread
pub struct SoftwareDevice {
    queue: Arc<SerialQueue>,
    max_texture_dimension: u32,
    supports_shader_write: bool,
}

impl SoftwareDevice {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            queue: Arc::new(SerialQueue::new("framemux-gpu")?),
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
            supports_shader_write: true,
        })
    }

    pub fn with_max_texture_dimension(mut self, dimension: u32) -> Self {
        self.max_texture_dimension = dimension;
        self
    }

    /// Simulate a device that cannot write textures from shaders
    pub fn without_shader_write(mut self) -> Self {
        self.supports_shader_write = false;
        self
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    /// Block until every submitted pass has completed
    pub fn wait_idle(&self) {
        self.queue.barrier();
    }
}

impl GpuDevice for SoftwareDevice {
    fn name(&self) -> &str {
        "software"
    }

    fn create_texture_cache(
        &self,
        usage: TextureUsage,
    ) -> Result<Arc<dyn TextureCache>, TextureError> {
        if usage.shader_write && !self.supports_shader_write {
            return Err(TextureError::CacheCreation(
                "device does not support shader writes".into(),
            ));
        }
        Ok(Arc::new(SoftwareTextureCache {
            usage,
            max_texture_dimension: self.max_texture_dimension,
        }))
    }

    fn submit(&self, pass: ConversionPass, completion: PassCompletion) {
        self.queue.dispatch(move || {
            let result = pass.execute();
            if let Err(e) = &result {
                log::warn!("Conversion pass failed: {}", e);
            }
            completion(result);
        });
    }
}

impl std::fmt::Debug for SoftwareDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareDevice")
            .field("max_texture_dimension", &self.max_texture_dimension)
            .field("supports_shader_write", &self.supports_shader_write)
            .finish()
    }
}

struct SoftwareTextureCache {
    usage: TextureUsage,
    max_texture_dimension: u32,
}

impl TextureCache for SoftwareTextureCache {
    fn create_texture(
        &self,
        buffer: &PixelBuffer,
        attributes: &TextureAttributes,
    ) -> Result<Texture, TextureError> {
        if attributes.plane_index != 0 {
            return Err(TextureError::TextureCreation(format!(
                "plane {} does not exist in a packed buffer",
                attributes.plane_index
            )));
        }
        if attributes.width > self.max_texture_dimension
            || attributes.height > self.max_texture_dimension
        {
            return Err(TextureError::TextureCreation(format!(
                "{}x{} exceeds the device limit of {}",
                attributes.width, attributes.height, self.max_texture_dimension
            )));
        }
        if attributes.pool_key() != buffer.key() {
            return Err(TextureError::TextureCreation(format!(
                "{:?} cannot view a {}x{} {:?} buffer",
                attributes.format,
                buffer.width(),
                buffer.height(),
                buffer.format()
            )));
        }
        Ok(Texture::new(buffer.clone(), *attributes, self.usage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;
    use crate::gpu::{AlphaType, ConversionOptions, ConversionPlan, SurfaceFormat};
    use std::sync::mpsc;

    fn texture(format: SurfaceFormat, width: u32, height: u32, usage: TextureUsage) -> Texture {
        let buffer = PixelBuffer::new(width, height, format.storage_format()).unwrap();
        Texture::new(buffer, TextureAttributes::new(width, height, format), usage)
    }

    #[test]
    fn test_pass_converts_rgba_to_bgra() {
        let device = SoftwareDevice::new().unwrap();
        let source = texture(SurfaceFormat::Rgba8Unorm, 2, 1, TextureUsage::READABLE_RENDER_TARGET);
        {
            let mut data = source.buffer().write().unwrap();
            data[..8].copy_from_slice(&[255, 0, 0, 255, 0, 0, 255, 255]);
        }
        let destination = texture(SurfaceFormat::Bgra8Unorm, 2, 1, TextureUsage::CONVERSION_TARGET);
        let plan = ConversionPlan::select(
            SurfaceFormat::Rgba8Unorm,
            AlphaType::Premultiplied,
            &ConversionOptions::default(),
        );

        let (tx, rx) = mpsc::channel();
        device.submit(
            ConversionPass::new(source, destination.clone(), plan),
            Box::new(move |result| tx.send(result).unwrap()),
        );
        assert_eq!(rx.recv().unwrap(), Ok(()));

        let data = destination.buffer().read().unwrap();
        assert_eq!(&data[..8], &[0, 0, 255, 255, 255, 0, 0, 255]);
    }

    #[test]
    fn test_pass_rejects_extent_mismatch() {
        let source = texture(SurfaceFormat::Bgra8Unorm, 4, 4, TextureUsage::READABLE_RENDER_TARGET);
        let destination = texture(SurfaceFormat::Bgra8Unorm, 2, 2, TextureUsage::CONVERSION_TARGET);
        let plan = ConversionPlan::select(
            SurfaceFormat::Bgra8Unorm,
            AlphaType::Opaque,
            &ConversionOptions::default(),
        );
        assert!(ConversionPass::new(source, destination, plan).execute().is_err());
    }

    #[test]
    fn test_cache_rejects_foreign_buffer() {
        let device = SoftwareDevice::new().unwrap();
        let cache = device
            .create_texture_cache(TextureUsage::CONVERSION_TARGET)
            .unwrap();
        let buffer = PixelBuffer::new(4, 4, PixelFormat::Bgra32).unwrap();
        let attributes = TextureAttributes::new(4, 4, SurfaceFormat::Bgr10Xr);
        assert!(matches!(
            cache.create_texture(&buffer, &attributes),
            Err(TextureError::TextureCreation(_))
        ));
    }

    #[test]
    fn test_wait_idle_drains_passes() {
        let device = SoftwareDevice::new().unwrap();
        let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        for _ in 0..5 {
            let source = texture(SurfaceFormat::Bgra8Unorm, 8, 8, TextureUsage::READABLE_RENDER_TARGET);
            let destination = texture(SurfaceFormat::Bgra8Unorm, 8, 8, TextureUsage::CONVERSION_TARGET);
            let plan = ConversionPlan::select(
                SurfaceFormat::Bgra8Unorm,
                AlphaType::Opaque,
                &ConversionOptions::default(),
            );
            let done = done.clone();
            device.submit(
                ConversionPass::new(source, destination, plan),
                Box::new(move |_| {
                    done.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                }),
            );
        }
        device.wait_idle();
        assert_eq!(done.load(std::sync::atomic::Ordering::SeqCst), 5);
    }
}
