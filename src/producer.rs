//! Frame producer: turns the last rendered surface into an encodable buffer

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::buffer::{keys, PixelBuffer, PoolFactory, TextureAttributes, TexturePool};
use crate::errors::ProducerError;
use crate::gpu::{ColorProperties, ConversionOptions, ConversionPass, ConversionPlan, GpuDevice};
use crate::surface::RenderSurface;

pub struct FrameProducer {
    surface: Arc<dyn RenderSurface>,
    device: Arc<dyn GpuDevice>,
    pools: Arc<PoolFactory>,
    options: ConversionOptions,
    texture_pools: Mutex<HashMap<TextureAttributes, Arc<TexturePool>>>,
}

impl FrameProducer {
    pub fn new(
        surface: Arc<dyn RenderSurface>,
        device: Arc<dyn GpuDevice>,
        pools: Arc<PoolFactory>,
        options: ConversionOptions,
    ) -> Self {
        Self {
            surface,
            device,
            pools,
            options,
            texture_pools: Mutex::new(HashMap::new()),
        }
    }

    pub fn surface(&self) -> &Arc<dyn RenderSurface> {
        &self.surface
    }

    pub fn pools(&self) -> &Arc<PoolFactory> {
        &self.pools
    }

    pub fn options(&self) -> &ConversionOptions {
        &self.options
    }

    /// Conversion applied to the surface in its current format
    pub fn plan(&self) -> ConversionPlan {
        ConversionPlan::select(
            self.surface.format(),
            self.surface.alpha_type(),
            &self.options,
        )
    }

    /// Colour tags carried by produced buffers
    pub fn color_properties(&self) -> ColorProperties {
        self.plan().destination_color_properties()
    }

    /// Convert the last rendered texture
    ///
    /// Failures detected before the pass is submitted are returned directly;
    /// `handler` is only called for a submitted pass.
    pub fn produce<F>(&self, handler: F) -> Result<(), ProducerError>
    where
        F: FnOnce(Result<PixelBuffer, ProducerError>) + Send + 'static,
    {
        let source = self.surface.last_texture().ok_or(ProducerError::NoSurface)?;
        if !source.is_readable() {
            return Err(ProducerError::FramebufferOnly);
        }

        let plan = ConversionPlan::select(source.format(), self.surface.alpha_type(), &self.options);
        let attributes =
            TextureAttributes::new(source.width(), source.height(), plan.destination.format);
        let textures = self.texture_pool(attributes)?;

        let mut tags = plan.destination_color_properties().to_attachments();
        // alpha semantics follow the pixels into fan-out copies
        tags.insert(keys::ALPHA_TYPE.into(), plan.destination.alpha.tag().into());
        let destination = textures.get_texture(Some(&tags), None)?;
        log::trace!(
            "Converting {:?} -> {:?} at {}x{}",
            plan.source.format,
            plan.destination.format,
            attributes.width,
            attributes.height
        );

        let buffer = destination.buffer().clone();
        self.device.submit(
            ConversionPass::new(source, destination, plan),
            Box::new(move |result| handler(result.map(|_| buffer))),
        );
        Ok(())
    }

    fn texture_pool(&self, attributes: TextureAttributes) -> Result<Arc<TexturePool>, ProducerError> {
        let mut pools = self
            .texture_pools
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pool) = pools.get(&attributes) {
            return Ok(pool.clone());
        }
        let pool = Arc::new(TexturePool::new(self.device.as_ref(), &self.pools, attributes)?);
        pools.insert(attributes, pool.clone());
        Ok(pool)
    }
}

impl std::fmt::Debug for FrameProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameProducer")
            .field("device", &self.device.name())
            .field("options", &self.options)
            .finish()
    }
}
