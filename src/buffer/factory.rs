//! Owner-passed cache of pixel buffer pools

use std::collections::HashMap;
use std::sync::Mutex;

use super::pixel::{PixelBuffer, PixelFormat, PoolKey};
use super::pool::PixelBufferPool;
use crate::errors::PoolError;

/// Live-buffer cap applied to every pool the factory creates by default
pub const DEFAULT_ALLOCATION_THRESHOLD: usize = 10;

/// Lazily creates one [`PixelBufferPool`] per key and keeps it for its own lifetime
///
/// A factory is created by whoever owns the capture pipeline and shared as an
/// `Arc` with the frame producer and the media session. Pools are released
/// when the last `Arc` to the factory goes away and every buffer handed out
/// has been dropped.
#[derive(Debug)]
pub struct PoolFactory {
    allocation_threshold: usize,
    pools: Mutex<HashMap<PoolKey, PixelBufferPool>>,
}

impl PoolFactory {
    pub fn new(allocation_threshold: usize) -> Self {
        Self {
            allocation_threshold,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// A factory whose pools never refuse allocations
    pub fn unbounded() -> Self {
        Self::new(0)
    }

    pub fn allocation_threshold(&self) -> usize {
        self.allocation_threshold
    }

    /// The pool for `key`, created on first use
    pub fn pool(&self, key: PoolKey) -> Result<PixelBufferPool, PoolError> {
        let mut pools = self.pools.lock().map_err(|_| PoolError::PoisonedLock)?;
        if let Some(pool) = pools.get(&key) {
            return Ok(pool.clone());
        }

        let pool = PixelBufferPool::new(key, self.allocation_threshold)?;
        log::debug!(
            "Created pixel buffer pool {}x{} {:?} (threshold {})",
            key.width,
            key.height,
            key.format,
            self.allocation_threshold
        );
        pools.insert(key, pool.clone());
        Ok(pool)
    }

    /// The pool that hands out buffers shaped like `buffer`
    pub fn pool_for(&self, buffer: &PixelBuffer) -> Result<PixelBufferPool, PoolError> {
        self.pool(buffer.key())
    }

    pub fn get_buffer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<PixelBuffer, PoolError> {
        self.pool(PoolKey::new(width, height, format))?.get_buffer()
    }

    /// Independent copy of `buffer` drawn from the matching pool
    pub fn copy_buffer(&self, buffer: &PixelBuffer) -> Result<PixelBuffer, PoolError> {
        let copy = self.pool_for(buffer)?.get_buffer()?;
        copy.copy_from(buffer)?;
        Ok(copy)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.lock().map(|pools| pools.len()).unwrap_or(0)
    }

    /// Drop idle storage in every pool
    pub fn flush(&self) {
        if let Ok(pools) = self.pools.lock() {
            pools.values().for_each(PixelBufferPool::flush);
        }
    }
}

impl Default for PoolFactory {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOCATION_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pools_cached_per_key() {
        let factory = PoolFactory::default();
        let a = factory.pool(PoolKey::new(4, 4, PixelFormat::Bgra32)).unwrap();
        let b = factory.pool(PoolKey::new(4, 4, PixelFormat::Bgra32)).unwrap();
        let _c = factory.pool(PoolKey::new(4, 4, PixelFormat::Rgb30WideGamut)).unwrap();

        let _buffer = a.get_buffer().unwrap();
        assert_eq!(b.live_count(), 1);
        assert_eq!(factory.pool_count(), 2);
    }

    #[test]
    fn test_invalid_key_is_pool_creation_failure() {
        let factory = PoolFactory::default();
        assert!(matches!(
            factory.get_buffer(0, 0, PixelFormat::Bgra32),
            Err(PoolError::InvalidGeometry { .. })
        ));
        assert_eq!(factory.pool_count(), 0);
    }

    #[test]
    fn test_copy_buffer_is_independent() {
        let factory = PoolFactory::unbounded();
        let original = factory.get_buffer(2, 2, PixelFormat::Bgra32).unwrap();
        original.write().unwrap().fill(5);

        let copy = factory.copy_buffer(&original).unwrap();
        copy.write().unwrap().fill(9);

        assert!(original.read().unwrap().iter().all(|&b| b == 5));
        assert!(!copy.ptr_eq(&original));
    }
}
