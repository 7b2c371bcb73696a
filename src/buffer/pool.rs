//! Fixed-geometry pixel buffer pool

use std::sync::{Arc, Mutex, PoisonError};

use super::pixel::{AttachmentMode, Attachments, PixelBuffer, PoolKey, Recycle};
use crate::errors::PoolError;

/// Idle buffers kept for reuse when the pool has no threshold
const MAX_IDLE_BUFFERS: usize = 16;

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Vec<u8>>,
    live: usize,
    allocations: u64,
}

#[derive(Debug)]
struct PoolShared {
    key: PoolKey,
    threshold: usize,
    state: Mutex<PoolState>,
}

impl Recycle for PoolShared {
    fn recycle(&self, storage: Vec<u8>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.live = state.live.saturating_sub(1);

        let max_idle = if self.threshold > 0 {
            self.threshold
        } else {
            MAX_IDLE_BUFFERS
        };
        if storage.len() == self.key.data_len() && state.idle.len() < max_idle {
            state.idle.push(storage);
        }
    }
}

/// Hands out buffers of one (width, height, format) key
///
/// Released buffers are reused, so a buffer's previous contents are garbage
/// and must be overwritten. With a non-zero allocation threshold, at most
/// that many buffers may be alive at once.
#[derive(Debug, Clone)]
pub struct PixelBufferPool {
    shared: Arc<PoolShared>,
}

impl PixelBufferPool {
    /// Create a pool; `allocation_threshold` of 0 means unlimited
    pub fn new(key: PoolKey, allocation_threshold: usize) -> Result<Self, PoolError> {
        key.validate()?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                key,
                threshold: allocation_threshold,
                state: Mutex::new(PoolState::default()),
            }),
        })
    }

    pub fn key(&self) -> PoolKey {
        self.shared.key
    }

    pub fn allocation_threshold(&self) -> usize {
        self.shared.threshold
    }

    pub fn get_buffer(&self) -> Result<PixelBuffer, PoolError> {
        self.get_buffer_with(None, None)
    }

    /// Get a buffer and tag it with the given attachments
    pub fn get_buffer_with(
        &self,
        propagated: Option<&Attachments>,
        non_propagated: Option<&Attachments>,
    ) -> Result<PixelBuffer, PoolError> {
        let storage = {
            let mut state = self
                .shared
                .state
                .lock()
                .map_err(|_| PoolError::PoisonedLock)?;

            if self.shared.threshold > 0 && state.live >= self.shared.threshold {
                log::debug!(
                    "Pool {:?} refused allocation: {} live buffers",
                    self.shared.key,
                    state.live
                );
                return Err(PoolError::AllocationThresholdExceeded {
                    threshold: self.shared.threshold,
                });
            }

            state.live += 1;
            match state.idle.pop() {
                Some(storage) => storage,
                None => {
                    state.allocations += 1;
                    vec![0; self.shared.key.data_len()]
                }
            }
        };

        let shared: Arc<dyn Recycle> = self.shared.clone();
        let buffer = PixelBuffer::from_parts(self.shared.key, storage, Some(Arc::downgrade(&shared)));
        if let Some(attachments) = propagated {
            buffer.set_attachments(attachments, AttachmentMode::ShouldPropagate);
        }
        if let Some(attachments) = non_propagated {
            buffer.set_attachments(attachments, AttachmentMode::ShouldNotPropagate);
        }
        Ok(buffer)
    }

    /// Buffers currently handed out and not yet released
    pub fn live_count(&self) -> usize {
        self.lock_state().live
    }

    pub fn idle_count(&self) -> usize {
        self.lock_state().idle.len()
    }

    /// Distinct backing allocations made over the pool's lifetime
    pub fn allocation_count(&self) -> u64 {
        self.lock_state().allocations
    }

    /// Drop idle storage
    pub fn flush(&self) {
        self.lock_state().idle.clear();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelFormat;

    fn key() -> PoolKey {
        PoolKey::new(8, 8, PixelFormat::Bgra32)
    }

    #[test]
    fn test_threshold_bounds_live_buffers() {
        let pool = PixelBufferPool::new(key(), 2).unwrap();
        let a = pool.get_buffer().unwrap();
        let _b = pool.get_buffer().unwrap();

        assert_eq!(
            pool.get_buffer().unwrap_err(),
            PoolError::AllocationThresholdExceeded { threshold: 2 }
        );

        drop(a);
        assert_eq!(pool.live_count(), 1);
        assert!(pool.get_buffer().is_ok());
    }

    #[test]
    fn test_released_memory_is_reused() {
        let pool = PixelBufferPool::new(key(), 0).unwrap();
        let first = pool.get_buffer().unwrap();
        first.write().unwrap()[0] = 99;
        drop(first);

        let second = pool.get_buffer().unwrap();
        assert_eq!(pool.allocation_count(), 1);
        // contents are whatever the previous user left behind
        assert_eq!(second.read().unwrap()[0], 99);
    }

    #[test]
    fn test_clones_hold_the_slot() {
        let pool = PixelBufferPool::new(key(), 1).unwrap();
        let buffer = pool.get_buffer().unwrap();
        let clone = buffer.clone();
        drop(buffer);
        assert!(pool.get_buffer().is_err());
        drop(clone);
        assert!(pool.get_buffer().is_ok());
    }

    #[test]
    fn test_buffers_outlive_pool() {
        let pool = PixelBufferPool::new(key(), 0).unwrap();
        let buffer = pool.get_buffer().unwrap();
        drop(pool);
        buffer.write().unwrap()[1] = 1;
        assert_eq!(buffer.read().unwrap()[1], 1);
        drop(buffer);
    }

    #[test]
    fn test_attachments_applied() {
        let pool = PixelBufferPool::new(key(), 0).unwrap();
        let mut propagated = Attachments::new();
        propagated.insert("ColorPrimaries".into(), "ITU_R_709_2".into());
        let buffer = pool.get_buffer_with(Some(&propagated), None).unwrap();
        assert_eq!(
            buffer.attachments(AttachmentMode::ShouldPropagate),
            propagated
        );
    }
}
