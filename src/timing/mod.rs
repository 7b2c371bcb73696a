//! Timing utilities for presentation timestamps and pause marks
//!
//! Media timestamps and the wall-clock marks taken on pause/resume both come
//! from a [`MonotonicClock`]. The default clock is [`PTSClock`].

use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic time in seconds
pub trait MonotonicClock: Send + Sync {
    /// Seconds since the clock's origin
    fn now(&self) -> f64;
}

/// Monotonic clock for presentation timestamps
///
/// All timestamps derive from this single source
/// to ensure monotonic ordering.
#[derive(Debug, Clone)]
pub struct PTSClock {
    start: Arc<Instant>,
}

impl PTSClock {
    /// Create a new PTS clock with the current instant as time zero
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }

    /// Create a PTS clock from an existing start instant
    ///
    /// Use this to share the same timebase between the render loop,
    /// the audio input and the recording pause marks.
    pub fn from_instant(start: Instant) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Get the presentation timestamp in seconds
    #[inline]
    pub fn pts(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    /// Get the presentation timestamp for a given instant
    ///
    /// Instants before the clock's start saturate to zero.
    #[inline]
    pub fn pts_at(&self, instant: Instant) -> f64 {
        instant.saturating_duration_since(*self.start).as_secs_f64()
    }

    /// Get the start instant for sharing with other components
    pub fn start_instant(&self) -> Instant {
        *self.start
    }
}

impl Default for PTSClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for PTSClock {
    fn now(&self) -> f64 {
        self.pts()
    }
}
