//! Runtime configuration shared by the demo strategies.
//!
//! [`DemoConfig`] carries the timing knobs of the background updaters: the
//! ticker period and the spin workers' pacing. It is built like the rest of
//! the crate, with a `const` constructor and chained `with_*` setters, so it
//! can live in a `static`.
//!
//! # Examples
//!
//! ```rust
//! use custodi::config::DemoConfig;
//! use std::time::Duration;
//!
//! let config = DemoConfig::new()
//!     .with_tick(Duration::from_millis(100))
//!     .with_workers(4)
//!     .with_worker_iterations(Some(1000));
//!
//! assert_eq!(config.workers, 4);
//! ```
//!
//! # Feature Flag
//!
//! With the `serde` feature, `DemoConfig` can be loaded from any serde format.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default period of the background ticker (one time unit).
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Default number of spin workers competing for the same counter.
pub const DEFAULT_WORKERS: usize = 2;

/// Timing configuration for the background updaters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DemoConfig {
    /// Period of the ticker that increments the shared value.
    pub tick: Duration,
    /// Number of spin workers started by the spinlock demo.
    pub workers: usize,
    /// Pause each spin worker takes after releasing the lock.
    pub worker_interval: Duration,
    /// Optional bound on the iterations each spin worker performs.
    ///
    /// `None` runs the workers until they are stopped.
    pub worker_iterations: Option<u64>,
}

impl DemoConfig {
    /// Creates a configuration with the default one-second pacing.
    pub const fn new() -> Self {
        DemoConfig {
            tick: DEFAULT_TICK,
            workers: DEFAULT_WORKERS,
            worker_interval: DEFAULT_TICK,
            worker_iterations: None,
        }
    }

    /// Sets the ticker period.
    pub const fn with_tick(self, tick: Duration) -> Self {
        Self { tick, ..self }
    }

    /// Sets the number of spin workers.
    pub const fn with_workers(self, workers: usize) -> Self {
        Self { workers, ..self }
    }

    /// Sets the pause between spin worker iterations.
    pub const fn with_worker_interval(self, worker_interval: Duration) -> Self {
        Self {
            worker_interval,
            ..self
        }
    }

    /// Bounds the number of iterations each spin worker performs.
    pub const fn with_worker_iterations(self, worker_iterations: Option<u64>) -> Self {
        Self {
            worker_iterations,
            ..self
        }
    }
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self::new()
    }
}
