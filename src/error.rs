//! Unified error type for all guards and the device facade.
//!
//! Every fallible operation in the crate returns [`Result`], so callers can
//! switch between strategies without changing their error handling.
//!
//! # Example
//!
//! ```rust
//! use custodi::guards::rcu::VersionedSnapshot;
//! use custodi::Error;
//!
//! let snapshot: VersionedSnapshot = VersionedSnapshot::new();
//! assert!(matches!(snapshot.read(), Err(Error::NoValue)));
//! ```

use thiserror::Error;

/// Unified error type for guard and facade operations.
///
/// All failures are per-call: none of them leaves a guard in an
/// inconsistent state or is fatal to the process.
#[derive(Debug, Error)]
pub enum Error {
    /// A snapshot was requested before any value has been published.
    ///
    /// Distinct from an empty payload.
    #[error("no value has been set")]
    NoValue,

    /// A blocking read was interrupted before a change was observed.
    #[error("interrupted while waiting for a change")]
    Interrupted,

    /// The input handed to a device could not be parsed as a decimal integer.
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Storage for a new snapshot could not be allocated.
    ///
    /// The current snapshot is left untouched.
    #[error("allocation error: {0}")]
    Allocation(#[from] std::collections::TryReserveError),

    /// A background thread could not be started.
    #[error("spawn error: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Result type for guard and facade operations.
pub type Result<T> = std::result::Result<T, Error>;
