//! # Custodi - One Shared Value, Seven Ways to Guard It
//!
//! A Rust library of reference implementations for the classic kernel
//! synchronization disciplines. Every guard protects the same kind of
//! resource, a counter or a short byte payload that a background updater
//! keeps changing while arbitrary threads read it, and each one makes a
//! different trade-off between blocking, consistency and reclamation.
//!
//! ## Available Guards
//!
//! | Type | Kernel analogue | Readers | Writers |
//! |------|-----------------|---------|---------|
//! | [`AtomicCounter`](guards::atomic::AtomicCounter) | `atomic_long_t` | one load | one store |
//! | [`AggregatedCounter`](guards::percpu::AggregatedCounter) | `percpu_counter` | sum of shards | own shard |
//! | [`VersionedSnapshot`](guards::rcu::VersionedSnapshot) | RCU | never block | swap + deferred free |
//! | [`RwGuard`](guards::rwlock::RwGuard) | `rwlock_t` | shared | exclusive |
//! | [`SeqGuard`](guards::seqlock::SeqGuard) | `seqlock_t` | retry on overlap | never wait on readers |
//! | [`SpinLock`](guards::spin::SpinLock) | `spinlock_t` | busy-wait | busy-wait |
//! | [`ChangeNotifier`](guards::wait::ChangeNotifier) | wait queue | sleep until change | wake all |
//!
//! ## Design Principles
//!
//! 1. **Owned state**: what a kernel module keeps in globals lives in one
//!    owned object with an explicit lifecycle. Dropping it stops its
//!    background work.
//!
//! 2. **Synchronous cancellation**: a [`Ticker`](ticker::Ticker) or a set of
//!    [`SpinWorkers`](guards::spin::SpinWorkers) has fully exited by the time
//!    `stop()` returns. Nothing touches the value afterwards.
//!
//! 3. **One facade**: every guard implements
//!    [`Strategy`](device::Strategy), so [`DeviceFile`](device::DeviceFile)
//!    gives all of them the same open/read/write/close file semantics with
//!    byte offsets and decimal parsing.
//!
//! ## Quick Start
//!
//! ```rust
//! use custodi::device::DeviceFile;
//! use custodi::guards::seqlock::{SeqCounter, SeqGuard};
//! use std::time::Duration;
//!
//! let counter = SeqCounter::new(SeqGuard::new(0));
//! counter.start(Duration::from_millis(10))?;
//!
//! let device = DeviceFile::new(counter);
//! let mut handle = device.open()?;
//! device.write(&mut handle, b"100\n")?;
//!
//! let text = device.read(&mut handle, 32)?;
//! assert!(text.ends_with(b"\n"));
//!
//! device.close(handle);
//! device.strategy().stop();
//! # Ok::<(), custodi::Error>(())
//! ```
//!
//! ## Logging
//!
//! Lifecycle events (ticker start/stop, activation, worker shutdown) are
//! emitted through the [`log`] facade. Install any logger, e.g.
//! `env_logger`, to see them.
//!
//! ## Observers
//!
//! With the `table` feature, [`observers::table::TableObserver`] renders any
//! mix of guards as an ASCII table:
//!
//! ```toml
//! [dependencies]
//! custodi = { version = "0.1", features = ["table"] }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod guards;
pub mod observers;
pub mod ticker;

pub use error::{Error, Result};
