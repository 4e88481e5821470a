//! Core module containing the seven guarded-value strategies and their
//! shared infrastructure.
//!
//! Every strategy protects one logical resource, a counter or a short byte
//! payload, that is mutated by a background updater and read by arbitrary
//! concurrent callers. They differ only in the synchronization discipline:
//!
//! | Strategy | Discipline | Readers block? | Writers block? |
//! |----------|------------|----------------|----------------|
//! | [`atomic::AtomicCounter`] | single atomic word | never | never |
//! | [`percpu::AggregatedCounter`] | per-thread shards, summed on read | never | never |
//! | [`rcu::VersionedSnapshot`] | pointer swap + deferred reclamation | never | never |
//! | [`rwlock::RwGuard`] | many readers XOR one writer | on writer | on anyone |
//! | [`seqlock::SeqGuard`] | sequence-number validated reads | retry on writer | on writers only |
//! | [`spin::SpinLock`] | busy-wait mutual exclusion | on holder | on holder |
//! | [`wait::ChangeNotifier`] | wait queue with broadcast wake | until change | never |
//!
//! # Thread Slot Assignment
//!
//! The aggregated counter shards its storage the same way across all
//! instances: a global atomic hands out sequential slot IDs, each thread
//! caches its slot in thread-local storage, and the slot is reduced modulo
//! [`NUM_COMPONENTS`]. After 64 threads, assignment wraps around, which only
//! increases contention, never correctness.
//!
//! ```text
//!                          ┌─────────────────────────────────────┐
//!                          │        AggregatedCounter            │
//!                          ├─────────────────────────────────────┤
//!   Thread 0 ──adds────►   │ [Slot 0] ████████ (CachePadded)     │
//!   Thread 1 ──adds────►   │ [Slot 1] ████████ (CachePadded)     │
//!        ...               │    ...                              │
//!   Thread 63 ─adds────►   │ [Slot 63] ███████ (CachePadded)     │
//!                          └─────────────────────────────────────┘
//!                                          │
//!                                          ▼
//!                                   sum() aggregates
//!                                   all slots on read
//! ```

pub mod atomic;
pub mod percpu;
pub mod rcu;
pub mod rwlock;
pub mod seqlock;
pub mod spin;
pub mod wait;

use std::{
    borrow::Cow,
    fmt::{Debug, Display},
    sync::atomic::{AtomicUsize, Ordering},
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Number of shards used by the aggregated counter.
///
/// A power of two large enough that 64 threads never share a slot. Each
/// slot is cache-line padded, so a counter takes `64 × 64 = 4 KiB`.
pub(crate) const NUM_COMPONENTS: usize = 64;

static NEXT_SLOT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    /// Slot index of the current thread, assigned on first use.
    pub(crate) static THREAD_SLOT_INDEX: usize = get_next_slot_id();
}

/// Assigns the next slot ID to a thread, in the range `[0, NUM_COMPONENTS)`.
///
/// Relaxed ordering is enough: two threads occasionally sharing a slot only
/// costs contention.
pub fn get_next_slot_id() -> usize {
    NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed) % NUM_COMPONENTS
}

/// The value a guard currently holds, as reported to observers.
///
/// # Examples
///
/// ```rust
/// use custodi::guards::GuardValue;
///
/// assert_eq!(GuardValue::Scalar(-3).to_string(), "-3");
/// assert_eq!(GuardValue::Text(b"hello".to_vec()).to_string(), "hello");
/// assert_eq!(GuardValue::Unset.to_string(), "(unset)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum GuardValue {
    /// A signed 64-bit counter.
    Scalar(i64),
    /// A byte payload, usually text.
    Text(Vec<u8>),
    /// Nothing has been published yet.
    Unset,
}

impl GuardValue {
    /// Returns the scalar value, if this is a counter.
    pub fn as_scalar(&self) -> Option<i64> {
        match self {
            GuardValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload as text, replacing invalid UTF-8.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            GuardValue::Text(bytes) => Some(String::from_utf8_lossy(bytes)),
            _ => None,
        }
    }
}

impl Display for GuardValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardValue::Scalar(v) => write!(f, "{v}"),
            GuardValue::Text(bytes) => write!(f, "{}", String::from_utf8_lossy(bytes)),
            GuardValue::Unset => write!(f, "(unset)"),
        }
    }
}

/// A guarded value that can be inspected without going through a session.
///
/// Implemented by every demo state in this module so that heterogeneous
/// strategies can be listed together.
///
/// # Examples
///
/// ```rust
/// use custodi::guards::percpu::AggregatedCounter;
/// use custodi::guards::{GuardValue, Observable};
///
/// let counter = AggregatedCounter::new().with_name("totaler");
/// counter.add(40);
/// counter.add(2);
///
/// assert_eq!(counter.name(), "totaler");
/// assert_eq!(counter.value(), GuardValue::Scalar(42));
/// ```
pub trait Observable: Debug {
    /// Returns the name of the guard, or an empty string if none was set.
    fn name(&self) -> &str;

    /// Returns the current value.
    ///
    /// Never blocks for longer than the guard's own short critical section.
    fn value(&self) -> GuardValue;
}

impl Display for dyn Observable + '_ {
    /// Formats the guard as `name:value` if named, or just `value` otherwise.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.name().is_empty() {
            write!(f, "{}:{}", self.name(), self.value())
        } else {
            write!(f, "{}", self.value())
        }
    }
}
