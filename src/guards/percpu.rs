//! Sharded counter, summed on read.
//!
//! This module provides [`AggregatedCounter`], the equivalent of a kernel
//! `percpu_counter`: each thread adds into its own cache-padded shard with no
//! cross-shard synchronization, and the global value is the sum of all
//! shards.
//!
//! `sum()` is not linearizable with respect to concurrent `add()` calls. It
//! returns a total consistent with some interleaving of completed and
//! in-flight adds, and it never loses or double-counts a completed add.

use std::sync::atomic::{AtomicI64, Ordering};

use atomic_traits::Atomic;
use crossbeam_utils::CachePadded;
use std::fmt::Debug;

use crate::device::{parse_decimal, Strategy};
use crate::error::Result;
use crate::guards::{GuardValue, Observable, NUM_COMPONENTS, THREAD_SLOT_INDEX};
use crate::ticker::Tick;

/// Access to the current thread's shard of a sharded counter.
pub trait GetComponentCounter {
    /// The atomic type used for individual shards.
    type CounterType: Atomic;

    /// Returns the shard selected by `THREAD_SLOT_INDEX`.
    fn get_component_counter(&self) -> &Self::CounterType;
}

/// A signed counter partitioned across [`NUM_COMPONENTS`] shards.
///
/// # Examples
///
/// ```rust
/// use custodi::guards::percpu::AggregatedCounter;
/// use std::sync::Arc;
/// use std::thread;
///
/// let counter = Arc::new(AggregatedCounter::new());
/// let handles: Vec<_> = (0..4)
///     .map(|_| {
///         let c = Arc::clone(&counter);
///         thread::spawn(move || {
///             for _ in 0..1000 {
///                 c.add(1);
///             }
///         })
///     })
///     .collect();
///
/// for h in handles {
///     h.join().unwrap();
/// }
///
/// assert_eq!(counter.sum(), 4000);
/// ```
pub struct AggregatedCounter {
    name: &'static str,
    components: [CachePadded<AtomicI64>; NUM_COMPONENTS],
}

impl GetComponentCounter for AggregatedCounter {
    type CounterType = AtomicI64;

    #[inline]
    fn get_component_counter(&self) -> &AtomicI64 {
        THREAD_SLOT_INDEX.with(|idx| &self.components[*idx])
    }
}

impl AggregatedCounter {
    /// Creates a counter with every shard at zero.
    pub const fn new() -> Self {
        const ZERO: CachePadded<AtomicI64> = CachePadded::new(AtomicI64::new(0));
        AggregatedCounter {
            components: [ZERO; NUM_COMPONENTS],
            name: "",
        }
    }

    /// Sets the name of this counter, returning `self` for method chaining.
    pub const fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Adds `delta` (possibly negative) to the current thread's shard.
    #[inline]
    pub fn add(&self, delta: i64) {
        self.get_component_counter().fetch_add(delta, Ordering::Relaxed);
    }

    /// Returns the value of the current thread's shard.
    #[inline]
    pub fn local_value(&self) -> i64 {
        self.get_component_counter().load(Ordering::Relaxed)
    }

    /// Computes the exact total by summing every shard.
    ///
    /// Wraps on overflow, like the shards themselves.
    #[inline]
    pub fn sum(&self) -> i64 {
        self.components
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .fold(0i64, i64::wrapping_add)
    }

    /// Returns the total and zeroes every shard.
    ///
    /// Each shard is swapped atomically, so a concurrent add lands either in
    /// the returned total or in the next one, never in both.
    pub fn sum_and_reset(&self) -> i64 {
        self.components
            .iter()
            .map(|counter| counter.swap(0, Ordering::Relaxed))
            .fold(0i64, i64::wrapping_add)
    }
}

impl Observable for AggregatedCounter {
    #[inline]
    fn name(&self) -> &str {
        self.name
    }

    #[inline]
    fn value(&self) -> GuardValue {
        GuardValue::Scalar(self.sum())
    }
}

impl Tick for AggregatedCounter {
    fn ticker_name(&self) -> &'static str {
        "totaler"
    }

    fn tick(&self) {
        self.add(1);
    }
}

impl Strategy for AggregatedCounter {
    type Session = ();

    fn device_name(&self) -> &str {
        "totaler"
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn render(&self, _session: &mut ()) -> Result<Vec<u8>> {
        Ok(format!("{}\n", self.sum()).into_bytes())
    }

    /// Writing a number adds it to the total.
    fn store(&self, _session: &mut (), input: &[u8]) -> Result<()> {
        self.add(parse_decimal(input)?);
        Ok(())
    }

    fn close(&self, _session: ()) {}
}

impl Default for AggregatedCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for AggregatedCounter {
    /// Formats the counter showing non-zero shards.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, counter) in self.components.iter().enumerate() {
            let val = counter.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}
