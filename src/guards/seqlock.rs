//! Sequence lock: optimistic readers, writers that never wait on readers.
//!
//! [`SeqGuard`] protects a `Copy` value with a sequence number:
//!
//! **Writer:**
//! 1. Take the writer lock (writers serialize among themselves only)
//! 2. Bump the sequence to odd (write in progress)
//! 3. Mutate the data
//! 4. Bump the sequence to the next even value (write complete)
//!
//! **Reader:**
//! 1. Load the sequence; if odd, a writer is active, retry
//! 2. Copy the data
//! 3. Load the sequence again; if it changed, the copy may be torn, retry
//! 4. Return the copy, which was stable for the whole attempt
//!
//! Readers never block, but they spin for as long as writes keep landing in
//! their window. Retries are unbounded: a pathological write rate can starve
//! readers indefinitely.
//!
//! The reader's volatile copy may race a writer, which the Rust memory model
//! treats as a data race; like every seqlock, correctness rests on
//! discarding any copy whose sequence check fails.

use std::cell::UnsafeCell;
use std::fmt::{self, Debug};
use std::sync::atomic::{self, AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

use crate::device::{parse_decimal, Strategy};
use crate::error::Result;
use crate::guards::{GuardValue, Observable};
use crate::ticker::{Tick, Ticking};

/// A sequence-locked `T`.
///
/// # Examples
///
/// ```rust
/// use custodi::guards::seqlock::SeqGuard;
///
/// let guard = SeqGuard::new((0u32, 0u32));
/// guard.write(|pair| {
///     pair.0 += 1;
///     pair.1 += 1;
/// });
///
/// let (a, b) = guard.read();
/// assert_eq!(a, b);
/// assert_eq!(guard.sequence(), 2);
/// ```
pub struct SeqGuard<T> {
    name: &'static str,
    seq: AtomicU64,
    writer: Mutex<()>,
    data: UnsafeCell<T>,
    retries: AtomicUsize,
}

// SAFETY: readers copy the data out and discard any copy that overlapped a
// write; writers are serialized by `writer`.
unsafe impl<T: Copy + Send> Send for SeqGuard<T> {}
unsafe impl<T: Copy + Send + Sync> Sync for SeqGuard<T> {}

impl<T: Copy> SeqGuard<T> {
    /// Creates a guard with sequence number zero.
    pub const fn new(data: T) -> Self {
        SeqGuard {
            name: "",
            seq: AtomicU64::new(0),
            writer: Mutex::new(()),
            data: UnsafeCell::new(data),
            retries: AtomicUsize::new(0),
        }
    }

    /// Sets the name of this guard, returning `self` for method chaining.
    pub fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Returns a consistent copy of the data.
    #[inline]
    pub fn read(&self) -> T {
        self.read_with(|data| *data)
    }

    /// Runs `f` on a copy of the data and returns its result once the copy
    /// is known to be consistent.
    ///
    /// `f` may run several times; only the result of the validated attempt
    /// is returned.
    pub fn read_with<R>(&self, mut f: impl FnMut(&T) -> R) -> R {
        let backoff = Backoff::new();
        loop {
            let s1 = self.seq.load(Ordering::Acquire);
            if s1 & 1 == 1 {
                self.retries.fetch_add(1, Ordering::Relaxed);
                backoff.snooze();
                continue;
            }

            // SAFETY: the pointer is valid for the guard's lifetime. The copy
            // may race with a writer; it is only trusted if the sequence is
            // unchanged below.
            let copy = unsafe { std::ptr::read_volatile(self.data.get()) };
            atomic::fence(Ordering::Acquire);

            let s2 = self.seq.load(Ordering::Relaxed);
            if s1 == s2 {
                return f(&copy);
            }
            self.retries.fetch_add(1, Ordering::Relaxed);
            backoff.spin();
        }
    }

    /// Mutates the data under the write side of the sequence lock.
    ///
    /// Waits only for other writers, never for readers.
    pub fn write<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let _writer = self.writer.lock();
        let s = self.seq.load(Ordering::Relaxed);
        self.seq.store(s.wrapping_add(1), Ordering::Relaxed);
        atomic::fence(Ordering::Release);

        // SAFETY: `writer` gives exclusive write access; readers validate
        // their copies against the odd sequence stored above.
        let result = f(unsafe { &mut *self.data.get() });

        self.seq.store(s.wrapping_add(2), Ordering::Release);
        result
    }

    /// Replaces the data.
    pub fn set(&self, data: T) {
        self.write(|d| *d = data);
    }

    /// Returns the current sequence number: even when idle, odd during a
    /// write.
    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    /// Returns how many read attempts had to be retried so far.
    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::Relaxed)
    }
}

impl<T: Copy + Default> Default for SeqGuard<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + Debug> Debug for SeqGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{ seq:{} {:?} }}", self.name, self.sequence(), self.read())
    }
}

/// The seqlock demo: a counter incremented by a ticker on the write side.
pub type SeqCounter = Ticking<SeqGuard<i64>>;

impl SeqGuard<i64> {
    fn label(&self) -> &'static str {
        if self.name.is_empty() {
            "demo_seqlock"
        } else {
            self.name
        }
    }
}

impl Tick for SeqGuard<i64> {
    fn ticker_name(&self) -> &'static str {
        self.label()
    }

    fn tick(&self) {
        self.write(|v| *v = v.wrapping_add(1));
    }
}

impl Observable for SeqGuard<i64> {
    fn name(&self) -> &str {
        self.name
    }

    fn value(&self) -> GuardValue {
        GuardValue::Scalar(self.read())
    }
}

impl Strategy for SeqGuard<i64> {
    type Session = ();

    fn device_name(&self) -> &str {
        self.label()
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn render(&self, _session: &mut ()) -> Result<Vec<u8>> {
        Ok(self.read_with(|v| format!("{v}\n")).into_bytes())
    }

    fn store(&self, _session: &mut (), input: &[u8]) -> Result<()> {
        self.set(parse_decimal(input)?);
        Ok(())
    }

    fn close(&self, _session: ()) {}
}
