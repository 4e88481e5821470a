//! Spinning reader/writer lock.
//!
//! [`RwGuard`] admits any number of concurrent readers or exactly one writer,
//! in the manner of the kernel's `rwlock_t`. The whole state lives in one
//! atomic word:
//!
//! ```text
//!   0              Idle
//!   1..MAX-1       Reading(n), n readers inside
//!   WRITE_LOCKED   Writing
//! ```
//!
//! A writer waits until the word is exactly zero, so a steady stream of
//! overlapping readers can keep it out indefinitely. Writer starvation is a
//! known property of this design; callers that need fairness should use a
//! fair lock such as `parking_lot::RwLock`.
//!
//! Waiting spins with [`Backoff`] and never sleeps, so critical sections must
//! stay short and must not block.

use std::cell::UnsafeCell;
use std::fmt::{self, Debug};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use crate::device::{parse_decimal, Strategy};
use crate::error::Result;
use crate::guards::{GuardValue, Observable};
use crate::ticker::{Tick, Ticking};

const WRITE_LOCKED: usize = usize::MAX;

/// Observable state of an [`RwGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardState {
    /// Nobody holds the lock.
    Idle,
    /// The given number of readers hold the lock.
    Reading(usize),
    /// One writer holds the lock.
    Writing,
}

/// A reader/writer spinlock protecting a `T`.
///
/// # Examples
///
/// ```rust
/// use custodi::guards::rwlock::{GuardState, RwGuard};
///
/// let guard = RwGuard::new(0i64);
/// guard.with_write_access(|v| *v += 5);
///
/// let r1 = guard.read();
/// let r2 = guard.read();
/// assert_eq!(guard.state(), GuardState::Reading(2));
/// assert_eq!(*r1 + *r2, 10);
/// ```
pub struct RwGuard<T> {
    name: &'static str,
    state: AtomicUsize,
    data: UnsafeCell<T>,
}

// SAFETY: readers only get `&T` and the writer gets exclusive `&mut T`,
// which is exactly what `Send + Sync` on `T` permits across threads.
unsafe impl<T: Send> Send for RwGuard<T> {}
unsafe impl<T: Send + Sync> Sync for RwGuard<T> {}

impl<T> RwGuard<T> {
    /// Creates an idle lock around `data`.
    pub const fn new(data: T) -> Self {
        RwGuard {
            name: "",
            state: AtomicUsize::new(0),
            data: UnsafeCell::new(data),
        }
    }

    /// Sets the name of this lock, returning `self` for method chaining.
    pub fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Acquires shared access, spinning while a writer holds the lock.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_read() {
                return guard;
            }
            backoff.snooze();
        }
    }

    /// Attempts to acquire shared access without waiting.
    pub fn try_read(&self) -> Option<ReadGuard<'_, T>> {
        let state = self.state.load(Ordering::Relaxed);
        // WRITE_LOCKED - 1 readers would make the count indistinguishable
        // from a writer
        if state >= WRITE_LOCKED - 1 {
            return None;
        }
        self.state
            .compare_exchange(state, state + 1, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| ReadGuard { lock: self })
    }

    /// Acquires exclusive access, spinning until no reader or writer holds
    /// the lock.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_write() {
                return guard;
            }
            backoff.snooze();
        }
    }

    /// Attempts to acquire exclusive access without waiting.
    pub fn try_write(&self) -> Option<WriteGuard<'_, T>> {
        self.state
            .compare_exchange(0, WRITE_LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| WriteGuard { lock: self })
    }

    /// Runs `f` with shared access alongside any other readers.
    pub fn with_read_access<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.read();
        f(&*guard)
    }

    /// Runs `f` with exclusive access.
    pub fn with_write_access<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.write();
        f(&mut *guard)
    }

    /// Returns the current state. Only a hint under concurrency.
    pub fn state(&self) -> GuardState {
        match self.state.load(Ordering::Relaxed) {
            0 => GuardState::Idle,
            WRITE_LOCKED => GuardState::Writing,
            n => GuardState::Reading(n),
        }
    }

    /// Returns a mutable reference to the data; `&mut self` needs no locking.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the lock and returns the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for RwGuard<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Debug> Debug for RwGuard<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_read() {
            Some(data) => write!(f, "{}{{ {:?} }}", self.name, &*data),
            None => write!(f, "{}{{ <locked> }}", self.name),
        }
    }
}

/// Shared access to the data of an [`RwGuard`]; released on drop.
pub struct ReadGuard<'a, T> {
    lock: &'a RwGuard<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the reader count keeps writers out while `self` lives.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        let prev = self.lock.state.fetch_sub(1, Ordering::Release);
        debug_assert!(prev != 0 && prev != WRITE_LOCKED);
    }
}

/// Exclusive access to the data of an [`RwGuard`]; released on drop.
pub struct WriteGuard<'a, T> {
    lock: &'a RwGuard<T>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: WRITE_LOCKED excludes every other reader and writer.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: WRITE_LOCKED excludes every other reader and writer.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        let prev = self.lock.state.swap(0, Ordering::Release);
        debug_assert_eq!(prev, WRITE_LOCKED);
    }
}

/// The rwlock demo: a counter incremented by a ticker under the write lock.
pub type RwCounter = Ticking<RwGuard<i64>>;

impl RwGuard<i64> {
    /// Returns the counter under a read lock.
    pub fn get(&self) -> i64 {
        self.with_read_access(|v| *v)
    }

    /// Replaces the counter under the write lock.
    pub fn set(&self, value: i64) {
        self.with_write_access(|v| *v = value);
    }

    fn label(&self) -> &'static str {
        if self.name.is_empty() {
            "demo_rwlock"
        } else {
            self.name
        }
    }
}

impl Tick for RwGuard<i64> {
    fn ticker_name(&self) -> &'static str {
        self.label()
    }

    fn tick(&self) {
        self.with_write_access(|v| *v = v.wrapping_add(1));
    }
}

impl Observable for RwGuard<i64> {
    fn name(&self) -> &str {
        self.name
    }

    fn value(&self) -> GuardValue {
        GuardValue::Scalar(self.get())
    }
}

impl Strategy for RwGuard<i64> {
    type Session = ();

    fn device_name(&self) -> &str {
        self.label()
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn render(&self, _session: &mut ()) -> Result<Vec<u8>> {
        // format outside the lock
        let value = self.get();
        Ok(format!("{value}\n").into_bytes())
    }

    fn store(&self, _session: &mut (), input: &[u8]) -> Result<()> {
        let value = parse_decimal(input)?;
        self.set(value);
        Ok(())
    }

    fn close(&self, _session: ()) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_state_transitions() {
        let guard = RwGuard::new(0i64);
        assert_eq!(guard.state(), GuardState::Idle);
        {
            let _r1 = guard.read();
            assert_eq!(guard.state(), GuardState::Reading(1));
            let _r2 = guard.read();
            assert_eq!(guard.state(), GuardState::Reading(2));
            assert!(guard.try_write().is_none());
        }
        assert_eq!(guard.state(), GuardState::Idle);
        {
            let _w = guard.write();
            assert_eq!(guard.state(), GuardState::Writing);
            assert!(guard.try_read().is_none());
            assert!(guard.try_write().is_none());
        }
        assert_eq!(guard.state(), GuardState::Idle);
    }

    #[test]
    fn test_last_write_wins() {
        let guard = RwGuard::new(0i64);
        for v in [1, -1, 42, i64::MIN] {
            guard.set(v);
        }
        assert_eq!(guard.get(), i64::MIN);
    }

    #[test]
    fn test_readers_share() {
        let guard = Arc::new(RwGuard::new(7i64));
        let barrier = Arc::new(Barrier::new(4));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let guard = Arc::clone(&guard);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    guard.with_read_access(|v| {
                        // all four readers must be inside at once to pass
                        barrier.wait();
                        *v
                    })
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 7);
        }
    }

    #[test]
    fn test_writer_waits_for_readers() {
        let guard = Arc::new(RwGuard::new(0i64));
        let reader = guard.read();
        let wrote = Arc::new(AtomicBool::new(false));

        let writer = {
            let guard = Arc::clone(&guard);
            let wrote = Arc::clone(&wrote);
            thread::spawn(move || {
                guard.set(1);
                wrote.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!wrote.load(Ordering::SeqCst));
        assert_eq!(*reader, 0);
        drop(reader);

        writer.join().unwrap();
        assert!(wrote.load(Ordering::SeqCst));
        assert_eq!(guard.get(), 1);
    }

    #[test]
    fn test_writers_are_exclusive() {
        // a pair that must always be observed equal
        let guard = Arc::new(RwGuard::new((0u64, 0u64)));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let guard = Arc::clone(&guard);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        if i % 2 == 0 {
                            guard.with_write_access(|(a, b)| {
                                *a += 1;
                                *b += 1;
                            });
                        } else {
                            guard.with_read_access(|(a, b)| assert_eq!(a, b));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(guard.with_read_access(|p| *p), (2000, 2000));
    }

    #[test]
    fn test_ticker_increments() {
        let counter = RwCounter::new(RwGuard::new(0));
        counter.start(Duration::from_millis(1)).unwrap();
        let start = std::time::Instant::now();
        while counter.get() < 3 {
            assert!(start.elapsed() < Duration::from_secs(10));
            thread::sleep(Duration::from_millis(1));
        }
        counter.stop();
        let frozen = counter.get();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.get(), frozen);
    }

    #[test]
    fn test_into_inner() {
        let mut guard = RwGuard::new(vec![1, 2]);
        guard.get_mut().push(3);
        assert_eq!(guard.into_inner(), vec![1, 2, 3]);
    }

    #[test]
    fn test_debug() {
        let guard = RwGuard::new(5i64).with_name("rw");
        assert_eq!(format!("{guard:?}"), "rw{ 5 }");
        let _w = guard.write();
        assert_eq!(format!("{guard:?}"), "rw{ <locked> }");
    }
}
