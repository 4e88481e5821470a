//! Busy-wait mutual exclusion shared by competing worker threads.
//!
//! [`SpinLock`] is a test-and-test-and-set lock over an `AtomicBool`:
//! `acquire()` never sleeps, it spins with [`Backoff`] until the flag is
//! clear. It is meant for very short critical sections only; nothing that
//! blocks may run while it is held.
//!
//! [`SpinWorkers`] reproduces the classic two-kthread demo: N named threads
//! loop over acquire → increment → release → pause, until told to stop.
//!
//! ```text
//!   worker-0: [lock] n+=1 [unlock] debug!  ···pause···  [lock] n+=1 ...
//!   worker-1:      [spin] [lock] n+=1 [unlock] debug!  ···pause···  ...
//!   stop():   set flag ──► wake pauses ──► join every worker
//! ```

use std::cell::UnsafeCell;
use std::fmt::{self, Debug};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_utils::Backoff;
use parking_lot::Mutex;

use crate::config::DemoConfig;
use crate::device::{parse_decimal, Strategy};
use crate::error::Result;
use crate::guards::{GuardValue, Observable};
use crate::ticker::StopSignal;

/// A spin-based mutual-exclusion lock.
///
/// # Examples
///
/// ```rust
/// use custodi::guards::spin::SpinLock;
///
/// let lock = SpinLock::new(0i64);
/// {
///     let mut guard = lock.acquire();
///     *guard += 1;
/// }
/// assert_eq!(*lock.acquire(), 1);
/// ```
pub struct SpinLock<T> {
    locked: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: the flag grants exclusive access to `data`.
unsafe impl<T: Send> Send for SpinLock<T> {}
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// Creates an unlocked spinlock.
    pub const fn new(data: T) -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Busy-waits until the lock is owned by the caller.
    pub fn acquire(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        loop {
            if let Some(guard) = self.try_acquire() {
                return guard;
            }
            // spin on a plain load until the holder lets go
            while self.locked.load(Ordering::Relaxed) {
                backoff.snooze();
            }
        }
    }

    /// Takes the lock if it is free, without spinning.
    pub fn try_acquire(&self) -> Option<SpinLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Returns `true` if some thread currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Returns a mutable reference to the data; no locking is needed since
    /// the borrow is exclusive.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Consumes the lock, returning the data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Debug> Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_acquire() {
            Some(guard) => write!(f, "SpinLock{{ {:?} }}", &*guard),
            None => write!(f, "SpinLock{{ <locked> }}"),
        }
    }
}

/// Exclusive access to a [`SpinLock`]; the lock is released on drop.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

impl<T> SpinLockGuard<'_, T> {
    /// Releases the lock. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard owns the lock.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the guard owns the lock.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Worker threads incrementing one spin-locked counter.
///
/// Each worker runs:
///
/// 1. acquire the lock, add one, read the new value, release
/// 2. log the value (outside the critical section)
/// 3. pause for `worker_interval`, waking early on stop
///
/// until stopped or, if configured, after `worker_iterations` rounds.
/// Dropping the workers stops and joins them.
#[derive(Debug)]
pub struct SpinWorkers {
    signal: Arc<StopSignal>,
    handles: Vec<JoinHandle<u64>>,
}

impl SpinWorkers {
    /// Starts `config.workers` threads on `counter`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`](crate::Error::Spawn) if a thread cannot be
    /// created; workers already running are stopped first.
    pub fn start(counter: Arc<SpinLock<i64>>, config: &DemoConfig) -> Result<Self> {
        let mut workers = SpinWorkers {
            signal: Arc::new(StopSignal::default()),
            handles: Vec::with_capacity(config.workers),
        };

        for id in 0..config.workers {
            let counter = Arc::clone(&counter);
            let signal = Arc::clone(&workers.signal);
            let interval = config.worker_interval;
            let bound = config.worker_iterations;

            // on error `workers` is dropped, which stops the ones spawned so far
            let handle = thread::Builder::new()
                .name(format!("spin-worker-{id}"))
                .spawn(move || {
                    let mut rounds = 0u64;
                    while !signal.is_stopped() && bound.map_or(true, |b| rounds < b) {
                        let value = {
                            let mut guard = counter.acquire();
                            *guard = guard.wrapping_add(1);
                            *guard
                        };
                        rounds += 1;
                        log::debug!("spin-worker-{id}: {value}");

                        if signal.wait_until(Instant::now() + interval) {
                            break;
                        }
                    }
                    rounds
                })?;
            workers.handles.push(handle);
        }

        log::info!("spin: {} workers started", workers.handles.len());
        Ok(workers)
    }

    /// Returns the number of worker threads.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns `true` if no worker was started.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Asks every worker to stop and waits for all of them to exit.
    ///
    /// Returns the total number of increments performed.
    pub fn stop(mut self) -> u64 {
        self.signal.request_stop();
        self.join_all()
    }

    /// Waits for bounded workers to finish their iterations.
    ///
    /// Returns the total number of increments performed. With unbounded
    /// workers this blocks until another thread stops them, so use
    /// [`SpinWorkers::stop`] instead.
    pub fn join(mut self) -> u64 {
        self.join_all()
    }

    fn join_all(&mut self) -> u64 {
        let total = self
            .handles
            .drain(..)
            .map(|handle| match handle.join() {
                Ok(rounds) => rounds,
                Err(_) => {
                    log::warn!("spin: worker panicked");
                    0
                }
            })
            .sum();
        log::info!("spin: workers stopped after {total} increments");
        total
    }
}

impl Drop for SpinWorkers {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.signal.request_stop();
            self.join_all();
        }
    }
}

/// The spinlock demo: a counter behind a [`SpinLock`] and the workers that
/// increment it.
///
/// # Examples
///
/// ```rust
/// use custodi::config::DemoConfig;
/// use custodi::guards::spin::SpinCounter;
/// use std::time::Duration;
///
/// let config = DemoConfig::new()
///     .with_worker_interval(Duration::ZERO)
///     .with_worker_iterations(Some(500));
///
/// let counter = SpinCounter::new(config);
/// counter.start()?;
/// counter.wait();
/// assert_eq!(counter.get(), 1000);
/// # Ok::<(), custodi::Error>(())
/// ```
#[derive(Debug)]
pub struct SpinCounter {
    name: &'static str,
    counter: Arc<SpinLock<i64>>,
    config: DemoConfig,
    workers: Mutex<Option<SpinWorkers>>,
    // signal of the running workers, reachable while `wait` holds `workers`
    signal: Mutex<Option<Arc<StopSignal>>>,
}

impl SpinCounter {
    /// Creates a counter at zero with no workers running.
    pub fn new(config: DemoConfig) -> Self {
        SpinCounter {
            name: "",
            counter: Arc::new(SpinLock::new(0)),
            config,
            workers: Mutex::new(None),
            signal: Mutex::new(None),
        }
    }

    /// Sets the name of this counter, returning `self` for method chaining.
    pub fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Starts the workers. Does nothing if they are already running.
    pub fn start(&self) -> Result<()> {
        let mut workers = self.workers.lock();
        if workers.is_none() {
            let started = SpinWorkers::start(Arc::clone(&self.counter), &self.config)?;
            *self.signal.lock() = Some(Arc::clone(&started.signal));
            *workers = Some(started);
        }
        Ok(())
    }

    /// Stops the workers and waits for them to exit. Does nothing if idle.
    ///
    /// If another thread is inside [`SpinCounter::wait`], its workers are
    /// signalled and this call returns once that wait has joined them.
    pub fn stop(&self) {
        let signal = self.signal.lock().clone();
        if let Some(signal) = signal {
            signal.request_stop();
        }
        let mut workers = self.workers.lock();
        if let Some(running) = workers.take() {
            running.stop();
        }
        self.signal.lock().take();
    }

    /// Waits for the workers to exit, either by running out of iterations
    /// or through a concurrent [`SpinCounter::stop`].
    pub fn wait(&self) {
        let mut workers = self.workers.lock();
        if let Some(running) = workers.as_mut() {
            running.join_all();
        }
        *workers = None;
        self.signal.lock().take();
    }

    /// Returns `true` while workers are attached.
    pub fn is_running(&self) -> bool {
        self.signal.lock().is_some()
    }

    /// Reads the counter under the lock.
    pub fn get(&self) -> i64 {
        *self.counter.acquire()
    }

    /// Sets the counter under the lock.
    pub fn set(&self, value: i64) {
        *self.counter.acquire() = value;
    }

    fn label(&self) -> &'static str {
        if self.name.is_empty() {
            "spin_demo"
        } else {
            self.name
        }
    }
}

impl Observable for SpinCounter {
    fn name(&self) -> &str {
        self.name
    }

    fn value(&self) -> GuardValue {
        GuardValue::Scalar(self.get())
    }
}

impl Strategy for SpinCounter {
    type Session = ();

    fn device_name(&self) -> &str {
        self.label()
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn render(&self, _session: &mut ()) -> Result<Vec<u8>> {
        Ok(format!("{}\n", self.get()).into_bytes())
    }

    fn store(&self, _session: &mut (), input: &[u8]) -> Result<()> {
        self.set(parse_decimal(input)?);
        Ok(())
    }

    fn close(&self, _session: ()) {}
}
