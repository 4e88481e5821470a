//! Recurring background task with synchronous cancellation.
//!
//! A [`Ticker`] owns a named thread that invokes a callback once per period.
//! Between ticks the thread waits on a condition variable, so a stop request
//! interrupts the wait immediately instead of sleeping out the period.
//!
//! ```text
//!   spawn ──► [wait period] ──► tick() ──► [wait period] ──► tick() ...
//!                  ▲                                          │
//!   stop() ────────┴── sets flag, notifies, joins ◄───────────┘
//! ```
//!
//! Stopping is synchronous: once [`Ticker::stop`] returns (or the ticker is
//! dropped), the callback will never run again.
//!
//! [`Ticking`] pairs a guarded value with an optional ticker that drives
//! its [`Tick`] implementation, which is how the demo strategies model their
//! periodic updater.
//!
//! # Examples
//!
//! ```rust
//! use custodi::ticker::Ticker;
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let ticks = Arc::new(AtomicU64::new(0));
//! let t = Arc::clone(&ticks);
//! let ticker = Ticker::spawn("example", Duration::from_millis(1), move || {
//!     t.fetch_add(1, Ordering::Relaxed);
//! })?;
//!
//! std::thread::sleep(Duration::from_millis(20));
//! ticker.stop();
//!
//! let frozen = ticks.load(Ordering::Relaxed);
//! std::thread::sleep(Duration::from_millis(20));
//! assert_eq!(ticks.load(Ordering::Relaxed), frozen);
//! # Ok::<(), custodi::Error>(())
//! ```

use std::ops::Deref;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::device::Strategy;
use crate::error::Result;
use crate::guards::{GuardValue, Observable};

/// Stop flag plus the condition variable background threads wait on.
#[derive(Debug, Default)]
pub(crate) struct StopSignal {
    stopped: Mutex<bool>,
    wakeup: Condvar,
}

impl StopSignal {
    /// Waits until `deadline` or until a stop is requested.
    ///
    /// Returns `true` if the ticker must exit.
    pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.wakeup.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }

    pub(crate) fn request_stop(&self) {
        *self.stopped.lock() = true;
        self.wakeup.notify_all();
    }

    pub(crate) fn is_stopped(&self) -> bool {
        *self.stopped.lock()
    }
}

/// A periodic background task.
///
/// The callback runs on a dedicated thread named after the ticker. Ticks are
/// scheduled on a fixed cadence measured from the previous deadline, so a
/// slow callback does not accumulate drift.
#[derive(Debug)]
pub struct Ticker {
    name: &'static str,
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Starts a ticker that calls `tick` every `period`.
    ///
    /// The first call happens one full period after spawning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`](crate::Error::Spawn) if the thread cannot be
    /// created.
    pub fn spawn<F>(name: &'static str, period: Duration, mut tick: F) -> Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let handle = thread::Builder::new()
            .name(format!("{name}-ticker"))
            .spawn(move || {
                let mut deadline = Instant::now() + period;
                while !thread_signal.wait_until(deadline) {
                    tick();
                    deadline += period;
                    let now = Instant::now();
                    if deadline < now {
                        // fell behind; resynchronize instead of bursting
                        deadline = now + period;
                    }
                }
            })?;

        log::info!("{name}: ticker started (period {period:?})");

        Ok(Ticker {
            name,
            signal,
            handle: Some(handle),
        })
    }

    /// Returns the name given at spawn time.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stops the ticker and waits for its thread to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.signal.request_stop();
            if handle.join().is_err() {
                log::warn!("{}: ticker callback panicked", self.name);
            }
            log::info!("{}: ticker stopped", self.name);
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The periodic update a guarded value performs when driven by a ticker.
pub trait Tick: Send + Sync + 'static {
    /// Name given to the ticker thread.
    fn ticker_name(&self) -> &'static str {
        "custodi"
    }

    /// Performs one update, typically incrementing the value by one.
    fn tick(&self);
}

/// A guarded value with an optional background ticker.
///
/// The value is shared with the ticker thread through an `Arc`; dropping
/// the `Ticking` stops and joins the ticker before the value goes away.
///
/// # Examples
///
/// ```rust
/// use custodi::guards::percpu::AggregatedCounter;
/// use custodi::ticker::Ticking;
/// use std::time::Duration;
///
/// let totaler = Ticking::new(AggregatedCounter::new());
/// totaler.start(Duration::from_millis(1))?;
/// totaler.add(100);
/// totaler.stop();
/// assert!(totaler.sum() >= 100);
/// # Ok::<(), custodi::Error>(())
/// ```
#[derive(Debug)]
pub struct Ticking<T> {
    inner: Arc<T>,
    ticker: Mutex<Option<Ticker>>,
}

impl<T: Tick> Ticking<T> {
    /// Wraps `inner` without starting a ticker.
    pub fn new(inner: T) -> Self {
        Ticking {
            inner: Arc::new(inner),
            ticker: Mutex::new(None),
        }
    }

    /// Starts ticking every `period`. Does nothing if already running.
    pub fn start(&self, period: Duration) -> Result<()> {
        let mut slot = self.ticker.lock();
        if slot.is_none() {
            let inner = Arc::clone(&self.inner);
            *slot = Some(Ticker::spawn(self.inner.ticker_name(), period, move || {
                inner.tick()
            })?);
        }
        Ok(())
    }

    /// Stops the ticker, waiting for it to exit. Does nothing if idle.
    pub fn stop(&self) {
        // take first so the join happens without holding the slot
        let ticker = self.ticker.lock().take();
        if let Some(ticker) = ticker {
            ticker.stop();
        }
    }

    /// Returns `true` while the ticker is running.
    pub fn is_running(&self) -> bool {
        self.ticker.lock().is_some()
    }

    /// Returns a shared handle to the wrapped value.
    pub fn shared(&self) -> Arc<T> {
        Arc::clone(&self.inner)
    }
}

impl<T> Deref for Ticking<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: Observable> Observable for Ticking<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn value(&self) -> GuardValue {
        self.inner.value()
    }
}

impl<T: Strategy> Strategy for Ticking<T> {
    type Session = T::Session;

    fn device_name(&self) -> &str {
        self.inner.device_name()
    }

    fn open(&self) -> Result<Self::Session> {
        self.inner.open()
    }

    fn render(&self, session: &mut Self::Session) -> Result<Vec<u8>> {
        self.inner.render(session)
    }

    fn store(&self, session: &mut Self::Session, input: &[u8]) -> Result<()> {
        self.inner.store(session, input)
    }

    fn close(&self, session: Self::Session) {
        self.inner.close(session)
    }
}
