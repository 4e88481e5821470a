//! Lock-free counter with reference-counted activation.
//!
//! [`AtomicCounter`] keeps its value in a single `AtomicI64`: reads are one
//! atomic load, writes one atomic store. Opening a session activates the
//! counter; while at least one session is open, a background [`Ticker`]
//! increments the value once per period.
//!
//! ```text
//!   sessions: 0 ──activate──► 1 ──► 2 ... 2 ──► 1 ──deactivate──► 0
//!                     │                                  │
//!               ticker spawned                  ticker stopped + joined
//! ```

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::DEFAULT_TICK;
use crate::device::Strategy;
use crate::error::Result;
use crate::guards::{GuardValue, Observable};
use crate::ticker::Ticker;

/// Activation bookkeeping. The ticker slot and the session count change
/// together, so a stop on `N→0` can never race with a start on `0→1`.
#[derive(Debug, Default)]
struct Activation {
    sessions: usize,
    ticker: Option<Ticker>,
}

/// A counter backed by one atomic word, ticking while sessions are open.
///
/// # Examples
///
/// ```rust
/// use custodi::guards::atomic::AtomicCounter;
///
/// let counter = AtomicCounter::new();
/// counter.write(41);
/// counter.increment();
/// assert_eq!(counter.read(), 42);
/// ```
#[derive(Debug)]
pub struct AtomicCounter {
    name: &'static str,
    value: Arc<AtomicI64>,
    period: Duration,
    activation: Mutex<Activation>,
}

impl AtomicCounter {
    /// Creates an inactive counter set to zero, ticking once per second
    /// when activated.
    pub fn new() -> Self {
        AtomicCounter {
            name: "",
            value: Arc::new(AtomicI64::new(0)),
            period: DEFAULT_TICK,
            activation: Mutex::new(Activation::default()),
        }
    }

    /// Sets the name of this counter, returning `self` for method chaining.
    pub fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Sets the ticker period used once the counter is activated.
    pub fn with_period(self, period: Duration) -> Self {
        Self { period, ..self }
    }

    /// Returns the current value with a single atomic load.
    #[inline]
    pub fn read(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    /// Atomically replaces the value.
    #[inline]
    pub fn write(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    /// Atomically adds one, wrapping on overflow.
    #[inline]
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::AcqRel);
    }

    /// Registers a session; the first one starts the ticker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Spawn`](crate::Error::Spawn) if the ticker thread
    /// cannot be started. The session is not counted in that case.
    pub fn activate(&self) -> Result<()> {
        let mut activation = self.activation.lock();
        if activation.sessions == 0 {
            let value = Arc::clone(&self.value);
            let ticker = Ticker::spawn(self.label(), self.period, move || {
                value.fetch_add(1, Ordering::AcqRel);
            })?;
            log::info!("{}: starting work", self.label());
            activation.ticker = Some(ticker);
        }
        activation.sessions += 1;
        Ok(())
    }

    /// Unregisters a session; the last one stops the ticker.
    ///
    /// When this returns after the last session, the ticker has exited and
    /// will not increment the counter again. Calling it with no open session
    /// is a no-op.
    pub fn deactivate(&self) {
        let mut activation = self.activation.lock();
        match activation.sessions {
            0 => log::warn!("{}: deactivate without open session", self.label()),
            1 => {
                activation.sessions = 0;
                if let Some(ticker) = activation.ticker.take() {
                    log::info!("{}: stopping timer", self.label());
                    ticker.stop();
                }
            }
            _ => activation.sessions -= 1,
        }
    }

    /// Returns the number of currently open sessions.
    pub fn sessions(&self) -> usize {
        self.activation.lock().sessions
    }

    /// Returns `true` while the background ticker is running.
    pub fn is_active(&self) -> bool {
        self.activation.lock().ticker.is_some()
    }

    /// Stops the ticker regardless of open sessions.
    pub fn shutdown(&self) {
        let mut activation = self.activation.lock();
        activation.sessions = 0;
        if let Some(ticker) = activation.ticker.take() {
            ticker.stop();
        }
    }

    fn label(&self) -> &'static str {
        if self.name.is_empty() {
            "demo_atomic"
        } else {
            self.name
        }
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable for AtomicCounter {
    fn name(&self) -> &str {
        self.name
    }

    fn value(&self) -> GuardValue {
        GuardValue::Scalar(self.read())
    }
}

impl Strategy for AtomicCounter {
    type Session = ();

    fn device_name(&self) -> &str {
        self.label()
    }

    fn open(&self) -> Result<()> {
        self.activate()
    }

    fn render(&self, _session: &mut ()) -> Result<Vec<u8>> {
        Ok(format!("{}\n", self.read()).into_bytes())
    }

    fn store(&self, _session: &mut (), input: &[u8]) -> Result<()> {
        self.write(crate::device::parse_decimal(input)?);
        Ok(())
    }

    fn close(&self, _session: ()) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn fast() -> AtomicCounter {
        AtomicCounter::new().with_period(Duration::from_millis(1))
    }

    fn wait_for(counter: &AtomicCounter, at_least: i64) {
        let start = Instant::now();
        while counter.read() < at_least {
            assert!(start.elapsed() < Duration::from_secs(10));
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_new() {
        let counter = AtomicCounter::new();
        assert_eq!(counter.read(), 0);
        assert_eq!(counter.sessions(), 0);
        assert!(!counter.is_active());
    }

    #[test]
    fn test_last_write_wins() {
        let counter = AtomicCounter::new();
        for v in [5, -3, i64::MAX, 12] {
            counter.write(v);
        }
        assert_eq!(counter.read(), 12);
    }

    #[test]
    fn test_increment_wraps() {
        let counter = AtomicCounter::new();
        counter.write(i64::MAX);
        counter.increment();
        assert_eq!(counter.read(), i64::MIN);
    }

    #[test]
    fn test_activation_starts_ticker_once() {
        let counter = fast();
        counter.activate().unwrap();
        counter.activate().unwrap();
        assert_eq!(counter.sessions(), 2);
        assert!(counter.is_active());
        wait_for(&counter, 3);

        counter.deactivate();
        assert!(counter.is_active());
        counter.deactivate();
        assert!(!counter.is_active());
    }

    #[test]
    fn test_deactivate_is_synchronous() {
        let counter = fast();
        counter.activate().unwrap();
        wait_for(&counter, 2);
        counter.deactivate();

        let frozen = counter.read();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.read(), frozen);
    }

    #[test]
    fn test_deactivate_without_sessions() {
        let counter = fast();
        counter.deactivate();
        counter.activate().unwrap();
        counter.deactivate();
        counter.deactivate();
        assert_eq!(counter.sessions(), 0);
        assert!(!counter.is_active());
    }

    #[test]
    fn test_reactivate() {
        let counter = fast();
        counter.activate().unwrap();
        counter.deactivate();
        let frozen = counter.read();
        counter.activate().unwrap();
        wait_for(&counter, frozen + 2);
        counter.shutdown();
        assert!(!counter.is_active());
    }

    #[test]
    fn test_concurrent_open_close() {
        let counter = Arc::new(fast());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..50 {
                        c.activate().unwrap();
                        c.deactivate();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.sessions(), 0);
        assert!(!counter.is_active());
    }

    #[test]
    fn test_observable() {
        let counter = AtomicCounter::new().with_name("atomic");
        counter.write(-9);
        assert_eq!(Observable::name(&counter), "atomic");
        assert_eq!(counter.value(), GuardValue::Scalar(-9));
        assert_eq!(format!("{}", &counter as &dyn Observable), "atomic:-9");
    }
}
