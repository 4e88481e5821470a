//! Blocking change notification with per-session cursors.
//!
//! [`ChangeNotifier`] holds a counter behind a `parking_lot` mutex and a
//! condition variable used as a wait queue. Every session remembers the last
//! value it returned; a read blocks until the shared value differs from that
//! cursor.
//!
//! ```text
//!   session A (last_seen 3) ──read──► wait ─┐
//!   session B (last_seen 4) ──read──► wait ─┤
//!                                           │  write(4): notify_all
//!   A: 4 != 3 ──► last_seen = 4, return 4 ◄─┤
//!   B: 4 == 4 ──► keep waiting ◄────────────┘
//! ```
//!
//! Writes always wake every waiter; each one re-checks its own cursor. A
//! pending read can be cancelled through the session's [`Interrupter`], in
//! which case it fails with [`Error::Interrupted`] and leaves the cursor as
//! it was.

use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::device::{parse_decimal, Strategy};
use crate::error::{Error, Result};
use crate::guards::{GuardValue, Observable};
use crate::ticker::Tick;

#[derive(Debug, Default)]
struct Shared {
    value: Mutex<i64>,
    changed: Condvar,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut i64)) {
        let mut value = self.value.lock();
        f(&mut value);
        // notify while holding the lock so no waiter misses the change
        self.changed.notify_all();
    }
}

/// A counter whose readers sleep until it changes.
///
/// # Examples
///
/// ```rust
/// use custodi::guards::wait::ChangeNotifier;
///
/// let notifier = ChangeNotifier::new();
/// let mut session = notifier.open();
///
/// notifier.write(7);
/// assert_eq!(notifier.read(&mut session)?, 7);
///
/// // the cursor caught up; nothing new to report
/// assert_eq!(notifier.try_read(&mut session), None);
/// # Ok::<(), custodi::Error>(())
/// ```
#[derive(Default)]
pub struct ChangeNotifier {
    name: &'static str,
    shared: Arc<Shared>,
}

/// Per-open state of a [`ChangeNotifier`] reader.
#[derive(Debug)]
pub struct Session {
    last_seen: i64,
    interrupted: Arc<AtomicBool>,
}

impl Session {
    /// Returns the last value this session observed.
    pub fn last_seen(&self) -> i64 {
        self.last_seen
    }
}

/// Cancels reads on one session from another thread.
///
/// Each interrupt cancels one read: the one currently waiting, or the next
/// one that would have to wait.
#[derive(Debug, Clone)]
pub struct Interrupter {
    interrupted: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl Interrupter {
    /// Interrupts the session's pending or next blocking read.
    pub fn interrupt(&self) {
        self.shared.update(|_| self.interrupted.store(true, Ordering::Release));
    }
}

impl ChangeNotifier {
    /// Creates a notifier holding zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of this notifier, returning `self` for method chaining.
    pub fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Starts a session whose cursor is the current value.
    pub fn open(&self) -> Session {
        Session {
            last_seen: self.get(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns a handle able to interrupt reads on `session`.
    pub fn interrupter(&self, session: &Session) -> Interrupter {
        Interrupter {
            interrupted: Arc::clone(&session.interrupted),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Blocks until the value differs from the session's cursor, then moves
    /// the cursor to it and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Interrupted`] if the session's [`Interrupter`] fires
    /// before a change is observed. The cursor is left untouched.
    pub fn read(&self, session: &mut Session) -> Result<i64> {
        let mut value = self.shared.value.lock();
        loop {
            if *value != session.last_seen {
                session.last_seen = *value;
                return Ok(*value);
            }
            if session.interrupted.swap(false, Ordering::AcqRel) {
                return Err(Error::Interrupted);
            }
            self.shared.changed.wait(&mut value);
        }
    }

    /// Returns the new value if it differs from the session's cursor,
    /// without blocking.
    pub fn try_read(&self, session: &mut Session) -> Option<i64> {
        let value = *self.shared.value.lock();
        if value == session.last_seen {
            return None;
        }
        session.last_seen = value;
        Some(value)
    }

    /// Sets the value and wakes every waiting reader.
    pub fn write(&self, value: i64) {
        self.shared.update(|v| *v = value);
    }

    /// Returns the current value without touching any cursor.
    pub fn get(&self) -> i64 {
        *self.shared.value.lock()
    }

    fn label(&self) -> &'static str {
        if self.name.is_empty() {
            "demo_wait"
        } else {
            self.name
        }
    }
}

impl Debug for ChangeNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{ {} }}", self.name, self.get())
    }
}

impl Tick for ChangeNotifier {
    fn ticker_name(&self) -> &'static str {
        self.label()
    }

    fn tick(&self) {
        self.shared.update(|v| *v = v.wrapping_add(1));
    }
}

impl Observable for ChangeNotifier {
    fn name(&self) -> &str {
        self.name
    }

    fn value(&self) -> GuardValue {
        GuardValue::Scalar(self.get())
    }
}

impl Strategy for ChangeNotifier {
    type Session = Session;

    fn device_name(&self) -> &str {
        self.label()
    }

    fn open(&self) -> Result<Session> {
        Ok(ChangeNotifier::open(self))
    }

    /// Blocks until the value changes relative to the session's cursor.
    fn render(&self, session: &mut Session) -> Result<Vec<u8>> {
        let value = self.read(session)?;
        Ok(format!("{value}\n").into_bytes())
    }

    fn store(&self, _session: &mut Session, input: &[u8]) -> Result<()> {
        self.write(parse_decimal(input)?);
        Ok(())
    }

    fn close(&self, _session: Session) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceFile;
    use crate::ticker::Ticking;
    use std::sync::mpsc::{self, RecvTimeoutError};
    use std::thread;
    use std::time::Duration;

    const SETTLE: Duration = Duration::from_millis(50);
    const PATIENCE: Duration = Duration::from_secs(10);

    /// Starts a blocking read on another thread; the result and the session
    /// come back through the channel.
    fn spawn_reader(
        notifier: &Arc<ChangeNotifier>,
        mut session: Session,
    ) -> mpsc::Receiver<(Result<i64>, Session)> {
        let (tx, rx) = mpsc::channel();
        let notifier = Arc::clone(notifier);
        thread::spawn(move || {
            let result = notifier.read(&mut session);
            let _ = tx.send((result, session));
        });
        rx
    }

    #[test]
    fn test_open_captures_current_value() {
        let notifier = ChangeNotifier::new();
        notifier.write(12);
        let mut session = notifier.open();
        assert_eq!(session.last_seen(), 12);
        assert_eq!(notifier.try_read(&mut session), None);
    }

    #[test]
    fn test_read_returns_pending_change_immediately() {
        let notifier = ChangeNotifier::new();
        let mut session = notifier.open();
        notifier.write(5);
        assert_eq!(notifier.read(&mut session).unwrap(), 5);
        assert_eq!(session.last_seen(), 5);
    }

    #[test]
    fn test_same_value_write_does_not_wake() {
        let notifier = Arc::new(ChangeNotifier::new());
        let session = notifier.open();
        let rx = spawn_reader(&notifier, session);

        thread::sleep(SETTLE);
        notifier.write(0);
        assert!(matches!(rx.recv_timeout(SETTLE), Err(RecvTimeoutError::Timeout)));

        notifier.write(7);
        let (result, session) = rx.recv_timeout(PATIENCE).unwrap();
        assert_eq!(result.unwrap(), 7);
        assert_eq!(session.last_seen(), 7);
    }

    #[test]
    fn test_interrupt_leaves_cursor() {
        let notifier = Arc::new(ChangeNotifier::new());
        notifier.write(3);
        let session = notifier.open();
        let interrupter = notifier.interrupter(&session);
        let rx = spawn_reader(&notifier, session);

        thread::sleep(SETTLE);
        interrupter.interrupt();
        let (result, mut session) = rx.recv_timeout(PATIENCE).unwrap();
        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(session.last_seen(), 3);

        // the interrupt was consumed; the next read sees the next change
        notifier.write(4);
        assert_eq!(notifier.read(&mut session).unwrap(), 4);
    }

    #[test]
    fn test_interrupt_before_read_cancels_it() {
        let notifier = ChangeNotifier::new();
        let mut session = notifier.open();
        notifier.interrupter(&session).interrupt();
        assert!(matches!(notifier.read(&mut session), Err(Error::Interrupted)));
    }

    #[test]
    fn test_change_wins_over_interrupt() {
        let notifier = ChangeNotifier::new();
        let mut session = notifier.open();
        notifier.interrupter(&session).interrupt();
        notifier.write(1);
        assert_eq!(notifier.read(&mut session).unwrap(), 1);
    }

    #[test]
    fn test_all_waiters_woken() {
        let notifier = Arc::new(ChangeNotifier::new());
        let receivers: Vec<_> = (0..4)
            .map(|_| spawn_reader(&notifier, notifier.open()))
            .collect();

        thread::sleep(SETTLE);
        notifier.write(9);
        for rx in receivers {
            let (result, _) = rx.recv_timeout(PATIENCE).unwrap();
            assert_eq!(result.unwrap(), 9);
        }
    }

    #[test]
    fn test_waiter_already_at_value_keeps_waiting() {
        let notifier = Arc::new(ChangeNotifier::new());
        notifier.write(5);
        let opened_at_five = notifier.open();
        notifier.write(0);
        let opened_at_zero = notifier.open();
        notifier.write(5);

        let rx_five = spawn_reader(&notifier, opened_at_five);
        let rx_zero = spawn_reader(&notifier, opened_at_zero);

        let (result, _) = rx_zero.recv_timeout(PATIENCE).unwrap();
        assert_eq!(result.unwrap(), 5);
        assert!(matches!(
            rx_five.recv_timeout(SETTLE),
            Err(RecvTimeoutError::Timeout)
        ));

        notifier.write(6);
        let (result, _) = rx_five.recv_timeout(PATIENCE).unwrap();
        assert_eq!(result.unwrap(), 6);
    }

    #[test]
    fn test_ticker_wakes_reader() {
        let notifier = Ticking::new(ChangeNotifier::new());
        let mut session = ChangeNotifier::open(&notifier);
        notifier.start(Duration::from_millis(1)).unwrap();
        assert!(notifier.read(&mut session).unwrap() >= 1);
        notifier.stop();
    }

    #[test]
    fn test_device_round_trip() {
        let device = DeviceFile::new(ChangeNotifier::new().with_name("wait"));
        let mut handle = device.open().unwrap();
        assert_eq!(device.write(&mut handle, b"42\n").unwrap(), 3);
        assert_eq!(device.read(&mut handle, 64).unwrap(), b"42\n");
        assert_eq!(handle.session().last_seen(), 42);
        assert_eq!(device.name(), "wait");
        device.close(handle);
    }

    #[test]
    fn test_debug() {
        let notifier = ChangeNotifier::new().with_name("wait");
        notifier.write(-2);
        assert_eq!(format!("{notifier:?}"), "wait{ -2 }");
    }
}
