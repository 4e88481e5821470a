//! Device-file facade shared by every strategy.
//!
//! Each guard exposes exactly four operations through the [`Strategy`] trait:
//! `open`, `render`, `store` and `close`. [`DeviceFile`] adds the uniform
//! file glue on top: a per-handle byte position, partial reads, and
//! "consume the whole buffer" writes.
//!
//! ```text
//!   open() ──► Handle { session, pos: 0 }
//!                 │
//!   read(h, n) ───┼──► render(session) = "42\n" ──► bytes[pos..pos+n], pos += n
//!                 │
//!   write(h, b) ──┼──► store(session, b) ──► Ok(b.len())
//!                 │
//!   close(h) ─────┴──► close(session)
//! ```
//!
//! # Examples
//!
//! ```rust
//! use custodi::device::DeviceFile;
//! use custodi::guards::percpu::AggregatedCounter;
//!
//! let device = DeviceFile::new(AggregatedCounter::new());
//! let mut handle = device.open()?;
//!
//! device.write(&mut handle, b"40\n")?;
//! device.write(&mut handle, b"2\n")?;
//!
//! assert_eq!(device.read(&mut handle, 64)?, b"42\n");
//! assert!(device.read(&mut handle, 64)?.is_empty()); // past EOF
//!
//! device.close(handle);
//! # Ok::<(), custodi::Error>(())
//! ```

use std::fmt::Debug;

use crate::error::{Error, Result};

/// The four operations a guarded value exposes to the device facade.
///
/// Implementations own all synchronization; the facade only deals with
/// bytes and positions.
pub trait Strategy: Send + Sync {
    /// Per-open state, e.g. the notifier's last-seen cursor.
    type Session: Send;

    /// Returns the name the device is registered under.
    fn device_name(&self) -> &str;

    /// Allocates the state of a new session.
    fn open(&self) -> Result<Self::Session>;

    /// Renders the current value as the full file content.
    ///
    /// May block if the strategy's read blocks.
    fn render(&self, session: &mut Self::Session) -> Result<Vec<u8>>;

    /// Applies raw input through the strategy's write path.
    fn store(&self, session: &mut Self::Session, input: &[u8]) -> Result<()>;

    /// Releases the session.
    fn close(&self, session: Self::Session);
}

/// An open session on a [`DeviceFile`].
#[derive(Debug)]
pub struct Handle<S> {
    session: S,
    pos: u64,
}

impl<S> Handle<S> {
    /// Returns the current read position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Moves the read position, like `lseek(fd, pos, SEEK_SET)`.
    pub fn seek(&mut self, pos: u64) {
        self.pos = pos;
    }

    /// Gives access to the strategy session.
    pub fn session(&mut self) -> &mut S {
        &mut self.session
    }
}

/// A strategy wrapped in file semantics.
#[derive(Debug)]
pub struct DeviceFile<S> {
    strategy: S,
}

impl<S: Strategy> DeviceFile<S> {
    /// Wraps a strategy.
    pub const fn new(strategy: S) -> Self {
        Self { strategy }
    }

    /// Returns the wrapped strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Returns the device name.
    pub fn name(&self) -> &str {
        self.strategy.device_name()
    }

    /// Opens a new session positioned at offset zero.
    pub fn open(&self) -> Result<Handle<S::Session>> {
        let session = self.strategy.open()?;
        Ok(Handle { session, pos: 0 })
    }

    /// Reads up to `count` bytes from the handle's position.
    ///
    /// A read starting at or past the end of the rendered value returns an
    /// empty buffer.
    pub fn read(&self, handle: &mut Handle<S::Session>, count: usize) -> Result<Vec<u8>> {
        let content = self.strategy.render(&mut handle.session)?;
        let chunk = slice_at(&content, handle.pos, count);
        handle.pos += chunk.len() as u64;
        Ok(chunk.to_vec())
    }

    /// Writes `input` through the strategy and reports all of it consumed.
    pub fn write(&self, handle: &mut Handle<S::Session>, input: &[u8]) -> Result<usize> {
        self.strategy.store(&mut handle.session, input)?;
        Ok(input.len())
    }

    /// Closes the handle.
    pub fn close(&self, handle: Handle<S::Session>) {
        self.strategy.close(handle.session);
    }
}

/// Returns the bytes of `content` in `[pos, pos + count)`, clamped to its end.
fn slice_at(content: &[u8], pos: u64, count: usize) -> &[u8] {
    let len = content.len() as u64;
    if pos >= len {
        return &[];
    }
    let start = pos as usize;
    let end = start.saturating_add(count).min(content.len());
    &content[start..end]
}

/// Parses a base-10 signed integer as written to a device.
///
/// Surrounding ASCII whitespace (including the trailing newline `echo`
/// appends) is ignored; anything else makes the input malformed.
///
/// # Examples
///
/// ```rust
/// use custodi::device::parse_decimal;
///
/// assert_eq!(parse_decimal(b"42\n").unwrap(), 42);
/// assert_eq!(parse_decimal(b" -7 ").unwrap(), -7);
/// assert!(parse_decimal(b"4 2").is_err());
/// ```
pub fn parse_decimal(input: &[u8]) -> Result<i64> {
    let text = std::str::from_utf8(input.trim_ascii())
        .map_err(|e| Error::Malformed(e.to_string()))?;
    text.parse::<i64>()
        .map_err(|e| Error::Malformed(format!("{text:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guards::atomic::AtomicCounter;
    use crate::guards::percpu::AggregatedCounter;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(parse_decimal(b"0").unwrap(), 0);
        assert_eq!(parse_decimal(b"+15\n").unwrap(), 15);
        assert_eq!(parse_decimal(b"\t-9223372036854775808\n").unwrap(), i64::MIN);
    }

    #[test]
    fn test_parse_decimal_malformed() {
        for input in [&b""[..], b"\n", b"abc", b"12x", b"9223372036854775808", b"\xff1"] {
            assert!(matches!(parse_decimal(input), Err(Error::Malformed(_))));
        }
    }

    #[test]
    fn test_slice_at() {
        assert_eq!(slice_at(b"123\n", 0, 64), b"123\n");
        assert_eq!(slice_at(b"123\n", 1, 2), b"23");
        assert_eq!(slice_at(b"123\n", 3, 64), b"\n");
        assert!(slice_at(b"123\n", 4, 64).is_empty());
        assert!(slice_at(b"123\n", 100, 64).is_empty());
        assert!(slice_at(b"123\n", 0, 0).is_empty());
        assert_eq!(slice_at(b"123\n", 2, usize::MAX), b"3\n");
    }

    #[test]
    fn test_partial_reads() {
        let device = DeviceFile::new(AggregatedCounter::new());
        let mut handle = device.open().unwrap();
        device.write(&mut handle, b"-123").unwrap();

        assert_eq!(device.read(&mut handle, 2).unwrap(), b"-1");
        assert_eq!(handle.position(), 2);
        assert_eq!(device.read(&mut handle, 2).unwrap(), b"23");
        assert_eq!(device.read(&mut handle, 2).unwrap(), b"\n");
        assert!(device.read(&mut handle, 2).unwrap().is_empty());
        assert_eq!(handle.position(), 5);

        handle.seek(0);
        assert_eq!(device.read(&mut handle, 64).unwrap(), b"-123\n");
        device.close(handle);
    }

    #[test]
    fn test_write_reports_consumed() {
        let device = DeviceFile::new(AtomicCounter::new());
        let mut handle = device.open().unwrap();
        assert_eq!(device.write(&mut handle, b"17\n").unwrap(), 3);
        assert_eq!(device.strategy().read(), 17);
        device.close(handle);
    }

    #[test]
    fn test_malformed_write_leaves_value() {
        let device = DeviceFile::new(AtomicCounter::new());
        let mut handle = device.open().unwrap();
        device.write(&mut handle, b"5").unwrap();
        assert!(device.write(&mut handle, b"five").is_err());
        assert_eq!(device.strategy().read(), 5);
        device.close(handle);
    }

    #[test]
    fn test_close_last_session_stops_ticker() {
        let device = DeviceFile::new(AtomicCounter::new());
        let first = device.open().unwrap();
        let second = device.open().unwrap();
        assert!(device.strategy().is_active());
        device.close(first);
        assert!(device.strategy().is_active());
        device.close(second);
        assert!(!device.strategy().is_active());
        device.strategy().deactivate();
        assert_eq!(device.strategy().sessions(), 0);
    }

    #[test]
    fn test_name() {
        let device = DeviceFile::new(AtomicCounter::new());
        assert_eq!(device.name(), "demo_atomic");
    }
}
