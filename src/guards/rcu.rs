//! Read-copy-update snapshot of a byte payload.
//!
//! [`VersionedSnapshot`] publishes immutable snapshots through an atomic
//! pointer. Readers pin the current epoch and dereference whatever snapshot
//! is current, without locks and without blocking. A writer builds a new
//! snapshot, swaps it in, and hands the old one to the epoch collector,
//! which frees it only after every reader pinned before the swap has
//! unpinned (the grace period).
//!
//! ```text
//!   reader A ──pin──► load ──► [ v1 ] ─────────────────── unpin
//!   writer   ────────────── swap(v2) ── defer_destroy(v1)       │
//!   reader B ─────────────────────pin──► load ──► [ v2 ] ──unpin │
//!                                                               ▼
//!                                                     v1 reclaimed here
//! ```
//!
//! # Performance
//!
//! - **Reads**: pin + one acquire load, no shared writes
//! - **Writes**: allocation + one swap; reclamation is deferred
//! - **Best for**: read-mostly payloads replaced as a whole

use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned};

use crate::device::Strategy;
use crate::error::{Error, Result};
use crate::guards::{GuardValue, Observable};

/// One published version of the payload.
#[derive(Debug, PartialEq, Eq)]
pub struct Snapshot<T> {
    version: u64,
    payload: T,
}

impl<T> Snapshot<T> {
    /// Returns the publication number, starting at 1 for the first write.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }
}

/// A borrowed snapshot, valid for as long as it is held.
///
/// Holding a `SnapshotRef` keeps the current thread pinned, which delays
/// reclamation of every snapshot retired in the meantime. Drop it as soon as
/// the read is done.
pub struct SnapshotRef<'a, T> {
    snapshot: NonNull<Snapshot<T>>,
    _guard: Guard,
    _owner: PhantomData<&'a VersionedSnapshot<T>>,
}

impl<T> Deref for SnapshotRef<'_, T> {
    type Target = Snapshot<T>;

    fn deref(&self) -> &Snapshot<T> {
        // SAFETY: the snapshot was loaded while `_guard` was pinned and the
        // guard lives as long as `self`; retired snapshots are only freed
        // once no pinned participant can observe them.
        unsafe { self.snapshot.as_ref() }
    }
}

impl<T: Debug> Debug for SnapshotRef<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&**self, f)
    }
}

/// An RCU-protected value, byte payloads by default.
///
/// # Examples
///
/// ```rust
/// use custodi::guards::rcu::VersionedSnapshot;
///
/// let text: VersionedSnapshot = VersionedSnapshot::new();
/// text.write(b"first")?;
///
/// let held = text.read()?;
/// text.write(b"second")?;
///
/// // the old snapshot stays valid while it is held
/// assert_eq!(held.payload().as_slice(), b"first");
/// drop(held);
///
/// assert_eq!(text.read()?.payload().as_slice(), b"second");
/// # Ok::<(), custodi::Error>(())
/// ```
pub struct VersionedSnapshot<T = Vec<u8>> {
    name: &'static str,
    current: Atomic<Snapshot<T>>,
}

impl<T> VersionedSnapshot<T> {
    /// Creates an empty cell; reads fail with [`Error::NoValue`] until the
    /// first publication.
    pub fn new() -> Self {
        VersionedSnapshot {
            name: "",
            current: Atomic::null(),
        }
    }

    /// Sets the name of this cell, returning `self` for method chaining.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Borrows the current snapshot without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoValue`] if nothing was ever published.
    pub fn read(&self) -> Result<SnapshotRef<'_, T>> {
        let guard = epoch::pin();
        let shared = self.current.load(Ordering::Acquire, &guard);
        let snapshot = NonNull::new(shared.as_raw() as *mut Snapshot<T>).ok_or(Error::NoValue)?;
        Ok(SnapshotRef {
            snapshot,
            _guard: guard,
            _owner: PhantomData,
        })
    }

    /// Runs `f` on the current payload inside a read-side critical section.
    pub fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let snapshot = self.read()?;
        Ok(f(snapshot.payload()))
    }

    /// Returns `true` once a value has been published.
    pub fn is_set(&self) -> bool {
        let guard = epoch::pin();
        !self.current.load(Ordering::Acquire, &guard).is_null()
    }

    fn label(&self) -> &'static str {
        if self.name.is_empty() {
            "demo_rcu"
        } else {
            self.name
        }
    }
}

impl<T: Send + 'static> VersionedSnapshot<T> {
    /// Installs `payload` as the new current snapshot.
    ///
    /// The replaced snapshot is reclaimed after a grace period. Returns the
    /// version number assigned to the new snapshot.
    pub fn publish(&self, payload: T) -> u64 {
        let guard = epoch::pin();
        let mut new = Owned::new(Snapshot { version: 0, payload });
        let mut current = self.current.load(Ordering::Acquire, &guard);
        // versions are assigned under the swap, so concurrent publishers
        // each get a distinct number
        let version = loop {
            let version = version_of(current) + 1;
            new.version = version;
            match self.current.compare_exchange(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Acquire,
                &guard,
            ) {
                Ok(_) => break version,
                Err(e) => {
                    current = e.current;
                    new = e.new;
                }
            }
        };
        if !current.is_null() {
            log::trace!("{}: retiring snapshot v{}", self.label(), version - 1);
            // SAFETY: `current` is no longer reachable from `self.current`,
            // so only readers pinned before the swap can still see it.
            unsafe { guard.defer_destroy(current) };
        }
        version
    }

    /// Builds a payload with `make` and publishes it.
    ///
    /// # Errors
    ///
    /// Returns whatever `make` fails with, typically [`Error::Allocation`];
    /// nothing is published and the current snapshot is left untouched.
    pub fn try_publish(&self, make: impl FnOnce() -> Result<T>) -> Result<u64> {
        let payload = make()?;
        Ok(self.publish(payload))
    }

    /// Forces the collector to make progress on deferred reclamation.
    ///
    /// Snapshots still visible to pinned readers are kept.
    pub fn synchronize(&self) {
        epoch::pin().flush();
    }
}

fn version_of<T>(shared: epoch::Shared<'_, Snapshot<T>>) -> u64 {
    // SAFETY: callers pass a pointer loaded under a live guard.
    unsafe { shared.as_ref() }.map_or(0, |s| s.version)
}

impl VersionedSnapshot<Vec<u8>> {
    /// Copies `payload` into a new snapshot and publishes it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Allocation`] if the copy cannot be allocated; the
    /// current snapshot is left untouched.
    pub fn write(&self, payload: &[u8]) -> Result<u64> {
        self.try_publish(|| {
            let mut copy = Vec::new();
            copy.try_reserve_exact(payload.len())?;
            copy.extend_from_slice(payload);
            Ok(copy)
        })
    }
}

impl<T> Default for VersionedSnapshot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for VersionedSnapshot<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no reader can hold a `SnapshotRef`
        // borrowed from this cell, so the current snapshot can go now.
        unsafe {
            let current = self
                .current
                .swap(epoch::Shared::null(), Ordering::AcqRel, epoch::unprotected());
            if !current.is_null() {
                drop(current.into_owned());
            }
        }
    }
}

impl<T: Debug> Debug for VersionedSnapshot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.read() {
            Ok(snapshot) => write!(f, "{}{{ {:?} }}", self.name, &*snapshot),
            Err(_) => write!(f, "{}{{ unset }}", self.name),
        }
    }
}

impl Observable for VersionedSnapshot<Vec<u8>> {
    fn name(&self) -> &str {
        self.name
    }

    fn value(&self) -> GuardValue {
        self.read()
            .map(|s| GuardValue::Text(s.payload().clone()))
            .unwrap_or(GuardValue::Unset)
    }
}

impl Strategy for VersionedSnapshot<Vec<u8>> {
    type Session = ();

    fn device_name(&self) -> &str {
        self.label()
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Renders the raw payload bytes, exactly as last written.
    fn render(&self, _session: &mut ()) -> Result<Vec<u8>> {
        self.read_with(|payload| payload.clone())
    }

    /// Publishes the raw input; no integer parsing takes place.
    fn store(&self, _session: &mut (), input: &[u8]) -> Result<()> {
        self.write(input).map(|_| ())
    }

    fn close(&self, _session: ()) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::sync::Arc;
    use std::thread;

    #[derive(Debug)]
    struct Tracked {
        id: usize,
        dropped: Arc<Vec<AtomicBool>>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped[self.id].store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_read_before_write() {
        let cell: VersionedSnapshot = VersionedSnapshot::new();
        assert!(!cell.is_set());
        assert!(matches!(cell.read(), Err(Error::NoValue)));
        assert_eq!(cell.value(), GuardValue::Unset);
    }

    #[test]
    fn test_empty_is_not_unset() {
        let cell: VersionedSnapshot = VersionedSnapshot::new();
        cell.write(b"").unwrap();
        assert!(cell.is_set());
        assert!(cell.read().unwrap().payload().is_empty());
        assert_eq!(cell.value(), GuardValue::Text(Vec::new()));
    }

    #[test]
    fn test_versions_increase() {
        let cell: VersionedSnapshot = VersionedSnapshot::new();
        assert_eq!(cell.write(b"a").unwrap(), 1);
        assert_eq!(cell.write(b"b").unwrap(), 2);
        let snapshot = cell.read().unwrap();
        assert_eq!(snapshot.version(), 2);
        assert_eq!(snapshot.payload().as_slice(), b"b");
    }

    #[test]
    fn test_held_snapshot_survives_writes() {
        let cell: VersionedSnapshot = VersionedSnapshot::new();
        cell.write(b"original").unwrap();
        let held = cell.read().unwrap();
        for i in 0..1000 {
            cell.write(format!("update {i}").as_bytes()).unwrap();
            cell.synchronize();
        }
        assert_eq!(held.payload().as_slice(), b"original");
        assert_eq!(held.version(), 1);
        drop(held);
        assert_eq!(cell.read().unwrap().payload().as_slice(), b"update 999");
    }

    #[test]
    fn test_not_reclaimed_while_held() {
        let dropped = Arc::new((0..64).map(|_| AtomicBool::new(false)).collect::<Vec<_>>());
        let cell = VersionedSnapshot::new();
        cell.publish(Tracked {
            id: 0,
            dropped: Arc::clone(&dropped),
        });

        let held = cell.read().unwrap();
        for id in 1..64 {
            cell.publish(Tracked {
                id,
                dropped: Arc::clone(&dropped),
            });
            cell.synchronize();
        }
        assert!(!dropped[0].load(Ordering::SeqCst));
        assert_eq!(held.payload().id, 0);
        drop(held);

        drop(cell);
        // the last published snapshot is freed eagerly on drop
        assert!(dropped[63].load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let cell: Arc<VersionedSnapshot> = Arc::new(VersionedSnapshot::new());
        cell.write(&[0u8; 128]).unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let reads = Arc::new(AtomicUsize::new(0));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                let done = Arc::clone(&done);
                let reads = Arc::clone(&reads);
                thread::spawn(move || {
                    while !done.load(Ordering::Relaxed) {
                        let snapshot = cell.read().unwrap();
                        let payload = snapshot.payload();
                        assert_eq!(payload.len(), 128);
                        // every byte of a snapshot carries the same fill value
                        assert!(payload.iter().all(|b| *b == payload[0]));
                        reads.fetch_add(1, Ordering::Relaxed);
                    }
                })
            })
            .collect();

        for fill in 1..=200u8 {
            cell.write(&[fill; 128]).unwrap();
        }
        done.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(cell.read().unwrap().payload()[0], 200);
    }

    #[test]
    fn test_concurrent_writers_get_distinct_versions() {
        let cell: Arc<VersionedSnapshot> = Arc::new(VersionedSnapshot::new());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| cell.write(b"x").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut versions: Vec<u64> = writers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        versions.sort_unstable();
        versions.dedup();
        assert_eq!(versions.len(), 400);
        assert_eq!(cell.read().unwrap().version(), 400);
    }

    #[test]
    fn test_failed_allocation_keeps_current() {
        let cell: VersionedSnapshot = VersionedSnapshot::new();
        cell.write(b"keep").unwrap();

        let result = cell.try_publish(|| {
            let mut huge = Vec::new();
            huge.try_reserve_exact(usize::MAX)?;
            Ok(huge)
        });
        assert!(matches!(result, Err(Error::Allocation(_))));

        let snapshot = cell.read().unwrap();
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.payload().as_slice(), b"keep");
    }

    #[test]
    fn test_strategy_round_trip() {
        let cell: VersionedSnapshot = VersionedSnapshot::new();
        assert!(matches!(cell.render(&mut ()), Err(Error::NoValue)));
        cell.store(&mut (), b"hello\n").unwrap();
        assert_eq!(cell.render(&mut ()).unwrap(), b"hello\n");
        assert_eq!(cell.device_name(), "demo_rcu");
    }
}
