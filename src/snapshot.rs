//! Pinned read points.
//!
//! A snapshot pins a sequence number: reads at the snapshot ignore newer
//! records, and compaction may not drop any record still visible to the
//! oldest live snapshot. Dropping the `Snapshot` handle releases the pin;
//! the list holds weak references and prunes dead ones on inspection.

use std::sync::{Arc, Mutex, Weak};

use crate::keys::SequenceNumber;

/// A handle pinning reads to a point in time. Clone to share; the pin
/// lasts until the last clone drops.
#[derive(Clone)]
pub struct Snapshot {
    inner: Arc<SnapshotInner>,
}

struct SnapshotInner {
    sequence: SequenceNumber,
}

impl Snapshot {
    pub fn sequence(&self) -> SequenceNumber {
        self.inner.sequence
    }
}

#[derive(Default)]
pub struct SnapshotList {
    snapshots: Mutex<Vec<Weak<SnapshotInner>>>,
}

impl SnapshotList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, sequence: SequenceNumber) -> Snapshot {
        let inner = Arc::new(SnapshotInner { sequence });
        let mut snapshots = self.snapshots.lock().unwrap();
        snapshots.retain(|weak| weak.strong_count() > 0);
        snapshots.push(Arc::downgrade(&inner));
        Snapshot { inner }
    }

    /// Oldest pinned sequence, or `fallback` when nothing is pinned.
    /// Compaction uses this as the drop horizon.
    pub fn smallest(&self, fallback: SequenceNumber) -> SequenceNumber {
        let mut snapshots = self.snapshots.lock().unwrap();
        snapshots.retain(|weak| weak.strong_count() > 0);
        snapshots
            .iter()
            .filter_map(|weak| weak.upgrade())
            .map(|snapshot| snapshot.sequence)
            .min()
            .unwrap_or(fallback)
    }

    pub fn is_empty(&self) -> bool {
        let mut snapshots = self.snapshots.lock().unwrap();
        snapshots.retain(|weak| weak.strong_count() > 0);
        snapshots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_uses_fallback() {
        let list = SnapshotList::new();
        assert!(list.is_empty());
        assert_eq!(list.smallest(42), 42);
    }

    #[test]
    fn test_smallest_tracks_oldest() {
        let list = SnapshotList::new();
        let s1 = list.acquire(10);
        let s2 = list.acquire(20);
        assert_eq!(list.smallest(99), 10);

        drop(s1);
        assert_eq!(list.smallest(99), 20);
        drop(s2);
        assert_eq!(list.smallest(99), 99);
    }

    #[test]
    fn test_clone_keeps_pin() {
        let list = SnapshotList::new();
        let s1 = list.acquire(10);
        let s2 = s1.clone();
        drop(s1);
        assert_eq!(list.smallest(99), 10);
        assert_eq!(s2.sequence(), 10);
    }
}
