use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::SequenceNumber;

/// Sequence numbers of the snapshots still held, with multiplicity.
#[derive(Debug, Default)]
pub(crate) struct SnapshotList {
    counts: BTreeMap<SequenceNumber, usize>,
}

impl SnapshotList {
    fn insert(&mut self, sequence: SequenceNumber) {
        *self.counts.entry(sequence).or_insert(0) += 1;
    }

    fn remove(&mut self, sequence: SequenceNumber) {
        match self.counts.get_mut(&sequence) {
            Some(n) if *n > 1 => *n -= 1,
            Some(_) => {
                self.counts.remove(&sequence);
            }
            None => debug_assert!(false, "snapshot {sequence} released twice"),
        }
    }

    pub(crate) fn oldest(&self) -> Option<SequenceNumber> {
        self.counts.keys().next().copied()
    }

    pub(crate) fn newest(&self) -> Option<SequenceNumber> {
        self.counts.keys().next_back().copied()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

struct SnapshotHandle {
    sequence: SequenceNumber,
    list: Arc<Mutex<SnapshotList>>,
}

impl Drop for SnapshotHandle {
    fn drop(&mut self) {
        self.list.lock().remove(self.sequence);
    }
}

/// A consistent read view of the database. Reads through a snapshot see
/// the state as of its creation. Released when the last clone is dropped.
#[derive(Clone)]
pub struct Snapshot {
    handle: Arc<SnapshotHandle>,
}

impl Snapshot {
    pub(crate) fn new(list: &Arc<Mutex<SnapshotList>>, sequence: SequenceNumber) -> Self {
        list.lock().insert(sequence);
        Snapshot {
            handle: Arc::new(SnapshotHandle {
                sequence,
                list: Arc::clone(list),
            }),
        }
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.handle.sequence
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.handle.sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_tracks_live_snapshots() {
        let list = Arc::new(Mutex::new(SnapshotList::default()));
        let s1 = Snapshot::new(&list, 10);
        let s2 = Snapshot::new(&list, 20);
        let s2b = s2.clone();
        let s3 = Snapshot::new(&list, 20);
        assert_eq!(list.lock().oldest(), Some(10));
        assert_eq!(list.lock().newest(), Some(20));

        drop(s1);
        assert_eq!(list.lock().oldest(), Some(20));
        drop(s2);
        drop(s2b);
        // Still held by `s3`.
        assert_eq!(list.lock().oldest(), Some(20));
        drop(s3);
        assert!(list.lock().is_empty());
    }
}
