use std::sync::Arc;

use crate::{entry::Entry, item::Closable, util::index_list::IndexList};

/// Open entries in approximate recency order, least recently used first.
///
/// Lives behind the container's tracker lock. Each tracked entry records its own
/// slot, so relinking a touched entry does not need a lookup.
pub(super) struct Tracker<K, I> {
    list: IndexList<Arc<Entry<K, I>>>,
    capacity: usize,
}

/// What a single eviction pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct Eviction {
    /// Idle entries that were closed.
    pub closed: usize,
    /// Nodes of entries that had already stopped being open.
    pub purged: usize,
    /// Candidates skipped because they were pinned or busy reopening.
    pub skipped: usize,
}

impl<K, I> Tracker<K, I> {
    pub fn new(capacity: usize) -> Self {
        Self {
            list: IndexList::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Replay one touch: an open entry moves to the most recently used end, an entry
    /// that is no longer open is dropped from the tracker.
    pub fn touch(&mut self, entry: Arc<Entry<K, I>>) {
        match (entry.slot(), entry.is_open()) {
            (Some(slot), true) => self.list.move_to_back(slot),
            (Some(slot), false) => {
                self.list.remove(slot);
                entry.set_slot(None);
            }
            (None, true) => {
                let slot = self.list.push_back(entry.clone());
                entry.set_slot(Some(slot));
            }
            (None, false) => {}
        }
    }

    /// Tracked entries, least recently used first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Entry<K, I>>> + '_ {
        self.list.iter().map(|(_, entry)| entry)
    }

    /// Whether `entry` is tracked at the slot it believes it owns.
    pub fn tracks(&self, entry: &Arc<Entry<K, I>>) -> bool {
        entry
            .slot()
            .and_then(|slot| self.list.get(slot))
            .map_or(false, |tracked| Arc::ptr_eq(tracked, entry))
    }

    /// Whether every node's entry points back at that node.
    pub fn links_consistent(&self) -> bool {
        self.list
            .iter()
            .all(|(slot, entry)| entry.slot() == Some(slot))
    }
}

impl<K, I> Tracker<K, I>
where
    I: Closable,
{
    /// Close least recently used entries until no more than `capacity` are tracked.
    ///
    /// Pinned entries are passed over in favour of more recently used ones. If every
    /// candidate is pinned the tracker is left over capacity; a later pass catches
    /// up once pins are released.
    pub fn evict(&mut self) -> Eviction {
        let mut eviction = Eviction::default();
        let mut cursor = self.list.first();

        while self.list.len() > self.capacity {
            let slot = match cursor {
                Some(slot) => slot,
                None => break,
            };
            cursor = self.list.next(slot);

            let entry = &self.list[slot];
            if !entry.is_open() {
                eviction.purged += 1;
            } else if entry.close_if_idle() {
                eviction.closed += 1;
            } else {
                eviction.skipped += 1;
                continue;
            }

            if let Some(entry) = self.list.remove(slot) {
                entry.set_slot(None);
            }
        }

        eviction
    }
}
