//! Concurrent container of closable items with a bounded number open.
//!
//! ## Design
//!
//! - The entry table is a [`DashMap`] from key to a shared [`Entry`]. Lookups and
//!   inserts on different keys do not contend.
//! - `acquire` pins the entry with a single atomic operation, reopens it if it was
//!   closed, and records a touch in the calling thread's touch buffer.
//! - The LRU tracker is only modified by a drain, under the tracker lock. A drain
//!   replays pending touches and then closes least recently used idle entries
//!   until at most `capacity` remain open.
//! - Drains run when a touch buffer fills up, after every `add`, when `acquire`
//!   reopens an entry or sees more than `capacity` entries open, and on `close`,
//!   `remove` and [`ClosableContainer::empty_buffers`].
//! - Opportunistic drains only `try_lock` the tracker. A thread that loses the race
//!   leaves a drain request behind, and whoever holds the tracker lock checks for
//!   requests after unlocking and drains again. Once no operation is in flight every
//!   open entry is tracked.
//!
//! Pinned entries are never closed. If every open entry is pinned the container
//! stays over capacity until pins are released and another drain runs.

use std::{
    borrow::Borrow,
    fmt::{self, Debug},
    hash::{BuildHasher, Hash},
    ops::Deref,
    sync::{
        atomic::{self, AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use ahash::RandomState;
use cache_padded::CachePadded;
use dashmap::{mapref::entry::Entry as TableEntry, DashMap};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::{
    entry::{Entry, EntryState},
    item::Closable,
    ErrorKind, Result,
};

use self::{
    touch::TouchBuffers,
    tracker::{Eviction, Tracker},
};

mod touch;
mod tracker;


/// Upper bound for the default per-thread touch buffer size.
const DEFAULT_TOUCH_BUFFER_LIMIT: usize = 256;

pub struct ClosableContainer<K, I, S = RandomState>
where
    K: Send + Sync,
    I: Send + Sync,
{
    table: DashMap<K, Arc<Entry<K, I>>, S>,
    tracker: Mutex<Tracker<K, I>>,
    touches: TouchBuffers<K, I>,
    /// Number of entries in the open state. Used to decide when an inline drain is
    /// due, so it may briefly run ahead of the tracker.
    open: CachePadded<AtomicUsize>,
    /// Set by a thread that wanted to drain but found the tracker locked.
    drain_requested: CachePadded<AtomicBool>,
    capacity: usize,
    reopen_timeout: Option<Duration>,
}

impl<K, I> ClosableContainer<K, I, RandomState>
where
    K: Hash + Eq + Clone + Send + Sync,
    I: Closable + Send + Sync,
{
    /// Create a container that keeps at most `capacity` items open.
    ///
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        ContainerBuilder::new(capacity).build()
    }

    pub fn builder(capacity: usize) -> ContainerBuilder {
        ContainerBuilder::new(capacity)
    }
}

impl<K, I, S> ClosableContainer<K, I, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    I: Closable + Send + Sync,
    S: BuildHasher + Clone,
{
    /// Add an open item under `key`.
    ///
    /// The item counts as open straight away, even if that takes the container over
    /// capacity. The drain this triggers tracks it and closes the least recently
    /// used idle items.
    pub fn add(&self, key: K, item: I) -> Result<()> {
        let entry = match self.table.entry(key) {
            TableEntry::Occupied(_) => return Err(ErrorKind::DuplicateKey.into()),
            TableEntry::Vacant(vacant) => {
                let entry = Arc::new(Entry::new(vacant.key().clone(), Arc::new(item)));
                self.open.fetch_add(1, Ordering::AcqRel);
                vacant.insert(entry.clone());
                entry
            }
        };

        self.record(entry);
        self.try_drain();
        Ok(())
    }

    /// Pin the item stored under `key`, reopening it if it was closed.
    ///
    /// Returns `Ok(None)` if there is no such key. The item stays open until the
    /// returned guard is dropped or passed to [`release`](Self::release).
    ///
    /// If the item fails to reopen the error is returned, the entry stays closed,
    /// and a later call will try to reopen it again.
    pub fn acquire<Q>(&self, key: &Q) -> Result<Option<Pinned<K, I>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = match self.lookup(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        // A retired entry was removed after our lookup.
        let observed = match entry.pin() {
            Some(state) => state,
            None => return Ok(None),
        };

        // The guard owns the pin from here, so every error path releases it.
        let pinned = Pinned { entry };
        let reopened = !observed.is_open() && pinned.entry.reopen(self.reopen_timeout)?;
        if reopened {
            self.open.fetch_add(1, Ordering::AcqRel);
        }

        self.record(pinned.entry.clone());
        if reopened || self.over_capacity() {
            self.try_drain();
        }
        Ok(Some(pinned))
    }

    /// Release an item obtained from [`acquire`](Self::acquire). Same as dropping
    /// the guard.
    pub fn release(&self, pinned: Pinned<K, I>) {
        drop(pinned);
    }

    /// Look up an item without pinning it or recording an access.
    ///
    /// Nothing keeps the item open after this returns.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<I>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(key).map(|entry| entry.item().clone())
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.contains_key(key)
    }

    /// Remove the entry for `key` and hand back its item, open or not.
    ///
    /// Fails with [`ErrorKind::EntryPinned`] while the entry is acquired.
    pub fn remove<Q>(&self, key: &Q) -> Result<Option<Arc<I>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut retired_from = None;
        let removed = self.table.remove_if(key, |_, entry| {
            retired_from = entry.retire();
            retired_from.is_some()
        });

        let entry = match removed {
            Some((_, entry)) => entry,
            None if self.table.contains_key(key) => return Err(ErrorKind::EntryPinned.into()),
            None => return Ok(None),
        };
        if retired_from == Some(EntryState::Open) {
            self.open.fetch_sub(1, Ordering::AcqRel);
        }

        let item = entry.item().clone();
        self.drain(self.tracker.lock(), Some(entry));
        Ok(Some(item))
    }

    /// Close the item for `key` now if it is open and not acquired.
    ///
    /// Returns whether this call closed it. The next `acquire` reopens it.
    pub fn close<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = match self.lookup(key) {
            Some(entry) => entry,
            None => return false,
        };
        if !entry.close_if_idle() {
            return false;
        }
        self.open.fetch_sub(1, Ordering::AcqRel);

        self.drain(self.tracker.lock(), Some(entry));
        true
    }

    /// Replay every pending touch into the tracker and evict down to capacity.
    ///
    /// Once this returns the tracker reflects every access that completed before
    /// the call.
    pub fn empty_buffers(&self) {
        self.drain(self.tracker.lock(), None);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Approximate number of open items. Exact when no operation is in flight.
    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    fn lookup<Q>(&self, key: &Q) -> Option<Arc<Entry<K, I>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.table.get(key).map(|entry| entry.value().clone())
    }

    fn record(&self, entry: Arc<Entry<K, I>>) {
        if let Some(batch) = self.touches.record(entry) {
            trace!(touches = batch.len(), "touch buffer full, draining");
            self.drain(self.tracker.lock(), batch);
        }
    }

    fn over_capacity(&self) -> bool {
        self.open.load(Ordering::Acquire) > self.capacity
    }

    /// Drain now if the tracker is free, otherwise leave the drain to the thread
    /// holding it.
    fn try_drain(&self) {
        self.drain_requested.store(true, Ordering::SeqCst);
        // Pairs with the fence in `unlock_tracker`: either we get the lock or the
        // holder sees the request after unlocking.
        atomic::fence(Ordering::SeqCst);
        if let Some(tracker) = self.tracker.try_lock() {
            self.drain(tracker, None);
        }
    }

    fn drain<T>(&self, mut tracker: MutexGuard<'_, Tracker<K, I>>, first: T)
    where
        T: IntoIterator<Item = Arc<Entry<K, I>>>,
    {
        self.drain_locked(&mut tracker, first);
        self.unlock_tracker(tracker);
    }

    /// Release the tracker lock, then serve drain requests made while it was held.
    fn unlock_tracker(&self, tracker: MutexGuard<'_, Tracker<K, I>>) {
        drop(tracker);
        loop {
            atomic::fence(Ordering::SeqCst);
            if !self.drain_requested.load(Ordering::SeqCst) {
                return;
            }
            match self.tracker.try_lock() {
                Some(mut tracker) => self.drain_locked(&mut tracker, None),
                // The new holder runs this loop when it unlocks.
                None => return,
            }
        }
    }

    fn drain_locked<T>(&self, tracker: &mut Tracker<K, I>, first: T)
    where
        T: IntoIterator<Item = Arc<Entry<K, I>>>,
    {
        self.drain_requested.store(false, Ordering::SeqCst);
        for entry in first {
            tracker.touch(entry);
        }
        self.touches.drain(|entry| tracker.touch(entry));

        let eviction = tracker.evict();
        if eviction.closed > 0 {
            self.open.fetch_sub(eviction.closed, Ordering::AcqRel);
        }
        if eviction != Eviction::default() {
            debug!(
                closed = eviction.closed,
                purged = eviction.purged,
                skipped = eviction.skipped,
                tracked = tracker.len(),
                "evicted entries"
            );
        }
        if tracker.len() > tracker.capacity() {
            debug!(
                tracked = tracker.len(),
                capacity = tracker.capacity(),
                "every eviction candidate is pinned, staying over capacity"
            );
        }
    }
}

/// Read-only structural checks. They take the tracker lock and walk the whole
/// container, so they are meant for tests and diagnostics, and only give
/// meaningful answers after [`empty_buffers`](ClosableContainer::empty_buffers)
/// with no operations in flight.
impl<K, I, S> ClosableContainer<K, I, S>
where
    K: Hash + Eq + Clone + Send + Sync,
    I: Closable + Send + Sync,
    S: BuildHasher + Clone,
{
    /// Every tracked entry is present in the table, and tracked exactly once.
    pub fn check_all_tracked_in_table(&self) -> bool {
        let tracker = self.tracker.lock();
        tracker.links_consistent()
            && tracker.iter().all(|entry| {
                self.table
                    .get(entry.key())
                    .map_or(false, |found| Arc::ptr_eq(found.value(), entry))
            })
    }

    /// Every open entry in the table is tracked.
    pub fn check_all_open_tracked(&self) -> bool {
        let tracker = self.tracker.lock();
        self.table
            .iter()
            .filter(|entry| entry.is_open())
            .all(|entry| tracker.tracks(entry.value()))
    }

    /// No entry that is closed, reopening or removed is tracked.
    pub fn check_no_closed_tracked(&self) -> bool {
        self.tracker.lock().iter().all(|entry| entry.is_open())
    }

    /// The tracker holds as many entries as there are open entries.
    pub fn check_tracker_len(&self) -> bool {
        let tracker = self.tracker.lock();
        let open = self.table.iter().filter(|entry| entry.is_open()).count();
        tracker.len() == open
    }

    /// The tracker holds exactly `capacity` entries.
    pub fn check_tracker_len_equals_capacity(&self) -> bool {
        self.tracker.lock().len() == self.capacity
    }

    /// Key, state and pin count of every entry, in no particular order.
    pub fn snapshot(&self) -> Vec<(K, EntryState, usize)> {
        self.table
            .iter()
            .map(|entry| (entry.key().clone(), entry.state(), entry.pins()))
            .collect()
    }

    /// Keys in the tracker, least recently used first.
    pub fn tracked_keys(&self) -> Vec<K> {
        self.tracker
            .lock()
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

impl<K, I, S> Debug for ClosableContainer<K, I, S>
where
    K: Send + Sync,
    I: Send + Sync,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosableContainer")
            .field("capacity", &self.capacity)
            .field("open", &self.open.load(Ordering::Relaxed))
            .field("pending_touches", &self.touches.pending())
            .finish_non_exhaustive()
    }
}

pub struct ContainerBuilder<S = RandomState> {
    capacity: usize,
    touch_buffer_capacity: Option<usize>,
    reopen_timeout: Option<Duration>,
    hasher: S,
}

impl ContainerBuilder {
    /// # Panics
    ///
    /// If `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(1 <= capacity, "capacity must be at least one");

        Self {
            capacity,
            touch_buffer_capacity: None,
            reopen_timeout: None,
            hasher: RandomState::new(),
        }
    }
}

impl<S> ContainerBuilder<S> {
    /// Number of touches a thread buffers before it drains them itself. Defaults to
    /// half the capacity, up to a limit.
    pub fn touch_buffer_capacity(mut self, touch_buffer_capacity: usize) -> Self {
        self.touch_buffer_capacity = Some(touch_buffer_capacity.max(1));
        self
    }

    /// Give up with [`ErrorKind::ReopenTimeout`] when another thread has been
    /// reopening the same item for longer than `timeout`. Waits indefinitely by
    /// default.
    pub fn reopen_timeout(mut self, timeout: Duration) -> Self {
        self.reopen_timeout = Some(timeout);
        self
    }

    pub fn hasher<H>(self, hasher: H) -> ContainerBuilder<H> {
        ContainerBuilder {
            capacity: self.capacity,
            touch_buffer_capacity: self.touch_buffer_capacity,
            reopen_timeout: self.reopen_timeout,
            hasher,
        }
    }

    pub fn build<K, I>(self) -> ClosableContainer<K, I, S>
    where
        K: Hash + Eq + Send + Sync,
        I: Send + Sync,
        S: BuildHasher + Clone,
    {
        let touch_buffer_capacity = self
            .touch_buffer_capacity
            .unwrap_or_else(|| (self.capacity / 2 + 1).min(DEFAULT_TOUCH_BUFFER_LIMIT));

        ClosableContainer {
            table: DashMap::with_capacity_and_hasher(self.capacity, self.hasher),
            tracker: Mutex::new(Tracker::new(self.capacity)),
            touches: TouchBuffers::new(touch_buffer_capacity),
            open: CachePadded::new(AtomicUsize::new(0)),
            drain_requested: CachePadded::new(AtomicBool::new(false)),
            capacity: self.capacity,
            reopen_timeout: self.reopen_timeout,
        }
    }
}

/// An acquired item. The entry cannot be closed while this exists.
pub struct Pinned<K, I> {
    entry: Arc<Entry<K, I>>,
}

impl<K, I> Pinned<K, I> {
    pub fn key(&self) -> &K {
        self.entry.key()
    }

    pub fn item(&self) -> &Arc<I> {
        self.entry.item()
    }
}

impl<K, I> Deref for Pinned<K, I> {
    type Target = I;

    fn deref(&self) -> &Self::Target {
        self.entry.item()
    }
}

impl<K, I> Drop for Pinned<K, I> {
    fn drop(&mut self) {
        self.entry.unpin();
    }
}

impl<K, I> Debug for Pinned<K, I>
where
    K: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinned")
            .field("entry", &self.entry)
            .finish()
    }
}
