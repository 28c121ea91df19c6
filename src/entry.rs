//! Per-key records and the pin protocol.
//!
//! An entry's lifecycle state and pin count share one atomic word: the low
//! [`TAG_BITS`] bits hold the [`EntryState`] and the rest count outstanding pins.
//! Packing them together lets eviction move an entry from "open with no pins" to
//! "closed" in a single compare-exchange, which a concurrent pin either precedes
//! (and the exchange fails) or follows (and observes the entry closed).

use std::{
    fmt::{self, Debug},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use nonmax::NonMaxUsize;
use parking_lot::Mutex;
use tracing::warn;

use crate::{item::Closable, ErrorKind, Result};


const TAG_BITS: u32 = 2;
const TAG_MASK: usize = (1 << TAG_BITS) - 1;
const PIN: usize = 1 << TAG_BITS;

/// Lifecycle of an entry as seen by the container.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryState {
    Open = 0,
    Closed,
    /// A pinning thread holds the reopen token and is reopening the item.
    Reopening,
    /// Removed from the container. Can no longer be pinned.
    Retired,
}

impl EntryState {
    fn from_word(word: usize) -> Self {
        match word & TAG_MASK {
            0 => EntryState::Open,
            1 => EntryState::Closed,
            2 => EntryState::Reopening,
            _ => EntryState::Retired,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, EntryState::Open)
    }
}

#[inline]
fn pins(word: usize) -> usize {
    word >> TAG_BITS
}

#[inline]
fn with_state(word: usize, state: EntryState) -> usize {
    (word & !TAG_MASK) | state as usize
}

pub(crate) struct Entry<K, I> {
    key: K,
    item: Arc<I>,
    state: AtomicUsize,
    /// Held while reopening or closing the item, so the two never interleave and
    /// concurrent pinners of a closed entry reopen it only once.
    token: Mutex<()>,
    /// Position in the LRU tracker. Only read or written with the tracker lock held.
    slot: AtomicUsize,
}

impl<K, I> Entry<K, I> {
    pub fn new(key: K, item: Arc<I>) -> Self {
        Self {
            key,
            item,
            state: AtomicUsize::new(EntryState::Open as usize),
            token: Mutex::new(()),
            slot: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn item(&self) -> &Arc<I> {
        &self.item
    }

    pub fn state(&self) -> EntryState {
        EntryState::from_word(self.state.load(Ordering::Acquire))
    }

    pub fn pins(&self) -> usize {
        pins(self.state.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Take a pin. Returns the state observed when the pin was taken, or `None` if
    /// the entry has been retired.
    ///
    /// A pin taken on an open entry keeps it open until the pin is released. A pin
    /// taken on any other state obliges the caller to [`reopen`](Self::reopen)
    /// before using the item.
    pub fn pin(&self) -> Option<EntryState> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let state = EntryState::from_word(current);
            if state == EntryState::Retired {
                return None;
            }
            match self.state.compare_exchange_weak(
                current,
                current + PIN,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(state),
                Err(actual) => current = actual,
            }
        }
    }

    /// Release a pin.
    ///
    /// # Panics
    ///
    /// If the entry is not pinned. Every unpin must pair with an earlier pin.
    pub fn unpin(&self) {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                (pins(word) > 0).then(|| word - PIN)
            });
        if result.is_err() {
            panic!("entry released more times than it was acquired");
        }
    }

    fn set_state(&self, state: EntryState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some(with_state(word, state))
            });
    }

    /// Move `(from, no pins)` to `(to, no pins)`. Fails if the entry is pinned or
    /// in another state.
    fn transition_idle(&self, from: EntryState, to: EntryState) -> bool {
        self.state
            .compare_exchange(from as usize, to as usize, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark an unpinned entry as removed. Returns the state it was retired from.
    pub fn retire(&self) -> Option<EntryState> {
        if self.transition_idle(EntryState::Open, EntryState::Retired) {
            Some(EntryState::Open)
        } else if self.transition_idle(EntryState::Closed, EntryState::Retired) {
            Some(EntryState::Closed)
        } else {
            None
        }
    }

    pub fn slot(&self) -> Option<NonMaxUsize> {
        NonMaxUsize::new(self.slot.load(Ordering::Relaxed))
    }

    pub fn set_slot(&self, slot: Option<NonMaxUsize>) {
        let raw = slot.map_or(usize::MAX, |slot| slot.get());
        self.slot.store(raw, Ordering::Relaxed);
    }
}

impl<K, I> Entry<K, I>
where
    I: Closable,
{
    /// Close the item if it is open and nobody holds a pin.
    ///
    /// Never blocks: if another thread is reopening or closing the entry this gives
    /// up and returns `false`.
    pub fn close_if_idle(&self) -> bool {
        let _token = match self.token.try_lock() {
            Some(token) => token,
            None => return false,
        };
        if !self.transition_idle(EntryState::Open, EntryState::Closed) {
            return false;
        }
        self.item.close();
        true
    }

    /// Bring a pinned entry back to the open state.
    ///
    /// Must be called with a pin held. Returns `true` if this call performed the
    /// reopen and `false` if another thread got there first. On failure the entry is
    /// left closed.
    pub fn reopen(&self, timeout: Option<Duration>) -> Result<bool> {
        debug_assert!(self.pins() > 0, "reopen without a pin");

        let _token = match timeout {
            Some(timeout) => match self.token.try_lock_for(timeout) {
                Some(token) => token,
                None => {
                    warn!(?timeout, "timed out waiting for entry reopen token");
                    return Err(ErrorKind::ReopenTimeout.into());
                }
            },
            None => self.token.lock(),
        };

        // Somebody else may have reopened it while we waited for the token. It
        // cannot have been retired or closed since, because we hold a pin.
        if self.is_open() {
            return Ok(false);
        }

        self.set_state(EntryState::Reopening);
        match self.item.reopen() {
            Ok(()) => {
                self.set_state(EntryState::Open);
                Ok(true)
            }
            Err(error) => {
                warn!(?error, "failed to reopen item");
                self.set_state(EntryState::Closed);
                Err(error.into())
            }
        }
    }
}

impl<K, I> Debug for Entry<K, I>
where
    K: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.state.load(Ordering::Acquire);
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("state", &EntryState::from_word(word))
            .field("pins", &pins(word))
            .finish_non_exhaustive()
    }
}
