//! A bounded container of closable resources.
//!
//! [`ClosableContainer`] maps keys to items such as open files or sockets and keeps
//! at most `capacity` of them open at once. Items that are in use are pinned and
//! never closed; the least recently used idle items are closed when the open count
//! grows past capacity and reopened transparently on their next acquisition.
//!
//! Accesses are recorded in per-thread touch buffers and replayed into a single
//! LRU tracker in batches, so acquiring and releasing an item does not contend on
//! a global lock in the common case.

#![forbid(unsafe_op_in_unsafe_fn)]

use std::{io, result, sync::Arc};

use thiserror::Error;

mod container;
mod entry;
pub mod item;
mod util;

pub use container::{ClosableContainer, ContainerBuilder, Pinned};
pub use entry::EntryState;
pub use item::Closable;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error {
    // `io::Error` is not `Clone`. Sharing the kind behind an `Arc` lets callers
    // clone an error, for example to report one failed reopen to several waiters.
    kind: Arc<ErrorKind>,
}

#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// `add` was called with a key that is already present.
    #[error("key is already present in the container")]
    DuplicateKey,
    /// The entry is held by at least one outstanding acquisition.
    #[error("entry is pinned")]
    EntryPinned,
    /// The item could not be reopened. The entry stays closed and a later
    /// `acquire` will try again.
    #[error("failed to reopen item: {0}")]
    Reopen(#[from] io::Error),
    /// Another thread held the entry's reopen token for longer than the
    /// configured timeout.
    #[error("timed out waiting for a concurrent reopen")]
    ReopenTimeout,
}

pub type Result<T> = result::Result<T, Error>;

impl ErrorKind {
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Reopen(_) | ErrorKind::ReopenTimeout)
    }
}

impl Error {
    #[inline]
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Whether the failed operation may succeed if attempted again.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind.clone(),
        }
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    #[inline]
    fn from(error: E) -> Self {
        Error {
            kind: Arc::new(error.into()),
        }
    }
}

impl From<io::ErrorKind> for ErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        io::Error::from(kind).into()
    }
}
