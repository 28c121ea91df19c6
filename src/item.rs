//! The capability a resource must provide to be managed by a
//! [`ClosableContainer`](crate::ClosableContainer).

use std::{io, sync::Arc};

pub use self::{file::FileItem, mem::MemItem, tracing::TracingItem};

mod file;
mod mem;
mod tracing;

/// A resource that can be closed and later reopened.
///
/// Items are shared between threads, so every method takes `&self`. The container
/// guarantees that `reopen` is never called concurrently for the same item and that
/// `close` is never called while the item is pinned by an acquisition, but `close`
/// may run on any thread.
pub trait Closable {
    fn is_open(&self) -> bool;

    /// Release the underlying resource. Must be idempotent.
    fn close(&self);

    /// Make a closed item usable again. This may block on I/O.
    fn reopen(&self) -> io::Result<()>;
}

impl<T> Closable for Arc<T>
where
    T: Closable + ?Sized,
{
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&self) {
        (**self).close()
    }

    fn reopen(&self) -> io::Result<()> {
        (**self).reopen()
    }
}

impl<T> Closable for Box<T>
where
    T: Closable + ?Sized,
{
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn close(&self) {
        (**self).close()
    }

    fn reopen(&self) -> io::Result<()> {
        (**self).reopen()
    }
}

/// An in-memory item wrapped with call tracing, labelled `mem.<n>`.
pub fn memory() -> TracingItem<MemItem> {
    use std::sync::atomic::{AtomicUsize, Ordering};

    static MEM_ID: AtomicUsize = AtomicUsize::new(0);
    let id = format!("mem.{}", MEM_ID.fetch_add(1, Ordering::Relaxed));
    TracingItem::new(MemItem::new(), id)
}
