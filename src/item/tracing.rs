use std::{fmt::Display, io, ops::Deref};

use tracing::trace;

use super::Closable;

pub struct TracingItem<I> {
    id: String,
    inner: I,
}

impl<I> TracingItem<I> {
    pub fn new<ID>(inner: I, id: ID) -> Self
    where
        ID: Display,
    {
        let id = id.to_string();
        Self { id, inner }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn into_inner(self) -> I {
        self.inner
    }
}

impl<I> Deref for TracingItem<I> {
    type Target = I;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<I> Closable for TracingItem<I>
where
    I: Closable,
{
    fn is_open(&self) -> bool {
        trace!("item.is_open({})", self.id);
        self.inner.is_open()
    }

    fn close(&self) {
        trace!("item.close({})", self.id);
        self.inner.close()
    }

    fn reopen(&self) -> io::Result<()> {
        trace!("item.reopen({})", self.id);
        self.inner.reopen()
    }
}
