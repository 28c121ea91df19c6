use std::{mem, sync::Arc};

use cache_padded::CachePadded;
use parking_lot::Mutex;
use thread_local::ThreadLocal;

use crate::entry::Entry;

type Shard<K, I> = CachePadded<Mutex<Vec<Arc<Entry<K, I>>>>>;

/// Per-thread queues of recently touched entries.
///
/// Shard locks are leaves in the lock order: nothing else is ever locked while one
/// is held, so a drain holding the tracker lock can always take them.
pub(super) struct TouchBuffers<K, I>
where
    K: Send + Sync,
    I: Send + Sync,
{
    shards: ThreadLocal<Shard<K, I>>,
    shard_capacity: usize,
}

impl<K, I> TouchBuffers<K, I>
where
    K: Send + Sync,
    I: Send + Sync,
{
    pub fn new(shard_capacity: usize) -> Self {
        Self {
            shards: ThreadLocal::new(),
            shard_capacity: shard_capacity.max(1),
        }
    }

    /// Record a touch in the calling thread's shard.
    ///
    /// If that fills the shard, its contents are handed back and the caller must
    /// replay them into the tracker.
    #[must_use = "a full batch of touches must be drained"]
    pub fn record(&self, entry: Arc<Entry<K, I>>) -> Option<Vec<Arc<Entry<K, I>>>> {
        let shard = self
            .shards
            .get_or(|| CachePadded::new(Mutex::new(Vec::with_capacity(self.shard_capacity))));
        let mut queue = shard.lock();
        queue.push(entry);

        if queue.len() < self.shard_capacity {
            return None;
        }
        let replacement = Vec::with_capacity(self.shard_capacity);
        Some(mem::replace(&mut *queue, replacement))
    }

    /// Remove every pending touch from every shard, oldest first within a shard.
    pub fn drain<F>(&self, mut f: F)
    where
        F: FnMut(Arc<Entry<K, I>>),
    {
        for shard in self.shards.iter() {
            let mut queue = shard.lock();
            for entry in queue.drain(..) {
                f(entry);
            }
        }
    }

    /// Number of touches not yet drained.
    pub fn pending(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }
}
