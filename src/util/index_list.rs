//! A doubly linked list stored in an arena and linked by index.
//!
//! Every value lives in a slot of a `Vec`; links are slot indices rather than
//! pointers, so relinking a value is a handful of index writes. The index returned
//! by [`IndexList::push_back`] stays valid until that value is removed, after
//! which the slot is recycled.

use std::ops::Index;

use nonmax::NonMaxUsize;

#[cfg(test)]
mod tests;

pub struct IndexList<T> {
    head: Option<NonMaxUsize>,
    tail: Option<NonMaxUsize>,
    slots: Vec<Slot<T>>,
    /// Vacant slots, reused most recently freed first.
    free: Vec<NonMaxUsize>,
    len: usize,
}

struct Slot<T> {
    value: Option<T>,
    next: Option<NonMaxUsize>,
    prev: Option<NonMaxUsize>,
}

impl<T> IndexList<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            head: None,
            tail: None,
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Append a value at the back and return the index it was stored at.
    pub fn push_back(&mut self, value: T) -> NonMaxUsize {
        let index = self.alloc(value);
        self.link_back(index);
        index
    }

    /// Unlink the value at `index` and return it. Returns `None` for a vacant slot.
    pub fn remove(&mut self, index: NonMaxUsize) -> Option<T> {
        self.slots.get(index.get())?.value.as_ref()?;
        self.unlink(index);
        self.len -= 1;
        self.free.push(index);
        self.slots[index.get()].value.take()
    }

    /// Relink the value at `index` as the last element.
    pub fn move_to_back(&mut self, index: NonMaxUsize) {
        if self.tail == Some(index) || self.get(index).is_none() {
            return;
        }
        self.unlink(index);
        self.link_back(index);
    }

    pub fn first(&self) -> Option<NonMaxUsize> {
        self.head
    }

    /// The index that follows `index`, towards the back.
    pub fn next(&self, index: NonMaxUsize) -> Option<NonMaxUsize> {
        self.slots.get(index.get())?.next
    }

    pub fn get(&self, index: NonMaxUsize) -> Option<&T> {
        self.slots.get(index.get())?.value.as_ref()
    }

    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            front: self.head,
            back: self.tail,
            remaining: self.len,
            list: self,
        }
    }

    fn alloc(&mut self, value: T) -> NonMaxUsize {
        let slot = Slot {
            value: Some(value),
            next: None,
            prev: None,
        };
        self.len += 1;

        if let Some(index) = self.free.pop() {
            self.slots[index.get()] = slot;
            return index;
        }

        let index = NonMaxUsize::new(self.slots.len()).expect("index list overflow");
        self.slots.push(slot);
        index
    }

    fn link_back(&mut self, index: NonMaxUsize) {
        let i = index.get();
        self.slots[i].next = None;
        self.slots[i].prev = self.tail;

        if let Some(prev) = self.tail {
            self.slots[prev.get()].next = Some(index);
        } else {
            self.head = Some(index);
        }
        self.tail = Some(index);
    }

    fn unlink(&mut self, index: NonMaxUsize) {
        let slot = &mut self.slots[index.get()];
        let next = slot.next.take();
        let prev = slot.prev.take();

        if let Some(next) = next {
            self.slots[next.get()].prev = prev;
        } else {
            self.tail = prev;
        }

        if let Some(prev) = prev {
            self.slots[prev.get()].next = next;
        } else {
            self.head = next;
        }
    }
}

impl<T> Default for IndexList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<NonMaxUsize> for IndexList<T> {
    type Output = T;

    fn index(&self, index: NonMaxUsize) -> &Self::Output {
        self.get(index).expect("vacant index list slot")
    }
}

pub struct Iter<'a, T> {
    front: Option<NonMaxUsize>,
    back: Option<NonMaxUsize>,
    remaining: usize,
    list: &'a IndexList<T>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (NonMaxUsize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let front = self.front?;
        let slot = &self.list.slots[front.get()];
        self.front = slot.next;
        self.remaining -= 1;
        slot.value.as_ref().map(|value| (front, value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, T> DoubleEndedIterator for Iter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let back = self.back?;
        let slot = &self.list.slots[back.get()];
        self.back = slot.prev;
        self.remaining -= 1;
        slot.value.as_ref().map(|value| (back, value))
    }
}

impl<'a, T> ExactSizeIterator for Iter<'a, T> {}
