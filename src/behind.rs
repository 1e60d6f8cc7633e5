//! Bookkeeping for items that became available behind a cursor.
//!
//! When a cursor skips an item (because another consumer held it locked, for
//! example) and the item later becomes available again, the cursor records it
//! in a [`BehindRefList`] so that its next get can jump back and deliver it.
//! Entries hold [`Weak`] references: an item that is discarded while waiting
//! in the list is pruned the next time it is encountered.
use crate::{
    arena::{Arena, Key},
    ItemLink,
};
use core::fmt;
use std::sync::{Arc, Weak};

/// A position-ordered list of weak references to items.
pub(crate) struct BehindRefList<L> {
    refs: Arena<BehindRef<L>>,
    first: Option<Key>,
    last: Option<Key>,
}

struct BehindRef<L> {
    item: Weak<L>,
    /// The referent's position, kept so that the list stays ordered after
    /// the referent is gone.
    position: u64,
    prev: Option<Key>,
    next: Option<Key>,
}

impl<L: ItemLink> BehindRefList<L> {
    pub(crate) const fn new() -> Self {
        Self {
            refs: Arena::new(),
            first: None,
            last: None,
        }
    }

    /// Adds `item` at the end of the list without checking its position.
    ///
    /// Returns `false` if `item` has never been positioned, in which case it
    /// is not added.
    pub(crate) fn append(&mut self, item: &Arc<L>) -> bool {
        let Some(position) = item.position() else {
            return false;
        };
        let key = self.refs.insert(BehindRef {
            item: Arc::downgrade(item),
            position,
            prev: self.last,
            next: None,
        });
        self.link_after(self.last, key);
        true
    }

    /// Inserts `item` in position order.
    ///
    /// The list is scanned backward from the end, pruning entries whose
    /// referents are gone. Returns `false` if an entry for `item`'s position
    /// already exists (which is kept) or `item` has never been positioned.
    pub(crate) fn insert(&mut self, item: &Arc<L>) -> bool {
        let Some(position) = item.position() else {
            return false;
        };

        let mut cursor = self.last;
        while let Some(key) = cursor {
            let Some(entry) = self.refs.get(key) else {
                break;
            };
            let (prev, entry_position, alive) = (entry.prev, entry.position, entry.is_alive());
            if !alive {
                test_trace!(position = entry_position, "BehindRefList::insert: pruning");
                self.unlink(key);
                cursor = prev;
                continue;
            }

            if entry_position == position {
                return false;
            }
            if entry_position < position {
                break;
            }
            cursor = prev;
        }

        if cursor == self.last {
            return self.append(item);
        }
        let key = self.refs.insert(BehindRef {
            item: Arc::downgrade(item),
            position,
            prev: None,
            next: None,
        });
        self.link_after(cursor, key);
        true
    }

    /// Returns the first entry whose referent is still alive, pruning dead
    /// entries at the front of the list. If `remove` is set, the returned
    /// entry is removed as well.
    pub(crate) fn get_first(&mut self, remove: bool) -> Option<Arc<L>> {
        while let Some(key) = self.first {
            let item = self.refs.get(key).and_then(|entry| entry.item.upgrade());
            match item {
                Some(item) => {
                    if remove {
                        self.unlink(key);
                    }
                    return Some(item);
                }
                None => {
                    test_trace!("BehindRefList::get_first: pruning");
                    self.unlink(key);
                }
            }
        }
        None
    }

    /// Returns the number of entries, including any whose referents are gone
    /// but that have not been pruned yet.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.refs.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    pub(crate) fn clear(&mut self) {
        self.refs.clear();
        self.first = None;
        self.last = None;
    }

    /// Returns the positions of live entries, in order.
    pub(crate) fn positions(&self) -> Vec<u64> {
        let mut positions = Vec::with_capacity(self.refs.len());
        let mut cursor = self.first;
        while let Some(entry) = cursor.and_then(|key| self.refs.get(key)) {
            if entry.is_alive() {
                positions.push(entry.position);
            }
            cursor = entry.next;
        }
        positions
    }

    /// Links the (unlinked) entry `key` directly after `prev`, or at the front
    /// if `prev` is `None`.
    fn link_after(&mut self, prev: Option<Key>, key: Key) {
        let next = match prev {
            Some(prev) => self.refs.get(prev).and_then(|entry| entry.next),
            None => self.first,
        };

        if let Some(entry) = self.refs.get_mut(key) {
            entry.prev = prev;
            entry.next = next;
        }
        match prev.and_then(|prev| self.refs.get_mut(prev)) {
            Some(prev) => prev.next = Some(key),
            None => self.first = Some(key),
        }
        match next.and_then(|next| self.refs.get_mut(next)) {
            Some(next) => next.prev = Some(key),
            None => self.last = Some(key),
        }
    }

    fn unlink(&mut self, key: Key) {
        let Some(entry) = self.refs.remove(key) else {
            return;
        };
        match entry.prev.and_then(|prev| self.refs.get_mut(prev)) {
            Some(prev) => prev.next = entry.next,
            None => self.first = entry.next,
        }
        match entry.next.and_then(|next| self.refs.get_mut(next)) {
            Some(next) => next.prev = entry.prev,
            None => self.last = entry.prev,
        }
    }
}

impl<L> BehindRef<L> {
    fn is_alive(&self) -> bool {
        self.item.strong_count() > 0
    }
}

impl<L> fmt::Debug for BehindRefList<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehindRefList")
            .field("len", &self.refs.len())
            .field("first", &self.first)
            .field("last", &self.last)
            .finish()
    }
}
