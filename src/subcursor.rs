//! Traversal of a single list.
//!
//! A [`Subcursor`] walks one [`LinkedList`] for a cursor. It remembers the
//! last link it settled on (holding a cursor count on it so it cannot be
//! spliced out), and with jump-back enabled keeps a [`BehindRefList`] of items
//! that became available behind it.
//!
//! Locks are taken in the order `traversal` then the list's lock. The
//! `behind` lock is never held together with either. Item callouts (match and
//! lock attempts) happen with none of them held.
use crate::{
    arena::Key,
    behind::BehindRefList,
    list::Chain,
    snapshot::SubcursorSnapshot,
    util::FmtOption,
    ItemLink, LinkedList, LockId, Result,
};
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering::SeqCst},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub(crate) struct Subcursor<L: ItemLink> {
    list: Arc<LinkedList<L>>,
    filter: Option<Arc<L::Filter>>,
    jumpback: bool,
    traversal: Mutex<Traversal>,
    /// One more than the highest position examined, so that 0 means nothing
    /// has been examined yet. Only ever increases.
    scanned: AtomicU64,
    /// `Some` iff jump-back is enabled.
    behind: Option<Mutex<BehindRefList<L>>>,
}

#[derive(Debug)]
struct Traversal {
    /// The link this cursor is standing on. Holds a cursor count.
    last: Option<Key>,
    finished: bool,
}

impl<L: ItemLink> Subcursor<L> {
    pub(crate) fn new(list: Arc<LinkedList<L>>, filter: Option<Arc<L::Filter>>, jumpback: bool) -> Self {
        test_debug!(list = list.id(), jumpback, "Subcursor::new");
        Self {
            list,
            filter,
            jumpback,
            traversal: Mutex::new(Traversal {
                last: None,
                finished: false,
            }),
            scanned: AtomicU64::new(0),
            behind: jumpback.then(|| Mutex::new(BehindRefList::new())),
        }
    }

    pub(crate) fn filter(&self) -> Option<&L::Filter> {
        self.filter.as_deref()
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.traversal().finished
    }

    /// Returns the next item that can be locked for `lock_id`.
    ///
    /// Items waiting in the behind-list are tried first, earliest position
    /// first; then the cursor advances through the list.
    pub(crate) fn next_locked(&self, lock_id: LockId) -> Result<Option<Arc<L>>> {
        enter_test_debug_span!("Subcursor::next_locked", list = self.list.id(), lock_id);
        if self.is_finished() {
            return Ok(None);
        }

        // Only the pop is done under the behind-list's lock.
        while let Some(item) = self.pop_behind() {
            if !self.list.state_of(&item).is_linked() {
                test_trace!(position = ?item.position(), "behind-list item was unlinked");
                continue;
            }
            if item.lock_item_if_available(lock_id)? {
                tracing::trace!(position = ?item.position(), lock_id, "jumped back");
                return Ok(Some(item));
            }
            test_trace!(position = ?item.position(), "behind-list item no longer available");
        }

        let filter = self.filter();
        self.advance(|item| item.lock_if_matches(filter, lock_id))
    }

    /// Returns the next item that matches the filter, without locking it.
    ///
    /// Browsing never consults the behind-list.
    pub(crate) fn next_browse(&self, allow_unavailable: bool) -> Result<Option<Arc<L>>> {
        enter_test_debug_span!("Subcursor::next_browse", list = self.list.id(), allow_unavailable);
        if self.is_finished() {
            return Ok(None);
        }

        let filter = self.filter();
        self.advance(|item| Ok(item.matches_with(filter, allow_unavailable)?.is_some()))
    }

    /// Called when `item` became available. If the cursor has already
    /// examined its position and it matches the filter, it is queued in the
    /// behind-list.
    pub(crate) fn available(&self, item: &Arc<L>) -> Result<()> {
        let Some(behind) = self.behind.as_ref() else {
            return Ok(());
        };
        let Some(position) = item.position() else {
            return Ok(());
        };

        // Items ahead of the cursor are found by advancing.
        if position >= self.scanned.load(SeqCst) {
            test_trace!(position, "Subcursor::available: ahead of cursor");
            return Ok(());
        }
        if item.link().key_in(self.list.id()).is_none() || self.is_finished() {
            return Ok(());
        }
        if item.matches(self.filter())?.is_none() {
            return Ok(());
        }

        let inserted = lock(behind).insert(item);
        tracing::trace!(list = self.list.id(), position, inserted, "item available behind cursor");
        Ok(())
    }

    /// Releases the link this cursor is standing on. The cursor returns no
    /// more items.
    pub(crate) fn finished(&self) -> Result<()> {
        {
            let mut traversal = self.traversal();
            if traversal.finished {
                return Ok(());
            }
            traversal.finished = true;
            if let Some(last) = traversal.last.take() {
                test_debug!(list = self.list.id(), ?last, "Subcursor::finished: releasing link");
                self.list.chain().unpin(last)?;
            }
        }
        if let Some(behind) = self.behind.as_ref() {
            lock(behind).clear();
        }
        Ok(())
    }

    pub(crate) fn snapshot(&self, priority: Option<usize>) -> SubcursorSnapshot {
        let last_position = {
            let traversal = self.traversal();
            traversal
                .last
                .and_then(|last| self.list.chain().position(last))
        };
        let behind = self
            .behind
            .as_ref()
            .map(|behind| lock(behind).positions())
            .unwrap_or_default();
        SubcursorSnapshot {
            priority,
            last_position,
            highest_position: self.scanned.load(SeqCst).checked_sub(1),
            behind,
        }
    }

    fn pop_behind(&self) -> Option<Arc<L>> {
        lock(self.behind.as_ref()?).get_first(true)
    }

    /// Walks forward from the last link, calling `take` on each linked item
    /// without any lock held, until `take` returns `true`.
    ///
    /// The link being examined is pinned while `take` runs. On success the
    /// cursor settles on the taken link. When the end of the list is reached,
    /// a jump-back cursor settles on the last link it examined; any other
    /// cursor stays where it was, so that it re-examines those links on its
    /// next call.
    fn advance(&self, mut take: impl FnMut(&L) -> Result<bool>) -> Result<Option<Arc<L>>> {
        let mut scan = Scan { key: None };
        let result = loop {
            let candidate = {
                let mut traversal = self.traversal();
                let mut chain = self.list.chain();
                if traversal.finished {
                    break scan.release(&mut chain).map(|_| None);
                }
                match self.step(&traversal, &mut chain, &mut scan) {
                    Ok(Some(candidate)) => candidate,
                    Ok(None) => {
                        let settled = if self.jumpback {
                            scan.key
                                .take()
                                .map_or(Ok(()), |key| self.settle(&mut traversal, &mut chain, key))
                        } else {
                            scan.release(&mut chain)
                        };
                        break settled.map(|_| None);
                    }
                    Err(error) => {
                        if let Err(release) = scan.release(&mut chain) {
                            tracing::error!(%release, list = self.list.id(), "failed to release scan");
                        }
                        break Err(error);
                    }
                }
            };

            let Some(position) = candidate.position() else {
                continue;
            };
            // Published before the callout, so an item that becomes available
            // concurrently is seen either by `take` or by `available`.
            self.scanned.fetch_max(position + 1, SeqCst);

            match take(&candidate) {
                Ok(false) => {
                    test_trace!(position, "Subcursor::advance: skipped");
                }
                Ok(true) => {
                    let mut traversal = self.traversal();
                    let mut chain = self.list.chain();
                    let settled = match scan.key.take() {
                        Some(key) => self.settle(&mut traversal, &mut chain, key),
                        None => Ok(()),
                    };
                    break settled.map(|_| Some(candidate));
                }
                Err(error) => {
                    if let Err(release) = scan.release(&mut self.list.chain()) {
                        tracing::error!(%release, list = self.list.id(), "failed to release scan");
                    }
                    break Err(error);
                }
            }
        };
        debug_assert!(scan.key.is_none(), "scan pin must be released");
        result
    }

    /// Moves the scan pin to the next linked link, returning its item.
    fn step(&self, traversal: &Traversal, chain: &mut Chain<L>, scan: &mut Scan) -> Result<Option<Arc<L>>> {
        let from = scan.key.or(traversal.last);
        let Some(next) = chain.next_linked(from) else {
            return Ok(None);
        };
        let Some(item) = chain.item(next).cloned() else {
            return Ok(None);
        };

        chain.pin(next)?;
        if let Some(prev) = scan.key.replace(next) {
            chain.unpin(prev)?;
        }
        Ok(Some(item))
    }

    /// Settles the cursor on `key`, which is pinned by the caller's scan.
    ///
    /// Another thread sharing this cursor may have settled further along in
    /// the meantime, in which case the cursor stays there.
    fn settle(&self, traversal: &mut Traversal, chain: &mut Chain<L>, key: Key) -> Result<()> {
        if traversal.finished {
            return chain.unpin(key);
        }

        match traversal.last {
            Some(last) if chain.position(last) >= chain.position(key) => chain.unpin(key),
            last => {
                traversal.last = Some(key);
                test_trace!(position = ?chain.position(key), "Subcursor: settled");
                match last {
                    Some(last) => chain.unpin(last),
                    None => Ok(()),
                }
            }
        }
    }

    fn traversal(&self) -> MutexGuard<'_, Traversal> {
        lock(&self.traversal)
    }
}

impl<L: ItemLink> Drop for Subcursor<L> {
    fn drop(&mut self) {
        if let Err(error) = self.finished() {
            tracing::error!(%error, list = self.list.id(), "failed to release cursor on drop");
        }
    }
}

impl<L: ItemLink> fmt::Debug for Subcursor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let highest = self.scanned.load(SeqCst).checked_sub(1);
        f.debug_struct("Subcursor")
            .field("list", &self.list.id())
            .field("jumpback", &self.jumpback)
            .field("has_filter", &self.filter.is_some())
            .field("highest_position", &FmtOption::new(&highest))
            .finish_non_exhaustive()
    }
}

/// The link a scan in progress is standing on, if it has moved past the
/// cursor's last link.
struct Scan {
    key: Option<Key>,
}

impl Scan {
    fn release<L: ItemLink>(&mut self, chain: &mut Chain<L>) -> Result<()> {
        match self.key.take() {
            Some(key) => chain.unpin(key),
            None => Ok(()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
