//! Cursors over a [`PrioritizedList`].
use crate::{
    arena::Key,
    snapshot::CursorSnapshot,
    subcursor::Subcursor,
    util::FmtOption,
    ItemLink, LockId, PrioritizedList, Result,
};
use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering::*},
};
use std::sync::{Arc, OnceLock};

/// A cursor over a [`PrioritizedList`], delivering items highest priority
/// first.
///
/// A cursor is created by [`PrioritizedList::new_cursor`] and registered with
/// its list until it is [finished](Self::finished) or dropped. Within a
/// priority level it delivers items in position order. A cursor with
/// jump-back enabled may also redeliver an earlier item that became
/// available after the cursor passed it; such items are delivered before the
/// cursor moves any further forward.
///
/// A cursor created with a lock id performs *locking gets*: every item it
/// returns has been locked for that id. A cursor without a lock id
/// *browses*, returning matching items without locking them.
///
/// # Examples
///
/// ```
/// use hyphae::{item::memory::MemoryLink, PrioritizedList};
/// use std::sync::Arc;
///
/// let list = Arc::new(PrioritizedList::new());
/// for (priority, body) in [(5, "a"), (1, "b"), (5, "c"), (9, "d")] {
///     list.append(Arc::new(MemoryLink::new(priority, body)))?;
/// }
///
/// let cursor = list.new_cursor(None, Some(1), false);
/// let mut delivered = Vec::new();
/// while let Some(link) = cursor.next()? {
///     delivered.push(*link.payload());
/// }
/// assert_eq!(delivered, ["d", "a", "c", "b"]);
/// # Ok::<(), hyphae::Error>(())
/// ```
#[must_use = "a cursor deregisters when dropped"]
pub struct PrioritizedCursor<L: ItemLink> {
    list: Arc<PrioritizedList<L>>,
    core: Arc<CursorCore<L>>,
    key: Key,
}

/// The part of a cursor shared with its list's registry.
pub(crate) struct CursorCore<L: ItemLink> {
    filter: Option<Arc<L::Filter>>,
    lock_id: Option<LockId>,
    jumpback: bool,
    allow_unavailable: AtomicBool,
    finished: AtomicBool,
    /// One per priority level, created on first use.
    subcursors: Box<[OnceLock<Subcursor<L>>]>,
}

// === impl PrioritizedCursor ===

impl<L: ItemLink> PrioritizedCursor<L> {
    pub(crate) fn new(list: Arc<PrioritizedList<L>>, core: Arc<CursorCore<L>>, key: Key) -> Self {
        Self { list, core, key }
    }

    /// Returns the next item, or `None` if no more items are available right
    /// now.
    ///
    /// Priorities are tried from highest to lowest, and the first item found
    /// is returned. A `None` does not mean the cursor is exhausted for good:
    /// items appended later are returned by later calls.
    pub fn next(&self) -> Result<Option<Arc<L>>> {
        enter_test_debug_span!("PrioritizedCursor::next", lock_id = ?self.core.lock_id);
        if self.is_finished() {
            return Ok(None);
        }

        for priority in (0..self.core.subcursors.len()).rev() {
            // Nothing has ever been appended at this priority.
            let Some(sublist) = self.list.sublist(priority) else {
                continue;
            };
            let subcursor = self.core.subcursor(priority, sublist);
            let next = match self.core.lock_id {
                Some(lock_id) => subcursor.next_locked(lock_id)?,
                None => subcursor.next_browse(self.allows_unavailable())?,
            };
            if let Some(next) = next {
                test_trace!(priority, position = ?next.position(), "PrioritizedCursor::next");
                return Ok(Some(next));
            }
        }
        Ok(None)
    }

    /// Finishes the cursor: it deregisters from its list and releases every
    /// link it is standing on. A finished cursor returns no more items.
    ///
    /// Finishing is not resumable; create a new cursor to scan again.
    /// Dropping a cursor finishes it.
    pub fn finished(&self) -> Result<()> {
        self.list.deregister(self.key, &self.core)
    }

    /// Makes a browsing cursor also return items that are locked or being
    /// removed. Has no effect on a cursor with a lock id.
    pub fn allow_unavailable_items(&self) {
        self.core.allow_unavailable.store(true, Release);
    }

    /// Returns the cursor's filter.
    #[must_use]
    pub fn filter(&self) -> Option<&L::Filter> {
        self.core.filter.as_deref()
    }

    /// Returns the lock id for locking gets, or `None` for a browsing cursor.
    #[must_use]
    pub fn lock_id(&self) -> Option<LockId> {
        self.core.lock_id
    }

    /// Returns `true` if this cursor revisits items that become available
    /// behind it.
    #[must_use]
    pub fn jumpback_enabled(&self) -> bool {
        self.core.jumpback
    }

    /// Returns `true` if [`allow_unavailable_items`] was called.
    ///
    /// [`allow_unavailable_items`]: Self::allow_unavailable_items
    #[must_use]
    pub fn allows_unavailable(&self) -> bool {
        self.core.allow_unavailable.load(Acquire)
    }

    /// Returns `true` if the cursor has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.core.is_finished()
    }

    /// Returns a snapshot of the cursor's state.
    #[must_use]
    pub fn snapshot(&self) -> CursorSnapshot {
        let subcursors = self
            .core
            .subcursors
            .iter()
            .enumerate()
            .rev()
            .filter_map(|(priority, subcursor)| Some(subcursor.get()?.snapshot(Some(priority))))
            .collect();
        CursorSnapshot {
            lock_id: self.core.lock_id,
            jumpback: self.core.jumpback,
            allow_unavailable: self.allows_unavailable(),
            finished: self.is_finished(),
            subcursors,
        }
    }
}

impl<L: ItemLink> Drop for PrioritizedCursor<L> {
    fn drop(&mut self) {
        if let Err(error) = self.finished() {
            tracing::error!(%error, "failed to finish cursor on drop");
        }
    }
}

impl<L: ItemLink> fmt::Debug for PrioritizedCursor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrioritizedCursor")
            .field("key", &self.key)
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

// === impl CursorCore ===

impl<L: ItemLink> CursorCore<L> {
    pub(crate) fn new(
        priorities: usize,
        filter: Option<Arc<L::Filter>>,
        lock_id: Option<LockId>,
        jumpback: bool,
    ) -> Self {
        Self {
            filter,
            lock_id,
            jumpback,
            allow_unavailable: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            subcursors: (0..priorities).map(|_| OnceLock::new()).collect(),
        }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Acquire)
    }

    /// Returns `true` if this call finished the cursor.
    pub(crate) fn mark_finished(&self) -> bool {
        !test_dbg!(self.finished.swap(true, AcqRel))
    }

    /// Only locking cursors jump back; a browsing cursor keeps no
    /// behind-list.
    fn jumps_back(&self) -> bool {
        self.jumpback && self.lock_id.is_some()
    }

    /// Routes an available item to the subcursor for its priority.
    pub(crate) fn available(&self, list: &PrioritizedList<L>, item: &Arc<L>) -> Result<()> {
        if !self.jumps_back() || self.is_finished() {
            return Ok(());
        }

        let priority = item.priority();
        let Some(sublist) = list.sublist(priority) else {
            return Ok(());
        };
        self.subcursor(priority, sublist).available(item)
    }

    /// Releases every subcursor, returning the first error encountered.
    pub(crate) fn release(&self) -> Result<()> {
        let mut result = Ok(());
        for subcursor in self.subcursors.iter().filter_map(OnceLock::get) {
            if let Err(error) = subcursor.finished() {
                if result.is_ok() {
                    result = Err(error);
                }
            }
        }
        result
    }

    /// Returns the subcursor for `priority`, creating it over `sublist` if
    /// this is its first use. Exactly one subcursor is ever created per
    /// priority, even when threads race to create it.
    fn subcursor(&self, priority: usize, sublist: &Arc<crate::LinkedList<L>>) -> &Subcursor<L> {
        self.subcursors[priority].get_or_init(|| {
            test_debug!(priority, "creating subcursor");
            Subcursor::new(sublist.clone(), self.filter.clone(), self.jumps_back())
        })
    }
}

impl<L: ItemLink> fmt::Debug for CursorCore<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subcursors = self
            .subcursors
            .iter()
            .enumerate()
            .filter_map(|(priority, subcursor)| Some((priority, subcursor.get()?)))
            .collect::<Vec<_>>();
        f.debug_struct("CursorCore")
            .field("lock_id", &FmtOption::new(&self.lock_id).or_else("<browse>"))
            .field("jumpback", &self.jumpback)
            .field("allow_unavailable", &self.allow_unavailable.load(Relaxed))
            .field("finished", &self.finished.load(Relaxed))
            .field("subcursors", &subcursors)
            .finish()
    }
}
