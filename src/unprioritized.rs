//! A browsing cursor over a single [`LinkedList`].
use crate::{snapshot::SubcursorSnapshot, subcursor::Subcursor, ItemLink, LinkedList, Result};
use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering::*},
};
use std::sync::Arc;

/// A cursor over one [`LinkedList`] that browses items without locking them.
///
/// Created by [`LinkedList::new_nonlocking_cursor`]. Items are returned in
/// position order. The cursor does not revisit items that become available
/// behind it.
pub struct UnprioritizedNonlockingCursor<L: ItemLink> {
    subcursor: Subcursor<L>,
    allow_unavailable: AtomicBool,
}

impl<L: ItemLink> UnprioritizedNonlockingCursor<L> {
    pub(crate) fn new(list: Arc<LinkedList<L>>, filter: Option<Arc<L::Filter>>) -> Self {
        Self {
            subcursor: Subcursor::new(list, filter, false),
            allow_unavailable: AtomicBool::new(false),
        }
    }

    /// Returns the next matching item, or `None` if there are no more items
    /// right now.
    pub fn next(&self) -> Result<Option<Arc<L>>> {
        self.subcursor
            .next_browse(self.allow_unavailable.load(Acquire))
    }

    /// Releases the link the cursor is standing on. The cursor returns no
    /// more items. Dropping the cursor finishes it.
    pub fn finished(&self) -> Result<()> {
        self.subcursor.finished()
    }

    /// Makes the cursor also return items that are locked or being removed.
    pub fn allow_unavailable_items(&self) {
        self.allow_unavailable.store(true, Release);
    }

    /// Returns the cursor's filter.
    #[must_use]
    pub fn filter(&self) -> Option<&L::Filter> {
        self.subcursor.filter()
    }

    /// Returns `true` if the cursor has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.subcursor.is_finished()
    }

    /// Returns a snapshot of the cursor's state.
    #[must_use]
    pub fn snapshot(&self) -> SubcursorSnapshot {
        self.subcursor.snapshot(None)
    }
}

impl<L: ItemLink> fmt::Debug for UnprioritizedNonlockingCursor<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnprioritizedNonlockingCursor")
            .field("subcursor", &self.subcursor)
            .field("allow_unavailable", &self.allow_unavailable.load(Relaxed))
            .finish()
    }
}
