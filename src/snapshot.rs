//! Structured dumps of lists and cursors, for debugging and tests.
//!
//! A snapshot is a plain copy of a structure's bookkeeping taken while its
//! locks are held; it does not keep anything alive and may be out of date as
//! soon as it is returned. With the `serde` feature enabled (the default),
//! every snapshot implements [`serde::Serialize`] and has a `to_json` helper.
use crate::{LinkState, LockId};

/// A snapshot of a [`LinkedList`](crate::LinkedList).
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ListSnapshot {
    /// The list's process-unique id.
    pub id: u64,
    /// The position the next appended link will be assigned.
    pub next_position: u64,
    /// Every link between the sentinels, in list order, including logically
    /// unlinked links that cursors are still standing on.
    pub links: Vec<LinkSnapshot>,
}

/// A snapshot of one link in a [`ListSnapshot`].
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LinkSnapshot {
    /// The link's position.
    pub position: u64,
    /// The link's state.
    pub state: LinkState,
    /// The number of cursors standing on the link.
    pub cursor_count: usize,
}

/// A snapshot of a [`PrioritizedList`](crate::PrioritizedList).
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PrioritizedListSnapshot {
    /// The number of priority levels.
    pub priorities: usize,
    /// The number of registered cursors.
    pub cursors: usize,
    /// The sublists that have been created, from highest priority to lowest.
    pub sublists: Vec<SublistSnapshot>,
}

/// A snapshot of one priority level of a
/// [`PrioritizedList`](crate::PrioritizedList).
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SublistSnapshot {
    /// The priority level.
    pub priority: usize,
    /// The priority level's list.
    pub list: ListSnapshot,
}

/// A snapshot of a [`PrioritizedCursor`](crate::PrioritizedCursor).
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CursorSnapshot {
    /// The lock id used for locking gets, or `None` for a browsing cursor.
    pub lock_id: Option<LockId>,
    /// Whether the cursor revisits items that become available behind it.
    pub jumpback: bool,
    /// Whether a browsing cursor also returns unavailable items.
    pub allow_unavailable: bool,
    /// Whether the cursor has finished.
    pub finished: bool,
    /// The subcursors that have been created, from highest priority to
    /// lowest.
    pub subcursors: Vec<SubcursorSnapshot>,
}

/// A snapshot of the traversal state over a single list.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SubcursorSnapshot {
    /// The priority level this subcursor traverses, if it belongs to a
    /// prioritized cursor.
    pub priority: Option<usize>,
    /// The position of the link the cursor last settled on.
    pub last_position: Option<u64>,
    /// The highest position the cursor has examined.
    pub highest_position: Option<u64>,
    /// Positions waiting in the behind-list, in delivery order.
    pub behind: Vec<u64>,
}

macro_rules! impl_to_json {
    ($($ty:ty),+ $(,)?) => {
        $(
            #[cfg(feature = "serde")]
            impl $ty {
                /// Serializes this snapshot as pretty-printed JSON.
                ///
                /// # Errors
                ///
                /// Returns an error if serialization fails.
                pub fn to_json(&self) -> serde_json::Result<String> {
                    serde_json::to_string_pretty(self)
                }
            }
        )+
    };
}

impl_to_json!(
    ListSnapshot,
    PrioritizedListSnapshot,
    CursorSnapshot,
    SubcursorSnapshot,
);

impl ListSnapshot {
    /// Returns the positions of the links that are visible to traversal.
    #[must_use]
    pub fn linked_positions(&self) -> Vec<u64> {
        self.links
            .iter()
            .filter(|link| link.state.is_linked())
            .map(|link| link.position)
            .collect()
    }
}
