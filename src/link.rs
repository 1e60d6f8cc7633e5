//! Links: the per-item membership header and the link state machine.
//!
//! A link has two halves:
//!
//! - The [`Link`] header is embedded in the item type itself, the way an
//!   intrusive list node embeds its links. It records the item's position
//!   and where the item is a member.
//! - The list-owned half (a `Node`) lives in the owning
//!   [`LinkedList`](crate::LinkedList)'s arena. It holds the [`LinkState`], the
//!   neighbor keys and the cursor count.
//!
//! Both halves are only ever written while the owning list's lock is held.
use crate::{arena::Key, util::FmtOption, Error, Result};
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering::*},
};
use std::sync::Arc;

/// The membership header of an item in a [`LinkedList`](crate::LinkedList).
///
/// Types that implement [`ItemLink`](crate::ItemLink) embed a `Link` and return
/// it from [`ItemLink::link`](crate::ItemLink::link).
///
/// A link is assigned a position when it is appended to a list, and that
/// position never changes. Because positions are immutable, a link may only
/// ever be appended once: appending a link that already has a position fails
/// with [`Error::AlreadyPositioned`].
pub struct Link {
    position: AtomicU64,
    /// Packed arena key of this link's node in its owning list.
    key: AtomicU64,
    /// Id of the owning list, or `NO_LIST`.
    list: AtomicU64,
}

/// The lifecycle state of a link.
///
/// ```text
///                  append                 unlink
/// PhysicallyUnlinked ---> Linked ------------------> LogicallyUnlinked
///        ^                                                 |
///        +------ splice out, once no cursor is on it ------+
/// ```
///
/// `Head` and `Tail` are the states of a list's sentinels, and never change.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum LinkState {
    /// The sentinel at the front of a list.
    Head,
    /// The sentinel at the back of a list.
    Tail,
    /// A member of a list, visible to traversal.
    Linked,
    /// Removed from traversal, but still physically reachable because a
    /// cursor is standing on it.
    LogicallyUnlinked,
    /// Not reachable from any list.
    PhysicallyUnlinked,
}

/// The list-owned half of a link.
pub(crate) struct Node<L> {
    pub(crate) state: LinkState,
    pub(crate) prev: Option<Key>,
    pub(crate) next: Option<Key>,
    pub(crate) position: u64,
    pub(crate) cursor_count: usize,
    /// `None` for sentinels.
    pub(crate) item: Option<Arc<L>>,
}

const UNPOSITIONED: u64 = u64::MAX;
pub(crate) const NO_LIST: u64 = 0;

// === impl Link ===

impl Link {
    /// Returns a new, unpositioned link that is not a member of any list.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            position: AtomicU64::new(UNPOSITIONED),
            key: AtomicU64::new(Key::NONE_BITS),
            list: AtomicU64::new(NO_LIST),
        }
    }

    /// Returns the position this link was assigned when it was appended, or
    /// `None` if it has never been appended to a list.
    #[inline]
    #[must_use]
    pub fn position(&self) -> Option<u64> {
        match self.position.load(Acquire) {
            UNPOSITIONED => None,
            position => Some(position),
        }
    }

    /// Returns `true` if this link is currently reachable from a list, either
    /// linked or logically unlinked.
    #[inline]
    #[must_use]
    pub fn is_member(&self) -> bool {
        self.list.load(Acquire) != NO_LIST
    }

    /// Returns this link's node key, if it is a member of the list `list_id`.
    pub(crate) fn key_in(&self, list_id: u64) -> Option<Key> {
        if self.list.load(Acquire) != list_id {
            return None;
        }
        Key::from_bits(self.key.load(Acquire))
    }

    /// Records membership in a list. Called with that list's lock held.
    pub(crate) fn set_member(&self, list_id: u64, key: Key, position: u64) -> Result<()> {
        // Two lists may race to append the same link under different locks.
        if let Err(existing) =
            self.position
                .compare_exchange(UNPOSITIONED, position, AcqRel, Acquire)
        {
            tracing::error!(
                position = existing,
                "attempted to append a link that already has a position"
            );
            return Err(Error::AlreadyPositioned { position: existing });
        }

        self.key.store(key.into_bits(), Release);
        self.list.store(list_id, Release);
        Ok(())
    }

    /// Clears membership. The position is kept. Called with the owning list's
    /// lock held.
    pub(crate) fn clear_member(&self) {
        self.list.store(NO_LIST, Release);
        self.key.store(Key::NONE_BITS, Release);
    }
}

impl Default for Link {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let position = self.position();
        let key = Key::from_bits(self.key.load(Relaxed));
        f.debug_struct("Link")
            .field("position", &FmtOption::new(&position).or_else("<unpositioned>"))
            .field("key", &FmtOption::new(&key))
            .field("list", &self.list.load(Relaxed))
            .finish()
    }
}

// === impl LinkState ===

impl LinkState {
    /// Returns `true` if this is a `Head` or `Tail` sentinel state.
    #[inline]
    #[must_use]
    pub fn is_sentinel(self) -> bool {
        matches!(self, Self::Head | Self::Tail)
    }

    /// Returns `true` if the link is visible to traversal.
    #[inline]
    #[must_use]
    pub fn is_linked(self) -> bool {
        self == Self::Linked
    }

    /// Returns `true` if the link was unlinked but is still physically
    /// reachable.
    #[inline]
    #[must_use]
    pub fn is_logically_unlinked(self) -> bool {
        self == Self::LogicallyUnlinked
    }

    /// Returns `true` if the link is not reachable from any list.
    #[inline]
    #[must_use]
    pub fn is_physically_unlinked(self) -> bool {
        self == Self::PhysicallyUnlinked
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Head => "head",
            Self::Tail => "tail",
            Self::Linked => "linked",
            Self::LogicallyUnlinked => "logically unlinked",
            Self::PhysicallyUnlinked => "physically unlinked",
        })
    }
}

// === impl Node ===

impl<L> Node<L> {
    pub(crate) fn sentinel(state: LinkState) -> Self {
        debug_assert!(state.is_sentinel());
        Self {
            state,
            prev: None,
            next: None,
            position: UNPOSITIONED,
            cursor_count: 0,
            item: None,
        }
    }

    /// A node for an item that is about to be linked. It starts out
    /// physically unlinked, like any link that is not in a list.
    pub(crate) fn unlinked(item: Arc<L>) -> Self {
        Self {
            state: LinkState::PhysicallyUnlinked,
            prev: None,
            next: None,
            position: UNPOSITIONED,
            cursor_count: 0,
            item: Some(item),
        }
    }

    /// `PhysicallyUnlinked -> Linked`.
    pub(crate) fn link(&mut self, prev: Key, next: Key, position: u64) -> Result<()> {
        if self.state != LinkState::PhysicallyUnlinked {
            tracing::error!(state = %self.state, position, "link: link is not physically unlinked");
            return Err(Error::LinkState {
                op: "link",
                state: self.state,
            });
        }

        self.state = LinkState::Linked;
        self.prev = Some(prev);
        self.next = Some(next);
        self.position = position;
        Ok(())
    }

    /// `Linked -> LogicallyUnlinked`. Returns `false` if the node was not
    /// linked.
    pub(crate) fn unlink(&mut self) -> Result<bool> {
        match self.state {
            LinkState::Linked => {
                self.state = LinkState::LogicallyUnlinked;
                Ok(true)
            }
            LinkState::LogicallyUnlinked | LinkState::PhysicallyUnlinked => Ok(false),
            state @ (LinkState::Head | LinkState::Tail) => {
                tracing::error!(%state, "unlink: attempted to unlink a sentinel");
                Err(Error::LinkState { op: "unlink", state })
            }
        }
    }

    /// Returns `true` if nothing prevents this node from being spliced out.
    #[inline]
    pub(crate) fn can_splice(&self) -> bool {
        self.state == LinkState::LogicallyUnlinked && self.cursor_count == 0
    }

    #[inline]
    pub(crate) fn increment_cursor_count(&mut self) {
        self.cursor_count += 1;
    }

    /// Returns `true` if the count dropped to zero on a logically unlinked
    /// node, meaning the node should now be spliced out.
    pub(crate) fn decrement_cursor_count(&mut self) -> Result<bool> {
        if self.cursor_count == 0 {
            tracing::error!(position = self.position, state = %self.state, "cursor count underflow");
            return Err(Error::CursorCountUnderflow {
                position: self.position,
            });
        }

        self.cursor_count -= 1;
        Ok(self.can_splice())
    }

    pub(crate) fn position(&self) -> Option<u64> {
        if self.state.is_sentinel() {
            None
        } else {
            Some(self.position)
        }
    }
}

impl<L> fmt::Debug for Node<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let position = self.position();
        f.debug_struct("Node")
            .field("state", &self.state)
            .field("position", &FmtOption::new(&position))
            .field("prev", &FmtOption::new(&self.prev))
            .field("next", &FmtOption::new(&self.next))
            .field("cursor_count", &self.cursor_count)
            .finish()
    }
}
