//! A concurrent doubly-linked list of [item links](crate::ItemLink).
//!
//! See the [`LinkedList`] type for details.
use crate::{
    arena::{Arena, Key},
    link::Node,
    snapshot::{LinkSnapshot, ListSnapshot},
    Error, ItemLink, LinkState, Result, UnprioritizedNonlockingCursor,
};
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering::Relaxed},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

#[cfg(test)]
mod tests;

/// An unbounded list of item links, bounded by head and tail sentinels.
///
/// Links are appended at the tail and assigned consecutive positions starting
/// at 0. Removing a link is a two-step process:
///
/// 1. [`unlink`] marks the link [logically unlinked]. It is no longer visible
///    to traversal.
/// 2. Once no cursor is standing on the link, it is spliced out of the chain
///    and becomes [physically unlinked].
///
/// Cursors can therefore hold on to a link that another thread removes
/// without it vanishing from under them: a cursor standing on a logically
/// unlinked link continues from that link's successor.
///
/// All structural changes happen under the list's lock. Match and lock
/// operations on items, which may be slow, are always called *without* the
/// list's lock held.
///
/// [`unlink`]: Self::unlink
/// [logically unlinked]: LinkState::LogicallyUnlinked
/// [physically unlinked]: LinkState::PhysicallyUnlinked
pub struct LinkedList<L> {
    id: u64,
    chain: Mutex<Chain<L>>,
}

/// The list's structure, protected by the list's lock.
pub(crate) struct Chain<L> {
    nodes: Arena<Node<L>>,
    head: Key,
    tail: Key,
    next_position: u64,
}

static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(1);

// === impl LinkedList ===

impl<L: ItemLink> LinkedList<L> {
    /// Returns a new, empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_LIST_ID.fetch_add(1, Relaxed),
            chain: Mutex::new(Chain::new()),
        }
    }

    /// Returns this list's process-unique id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Appends `item` to the tail of the list, returning the position it was
    /// assigned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyPositioned`] if `item` was already appended to
    /// a list. The list is not modified.
    pub fn append(&self, item: Arc<L>) -> Result<u64> {
        enter_test_debug_span!("LinkedList::append", list = self.id);
        let position = self.chain().append(self.id, item)?;
        tracing::debug!(list = self.id, position, "appended link");
        Ok(position)
    }

    /// Unlinks `item` from this list.
    ///
    /// The link becomes logically unlinked immediately, and physically
    /// unlinked once no cursor is standing on it.
    ///
    /// Returns `true` if this call logically unlinked the item, or `false` if
    /// it was already unlinked or is not a member of this list.
    pub fn unlink(&self, item: &L) -> Result<bool> {
        enter_test_debug_span!("LinkedList::unlink", list = self.id, position = ?item.position());
        let mut chain = self.chain();
        match chain.key_of(self.id, item) {
            Some(key) => chain.unlink(key),
            None => Ok(false),
        }
    }

    /// Returns the state of `item`'s link in this list.
    ///
    /// An item that is not a member of this list is
    /// [`PhysicallyUnlinked`](LinkState::PhysicallyUnlinked).
    #[must_use]
    pub fn state_of(&self, item: &L) -> LinkState {
        let chain = self.chain();
        chain
            .key_of(self.id, item)
            .map_or(LinkState::PhysicallyUnlinked, |key| chain.state(key))
    }

    /// Returns the number of cursors standing on `item`'s link, or `None`
    /// if it is not a member of this list.
    #[must_use]
    pub fn cursor_count_of(&self, item: &L) -> Option<usize> {
        let chain = self.chain();
        let key = chain.key_of(self.id, item)?;
        chain.nodes.get(key).map(|node| node.cursor_count)
    }

    /// Returns the first linked item after `after`, or the first linked item
    /// in the list if `after` is `None`.
    ///
    /// Logically unlinked links are skipped. If `after` has been physically
    /// unlinked since the caller obtained it, scanning restarts from the head
    /// of the list.
    #[must_use]
    pub fn get_next_link(&self, after: Option<&L>) -> Option<Arc<L>> {
        let chain = self.chain();
        let after = after.and_then(|item| {
            let key = chain.key_of(self.id, item);
            if key.is_none() {
                tracing::trace!(list = self.id, "link is not in the list; restarting from the head");
            }
            key
        });
        let next = chain.next_linked(after)?;
        chain.item(next).cloned()
    }

    /// Returns the first item in the list that matches `filter`.
    ///
    /// Items are tested without the list's lock held. If the item being
    /// tested is physically unlinked concurrently, the scan restarts from the
    /// head of the list.
    pub fn find_first_matching(&self, filter: Option<&L::Filter>) -> Result<Option<L::Item>> {
        enter_test_debug_span!("LinkedList::find_first_matching", list = self.id);
        self.scan(|item| item.matches(filter))
            .map(|found| found.map(|(_, item)| item))
    }

    /// Begins removing the first item that matches `filter` under `txn`.
    ///
    /// Returns the link of the item whose
    /// [`remove_if_matches`](ItemLink::remove_if_matches) succeeded. The link
    /// stays in the list; once the removal is committed, [`unlink`] it.
    ///
    /// [`unlink`]: Self::unlink
    pub fn remove_first_matching(
        &self,
        filter: Option<&L::Filter>,
        txn: &L::Transaction,
    ) -> Result<Option<Arc<L>>> {
        enter_test_debug_span!("LinkedList::remove_first_matching", list = self.id);
        self.scan(|item| item.remove_if_matches(filter, txn))
            .map(|found| found.map(|(link, _)| link))
    }

    /// Returns the number of linked items.
    ///
    /// This walks the whole list, and is intended for diagnostics.
    #[must_use]
    pub fn count_links(&self) -> usize {
        self.chain().count_links()
    }

    /// Returns `true` if no items are linked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let chain = self.chain();
        chain.next_linked(None).is_none()
    }

    /// Returns the position the next appended item will be assigned.
    #[must_use]
    pub fn next_position(&self) -> u64 {
        self.chain().next_position
    }

    /// Returns a browsing cursor over this list.
    ///
    /// The cursor never locks items, and does not revisit items that become
    /// available behind it.
    #[must_use]
    pub fn new_nonlocking_cursor(
        self: &Arc<Self>,
        filter: Option<Arc<L::Filter>>,
    ) -> UnprioritizedNonlockingCursor<L> {
        UnprioritizedNonlockingCursor::new(self.clone(), filter)
    }

    /// Returns a snapshot of the list's links.
    #[must_use]
    pub fn snapshot(&self) -> ListSnapshot {
        let chain = self.chain();
        let links = chain
            .walk()
            .filter_map(|(_, node)| {
                Some(LinkSnapshot {
                    position: node.position()?,
                    state: node.state,
                    cursor_count: node.cursor_count,
                })
            })
            .collect();
        ListSnapshot {
            id: self.id,
            next_position: chain.next_position,
            links,
        }
    }

    /// Asserts that the list's structure is consistent.
    ///
    /// # Panics
    ///
    /// If any of the list's invariants do not hold.
    #[track_caller]
    pub fn assert_valid(&self) {
        self.chain().assert_valid(self.id)
    }

    pub(crate) fn chain(&self) -> MutexGuard<'_, Chain<L>> {
        // Every critical section leaves the chain consistent before anything
        // that could panic, so a poisoned lock is still usable.
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Walks the list, calling `f` on each linked item without the lock held,
    /// until `f` returns `Some`.
    fn scan<T>(&self, mut f: impl FnMut(&L) -> Result<Option<T>>) -> Result<Option<(Arc<L>, T)>> {
        let mut current = None;
        loop {
            let next = {
                let chain = self.chain();
                chain
                    .next_linked(current)
                    .and_then(|key| Some((key, chain.item(key)?.clone())))
            };
            let Some((key, item)) = next else {
                return Ok(None);
            };

            test_trace!(list = self.id, position = ?item.position(), "LinkedList::scan");
            if let Some(found) = f(&item)? {
                return Ok(Some((item, found)));
            }
            current = Some(key);
        }
    }
}

impl<L: ItemLink> Default for LinkedList<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> fmt::Debug for LinkedList<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("LinkedList");
        s.field("id", &self.id);
        match self.chain.try_lock() {
            Ok(chain) => s.field("chain", &*chain),
            Err(TryLockError::Poisoned(chain)) => s.field("chain", &*chain.into_inner()),
            Err(TryLockError::WouldBlock) => s.field("chain", &format_args!("<locked>")),
        };
        s.finish()
    }
}

// === impl Chain ===

impl<L> Chain<L> {
    fn new() -> Self {
        let mut nodes = Arena::new();
        let head = nodes.insert(Node::sentinel(LinkState::Head));
        let tail = nodes.insert(Node::sentinel(LinkState::Tail));
        if let Some(node) = nodes.get_mut(head) {
            node.next = Some(tail);
        }
        if let Some(node) = nodes.get_mut(tail) {
            node.prev = Some(head);
        }
        Self {
            nodes,
            head,
            tail,
            next_position: 0,
        }
    }

    /// Returns the key of the first `Linked` node after `after`, or after the
    /// head if `after` is `None`. A stale `after` restarts from the head.
    pub(crate) fn next_linked(&self, after: Option<Key>) -> Option<Key> {
        let start = match after {
            Some(key) if self.nodes.contains(key) => key,
            Some(key) => {
                tracing::trace!(?key, "link was physically unlinked; restarting from the head");
                self.head
            }
            None => self.head,
        };

        let mut next = self.nodes.get(start)?.next;
        while let Some(key) = next {
            let node = self.nodes.get(key)?;
            match node.state {
                LinkState::Linked => return Some(key),
                LinkState::LogicallyUnlinked => next = node.next,
                LinkState::Tail => return None,
                state => {
                    debug_assert!(false, "a {state} node must not be reachable: {node:?}");
                    return None;
                }
            }
        }
        None
    }

    pub(crate) fn item(&self, key: Key) -> Option<&Arc<L>> {
        self.nodes.get(key)?.item.as_ref()
    }

    pub(crate) fn position(&self, key: Key) -> Option<u64> {
        self.nodes.get(key)?.position()
    }

    pub(crate) fn state(&self, key: Key) -> LinkState {
        self.nodes
            .get(key)
            .map_or(LinkState::PhysicallyUnlinked, |node| node.state)
    }

    /// Returns the number of nodes between the sentinels, in any state.
    pub(crate) fn len(&self) -> usize {
        self.nodes.len() - 2
    }

    fn count_links(&self) -> usize {
        self.walk()
            .filter(|(_, node)| node.state.is_linked())
            .count()
    }

    fn node_mut(&mut self, key: Key, op: &'static str) -> Result<&mut Node<L>> {
        self.nodes.get_mut(key).ok_or_else(|| {
            tracing::error!(?key, op, "link is not in the list");
            Error::LinkState {
                op,
                state: LinkState::PhysicallyUnlinked,
            }
        })
    }

    /// Iterates over every node between the sentinels, in list order.
    fn walk(&self) -> impl Iterator<Item = (Key, &Node<L>)> + '_ {
        let mut next = self.nodes.get(self.head).and_then(|head| head.next);
        core::iter::from_fn(move || {
            let key = next?;
            let node = self.nodes.get(key)?;
            if node.state == LinkState::Tail {
                return None;
            }
            next = node.next;
            Some((key, node))
        })
    }
}

impl<L: ItemLink> Chain<L> {
    /// A cursor settled on `key`.
    pub(crate) fn pin(&mut self, key: Key) -> Result<()> {
        self.node_mut(key, "pin")?.increment_cursor_count();
        Ok(())
    }

    /// A cursor moved off `key`. If it was the last cursor on a logically
    /// unlinked link, the link is spliced out.
    pub(crate) fn unpin(&mut self, key: Key) -> Result<()> {
        if self.node_mut(key, "unpin")?.decrement_cursor_count()? {
            self.splice(key)?;
        }
        Ok(())
    }

    fn unlink(&mut self, key: Key) -> Result<bool> {
        let node = self.node_mut(key, "unlink")?;
        let unlinked = node.unlink()?;
        let position = node.position;
        let splice = node.can_splice();
        if unlinked {
            tracing::debug!(position, "link logically unlinked");
            if splice {
                self.splice(key)?;
            }
        }
        Ok(unlinked)
    }

    /// `LogicallyUnlinked -> PhysicallyUnlinked`.
    fn splice(&mut self, key: Key) -> Result<()> {
        let node = self.node_mut(key, "splice")?;
        if !node.can_splice() {
            tracing::error!(?node, "splice: link is not ready to be spliced out");
            return Err(Error::LinkState {
                op: "splice",
                state: node.state,
            });
        }
        node.state = LinkState::PhysicallyUnlinked;
        if let Some(item) = node.item.as_ref() {
            item.link().clear_member();
        }

        let Some(node) = self.nodes.remove(key) else {
            return Ok(());
        };
        if let Some(prev) = node.prev.and_then(|prev| self.nodes.get_mut(prev)) {
            prev.next = node.next;
        }
        if let Some(next) = node.next.and_then(|next| self.nodes.get_mut(next)) {
            next.prev = node.prev;
        }
        tracing::debug!(position = node.position, "link physically unlinked");
        Ok(())
    }

    fn append(&mut self, list_id: u64, item: Arc<L>) -> Result<u64> {
        let position = self.next_position;
        let key = self.nodes.insert(Node::unlinked(item.clone()));
        if let Err(error) = item.link().set_member(list_id, key, position) {
            self.nodes.remove(key);
            return Err(error);
        }

        let tail = self.tail;
        let prev = self
            .nodes
            .get(tail)
            .and_then(|tail| tail.prev)
            .unwrap_or(self.head);
        self.node_mut(key, "link")?.link(prev, tail, position)?;
        if let Some(prev) = self.nodes.get_mut(prev) {
            prev.next = Some(key);
        }
        if let Some(tail) = self.nodes.get_mut(tail) {
            tail.prev = Some(key);
        }

        self.next_position += 1;
        Ok(position)
    }

    /// Returns the key of `item`'s node, if it is a member of this list.
    pub(crate) fn key_of(&self, list_id: u64, item: &L) -> Option<Key> {
        let key = item.link().key_in(list_id)?;
        let node = self.nodes.get(key)?;
        let same = node
            .item
            .as_ref()
            .map_or(false, |member| core::ptr::eq(Arc::as_ptr(member), item));
        same.then_some(key)
    }

    #[track_caller]
    fn assert_valid(&self, list_id: u64) {
        let head = self.nodes.get(self.head).expect("head must exist");
        let tail = self.nodes.get(self.tail).expect("tail must exist");
        assert_eq!(head.state, LinkState::Head);
        assert_eq!(tail.state, LinkState::Tail);
        assert_eq!(head.prev, None, "head must not have a previous link");
        assert_eq!(tail.next, None, "tail must not have a next link");

        let mut prev = self.head;
        let mut last_position = None;
        let mut walked = 0;
        for (key, node) in self.walk() {
            assert_eq!(node.prev, Some(prev), "link's prev must point back: {node:?}");
            assert!(
                matches!(node.state, LinkState::Linked | LinkState::LogicallyUnlinked),
                "only linked or logically unlinked links may be reachable: {node:?}"
            );
            if node.state == LinkState::LogicallyUnlinked {
                assert!(
                    node.cursor_count > 0,
                    "a logically unlinked link with no cursors must be spliced out: {node:?}"
                );
            }
            if let Some(last) = last_position {
                assert!(node.position > last, "positions must strictly increase: {node:?}");
            }
            assert!(node.position < self.next_position);

            let item = node.item.as_ref().expect("non-sentinel links must have items");
            assert_eq!(item.link().key_in(list_id), Some(key), "header key must match");
            assert_eq!(item.link().position(), Some(node.position), "header position must match");

            last_position = Some(node.position);
            prev = key;
            walked += 1;
        }

        assert_eq!(tail.prev, Some(prev), "tail's prev must be the last link");
        assert_eq!(walked, self.len(), "every node must be reachable");
    }
}

impl<L> fmt::Debug for Chain<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("len", &self.len())
            .field("next_position", &self.next_position)
            .finish()
    }
}
