//! A list sharded by item priority, with a registry of live cursors.
//!
//! See the [`PrioritizedList`] type for details.
use crate::{
    arena::{Arena, Key},
    config::{Builder, Config},
    cursor::CursorCore,
    snapshot::{PrioritizedListSnapshot, SublistSnapshot},
    Error, ItemLink, LinkState, LinkedList, LockId, PrioritizedCursor, Result,
};
use core::fmt;
use hyphae_sync::RwLock;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};


/// A list of item links, sharded into one [`LinkedList`] per priority level.
///
/// Items are routed to the sublist for their [priority]. Sublists are
/// created the first time they are needed. Cursors created by
/// [`new_cursor`] deliver items highest priority first, and in position
/// order within a priority.
///
/// The list keeps a registry of its live cursors so that
/// [`link_available`] can tell each of them about items that became
/// available again. Registering and deregistering cursors takes the
/// registry's [`RwLock`] exclusively; broadcasts take it shared, so any
/// number of broadcasts run concurrently but never concurrently with a
/// registry edit.
///
/// [priority]: ItemLink::priority
/// [`new_cursor`]: Self::new_cursor
/// [`link_available`]: Self::link_available
pub struct PrioritizedList<L: ItemLink> {
    config: Config,
    sublists: Box<[OnceLock<Arc<LinkedList<L>>>]>,
    registry_lock: RwLock,
    registry: Mutex<Registry<L>>,
}

/// A doubly-linked list of registered cursors.
struct Registry<L: ItemLink> {
    cursors: Arena<Registered<L>>,
    first: Option<Key>,
    last: Option<Key>,
}

struct Registered<L: ItemLink> {
    cursor: Arc<CursorCore<L>>,
    prev: Option<Key>,
    next: Option<Key>,
}

// === impl PrioritizedList ===

impl<L: ItemLink> PrioritizedList<L> {
    /// Returns a new list with the default [`Config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Returns a [`Builder`] for configuring a new list.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Returns a new list with the given configuration.
    #[must_use]
    pub fn with_config(mut config: Config) -> Self {
        if config.priorities == 0 {
            tracing::warn!("a prioritized list needs at least one priority level; using 1");
            config.priorities = 1;
        }
        let sublists = (0..config.priorities).map(|_| OnceLock::new()).collect();
        Self {
            config,
            sublists,
            registry_lock: RwLock::new(),
            registry: Mutex::new(Registry::new()),
        }
    }

    /// Returns this list's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the number of priority levels.
    #[must_use]
    pub fn priorities(&self) -> usize {
        self.sublists.len()
    }

    /// Appends `item` to the sublist for its priority, returning the position
    /// it was assigned within that sublist.
    ///
    /// # Errors
    ///
    /// - [`Error::PriorityOutOfRange`] if the item's priority is not one of
    ///   this list's priority levels.
    /// - [`Error::AlreadyPositioned`] if the item was already appended to a
    ///   list.
    pub fn append(&self, item: Arc<L>) -> Result<u64> {
        let priority = self.check_priority(&*item)?;
        self.sublist_or_init(priority).append(item)
    }

    /// Unlinks `item` from the sublist for its priority.
    ///
    /// Returns `true` if this call logically unlinked the item.
    pub fn unlink(&self, item: &L) -> Result<bool> {
        let priority = self.check_priority(item)?;
        match self.sublist(priority) {
            Some(sublist) => sublist.unlink(item),
            None => Ok(false),
        }
    }

    /// Returns the state of `item`'s link in the sublist for its priority.
    pub fn state_of(&self, item: &L) -> Result<LinkState> {
        let priority = self.check_priority(item)?;
        Ok(self
            .sublist(priority)
            .map_or(LinkState::PhysicallyUnlinked, |sublist| sublist.state_of(item)))
    }

    /// Tells every live cursor that `item` is available again, for example
    /// because a lock on it was released.
    ///
    /// Cursors with jump-back enabled that have already passed the item
    /// queue it for redelivery. Other cursors ignore it.
    pub fn link_available(&self, item: &Arc<L>) -> Result<()> {
        enter_test_debug_span!("PrioritizedList::link_available", position = ?item.position());
        self.check_priority(&**item)?;

        self.registry_lock.lock_shared();
        let broadcast = self.broadcast_available(item);
        self.registry_lock.unlock_shared()?;
        broadcast
    }

    /// Returns the highest-priority item that matches `filter`.
    pub fn find_first_matching(&self, filter: Option<&L::Filter>) -> Result<Option<L::Item>> {
        for sublist in self.sublists_by_priority() {
            if let Some(item) = sublist.find_first_matching(filter)? {
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    /// Begins removing the highest-priority item that matches `filter` under
    /// `txn`, returning its link.
    ///
    /// See [`LinkedList::remove_first_matching`].
    pub fn remove_first_matching(
        &self,
        filter: Option<&L::Filter>,
        txn: &L::Transaction,
    ) -> Result<Option<Arc<L>>> {
        for sublist in self.sublists_by_priority() {
            if let Some(link) = sublist.remove_first_matching(filter, txn)? {
                return Ok(Some(link));
            }
        }
        Ok(None)
    }

    /// Returns the number of linked items across all priorities.
    ///
    /// This walks every sublist, and is intended for diagnostics.
    #[must_use]
    pub fn count_links(&self) -> usize {
        self.sublists_by_priority()
            .map(|sublist| sublist.count_links())
            .sum()
    }

    /// Returns the number of registered cursors.
    #[must_use]
    pub fn cursor_count(&self) -> usize {
        let _shared = self.registry_lock.read();
        self.registry().cursors.len()
    }

    /// Returns the sublist for `priority`, if any item with that priority
    /// has been appended.
    #[must_use]
    pub fn sublist(&self, priority: usize) -> Option<&Arc<LinkedList<L>>> {
        self.sublists.get(priority)?.get()
    }

    /// Returns a new cursor, registered with this list.
    ///
    /// - `filter` selects the items the cursor delivers; `None` selects every
    ///   item.
    /// - With a `lock_id`, each item the cursor returns has been locked for
    ///   that id. Without one, the cursor browses.
    /// - With `jumpback`, the cursor revisits items that become available
    ///   behind it (see [`link_available`](Self::link_available)).
    ///
    /// The cursor deregisters when it is [finished] or dropped.
    ///
    /// [finished]: PrioritizedCursor::finished
    #[must_use]
    pub fn new_cursor(
        self: &Arc<Self>,
        filter: Option<Arc<L::Filter>>,
        lock_id: Option<LockId>,
        jumpback: bool,
    ) -> PrioritizedCursor<L> {
        let core = Arc::new(CursorCore::new(self.priorities(), filter, lock_id, jumpback));
        let key = {
            let _exclusive = self.registry_lock.write();
            let key = self.registry().push_back(core.clone());
            tracing::debug!(?lock_id, jumpback, cursors = self.cursor_count(), "registered cursor");
            key
        };
        PrioritizedCursor::new(self.clone(), core, key)
    }

    /// Returns a new cursor that uses jump-back if the list's
    /// [`Config::jumpback_by_default`] is set.
    #[must_use]
    pub fn new_default_cursor(
        self: &Arc<Self>,
        filter: Option<Arc<L::Filter>>,
        lock_id: Option<LockId>,
    ) -> PrioritizedCursor<L> {
        self.new_cursor(filter, lock_id, self.config.jumpback_by_default)
    }

    /// Returns a snapshot of the list's sublists.
    #[must_use]
    pub fn snapshot(&self) -> PrioritizedListSnapshot {
        let sublists = (0..self.priorities())
            .rev()
            .filter_map(|priority| {
                let list = self.sublist(priority)?.snapshot();
                Some(SublistSnapshot { priority, list })
            })
            .collect();
        PrioritizedListSnapshot {
            priorities: self.priorities(),
            cursors: self.cursor_count(),
            sublists,
        }
    }

    /// Asserts that the cursor registry and every sublist are consistent.
    ///
    /// # Panics
    ///
    /// If any invariant does not hold, including if a cursor is registered
    /// more than once.
    #[track_caller]
    pub fn assert_valid(&self) {
        {
            let _exclusive = self.registry_lock.write();
            self.registry().assert_valid();
        }
        for sublist in self.sublists_by_priority() {
            sublist.assert_valid();
        }
    }

    /// Marks a cursor finished and removes it from the registry. Does
    /// nothing if the cursor was already finished.
    ///
    /// The cursor's subcursors are released while the registry is held
    /// exclusively, so no broadcast sees a cursor that is partly released.
    pub(crate) fn deregister(&self, key: Key, core: &CursorCore<L>) -> Result<()> {
        let _exclusive = self.registry_lock.write();
        if !core.mark_finished() {
            return Ok(());
        }

        let removed = self.registry().remove(key);
        debug_assert!(
            removed.map_or(false, |removed| core::ptr::eq(Arc::as_ptr(&removed), core)),
            "a cursor must deregister its own registration"
        );
        tracing::debug!(cursors = self.cursor_count(), "deregistered cursor");
        core.release()
    }

    pub(crate) fn sublist_or_init(&self, priority: usize) -> &Arc<LinkedList<L>> {
        self.sublists[priority].get_or_init(|| {
            tracing::debug!(priority, "creating sublist");
            Arc::new(LinkedList::new())
        })
    }

    /// Iterates over the sublists that exist, highest priority first.
    pub(crate) fn sublists_by_priority(&self) -> impl Iterator<Item = &Arc<LinkedList<L>>> + '_ {
        self.sublists.iter().rev().filter_map(OnceLock::get)
    }

    fn broadcast_available(&self, item: &Arc<L>) -> Result<()> {
        // Snapshot the registry so that no registry lock is held while
        // cursors examine the item.
        let cursors = self.registry().iter().cloned().collect::<Vec<_>>();
        test_debug!(cursors = cursors.len(), "broadcasting available link");
        for cursor in cursors {
            cursor.available(self, item)?;
        }
        Ok(())
    }

    fn check_priority(&self, item: &L) -> Result<usize> {
        let priority = item.priority();
        if priority >= self.priorities() {
            tracing::error!(priority, priorities = self.priorities(), "item priority out of range");
            return Err(Error::PriorityOutOfRange {
                priority,
                priorities: self.priorities(),
            });
        }
        Ok(priority)
    }

    fn registry(&self) -> MutexGuard<'_, Registry<L>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<L: ItemLink> Default for PrioritizedList<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ItemLink> fmt::Debug for PrioritizedList<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sublists = self
            .sublists
            .iter()
            .enumerate()
            .filter_map(|(priority, sublist)| Some((priority, sublist.get()?)))
            .collect::<Vec<_>>();
        f.debug_struct("PrioritizedList")
            .field("config", &self.config)
            .field("registry_lock", &self.registry_lock)
            .field("sublists", &sublists)
            .finish()
    }
}

// === impl Registry ===

impl<L: ItemLink> Registry<L> {
    fn new() -> Self {
        Self {
            cursors: Arena::new(),
            first: None,
            last: None,
        }
    }

    fn push_back(&mut self, cursor: Arc<CursorCore<L>>) -> Key {
        let key = self.cursors.insert(Registered {
            cursor,
            prev: self.last,
            next: None,
        });
        match self.last.and_then(|last| self.cursors.get_mut(last)) {
            Some(last) => last.next = Some(key),
            None => self.first = Some(key),
        }
        self.last = Some(key);
        key
    }

    fn remove(&mut self, key: Key) -> Option<Arc<CursorCore<L>>> {
        let entry = self.cursors.remove(key)?;
        match entry.prev.and_then(|prev| self.cursors.get_mut(prev)) {
            Some(prev) => prev.next = entry.next,
            None => self.first = entry.next,
        }
        match entry.next.and_then(|next| self.cursors.get_mut(next)) {
            Some(next) => next.prev = entry.prev,
            None => self.last = entry.prev,
        }
        Some(entry.cursor)
    }

    /// Iterates over registered cursors in registration order.
    fn iter(&self) -> impl Iterator<Item = &Arc<CursorCore<L>>> + '_ {
        let mut next = self.first;
        core::iter::from_fn(move || {
            let entry = self.cursors.get(next?)?;
            next = entry.next;
            Some(&entry.cursor)
        })
    }

    #[track_caller]
    fn assert_valid(&self) {
        let mut prev = None;
        let mut next = self.first;
        let mut seen = Vec::with_capacity(self.cursors.len());
        while let Some(key) = next {
            let entry = self
                .cursors
                .get(key)
                .expect("registry links must point at registered cursors");
            assert_eq!(entry.prev, prev, "registry prev link must point back");

            let ptr = Arc::as_ptr(&entry.cursor);
            assert!(
                !seen.contains(&ptr),
                "cursor registered more than once: {:?}",
                entry.cursor
            );
            assert!(
                !entry.cursor.is_finished(),
                "finished cursors must be deregistered: {:?}",
                entry.cursor
            );
            seen.push(ptr);

            prev = Some(key);
            next = entry.next;
        }
        assert_eq!(self.last, prev, "registry tail must be the last cursor");
        assert_eq!(seen.len(), self.cursors.len(), "every cursor must be reachable");
    }
}
