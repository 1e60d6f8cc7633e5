//! An in-memory [`ItemLink`].
//!
//! [`MemoryLink`] carries a payload and tracks the item's lock and removal
//! state itself. It is enough for tests, and for brokers that keep their
//! queues entirely in memory.
use super::{ItemLink, LockId, NO_LOCK_ID};
use crate::{Error, Link, Result};
use core::{
    fmt,
    sync::atomic::{AtomicU64, Ordering::*},
};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A predicate over item payloads.
///
/// Implemented for any `Fn(&T) -> bool` closure that is `Send + Sync`.
pub trait Filter<T>: Send + Sync {
    /// Returns `true` if `item` is selected by this filter.
    fn filter_matches(&self, item: &T) -> bool;
}

/// An item link that holds its payload in memory.
pub struct MemoryLink<T> {
    link: Link,
    priority: usize,
    payload: T,
    state: Mutex<ItemState>,
    unlock_count: AtomicU64,
}

/// The lock and removal state of a [`MemoryLink`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ItemState {
    /// Not locked and not being removed.
    Available,
    /// Locked by the holder of the lock id.
    Locked(LockId),
    /// Being removed under a transaction.
    Removing(Transaction),
    /// Removal has been committed.
    Removed,
}

/// Identifies the transaction a [`MemoryLink`] is being removed under.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Transaction(u64);

/// Errors returned by [`MemoryLink`]'s state transitions.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ItemError {
    /// The item is locked by a different lock id.
    #[error("item is locked by {held}, not by {requested}")]
    LockIdMismatch {
        /// The lock id that holds the item.
        held: LockId,
        /// The lock id passed by the caller.
        requested: LockId,
    },

    /// The requested transition is not valid from the item's current state.
    #[error("cannot {op} an item in state {state:?}")]
    InvalidState {
        /// The attempted transition.
        op: &'static str,
        /// The item's state.
        state: ItemState,
    },

    /// [`NO_LOCK_ID`] was used to lock an item.
    #[error("invalid lock id: clashes with NO_LOCK_ID")]
    InvalidLockId,
}

impl From<ItemError> for Error {
    fn from(error: ItemError) -> Self {
        Error::item(error)
    }
}

impl<T, F> Filter<T> for F
where
    F: Fn(&T) -> bool + Send + Sync,
{
    #[inline]
    fn filter_matches(&self, item: &T) -> bool {
        self(item)
    }
}

// === impl Transaction ===

impl Transaction {
    /// Returns a transaction with the given id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns this transaction's id.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

// === impl MemoryLink ===

impl<T> MemoryLink<T> {
    /// Returns a new, available item with the given priority.
    #[must_use]
    pub fn new(priority: usize, payload: T) -> Self {
        Self {
            link: Link::new(),
            priority,
            payload,
            state: Mutex::new(ItemState::Available),
            unlock_count: AtomicU64::new(0),
        }
    }

    /// Returns a reference to the payload.
    #[must_use]
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Returns the item's current state.
    #[must_use]
    pub fn state(&self) -> ItemState {
        *self.lock_state()
    }

    /// Returns `true` if the item is neither locked nor being removed.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.state() == ItemState::Available
    }

    /// Releases a lock held by `lock_id`, making the item available again.
    ///
    /// A cursor that skipped this item while it was locked will not see it
    /// again unless the item's list is told it is available; call
    /// [`PrioritizedList::link_available`](crate::PrioritizedList::link_available)
    /// after unlocking.
    ///
    /// # Errors
    ///
    /// - [`ItemError::InvalidState`] if the item is not locked.
    /// - [`ItemError::LockIdMismatch`] if it is locked by another lock id.
    pub fn unlock(&self, lock_id: LockId) -> Result<(), ItemError> {
        let mut state = self.lock_state();
        match *state {
            ItemState::Locked(held) if held == lock_id => {
                *state = ItemState::Available;
                self.unlock_count.fetch_add(1, Relaxed);
                tracing::trace!(lock_id, position = ?self.link.position(), "MemoryLink::unlock");
                Ok(())
            }
            ItemState::Locked(held) => Err(ItemError::LockIdMismatch {
                held,
                requested: lock_id,
            }),
            state => Err(ItemError::InvalidState { op: "unlock", state }),
        }
    }

    /// Completes a removal begun under `txn`.
    ///
    /// The item should then be unlinked from its list.
    pub fn commit_remove(&self, txn: Transaction) -> Result<(), ItemError> {
        self.finish_remove("commit removal of", txn, ItemState::Removed)
    }

    /// Abandons a removal begun under `txn`, making the item available again.
    pub fn abort_remove(&self, txn: Transaction) -> Result<(), ItemError> {
        self.finish_remove("abort removal of", txn, ItemState::Available)
    }

    /// Returns the number of times this item has been unlocked.
    ///
    /// The value is a hint, for example for redelivery counts, and may be
    /// stale by the time it is read.
    #[must_use]
    pub fn guess_unlock_count(&self) -> u64 {
        self.unlock_count.load(Relaxed)
    }

    fn finish_remove(&self, op: &'static str, txn: Transaction, to: ItemState) -> Result<(), ItemError> {
        let mut state = self.lock_state();
        match *state {
            ItemState::Removing(removing) if removing == txn => {
                *state = to;
                Ok(())
            }
            state => Err(ItemError::InvalidState { op, state }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ItemState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone + Send + Sync + 'static> MemoryLink<T> {
    fn filter_matches(&self, filter: Option<&dyn Filter<T>>) -> bool {
        filter.map_or(true, |filter| filter.filter_matches(&self.payload))
    }

    fn try_lock(&self, lock_id: LockId) -> Result<bool> {
        if lock_id == NO_LOCK_ID {
            tracing::error!("attempted to lock an item with NO_LOCK_ID");
            return Err(ItemError::InvalidLockId.into());
        }

        let mut state = self.lock_state();
        if *state != ItemState::Available {
            return Ok(false);
        }

        *state = ItemState::Locked(lock_id);
        Ok(true)
    }
}

impl<T: Clone + Send + Sync + 'static> ItemLink for MemoryLink<T> {
    type Item = T;
    type Filter = dyn Filter<T>;
    type Transaction = Transaction;

    fn link(&self) -> &Link {
        &self.link
    }

    fn priority(&self) -> usize {
        self.priority
    }

    fn matches_with(
        &self,
        filter: Option<&Self::Filter>,
        allow_unavailable: bool,
    ) -> Result<Option<T>> {
        if !allow_unavailable && !self.is_available() {
            return Ok(None);
        }

        Ok(self.filter_matches(filter).then(|| self.payload.clone()))
    }

    fn lock_if_matches(&self, filter: Option<&Self::Filter>, lock_id: LockId) -> Result<bool> {
        // The filter is evaluated before taking the state lock.
        if !self.filter_matches(filter) {
            return Ok(false);
        }

        self.try_lock(lock_id)
    }

    fn lock_item_if_available(&self, lock_id: LockId) -> Result<bool> {
        self.try_lock(lock_id)
    }

    fn remove_if_matches(&self, filter: Option<&Self::Filter>, txn: &Transaction) -> Result<Option<T>> {
        if !self.filter_matches(filter) {
            return Ok(None);
        }

        let mut state = self.lock_state();
        if *state != ItemState::Available {
            return Ok(None);
        }

        *state = ItemState::Removing(*txn);
        Ok(Some(self.payload.clone()))
    }

    fn item(&self) -> T {
        self.payload.clone()
    }
}

impl<T: fmt::Debug> fmt::Debug for MemoryLink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLink")
            .field("link", &self.link)
            .field("priority", &self.priority)
            .field("payload", &self.payload)
            .field("state", &*self.lock_state())
            .field("unlock_count", &self.guess_unlock_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn even(n: &u32) -> bool {
        n % 2 == 0
    }

    #[test]
    fn lock_unlock() {
        let item = MemoryLink::new(4, 2u32);
        assert!(item.lock_if_matches(Some(&even), 1).unwrap());
        assert_eq!(item.state(), ItemState::Locked(1));
        assert!(!item.lock_item_if_available(2).unwrap(), "already locked");
        assert_eq!(item.matches(None).unwrap(), None);
        assert_eq!(item.matches_with(None, true).unwrap(), Some(2));

        assert_eq!(
            item.unlock(2),
            Err(ItemError::LockIdMismatch {
                held: 1,
                requested: 2
            })
        );
        item.unlock(1).unwrap();
        assert_eq!(item.guess_unlock_count(), 1);
        assert_eq!(
            item.unlock(1),
            Err(ItemError::InvalidState {
                op: "unlock",
                state: ItemState::Available
            })
        );
    }

    #[test]
    fn filter_is_applied() {
        let item = MemoryLink::new(0, 3u32);
        assert_eq!(item.matches(Some(&even)).unwrap(), None);
        assert!(!item.lock_if_matches(Some(&even), 1).unwrap());
        assert!(item.is_available());
        assert_eq!(item.matches(Some(&|n: &u32| *n == 3)).unwrap(), Some(3));
    }

    #[test]
    fn no_lock_id_is_rejected() {
        let item = MemoryLink::new(0, ());
        let err = item.lock_item_if_available(NO_LOCK_ID).unwrap_err();
        assert!(matches!(err, Error::Item(_)), "{err:?}");
        assert!(item.is_available());
    }

    #[test]
    fn remove_commit_and_abort() {
        let txn = Transaction::new(7);
        let item = MemoryLink::new(0, "hello");
        assert_eq!(item.remove_if_matches(None, &txn).unwrap(), Some("hello"));
        assert_eq!(item.state(), ItemState::Removing(txn));
        assert_eq!(item.remove_if_matches(None, &txn).unwrap(), None);

        assert!(item.commit_remove(Transaction::new(8)).is_err());
        item.abort_remove(txn).unwrap();
        assert!(item.is_available());

        item.remove_if_matches(None, &txn).unwrap();
        item.commit_remove(txn).unwrap();
        assert_eq!(item.state(), ItemState::Removed);
        assert!(!item.lock_item_if_available(1).unwrap());
    }
}
