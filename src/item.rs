//! The item link abstraction.
//!
//! Lists and cursors never look inside the items they hold. Everything they
//! need from an item (its position and priority, and whether it matches a
//! filter or can be locked) goes through the [`ItemLink`] trait.
use crate::{Link, Result};

pub mod memory;

/// Identifies the holder of an item lock.
pub type LockId = u64;

/// A lock id that is never valid. Item links reject attempts to lock an item
/// with this id.
pub const NO_LOCK_ID: LockId = u64::MAX;

/// Trait implemented by items that can be members of a
/// [`LinkedList`](crate::LinkedList) or a
/// [`PrioritizedList`](crate::PrioritizedList).
///
/// An item link embeds a [`Link`] header that records its position and list
/// membership, and exposes the match and lock operations cursors use to
/// decide whether to deliver it.
///
/// # Errors
///
/// The fallible methods on this trait return `Err` only for *severe* errors,
/// such as an attempt to lock with [`NO_LOCK_ID`] or an item found in an
/// impossible state. Such errors abort the list operation and are returned
/// to its caller. An item that does not match or is locked by someone else
/// is not an error.
///
/// # Implementing `ItemLink`
///
/// ```
/// use hyphae::{ItemLink, Link, LockId, Result};
/// use std::sync::Mutex;
///
/// struct Message {
///     link: Link,
///     priority: usize,
///     body: String,
///     locked_by: Mutex<Option<LockId>>,
/// }
///
/// impl ItemLink for Message {
///     type Item = String;
///     type Filter = str;
///     type Transaction = ();
///
///     fn link(&self) -> &Link {
///         &self.link
///     }
///
///     fn priority(&self) -> usize {
///         self.priority
///     }
///
///     fn matches_with(&self, filter: Option<&str>, allow_unavailable: bool) -> Result<Option<String>> {
///         let available = allow_unavailable || self.locked_by.lock().unwrap().is_none();
///         let matches = filter.map_or(true, |prefix| self.body.starts_with(prefix));
///         Ok((available && matches).then(|| self.body.clone()))
///     }
///
///     fn lock_if_matches(&self, filter: Option<&str>, lock_id: LockId) -> Result<bool> {
///         if !filter.map_or(true, |prefix| self.body.starts_with(prefix)) {
///             return Ok(false);
///         }
///         self.lock_item_if_available(lock_id)
///     }
///
///     fn lock_item_if_available(&self, lock_id: LockId) -> Result<bool> {
///         let mut locked_by = self.locked_by.lock().unwrap();
///         if locked_by.is_some() {
///             return Ok(false);
///         }
///         *locked_by = Some(lock_id);
///         Ok(true)
///     }
///
///     fn remove_if_matches(&self, filter: Option<&str>, _txn: &()) -> Result<Option<String>> {
///         self.matches(filter)
///     }
///
///     fn item(&self) -> String {
///         self.body.clone()
///     }
/// }
/// ```
pub trait ItemLink: Send + Sync + 'static {
    /// The item carried by this link.
    type Item;

    /// The filter used to select items. Lists and cursors pass it through
    /// without inspecting it.
    type Filter: ?Sized + Send + Sync;

    /// The transaction under which an item is removed.
    type Transaction: ?Sized;

    /// Returns this item's link header.
    fn link(&self) -> &Link;

    /// Returns this item's priority.
    ///
    /// A [`PrioritizedList`](crate::PrioritizedList) with `N` priority levels
    /// accepts priorities `0..N`; higher priorities are delivered first.
    fn priority(&self) -> usize;

    /// Returns the position this item was assigned when it was appended, if
    /// it has been appended.
    #[inline]
    fn position(&self) -> Option<u64> {
        self.link().position()
    }

    /// Returns the item if it is available and matches `filter`.
    ///
    /// A `filter` of `None` matches every item.
    fn matches(&self, filter: Option<&Self::Filter>) -> Result<Option<Self::Item>> {
        self.matches_with(filter, false)
    }

    /// Returns the item if it matches `filter` and is either available or
    /// `allow_unavailable` is set.
    fn matches_with(
        &self,
        filter: Option<&Self::Filter>,
        allow_unavailable: bool,
    ) -> Result<Option<Self::Item>>;

    /// Locks the item for `lock_id` if it is available and matches `filter`.
    ///
    /// Returns `Ok(false)` if the item does not match or could not be locked.
    fn lock_if_matches(&self, filter: Option<&Self::Filter>, lock_id: LockId) -> Result<bool>;

    /// Locks the item for `lock_id` if it is available, without consulting a
    /// filter.
    fn lock_item_if_available(&self, lock_id: LockId) -> Result<bool>;

    /// Begins removing the item under `txn` if it is available and matches
    /// `filter`, returning the item if so.
    fn remove_if_matches(
        &self,
        filter: Option<&Self::Filter>,
        txn: &Self::Transaction,
    ) -> Result<Option<Self::Item>>;

    /// Returns the item carried by this link.
    fn item(&self) -> Self::Item;
}
