use crate::LinkState;

/// Errors returned by lists and cursors.
///
/// Ordinary outcomes are never errors: reaching the end of a list, finding no
/// match, or failing to lock an item that someone else holds are all reported
/// as `Ok(None)` or `Ok(false)`, and races with concurrent removals are
/// absorbed. An `Error` always means that an internal invariant was violated,
/// either by this crate or by an [`ItemLink`](crate::ItemLink)
/// implementation, and the operation that returned it was abandoned.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A link state transition was attempted from a state that does not
    /// allow it.
    #[error("cannot {op} a link that is {state}")]
    LinkState {
        /// The attempted transition.
        op: &'static str,
        /// The state the link was in.
        state: LinkState,
    },

    /// A link's cursor count was decremented below zero.
    #[error("cursor count underflow on the link at position {position}")]
    CursorCountUnderflow {
        /// The position of the link.
        position: u64,
    },

    /// A link that already has a position was appended again.
    #[error("link already has position {position} and cannot be appended again")]
    AlreadyPositioned {
        /// The link's existing position.
        position: u64,
    },

    /// An item's priority is not one of the list's priority levels.
    #[error("priority {priority} is out of range (the list has {priorities} priorities)")]
    PriorityOutOfRange {
        /// The item's priority.
        priority: usize,
        /// The number of priority levels.
        priorities: usize,
    },

    /// The cursor registry's lock was released incorrectly.
    #[error(transparent)]
    Unlock(#[from] hyphae_sync::UnlockError),

    /// An item link reported a severe error.
    #[error("item link error: {0}")]
    Item(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// A `Result` whose error type defaults to [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

impl Error {
    /// Wraps a severe error raised by an [`ItemLink`](crate::ItemLink).
    pub fn item(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Item(error.into())
    }
}
