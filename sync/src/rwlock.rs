//! A blocking, re-entrant [readers-writer lock].
//!
//! See the documentation for the [`RwLock`] type for details.
//!
//! [readers-writer lock]: https://en.wikipedia.org/wiki/Readers%E2%80%93writer_lock
use crate::loom::{
    sync::{Condvar, Mutex, MutexGuard},
    thread::{self, ThreadId},
};
use core::{fmt, marker::PhantomData};
use std::sync::PoisonError;

#[cfg(test)]
mod tests;

/// A blocking [readers-writer lock] that is re-entrant for its writer.
///
/// This type of lock allows a number of readers or at most one writer at any
/// point in time. Unlike [`std::sync::RwLock`], this lock does not own the
/// data it protects: it is used to order *operations* against each other,
/// such as edits to a registry against broadcasts over that registry, where
/// the registry itself lives behind some other synchronization.
///
/// # Re-entrancy
///
/// The thread currently holding the write lock may acquire the write lock
/// again, or acquire the read lock, without blocking. Each such acquisition
/// must be matched by a release; the lock is only made available to other
/// threads once the outermost write acquisition is released. Read locks
/// acquired by the writer and still held when the outermost write lock is
/// released become ordinary read locks.
///
/// A thread holding *only* a read lock that then requests the write lock will
/// deadlock, as with any non-upgradable readers-writer lock.
///
/// # Fairness
///
/// This is *not* a fair readers-writer lock. Readers may continue to acquire
/// the lock while a writer is waiting for it.
///
/// # Loom-specific behavior
///
/// When `cfg(loom)` is enabled, this lock uses Loom's simulated mutex,
/// condition variable and thread IDs.
///
/// [readers-writer lock]: https://en.wikipedia.org/wiki/Readers%E2%80%93writer_lock
pub struct RwLock {
    state: Mutex<State>,
    changed: Condvar,
}

/// An RAII implementation of a "scoped read lock" of a [`RwLock`]. When this
/// structure is dropped (falls out of scope), the shared lock is released.
///
/// This structure is created by the [`read`] and [`try_read`] methods on
/// [`RwLock`].
///
/// [`read`]: RwLock::read
/// [`try_read`]: RwLock::try_read
#[must_use = "if unused, the `RwLock` will immediately unlock"]
pub struct RwLockReadGuard<'lock> {
    lock: &'lock RwLock,
    // shared locks taken by the writer are accounted to its thread.
    _not_send: PhantomData<*const ()>,
}

/// An RAII implementation of a "scoped write lock" of a [`RwLock`]. When this
/// structure is dropped (falls out of scope), the exclusive lock is released.
///
/// This structure is created by the [`write`] and [`try_write`] methods on
/// [`RwLock`].
///
/// [`write`]: RwLock::write
/// [`try_write`]: RwLock::try_write
#[must_use = "if unused, the `RwLock` will immediately unlock"]
pub struct RwLockWriteGuard<'lock> {
    lock: &'lock RwLock,
    _not_send: PhantomData<*const ()>,
}

/// Errors returned when a [`RwLock`] is released incorrectly.
///
/// These always indicate a bug in the caller: a lock was released more times
/// than it was acquired, or released by a thread that does not own it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum UnlockError {
    /// A shared lock was released, but no shared lock was held.
    #[error("released a shared lock that was not held")]
    SharedNotHeld,

    /// An exclusive lock was released, but no exclusive lock was held.
    #[error("released an exclusive lock that was not held")]
    ExclusiveNotHeld,

    /// An exclusive lock was released by a thread other than its owner.
    #[error("released an exclusive lock held by another thread")]
    NotOwner,
}

#[derive(Debug, Default)]
struct State {
    /// Shared locks held by threads other than the writer.
    readers: usize,
    /// The thread holding the exclusive lock, if any.
    writer: Option<ThreadId>,
    /// Exclusive acquisitions by `writer` that have not yet been released.
    depth: usize,
    /// Shared acquisitions by `writer` that have not yet been released.
    writer_reads: usize,
    /// Number of threads blocked in `lock_exclusive`.
    waiting_writers: usize,
}

// === impl RwLock ===

impl RwLock {
    /// Returns a new, unlocked `RwLock`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
        }
    }

    /// Locks this `RwLock` for shared access, blocking the current thread
    /// until it can be acquired.
    ///
    /// If the current thread already holds the write lock, this returns
    /// immediately.
    ///
    /// Returns an RAII guard which will release this thread's shared access
    /// once it is dropped.
    #[cfg_attr(test, track_caller)]
    pub fn read(&self) -> RwLockReadGuard<'_> {
        self.lock_shared();
        RwLockReadGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this `RwLock` for shared access without blocking.
    ///
    /// Returns [`None`] if another thread holds the write lock.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_>> {
        if self.try_lock_shared() {
            Some(RwLockReadGuard {
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    /// Locks this `RwLock` for exclusive access, blocking the current thread
    /// until no other thread holds it in any mode.
    ///
    /// If the current thread already holds the write lock, this returns
    /// immediately.
    #[cfg_attr(test, track_caller)]
    pub fn write(&self) -> RwLockWriteGuard<'_> {
        self.lock_exclusive();
        RwLockWriteGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Attempts to acquire this `RwLock` for exclusive access without
    /// blocking.
    ///
    /// Returns [`None`] if any other thread holds the lock in any mode.
    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_>> {
        if self.try_lock_exclusive() {
            Some(RwLockWriteGuard {
                lock: self,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }

    /// Acquires a shared lock, blocking until no other thread holds the
    /// exclusive lock.
    ///
    /// Every call must be matched by a call to [`unlock_shared`] on the same
    /// thread. Prefer [`read`], which releases the lock automatically.
    ///
    /// [`unlock_shared`]: Self::unlock_shared
    /// [`read`]: Self::read
    pub fn lock_shared(&self) {
        let me = thread::current().id();
        let mut state = self.state();
        loop {
            if state.writer == Some(me) {
                state.writer_reads += 1;
                return;
            }

            if state.writer.is_none() {
                state.readers += 1;
                return;
            }

            trace!(writer = ?state.writer, "RwLock::lock_shared: waiting for writer");
            state = self.wait(state);
        }
    }

    /// Attempts to acquire a shared lock without blocking.
    pub fn try_lock_shared(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state();
        if state.writer == Some(me) {
            state.writer_reads += 1;
            return true;
        }

        if state.writer.is_none() {
            state.readers += 1;
            return true;
        }

        false
    }

    /// Releases a shared lock.
    ///
    /// # Errors
    ///
    /// Returns [`UnlockError::SharedNotHeld`] if no shared lock is held.
    pub fn unlock_shared(&self) -> Result<(), UnlockError> {
        let me = thread::current().id();
        let mut state = self.state();
        if state.writer == Some(me) && state.writer_reads > 0 {
            state.writer_reads -= 1;
            return Ok(());
        }

        if state.readers == 0 {
            error!("RwLock::unlock_shared: shared lock not held");
            return Err(UnlockError::SharedNotHeld);
        }

        state.readers -= 1;
        if state.readers == 0 && state.waiting_writers > 0 {
            self.changed.notify_all();
        }
        Ok(())
    }

    /// Acquires the exclusive lock, blocking until no other thread holds the
    /// lock in any mode.
    ///
    /// Every call must be matched by a call to [`unlock_exclusive`] on the
    /// same thread. Prefer [`write`], which releases the lock automatically.
    ///
    /// [`unlock_exclusive`]: Self::unlock_exclusive
    /// [`write`]: Self::write
    pub fn lock_exclusive(&self) {
        let me = thread::current().id();
        let mut state = self.state();
        loop {
            if state.writer == Some(me) {
                state.depth += 1;
                return;
            }

            if state.writer.is_none() && state.readers == 0 {
                state.writer = Some(me);
                state.depth = 1;
                return;
            }

            trace!(
                readers = state.readers,
                writer = ?state.writer,
                "RwLock::lock_exclusive: waiting"
            );
            state.waiting_writers += 1;
            state = self.wait(state);
            state.waiting_writers -= 1;
        }
    }

    /// Attempts to acquire the exclusive lock without blocking.
    pub fn try_lock_exclusive(&self) -> bool {
        let me = thread::current().id();
        let mut state = self.state();
        if state.writer == Some(me) {
            state.depth += 1;
            return true;
        }

        if state.writer.is_none() && state.readers == 0 {
            state.writer = Some(me);
            state.depth = 1;
            return true;
        }

        false
    }

    /// Releases one exclusive acquisition.
    ///
    /// Once the outermost acquisition is released, the lock becomes
    /// available to other threads; shared locks the writer still holds become
    /// ordinary shared locks.
    ///
    /// # Errors
    ///
    /// - [`UnlockError::ExclusiveNotHeld`] if no thread holds the exclusive
    ///   lock.
    /// - [`UnlockError::NotOwner`] if another thread holds it.
    pub fn unlock_exclusive(&self) -> Result<(), UnlockError> {
        let me = thread::current().id();
        let mut state = self.state();
        match state.writer {
            None => {
                error!("RwLock::unlock_exclusive: exclusive lock not held");
                return Err(UnlockError::ExclusiveNotHeld);
            }
            Some(writer) if writer != me => {
                error!(?writer, "RwLock::unlock_exclusive: not the owner");
                return Err(UnlockError::NotOwner);
            }
            Some(_) => {}
        }

        debug_assert!(state.depth > 0, "a writer must have a nonzero depth");
        state.depth -= 1;
        if state.depth == 0 {
            state.writer = None;
            state.readers += state.writer_reads;
            state.writer_reads = 0;
            self.changed.notify_all();
        }
        Ok(())
    }

    /// Returns `true` if this `RwLock` is currently locked in any mode.
    ///
    /// # Note
    ///
    /// The value may be out of date as soon as it is returned; it is intended
    /// for debugging and assertions only.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        let state = self.state();
        state.writer.is_some() || state.readers > 0
    }

    /// Returns `true` if some thread currently holds the exclusive lock.
    ///
    /// # Note
    ///
    /// The value may be out of date as soon as it is returned; it is intended
    /// for debugging and assertions only.
    #[must_use]
    pub fn has_writer(&self) -> bool {
        self.state().writer.is_some()
    }

    /// Returns `true` if the *current* thread holds the exclusive lock.
    #[must_use]
    pub fn is_write_locked_by_current_thread(&self) -> bool {
        self.state().writer == Some(thread::current().id())
    }

    /// Returns the current number of shared locks held, including those held
    /// by the writer.
    ///
    /// # Note
    ///
    /// This is **not** intended to be used for synchronization purposes. It
    /// is intended only for debugging or for use as a heuristic.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        let state = self.state();
        state.readers + state.writer_reads
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // Every critical section on `state` leaves it consistent before
        // anything that could panic, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, state: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("RwLock")
            .field("readers", &state.readers)
            .field("writer", &state.writer)
            .field("depth", &state.depth)
            .field("writer_reads", &state.writer_reads)
            .field("waiting_writers", &state.waiting_writers)
            .finish()
    }
}

// === impl RwLockReadGuard ===

impl Drop for RwLockReadGuard<'_> {
    #[inline]
    #[cfg_attr(test, track_caller)]
    fn drop(&mut self) {
        let _released = test_dbg!(self.lock.unlock_shared());
        debug_assert!(
            _released.is_ok(),
            "a read guard must always hold a shared lock"
        );
    }
}

impl fmt::Debug for RwLockReadGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLockReadGuard")
            .field("lock", &format_args!("{:p}", self.lock))
            .finish()
    }
}

// === impl RwLockWriteGuard ===

impl Drop for RwLockWriteGuard<'_> {
    #[inline]
    #[cfg_attr(test, track_caller)]
    fn drop(&mut self) {
        let _released = test_dbg!(self.lock.unlock_exclusive());
        debug_assert!(
            _released.is_ok(),
            "a write guard must always hold the exclusive lock"
        );
    }
}

impl fmt::Debug for RwLockWriteGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RwLockWriteGuard")
            .field("lock", &format_args!("{:p}", self.lock))
            .finish()
    }
}
