use super::*;
use crate::loom::{self, cell::UnsafeCell, sync::Arc, thread};

/// A counter whose value is only touched while `lock` is held.
struct Guarded {
    lock: RwLock,
    value: UnsafeCell<usize>,
}

// Safety: `value` is only read under a shared lock and only written under an
// exclusive lock.
unsafe impl Sync for Guarded {}
unsafe impl Send for Guarded {}

impl Guarded {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            lock: RwLock::new(),
            value: UnsafeCell::new(0),
        })
    }

    fn get(&self) -> usize {
        let _guard = self.lock.read();
        self.value.with(|value| unsafe { *value })
    }

    fn increment(&self) {
        let _guard = self.lock.write();
        self.value.with_mut(|value| unsafe { *value += 1 });
    }
}

fn writer(guarded: Arc<Guarded>) -> impl FnOnce() {
    move || {
        test_debug!("trying to acquire write lock...");
        guarded.increment();
        test_debug!("released write lock!");
    }
}

#[test]
fn write() {
    const WRITERS: usize = 2;

    loom::model(|| {
        let guarded = Guarded::new();
        let threads = (0..WRITERS)
            .map(|_| thread::spawn(writer(guarded.clone())))
            .collect::<Vec<_>>();

        for thread in threads {
            thread.join().expect("writer thread mustn't panic");
        }

        assert_eq!(
            guarded.get(),
            WRITERS,
            "final state must equal number of writers"
        );
    });
}

#[test]
fn read_write() {
    // this hits loom's preemption bound with 2 writer threads.
    const WRITERS: usize = if cfg!(loom) { 1 } else { 2 };

    loom::model(|| {
        let guarded = Guarded::new();
        let threads = (0..WRITERS)
            .map(|_| thread::spawn(writer(guarded.clone())))
            .collect::<Vec<_>>();

        let seen = guarded.get();
        assert!(seen <= WRITERS, "saw {seen} increments from {WRITERS} writers");

        for thread in threads {
            thread.join().expect("writer thread mustn't panic");
        }

        assert_eq!(
            guarded.get(),
            WRITERS,
            "final state must equal number of writers"
        );
    });
}

#[test]
fn reentrant_write_excludes_others() {
    loom::model(|| {
        let lock = Arc::new(RwLock::new());
        let outer = lock.write();
        let inner = lock.write();
        let read = lock.read();
        assert!(lock.is_write_locked_by_current_thread());
        assert_eq!(lock.reader_count(), 1);

        let other = {
            let lock = lock.clone();
            thread::spawn(move || {
                let read = lock.try_read().is_some();
                let write = lock.try_write().is_some();
                (read, write)
            })
        };
        assert_eq!(
            other.join().expect("thread mustn't panic"),
            (false, false),
            "another thread must not acquire a write-locked lock"
        );

        drop(inner);
        assert!(lock.has_writer(), "outer write guard still held");
        drop(outer);
        assert!(!lock.has_writer());

        // the writer's read lock survives as an ordinary read lock.
        assert_eq!(lock.reader_count(), 1);
        assert!(lock.is_locked());
        drop(read);
        assert!(!lock.is_locked());
    });
}

#[cfg(not(loom))]
mod std_only {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn shared_holders_coexist() {
        let _trace = crate::test_util::trace_init();
        let lock = Arc::new(RwLock::new());
        let first = lock.read();

        let (tx, rx) = mpsc::channel();
        let reader = {
            let lock = lock.clone();
            thread::spawn(move || {
                let _second = lock.read();
                tx.send(lock.reader_count()).expect("receiver alive");
            })
        };
        assert_eq!(rx.recv().expect("reader sends"), 2);
        reader.join().expect("reader thread mustn't panic");

        assert!(lock.try_write().is_none(), "readers exclude writers");
        drop(first);
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn writer_waits_for_readers() {
        let _trace = crate::test_util::trace_init();
        let lock = Arc::new(RwLock::new());
        let read = lock.read();

        let (tx, rx) = mpsc::channel();
        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                let _write = lock.write();
                tx.send(()).expect("receiver alive");
            })
        };

        assert!(
            rx.recv_timeout(std::time::Duration::from_millis(50))
                .is_err(),
            "writer must not proceed while a reader holds the lock"
        );
        drop(read);
        rx.recv().expect("writer proceeds once the reader releases");
        writer.join().expect("writer thread mustn't panic");
        assert!(!lock.is_locked());
    }

    #[test]
    fn unlock_underflow_is_an_error() {
        let _trace = crate::test_util::trace_init();
        let lock = RwLock::new();
        assert_eq!(lock.unlock_shared(), Err(UnlockError::SharedNotHeld));
        assert_eq!(
            lock.unlock_exclusive(),
            Err(UnlockError::ExclusiveNotHeld)
        );

        lock.lock_shared();
        assert_eq!(lock.unlock_shared(), Ok(()));
        assert_eq!(lock.unlock_shared(), Err(UnlockError::SharedNotHeld));
    }

    #[test]
    fn unlock_by_non_owner_is_an_error() {
        let _trace = crate::test_util::trace_init();
        let lock = Arc::new(RwLock::new());
        lock.lock_exclusive();

        let other = {
            let lock = lock.clone();
            thread::spawn(move || lock.unlock_exclusive())
        };
        assert_eq!(
            other.join().expect("thread mustn't panic"),
            Err(UnlockError::NotOwner)
        );

        assert!(lock.is_write_locked_by_current_thread());
        assert_eq!(lock.unlock_exclusive(), Ok(()));
        assert!(!lock.is_locked());
    }

    #[test]
    fn explicit_reentrant_exclusive() {
        let _trace = crate::test_util::trace_init();
        let lock = RwLock::new();
        lock.lock_exclusive();
        assert!(lock.try_lock_exclusive());
        lock.lock_shared();
        assert_eq!(lock.unlock_shared(), Ok(()));
        assert_eq!(lock.unlock_exclusive(), Ok(()));
        assert!(lock.has_writer());
        assert_eq!(lock.unlock_exclusive(), Ok(()));
        assert!(!lock.has_writer());
        assert_eq!(
            lock.unlock_exclusive(),
            Err(UnlockError::ExclusiveNotHeld)
        );
    }
}
