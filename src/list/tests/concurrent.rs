use super::*;
use std::{collections::HashSet, thread};

const THREADS: i32 = 4;
const PER_THREAD: i32 = 100;

#[test]
fn concurrent_appends() {
    let _trace = trace_init();

    let list = Arc::new(LinkedList::new());
    let threads = (0..THREADS)
        .map(|t| {
            let list = list.clone();
            thread::Builder::new()
                .name(format!("appender-{t}"))
                .spawn(move || {
                    let mut positions = Vec::new();
                    for i in 0..PER_THREAD {
                        positions.push(list.append(entry(t * PER_THREAD + i)).unwrap());
                    }
                    positions
                })
                .unwrap()
        })
        .collect::<Vec<_>>();

    let mut positions = Vec::new();
    for thread in threads {
        let mine = thread.join().unwrap();
        assert!(
            mine.windows(2).all(|w| w[0] < w[1]),
            "one thread's appends get increasing positions"
        );
        positions.extend(mine);
    }
    positions.sort_unstable();
    let expected = (0..(THREADS * PER_THREAD) as u64).collect::<Vec<_>>();
    assert_eq!(positions, expected, "positions are unique and dense");

    list.assert_valid();
    assert_eq!(list.count_links(), (THREADS * PER_THREAD) as usize);
    assert_eq!(list.next_position(), (THREADS * PER_THREAD) as u64);
    assert_eq!(
        list.snapshot().linked_positions(),
        expected,
        "list order is position order"
    );
}

#[test]
fn cursor_races_appends_and_unlinks() {
    let _trace = trace_init();

    let list = Arc::new(LinkedList::new());
    let cursor = list.new_nonlocking_cursor(None);

    let appender = {
        let list = list.clone();
        thread::Builder::new()
            .name("appender".into())
            .spawn(move || {
                (0..THREADS * PER_THREAD)
                    .map(|val| {
                        let entry = entry(val);
                        list.append(entry.clone()).unwrap();
                        entry
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap()
    };
    let unlinker = {
        let list = list.clone();
        thread::Builder::new()
            .name("unlinker".into())
            .spawn(move || {
                let mut unlinked = 0;
                while unlinked < PER_THREAD {
                    if let Some(first) = list.get_next_link(None) {
                        if list.unlink(&first).unwrap() {
                            unlinked += 1;
                        }
                    } else {
                        thread::yield_now();
                    }
                }
            })
            .unwrap()
    };

    let mut seen = HashSet::new();
    let mut last = None;
    let check = |entry: Arc<Entry>, seen: &mut HashSet<i32>, last: &mut Option<u64>| {
        let val = *entry.payload();
        assert!(seen.insert(val), "{val} delivered twice");
        assert!(entry.position() > *last, "positions must increase");
        *last = entry.position();
    };
    while !appender.is_finished() {
        if let Some(entry) = cursor.next().unwrap() {
            check(entry, &mut seen, &mut last);
        }
    }

    let entries = appender.join().unwrap();
    unlinker.join().unwrap();
    while let Some(entry) = cursor.next().unwrap() {
        check(entry, &mut seen, &mut last);
    }
    list.assert_valid();

    // Everything still linked once the cursor caught up was delivered.
    for entry in &entries {
        if list.state_of(entry).is_linked() {
            assert!(seen.contains(entry.payload()), "missed {entry:?}");
        }
    }

    drop(cursor);
    let nodes = list.chain().len();
    assert_eq!(nodes, list.count_links());
    list.assert_valid();
}
