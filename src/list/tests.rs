use super::*;
use crate::{
    item::memory::{Filter, ItemState, MemoryLink, Transaction},
    test_util::trace_init,
    Link, LockId,
};

type Entry = MemoryLink<i32>;

fn entry(val: i32) -> Arc<Entry> {
    Arc::new(MemoryLink::new(0, val))
}

fn even(val: &i32) -> bool {
    val % 2 == 0
}

fn list_from_iter<'a>(entries: impl IntoIterator<Item = &'a Arc<Entry>>) -> LinkedList<Entry> {
    let list = LinkedList::new();
    for entry in entries {
        list.append(entry.clone()).unwrap();
    }
    list
}

/// Walks the list with `get_next_link`, collecting payloads.
fn collect_vals(list: &LinkedList<Entry>) -> Vec<i32> {
    let mut vals = Vec::new();
    let mut next = list.get_next_link(None);
    while let Some(entry) = next {
        vals.push(*entry.payload());
        next = list.get_next_link(Some(&*entry));
    }
    vals
}

mod concurrent;

#[test]
fn append_assigns_consecutive_positions() {
    let _trace = trace_init();

    let entries = [entry(5), entry(7), entry(9)];
    let list = LinkedList::new();
    assert!(list.is_empty());

    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(list.append(entry.clone()).unwrap(), i as u64);
        assert_eq!(entry.position(), Some(i as u64));
        assert_eq!(list.state_of(entry), LinkState::Linked);
        list.assert_valid();
    }

    assert!(!list.is_empty());
    assert_eq!(list.count_links(), 3);
    assert_eq!(list.next_position(), 3);
    assert_eq!(collect_vals(&list), vec![5, 7, 9]);
}

#[test]
fn append_twice_is_rejected() {
    let _trace = trace_init();

    let a = entry(1);
    let list = list_from_iter([&a]);
    let err = list.append(a.clone()).unwrap_err();
    assert!(matches!(err, Error::AlreadyPositioned { position: 0 }), "{err}");

    // Not even into another list, and not after being unlinked.
    let other = LinkedList::new();
    assert!(matches!(
        other.append(a.clone()),
        Err(Error::AlreadyPositioned { position: 0 })
    ));
    assert!(list.unlink(&a).unwrap());
    assert!(list.append(a.clone()).is_err());

    list.assert_valid();
    other.assert_valid();
    assert!(other.is_empty());
    assert_eq!(list.next_position(), 1, "a rejected append must not use a position");
}

#[test]
fn unlink_without_cursors_is_physical() {
    let _trace = trace_init();

    let entries = [entry(1), entry(2), entry(3)];
    let list = list_from_iter(&entries);

    assert!(list.unlink(&entries[1]).unwrap());
    assert_eq!(list.state_of(&entries[1]), LinkState::PhysicallyUnlinked);
    assert!(!entries[1].link().is_member());
    assert_eq!(entries[1].position(), Some(1), "position survives unlinking");
    assert!(!list.unlink(&entries[1]).unwrap(), "second unlink does nothing");
    list.assert_valid();

    assert_eq!(collect_vals(&list), vec![1, 3]);
    assert_eq!(list.snapshot().linked_positions(), vec![0, 2]);
}

#[test]
fn unlink_from_wrong_list_does_nothing() {
    let _trace = trace_init();

    let a = entry(1);
    let b = entry(2);
    let list = list_from_iter([&a]);
    let other = list_from_iter([&b]);

    assert!(!list.unlink(&b).unwrap());
    assert_eq!(list.state_of(&b), LinkState::PhysicallyUnlinked);
    assert_eq!(other.state_of(&b), LinkState::Linked);
    list.assert_valid();
    other.assert_valid();
}

#[test]
fn get_next_link_restarts_after_physical_unlink() {
    let _trace = trace_init();

    let entries = [entry(1), entry(2), entry(3)];
    let list = list_from_iter(&entries);

    // `b` vanishes between the caller seeing it and asking for its successor.
    let b = list.get_next_link(Some(&*entries[0])).unwrap();
    assert_eq!(*b.payload(), 2);
    assert!(list.unlink(&b).unwrap());
    assert_eq!(list.state_of(&b), LinkState::PhysicallyUnlinked);

    let next = list.get_next_link(Some(&*b)).expect("restart must find a link");
    assert_eq!(*next.payload(), 1, "scanning restarts from the head");

    // A link that was never appended also restarts from the head.
    let stranger = entry(99);
    let next = list.get_next_link(Some(&*stranger)).unwrap();
    assert_eq!(*next.payload(), 1);
}

#[test]
fn chain_restarts_on_stale_key() {
    let _trace = trace_init();

    let entries = [entry(1), entry(2), entry(3)];
    let list = list_from_iter(&entries);
    let mut chain = list.chain();
    let stale = chain.key_of(list.id(), &entries[2]).unwrap();
    assert!(chain.unlink(stale).unwrap());

    let first = chain.key_of(list.id(), &entries[0]).unwrap();
    assert_eq!(chain.next_linked(Some(stale)), Some(first));
    assert_eq!(chain.state(stale), LinkState::PhysicallyUnlinked);
}

#[test]
fn find_first_matching() {
    let _trace = trace_init();

    let entries = [entry(1), entry(2), entry(3), entry(4)];
    let list = list_from_iter(&entries);

    assert_eq!(list.find_first_matching(None).unwrap(), Some(1));
    assert_eq!(list.find_first_matching(Some(&even)).unwrap(), Some(2));

    entries[1].lock_item_if_available(1).unwrap();
    assert_eq!(
        list.find_first_matching(Some(&even)).unwrap(),
        Some(4),
        "locked items do not match"
    );

    let none = |_: &i32| false;
    assert_eq!(list.find_first_matching(Some(&none)).unwrap(), None);
}

#[test]
fn remove_first_matching() {
    let _trace = trace_init();

    let entries = [entry(1), entry(2), entry(3), entry(4)];
    let list = list_from_iter(&entries);
    let txn = Transaction::new(1);

    let removed = list
        .remove_first_matching(Some(&even), &txn)
        .unwrap()
        .expect("an even item must be found");
    assert_eq!(*removed.payload(), 2);
    assert_eq!(removed.state(), ItemState::Removing(txn));
    assert_eq!(list.state_of(&removed), LinkState::Linked);

    let next = list.remove_first_matching(Some(&even), &txn).unwrap().unwrap();
    assert_eq!(*next.payload(), 4);
    assert!(list.remove_first_matching(Some(&even), &txn).unwrap().is_none());

    removed.commit_remove(txn).unwrap();
    assert!(list.unlink(&removed).unwrap());
    next.abort_remove(txn).unwrap();

    assert_eq!(collect_vals(&list), vec![1, 3, 4]);
    list.assert_valid();
}

#[test]
fn item_errors_abort_the_scan() {
    let _trace = trace_init();

    struct Broken {
        link: Link,
    }

    impl ItemLink for Broken {
        type Item = ();
        type Filter = ();
        type Transaction = ();

        fn link(&self) -> &Link {
            &self.link
        }

        fn priority(&self) -> usize {
            0
        }

        fn matches_with(&self, _: Option<&()>, _: bool) -> Result<Option<()>> {
            Err(Error::item("corrupt item"))
        }

        fn lock_if_matches(&self, _: Option<&()>, _: LockId) -> Result<bool> {
            Err(Error::item("corrupt item"))
        }

        fn lock_item_if_available(&self, _: LockId) -> Result<bool> {
            Err(Error::item("corrupt item"))
        }

        fn remove_if_matches(&self, _: Option<&()>, _: &()) -> Result<Option<()>> {
            Err(Error::item("corrupt item"))
        }

        fn item(&self) {}
    }

    let list = LinkedList::new();
    list.append(Arc::new(Broken { link: Link::new() })).unwrap();
    assert!(matches!(list.find_first_matching(None), Err(Error::Item(_))));
    assert!(matches!(list.remove_first_matching(None, &()), Err(Error::Item(_))));
    list.assert_valid();
}

#[cfg(feature = "serde")]
#[test]
fn snapshot_json() {
    let _trace = trace_init();

    let entries = [entry(1), entry(2)];
    let list = list_from_iter(&entries);
    let cursor = Arc::new(list).new_nonlocking_cursor(None);
    cursor.next().unwrap();

    let snapshot = cursor.snapshot();
    assert_eq!(snapshot.last_position, Some(0));
    assert_eq!(snapshot.highest_position, Some(0));

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["last_position"], 0);
    assert_eq!(json["behind"], serde_json::json!([]));
    assert!(snapshot.to_json().unwrap().contains("\"highest_position\": 0"));
}

#[test]
fn snapshot_shows_cursor_counts() {
    let _trace = trace_init();

    let entries = [entry(1), entry(2)];
    let list = Arc::new(list_from_iter(&entries));
    let cursor = list.new_nonlocking_cursor(None);
    cursor.next().unwrap();
    list.unlink(&entries[0]).unwrap();

    let snapshot = list.snapshot();
    assert_eq!(snapshot.next_position, 2);
    assert_eq!(
        snapshot.links,
        vec![
            LinkSnapshot {
                position: 0,
                state: LinkState::LogicallyUnlinked,
                cursor_count: 1,
            },
            LinkSnapshot {
                position: 1,
                state: LinkState::Linked,
                cursor_count: 0,
            },
        ]
    );
    assert_eq!(snapshot.linked_positions(), vec![1]);
}

#[derive(Debug)]
enum Op {
    Append,
    Unlink(usize),
    CursorNext,
    CursorRestart,
}

use core::ops::Range;
use proptest::collection::vec;
use proptest::num::usize::ANY;

/// The default range for proptest's vec strategy is 0..100.
const FUZZ_RANGE: Range<usize> = 0..100;

proptest::proptest! {
    #[test]
    fn fuzz_linked_list(ops in vec(ANY, FUZZ_RANGE)) {

        let ops = ops
            .iter()
            .map(|i| match i % 4 {
                0 => Op::Append,
                1 => Op::Unlink(i / 4),
                2 => Op::CursorNext,
                3 => Op::CursorRestart,
                _ => unreachable!(),
            })
            .collect::<Vec<_>>();

        let _trace = trace_init();
        let _span = tracing::info_span!("fuzz").entered();
        tracing::info!(?ops);
        run_fuzz(ops);
    }
}

fn run_fuzz(ops: Vec<Op>) {
    use std::collections::VecDeque;

    let entries: Vec<_> = (0..ops.len()).map(|i| entry(i as i32)).collect();
    let list = Arc::new(LinkedList::<Entry>::new());
    let mut reference = VecDeque::new();
    let mut cursor = list.new_nonlocking_cursor(None);
    // The payload of the item the cursor last returned.
    let mut cursor_last = None;

    for (i, op) in ops.iter().enumerate() {
        let _span = tracing::info_span!("op", ?i, ?op).entered();
        tracing::info!(?op);
        match op {
            Op::Append => {
                reference.push_back(i as i32);
                list.append(entries[i].clone()).unwrap();
            }
            Op::Unlink(n) => {
                if reference.is_empty() {
                    assert!(list.is_empty());
                    tracing::debug!("skipping unlink; list is empty");
                    continue;
                }

                let idx = n % reference.len();
                let expect = reference.remove(idx).unwrap();
                assert!(list.unlink(&entries[expect as usize]).unwrap());
            }
            Op::CursorNext => {
                let expect = reference
                    .iter()
                    .copied()
                    .find(|&val| Some(val) > cursor_last);
                let next = cursor.next().unwrap().map(|entry| *entry.payload());
                assert_eq!(expect, next);
                if next.is_some() {
                    cursor_last = next;
                }
            }
            Op::CursorRestart => {
                cursor.finished().unwrap();
                assert!(cursor.next().unwrap().is_none(), "finished cursors return nothing");
                cursor = list.new_nonlocking_cursor(None);
                cursor_last = None;
            }
        }
        assert_eq!(list.count_links(), reference.len());
        assert_eq!(collect_vals(&list), reference.iter().copied().collect::<Vec<_>>());
        list.assert_valid();
    }

    drop(cursor);
    list.assert_valid();
    assert_eq!(list.chain().len(), reference.len(), "dropping the cursor releases its link");
}

#[test]
fn filter_trait_objects() {
    let filter: Arc<dyn Filter<i32>> = Arc::new(even);
    let entries = [entry(1), entry(2)];
    let list = Arc::new(list_from_iter(&entries));
    let cursor = list.new_nonlocking_cursor(Some(filter));
    assert!(cursor.filter().is_some());
    assert_eq!(cursor.next().unwrap().map(|entry| *entry.payload()), Some(2));
    assert!(cursor.next().unwrap().is_none());
}
