//! Property-based tests for the file ledger and the status file codec

use proptest::prelude::*;
use r66_client::SpecialId;
use r66_spool::status_file::{decode, encode};
use r66_spool::{FileItem, FileLedger, FileState};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

fn file_state() -> impl Strategy<Value = FileState> {
    prop_oneof![
        Just(FileState::Seen),
        Just(FileState::Stable),
        Just(FileState::InFlight),
        Just(FileState::DoneOk),
        Just(FileState::DoneErr),
    ]
}

fn file_item() -> impl Strategy<Value = FileItem> {
    (
        "[a-z]{1,8}(/[a-z0-9_.]{1,12}){1,3}",
        any::<u64>(),
        any::<i64>(),
        proptest::option::of(any::<[u8; 16]>()),
        any::<i64>(),
        file_state(),
        any::<bool>(),
        proptest::option::of(any::<i64>()),
        any::<u64>(),
    )
        .prop_map(
            |(path, size, mtime, hash, id, state, used, last_dispatch_at, stable_seq)| FileItem {
                path: PathBuf::from(format!("/{path}")),
                size,
                mtime,
                hash,
                special_id: SpecialId::new(id),
                state,
                used,
                last_dispatch_at,
                stable_seq,
            },
        )
}

/// One step applied to a ledger
#[derive(Debug, Clone)]
enum Op {
    /// Observe file `index` with a (small) size and mtime
    Touch(usize, u64, i64),
    /// Hand stable items out
    TakeReady(usize),
    /// Settle the n-th item in flight
    Settle(usize, bool),
    /// End of cycle
    Sweep,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0..4usize, 0..3u64, 0..3i64).prop_map(|(i, s, m)| Op::Touch(i, s, m)),
        2 => (1..4usize).prop_map(Op::TakeReady),
        2 => (0..4usize, any::<bool>()).prop_map(|(n, ok)| Op::Settle(n, ok)),
        1 => Just(Op::Sweep),
    ]
}

fn path_of(index: usize) -> PathBuf {
    PathBuf::from(format!("/spool/in/file{index}"))
}

proptest! {
    #[test]
    fn prop_status_file_roundtrip(items in proptest::collection::vec(file_item(), 0..20)) {
        let bytes = encode(&items).unwrap();
        let decoded = decode(&bytes).unwrap();
        prop_assert_eq!(decoded.items, items);
        prop_assert_eq!(decoded.dropped_bytes, 0);
    }

    #[test]
    fn prop_truncated_status_file_keeps_a_prefix(
        items in proptest::collection::vec(file_item(), 1..10),
        cut in any::<prop::sample::Index>(),
    ) {
        let bytes = encode(&items).unwrap();
        let header = 10;
        let len = header + cut.index(bytes.len() - header + 1);
        let decoded = decode(&bytes[..len]).unwrap();

        prop_assert!(decoded.items.len() <= items.len());
        prop_assert_eq!(&decoded.items[..], &items[..decoded.items.len()]);
        if len < bytes.len() {
            prop_assert!(decoded.items.len() < items.len());
        }
    }

    /// Items are dispatched only after two identical consecutive
    /// observations, and a path is never in flight twice.
    #[test]
    fn prop_stability_gate_and_single_flight(ops in proptest::collection::vec(op(), 1..80)) {
        let mut ledger = FileLedger::new();
        let mut history: HashMap<PathBuf, Vec<(u64, i64)>> = HashMap::new();
        let mut in_flight: Vec<PathBuf> = Vec::new();
        let mut now = 0;

        for op in ops {
            match op {
                Op::Touch(index, size, mtime) => {
                    let path = path_of(index);
                    ledger.touch(&path, size, mtime);
                    history.entry(path).or_default().push((size, mtime));
                }
                Op::TakeReady(limit) => {
                    now += 1;
                    let taken = ledger.take_ready(limit, now);
                    prop_assert!(taken.len() <= limit);
                    for item in taken {
                        let seen = &history[&item.path];
                        prop_assert!(seen.len() >= 2);
                        let last = seen[seen.len() - 1];
                        prop_assert_eq!(last, seen[seen.len() - 2]);
                        prop_assert_eq!(last, (item.size, item.mtime));

                        prop_assert!(!in_flight.contains(&item.path));
                        prop_assert_eq!(item.state, FileState::InFlight);
                        in_flight.push(item.path);
                    }
                }
                Op::Settle(n, delivered) => {
                    if !in_flight.is_empty() {
                        let path = in_flight.remove(n % in_flight.len());
                        prop_assert!(ledger.settle(&path, delivered, SpecialId::new(7)));
                        let expected = if delivered { FileState::DoneOk } else { FileState::DoneErr };
                        prop_assert_eq!(ledger.get(&path).map(|i| i.state), Some(expected));
                    }
                }
                Op::Sweep => {
                    for path in ledger.sweep() {
                        prop_assert!(!in_flight.contains(&path));
                        history.remove(&path);
                    }
                }
            }

            let counts = ledger.state_counts();
            prop_assert_eq!(counts.in_flight, in_flight.len());
            let unique: HashSet<&PathBuf> = in_flight.iter().collect();
            prop_assert_eq!(unique.len(), in_flight.len());
        }
    }

    /// A settled item whose content changes is offered again after two more
    /// identical observations.
    #[test]
    fn prop_changed_file_is_rearmed(delivered in any::<bool>(), size in 1..1000u64) {
        let path = path_of(0);
        let mut ledger = FileLedger::new();
        ledger.touch(&path, size, 1);
        ledger.touch(&path, size, 1);
        let taken = ledger.take_ready(1, 0);
        prop_assert_eq!(taken.len(), 1);
        ledger.settle(&path, delivered, SpecialId::new(1));
        ledger.sweep();

        ledger.touch(&path, size, 1);
        prop_assert!(ledger.take_ready(1, 1).is_empty());
        ledger.sweep();

        ledger.touch(&path, size + 1, 2);
        prop_assert_eq!(ledger.get(&path).map(|i| i.state), Some(FileState::Seen));
        prop_assert!(ledger.take_ready(1, 2).is_empty());
        ledger.sweep();

        ledger.touch(&path, size + 1, 2);
        prop_assert_eq!(ledger.take_ready(1, 3).len(), 1);
    }
}
