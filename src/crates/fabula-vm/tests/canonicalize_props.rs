//! Property tests for event canonicalization and replay equivalence.
//!
//! Random mutation sequences are executed through a watched graph; the
//! captured buffer must (a) canonicalize idempotently, and (b) replay to
//! the same state-hash whether raw or canonicalized.

use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

use fabula_core::graph::{Graph, GraphItem, Node};
use fabula_vm::{Event, WatchedGraph};

/// Fixed uid pool so create/delete/create sequences hit the same identity.
fn slot_uid(slot: u8) -> Uuid {
    Uuid::from_u128(0x5000 + slot as u128)
}

#[derive(Debug, Clone)]
enum Op {
    Insert(u8),
    Remove(u8),
    SetLabel(u8, String),
    SetLocal(u8, u8, i64),
    RemoveLocal(u8, u8),
    AddTag(u8, u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..4).prop_map(Op::Insert),
        (0u8..4).prop_map(Op::Remove),
        ((0u8..4), "[a-z]{1,6}").prop_map(|(s, l)| Op::SetLabel(s, l)),
        ((0u8..4), (0u8..3), -5i64..5).prop_map(|(s, k, v)| Op::SetLocal(s, k, v)),
        ((0u8..4), (0u8..3)).prop_map(|(s, k)| Op::RemoveLocal(s, k)),
        ((0u8..4), (0u8..3)).prop_map(|(s, t)| Op::AddTag(s, t)),
    ]
}

fn baseline() -> Graph {
    let mut graph = Graph::with_uid(Uuid::from_u128(0x9000), Some("baseline".into()));
    // Slots 0 and 1 pre-exist; 2 and 3 start absent.
    for slot in 0..2u8 {
        graph
            .add(GraphItem::Node(Node::with_uid(
                slot_uid(slot),
                Some(format!("slot{slot}")),
            )))
            .unwrap();
    }
    graph
}

/// Execute ops against a watched copy of the baseline, skipping ops that
/// are invalid in the current state, and return the captured events.
fn run_ops(ops: &[Op]) -> Vec<Event> {
    let mut wg = WatchedGraph::new(baseline(), true);
    for op in ops {
        match op {
            Op::Insert(slot) => {
                if !wg.graph().contains(&slot_uid(*slot)) {
                    wg.insert(GraphItem::Node(Node::with_uid(
                        slot_uid(*slot),
                        Some(format!("slot{slot}")),
                    )))
                    .unwrap();
                }
            }
            Op::Remove(slot) => {
                wg.remove(slot_uid(*slot));
            }
            Op::SetLabel(slot, label) => {
                if wg.graph().contains(&slot_uid(*slot)) {
                    wg.set_attr(slot_uid(*slot), "label", json!(label)).unwrap();
                }
            }
            Op::SetLocal(slot, key, value) => {
                if wg.graph().contains(&slot_uid(*slot)) {
                    wg.set_local(slot_uid(*slot), &format!("k{key}"), json!(value))
                        .unwrap();
                }
            }
            Op::RemoveLocal(slot, key) => {
                if wg.graph().contains(&slot_uid(*slot)) {
                    wg.remove_local(slot_uid(*slot), &format!("k{key}")).unwrap();
                }
            }
            Op::AddTag(slot, tag) => {
                if wg.graph().contains(&slot_uid(*slot)) {
                    wg.add_tag(slot_uid(*slot), &format!("t{tag}")).unwrap();
                }
            }
        }
    }
    let (_, events) = wg.into_parts();
    events
}

proptest! {
    #[test]
    fn canonicalization_is_idempotent(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let events = run_ops(&ops);
        let once = Event::canonicalize_events(&events);
        let twice = Event::canonicalize_events(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn canonical_replay_matches_raw_replay(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let events = run_ops(&ops);
        let raw = Event::apply_all(&events, &baseline()).unwrap();
        let canonical = Event::apply_all(&Event::canonicalize_events(&events), &baseline()).unwrap();
        prop_assert_eq!(raw.state_hash(), canonical.state_hash());
    }

    #[test]
    fn canonical_form_never_grows(ops in proptest::collection::vec(op_strategy(), 0..40)) {
        let events = run_ops(&ops);
        let canonical = Event::canonicalize_events(&events);
        prop_assert!(canonical.len() <= events.len());
    }
}
