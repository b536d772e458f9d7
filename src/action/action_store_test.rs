use serde_json::Value;

use super::*;
use crate::component::Action;

fn action(id: ActionIdT, timestamp: f64) -> Action {
    Action {
        action_id: id,
        timestamp,
        config: Value::Null,
    }
}

type ActionIdT = u64;

fn store_with(actions: &[(ActionIdT, f64)]) -> ActionStore {
    let mut store = ActionStore::new();
    for (id, ts) in actions {
        assert!(store.insert(ScheduledAction::new(action(*id, *ts))));
    }
    store
}

#[test]
fn test_insert_keeps_order_sorted() {
    let store = store_with(&[(3, 5.0), (1, 2.0), (2, 2.0)]);
    assert_eq!(store.ids_in_order(), &[1, 2, 3]);
    assert_eq!(store.head().map(|a| a.id()), Some(1));
}

#[test]
fn test_insert_rejects_duplicate_id() {
    let mut store = store_with(&[(1, 2.0)]);
    assert!(!store.insert(ScheduledAction::new(action(1, 9.0))));
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(1).map(|a| a.timestamp()), Some(2.0));
}

#[test]
fn test_merge_keeps_actions_before_cutoff() {
    let mut store = store_with(&[(0, 0.0)]);
    let merge = store.merge_timeline(vec![], 1.0);
    assert!(merge.added.is_empty());
    assert!(merge.withdrawn.is_empty());
    assert!(store.contains(0));
    assert!(!store.get(0).unwrap().to_be_removed);
}

#[test]
fn test_merge_marks_actions_after_cutoff() {
    let mut store = store_with(&[(0, 2.0)]);
    let merge = store.merge_timeline(vec![], 1.0);
    assert_eq!(merge.withdrawn, vec![0]);
    // marked, not removed: its fragments still need rescuing
    assert!(store.get(0).unwrap().to_be_removed);
}

#[test]
fn test_merge_adds_new_actions_after_cutoff() {
    let mut store = ActionStore::new();
    let merge = store.merge_timeline(vec![action(0, 2.0)], 1.0);
    assert_eq!(merge.added, vec![0]);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_merge_keeps_action_in_both() {
    let mut store = store_with(&[(0, 2.0)]);
    store.get_mut(0).unwrap().wildcard = true; // marker to prove identity survives

    let merge = store.merge_timeline(vec![action(0, 2.0)], 1.0);
    assert!(merge.added.is_empty());
    assert!(merge.withdrawn.is_empty());
    assert!(store.get(0).unwrap().wildcard);
}

#[test]
fn test_merge_adds_action_in_middle() {
    let mut store = store_with(&[(1, 3.0)]);
    let merge = store.merge_timeline(vec![action(2, 2.0), action(1, 3.0)], 1.0);
    assert_eq!(merge.added, vec![2]);
    assert_eq!(store.ids_in_order(), &[2, 1]);
}

#[test]
fn test_merge_removes_action_in_middle() {
    let mut store = store_with(&[(2, 2.0), (1, 3.0)]);
    let merge = store.merge_timeline(vec![action(1, 3.0)], 1.0);
    assert_eq!(merge.withdrawn, vec![2]);
    assert_eq!(store.ids_in_order(), &[2, 1]);
}

#[test]
fn test_merge_identity_is_noop() {
    let mut store = store_with(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
    let current = vec![action(1, 1.0), action(2, 2.0), action(3, 3.0)];

    let merge = store.merge_timeline(current, 0.0);
    assert!(merge.added.is_empty());
    assert!(merge.withdrawn.is_empty());
    assert_eq!(merge.duplicates, 0);
    assert_eq!(store.ids_in_order(), &[1, 2, 3]);
    assert!(store.ids_in_order().iter().all(|id| !store
        .get(*id)
        .unwrap()
        .to_be_removed));
}

#[test]
fn test_merge_discards_duplicate_ids() {
    let mut store = ActionStore::new();
    let merge = store.merge_timeline(vec![action(1, 2.0), action(1, 3.0)], 0.0);
    assert_eq!(merge.duplicates, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn test_merge_skips_stale_new_actions() {
    let mut store = ActionStore::new();
    let merge = store.merge_timeline(vec![action(1, 0.5), action(2, 2.0)], 1.0);
    assert_eq!(merge.added, vec![2]);
    assert!(!store.contains(1));
}

#[test]
fn test_merge_keeps_in_flight_head_on_disagreement() {
    let mut store = store_with(&[(1, 5.0)]);
    // model re-lists the same id with a different timestamp
    let merge = store.merge_timeline(vec![action(1, 7.0)], 1.0);
    assert!(merge.added.is_empty());
    assert_eq!(store.get(1).unwrap().timestamp(), 5.0);
}

#[test]
fn test_remove_drops_from_order() {
    let mut store = store_with(&[(1, 1.0), (2, 2.0)]);
    assert!(store.remove(1).is_some());
    assert_eq!(store.ids_in_order(), &[2]);
    assert!(store.remove(1).is_none());
}
