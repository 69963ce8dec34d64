//! Key-scoped conflation of one window's operations
//!
//! Rules, per row key:
//! - Add/Update only: the latest operation wins.
//! - Latest is Remove and the window introduced the key (an Add, with the
//!   key absent from the snapshot): the operations cancel out.
//! - Latest is Remove otherwise: the Remove wins.
//!
//! The result keeps keys in first-seen order and is capped at
//! `max_batch_size`; keys past the cap are dropped for this window and
//! picked up again by later windows.

use std::collections::HashMap;

use crate::types::{extract_key, KeyedOperation, RowKey, UpdateKind, UpdateOperation};

/// Result of conflating one window
#[derive(Debug, Clone, Default)]
pub struct ConflationOutcome {
    /// Net operations to apply, one per key
    pub operations: Vec<KeyedOperation>,
    /// Operations drained from the window, malformed ones included
    pub received: usize,
    /// Operations dropped for lacking a usable key
    pub failed: usize,
    /// Keys whose Add/Remove pair cancelled out
    pub cancelled: usize,
    /// Net operations cut by the batch cap
    pub truncated: usize,
}

impl ConflationOutcome {
    pub fn applied(&self) -> usize {
        self.operations.len()
    }

    /// Well-formed operations that did not survive as an applied operation
    pub fn conflated(&self) -> usize {
        self.received - self.failed - self.applied()
    }
}

struct KeyGroup {
    key: RowKey,
    operations: Vec<UpdateOperation>,
}

/// Collapse `operations` to at most one net operation per key.
///
/// `in_snapshot` reports whether a key is present in the current snapshot.
pub fn conflate<F>(
    operations: Vec<UpdateOperation>,
    key_field: &str,
    max_batch_size: usize,
    in_snapshot: F,
) -> ConflationOutcome
where
    F: Fn(&str) -> bool,
{
    let mut outcome = ConflationOutcome {
        received: operations.len(),
        ..Default::default()
    };

    let mut index: HashMap<RowKey, usize> = HashMap::new();
    let mut groups: Vec<KeyGroup> = Vec::new();

    for operation in operations {
        let Some(key) = extract_key(&operation.row, key_field) else {
            outcome.failed += 1;
            continue;
        };
        match index.get(&key) {
            Some(&slot) => groups[slot].operations.push(operation),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push(KeyGroup {
                    key,
                    operations: vec![operation],
                });
            }
        }
    }

    for group in groups {
        match net_operation(group, &in_snapshot) {
            Some(keyed) => outcome.operations.push(keyed),
            None => outcome.cancelled += 1,
        }
    }

    if outcome.operations.len() > max_batch_size {
        outcome.truncated = outcome.operations.len() - max_batch_size;
        outcome.operations.truncate(max_batch_size);
    }

    outcome
}

fn net_operation<F>(mut group: KeyGroup, in_snapshot: &F) -> Option<KeyedOperation>
where
    F: Fn(&str) -> bool,
{
    // Stable: equal timestamps keep arrival order
    group.operations.sort_by_key(|op| op.received_at);

    let introduced = group
        .operations
        .iter()
        .any(|op| op.kind == UpdateKind::Add);
    let last = group.operations.pop()?;

    if last.kind == UpdateKind::Remove && introduced && !in_snapshot(&group.key) {
        return None;
    }

    Some(KeyedOperation {
        key: group.key,
        operation: last,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::row_from_value;
    use serde_json::{json, Value};

    fn op(id: &str, value: i64, kind: UpdateKind, at: i64) -> UpdateOperation {
        UpdateOperation::at(
            row_from_value(json!({ "id": id, "px": value })).unwrap(),
            kind,
            at,
        )
    }

    fn absent(_: &str) -> bool {
        false
    }

    #[test]
    fn test_latest_update_wins() {
        let ops = vec![
            op("k1", 1, UpdateKind::Update, 0),
            op("k1", 2, UpdateKind::Update, 10),
            op("k1", 3, UpdateKind::Update, 20),
        ];
        let outcome = conflate(ops, "id", 100, absent);

        assert_eq!(outcome.applied(), 1);
        assert_eq!(outcome.conflated(), 2);
        assert_eq!(outcome.operations[0].operation.row["px"], Value::from(3));
    }

    #[test]
    fn test_add_then_remove_cancels() {
        let ops = vec![
            op("k1", 1, UpdateKind::Add, 0),
            op("k1", 1, UpdateKind::Remove, 5),
        ];
        let outcome = conflate(ops, "id", 100, absent);

        assert!(outcome.operations.is_empty());
        assert_eq!(outcome.cancelled, 1);
        assert_eq!(outcome.conflated(), 2);
    }

    #[test]
    fn test_add_then_remove_of_existing_key_removes() {
        let ops = vec![
            op("k1", 1, UpdateKind::Add, 0),
            op("k1", 1, UpdateKind::Remove, 5),
        ];
        let outcome = conflate(ops, "id", 100, |k| k == "k1");

        assert_eq!(outcome.applied(), 1);
        assert_eq!(outcome.operations[0].kind(), UpdateKind::Remove);
    }

    #[test]
    fn test_update_then_remove_removes() {
        let ops = vec![
            op("k1", 1, UpdateKind::Update, 0),
            op("k1", 2, UpdateKind::Update, 10),
            op("k1", 2, UpdateKind::Remove, 20),
        ];
        let outcome = conflate(ops, "id", 100, absent);

        assert_eq!(outcome.applied(), 1);
        assert_eq!(outcome.operations[0].kind(), UpdateKind::Remove);
        assert_eq!(outcome.conflated(), 2);
    }

    #[test]
    fn test_remove_then_add_keeps_add() {
        let ops = vec![
            op("k1", 1, UpdateKind::Remove, 0),
            op("k1", 9, UpdateKind::Add, 10),
        ];
        let outcome = conflate(ops, "id", 100, |_| true);

        assert_eq!(outcome.applied(), 1);
        assert_eq!(outcome.operations[0].kind(), UpdateKind::Add);
    }

    #[test]
    fn test_keys_keep_first_seen_order() {
        let ops = vec![
            op("b", 1, UpdateKind::Update, 0),
            op("a", 1, UpdateKind::Update, 1),
            op("b", 2, UpdateKind::Update, 2),
            op("c", 1, UpdateKind::Update, 3),
        ];
        let outcome = conflate(ops, "id", 100, absent);
        let keys: Vec<&str> = outcome.operations.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_batch_cap_truncates() {
        let ops: Vec<UpdateOperation> = (0..10)
            .map(|i| op(&format!("k{}", i), i, UpdateKind::Update, i))
            .collect();
        let outcome = conflate(ops, "id", 4, absent);

        assert_eq!(outcome.applied(), 4);
        assert_eq!(outcome.truncated, 6);
        assert_eq!(outcome.operations[0].key, "k0");
        assert_eq!(outcome.operations[3].key, "k3");
    }

    #[test]
    fn test_malformed_operations_counted() {
        let ops = vec![
            UpdateOperation::at(
                row_from_value(json!({ "px": 1 })).unwrap(),
                UpdateKind::Update,
                0,
            ),
            op("k1", 1, UpdateKind::Update, 1),
        ];
        let outcome = conflate(ops, "id", 100, absent);

        assert_eq!(outcome.received, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.applied(), 1);
        assert_eq!(outcome.conflated(), 0);
    }

    #[test]
    fn test_out_of_order_timestamps_pick_latest() {
        let ops = vec![
            op("k1", 2, UpdateKind::Update, 20),
            op("k1", 1, UpdateKind::Update, 10),
        ];
        let outcome = conflate(ops, "id", 100, absent);
        assert_eq!(outcome.operations[0].operation.row["px"], Value::from(2));
    }
}
