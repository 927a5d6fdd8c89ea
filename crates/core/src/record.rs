use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Source-native creation time: whole seconds since the Unix epoch.
pub type Timestamp = i64;

/// One externally sourced item, keyed by the identity the source assigns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable external identity (e.g. a reddit post id).
    pub id: String,
    /// Creation time in source-native seconds.
    pub created: Timestamp,
    /// The item exactly as the source emitted it.
    pub payload: serde_json::Value,
}

impl Record {
    pub fn new(id: impl Into<String>, created: Timestamp, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            created,
            payload,
        }
    }
}

/// Newest creation time in a batch, or `None` for an empty batch.
pub fn max_created(records: &[Record]) -> Option<Timestamp> {
    records.iter().map(|r| r.created).max()
}

/// Keep only records strictly newer than `watermark`.
///
/// A record created exactly at the watermark was already persisted by an
/// earlier cycle and is dropped.
pub fn newer_than(records: Vec<Record>, watermark: Timestamp) -> Vec<Record> {
    records.into_iter().filter(|r| r.created > watermark).collect()
}

/// Drop repeated ids, keeping the first occurrence of each.
///
/// Pages arrive newest-first, so the first copy is the one the source
/// served most recently.
pub fn dedup_by_id(records: Vec<Record>) -> Vec<Record> {
    let mut seen = HashSet::with_capacity(records.len());
    records
        .into_iter()
        .filter(|r| seen.insert(r.id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, created: Timestamp) -> Record {
        Record::new(id, created, serde_json::json!({ "id": id }))
    }

    #[test]
    fn max_created_of_empty_is_none() {
        assert_eq!(max_created(&[]), None);
    }

    #[test]
    fn max_created_picks_newest() {
        let batch = vec![rec("a", 10), rec("b", 30), rec("c", 20)];
        assert_eq!(max_created(&batch), Some(30));
    }

    #[test]
    fn dedup_keeps_first_copy_in_order() {
        let mut later = rec("b", 25);
        later.payload = serde_json::json!({ "id": "b", "edited": true });
        let batch = vec![rec("a", 30), rec("b", 25), later, rec("c", 22)];

        let kept = dedup_by_id(batch);

        let ids: Vec<&str> = kept.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert_eq!(kept[1].payload, serde_json::json!({ "id": "b" }));
    }

    #[test]
    fn newer_than_is_strict() {
        let batch = vec![rec("a", 19), rec("b", 20), rec("c", 21)];
        let kept = newer_than(batch, 20);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "c");
    }
}
