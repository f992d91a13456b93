use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// One recorded write to a state key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Position in the state's global write sequence.
    pub sequence: u64,
    pub value: Value,
}

/// Value store carried through a workflow execution
///
/// Every write is also appended to the written key's history, tagged with
/// a monotone per-state sequence number. Nodes read and write the state
/// in place; the graph engine never copies it between steps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    values: HashMap<String, Value>,
    history: HashMap<String, Vec<HistoryEntry>>,
    sequence: u64,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value, recording it in the key's history.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.sequence += 1;
        self.history.entry(key.clone()).or_default().push(HistoryEntry {
            sequence: self.sequence,
            value: value.clone(),
        });
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Get with a default for absent keys.
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.values.get(key).cloned().unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Remove the current value; the key's history is retained.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Deep copy of the state at this moment.
    pub fn snapshot(&self) -> WorkflowState {
        self.clone()
    }

    /// All recorded writes for a key, oldest first.
    pub fn history(&self, key: &str) -> &[HistoryEntry] {
        self.history.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge another state into this one: values are overwritten
    /// point-wise, histories are concatenated with the merged side's
    /// sequence numbers shifted past this state's counter.
    pub fn merge(&mut self, other: WorkflowState) {
        let offset = self.sequence;
        for (key, entries) in other.history {
            let shifted = entries.into_iter().map(|entry| HistoryEntry {
                sequence: entry.sequence + offset,
                value: entry.value,
            });
            self.history.entry(key).or_default().extend(shifted);
        }
        for (key, value) in other.values {
            self.values.insert(key, value);
        }
        self.sequence += other.sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_accumulate_per_key_history() {
        let mut state = WorkflowState::new();
        state.set("count", json!(1));
        state.set("count", json!(2));
        state.set("other", json!("x"));

        assert_eq!(state.get("count"), Some(&json!(2)));
        let history = state.history("count");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value, json!(1));
        assert!(history[0].sequence < history[1].sequence);
        assert_eq!(state.history("missing").len(), 0);
    }

    #[test]
    fn get_or_and_remove() {
        let mut state = WorkflowState::new();
        state.set("present", json!("yes"));

        assert_eq!(state.get_or("present", json!("no")), json!("yes"));
        assert_eq!(state.get_or("absent", json!("no")), json!("no"));
        assert!(state.has("present"));

        assert_eq!(state.remove("present"), Some(json!("yes")));
        assert!(!state.has("present"));
        // History survives removal.
        assert_eq!(state.history("present").len(), 1);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let mut state = WorkflowState::new();
        state.set("k", json!("before"));
        let snapshot = state.snapshot();
        let frozen = serde_json::to_string(&snapshot).unwrap();

        state.set("k", json!("after"));
        state.set("new", json!(1));

        assert_eq!(serde_json::to_string(&snapshot).unwrap(), frozen);
        assert_eq!(snapshot.get("k"), Some(&json!("before")));
    }

    #[test]
    fn merge_overwrites_values_and_shifts_history() {
        let mut left = WorkflowState::new();
        left.set("shared", json!("left-1"));
        left.set("left-only", json!(true));

        let mut right = WorkflowState::new();
        right.set("shared", json!("right-1"));
        right.set("shared", json!("right-2"));

        left.merge(right);

        assert_eq!(left.get("shared"), Some(&json!("right-2")));
        assert_eq!(left.get("left-only"), Some(&json!(true)));

        let history = left.history("shared");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].value, json!("left-1"));
        assert_eq!(history[1].value, json!("right-1"));
        assert_eq!(history[2].value, json!("right-2"));
        // Shifted sequences keep the merged side strictly after the base.
        assert!(history[0].sequence < history[1].sequence);
        assert!(history[1].sequence < history[2].sequence);
    }
}
