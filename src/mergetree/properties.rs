//! Segment properties and annotate conflict resolution
//!
//! Annotations are key-value metadata attached to ranges. Each key resolves
//! independently through a [`PropertyMerge`] policy; the default is
//! last-writer-wins in sequence order, with a JSON `null` deleting the key.
//!
//! A local annotate is applied optimistically but will be sequenced after
//! every remote op this replica receives in the meantime, so remote
//! annotates must not overwrite a key that has a pending local annotate.
//! For those keys the segment tracks the value the sequenced history alone
//! would produce, which lets acknowledgement and rollback settle on the
//! converged value.

use serde_json::Value;
use std::collections::HashMap;

/// Key-value metadata attached to a segment
pub type PropertySet = serde_json::Map<String, Value>;

/// Per-key conflict policy for annotates
///
/// Implementations must be deterministic: every replica calls `merge` with
/// the same arguments in the same sequence order.
pub trait PropertyMerge: std::fmt::Debug + Send + Sync {
    /// Combine `incoming` with the `current` value of `key`; `None` removes it
    fn merge(&self, key: &str, current: Option<&Value>, incoming: &Value) -> Option<Value>;
}

/// Default policy: the later write replaces the value, `null` deletes
#[derive(Debug, Default, Clone, Copy)]
pub struct LastWriterWins;

impl PropertyMerge for LastWriterWins {
    fn merge(&self, _key: &str, _current: Option<&Value>, incoming: &Value) -> Option<Value> {
        if incoming.is_null() {
            None
        } else {
            Some(incoming.clone())
        }
    }
}

/// Values a key held before a local annotate, used for rollback
pub type PriorValues = HashMap<String, Option<Value>>;

/// Bookkeeping for a key with unacknowledged local annotates
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingProperty {
    /// Number of pending local annotates touching the key
    count: u32,

    /// Value produced by sequenced annotates alone
    sequenced: Option<Value>,
}

/// Properties of one segment together with pending-annotate tracking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    values: PropertySet,
    pending: HashMap<String, PendingProperty>,
}

impl Properties {
    /// Wrap an initial property set
    pub fn from_set(values: PropertySet) -> Self {
        Self {
            values,
            pending: HashMap::new(),
        }
    }

    /// Current (optimistic) values
    pub fn values(&self) -> &PropertySet {
        &self.values
    }

    /// Whether any key still waits for a local annotate's acknowledgement
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Values as established by sequenced annotates alone
    pub fn sequenced_values(&self) -> PropertySet {
        let mut values = self.values.clone();
        for (key, entry) in &self.pending {
            match &entry.sequenced {
                Some(value) => {
                    values.insert(key.clone(), value.clone());
                }
                None => {
                    values.remove(key);
                }
            }
        }
        values
    }

    fn put(&mut self, key: &str, value: Option<Value>) {
        match value {
            Some(value) => {
                self.values.insert(key.to_string(), value);
            }
            None => {
                self.values.remove(key);
            }
        }
    }

    /// Apply a local annotate, returning the previous values for rollback
    pub(crate) fn apply_local(&mut self, set: &PropertySet, merger: &dyn PropertyMerge) -> PriorValues {
        let mut prior = PriorValues::with_capacity(set.len());
        for (key, incoming) in set {
            let current = self.values.get(key).cloned();
            let entry = self
                .pending
                .entry(key.clone())
                .or_insert_with(|| PendingProperty {
                    count: 0,
                    sequenced: current.clone(),
                });
            entry.count += 1;

            let merged = merger.merge(key, current.as_ref(), incoming);
            prior.insert(key.clone(), current);
            self.put(key, merged);
        }
        prior
    }

    /// Apply a sequenced annotate from another client
    pub(crate) fn apply_remote(&mut self, set: &PropertySet, merger: &dyn PropertyMerge) {
        for (key, incoming) in set {
            match self.pending.get_mut(key) {
                Some(entry) => {
                    entry.sequenced = merger.merge(key, entry.sequenced.as_ref(), incoming);
                }
                None => {
                    let merged = merger.merge(key, self.values.get(key), incoming);
                    self.put(key, merged);
                }
            }
        }
    }

    /// Acknowledge a local annotate: it is now part of the sequenced history
    pub(crate) fn ack(&mut self, set: &PropertySet, merger: &dyn PropertyMerge) {
        for (key, incoming) in set {
            let Some(entry) = self.pending.get_mut(key) else {
                continue;
            };
            entry.sequenced = merger.merge(key, entry.sequenced.as_ref(), incoming);
            entry.count -= 1;
            if entry.count == 0 {
                let settled = entry.sequenced.take();
                self.pending.remove(key);
                self.put(key, settled);
            }
        }
    }

    /// Undo the most recent local annotate on these keys
    pub(crate) fn rollback(&mut self, set: &PropertySet, prior: &PriorValues) {
        for key in set.keys() {
            let Some(entry) = self.pending.get_mut(key) else {
                continue;
            };
            entry.count -= 1;
            if entry.count == 0 {
                let settled = entry.sequenced.take();
                self.pending.remove(key);
                self.put(key, settled);
            } else {
                let restored = prior.get(key).cloned().flatten();
                self.put(key, restored);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(pairs: &[(&str, Value)]) -> PropertySet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_last_writer_wins() {
        let mut props = Properties::default();
        props.apply_remote(&set(&[("bold", json!(true))]), &LastWriterWins);
        props.apply_remote(&set(&[("bold", json!(false))]), &LastWriterWins);

        assert_eq!(props.values().get("bold"), Some(&json!(false)));
    }

    #[test]
    fn test_null_deletes() {
        let mut props = Properties::from_set(set(&[("color", json!("red"))]));
        props.apply_remote(&set(&[("color", Value::Null)]), &LastWriterWins);

        assert!(props.values().is_empty());
    }

    #[test]
    fn test_pending_local_shields_remote() {
        let mut props = Properties::default();
        let local = set(&[("color", json!("blue"))]);
        props.apply_local(&local, &LastWriterWins);

        props.apply_remote(&set(&[("color", json!("red"))]), &LastWriterWins);
        assert_eq!(props.values().get("color"), Some(&json!("blue")));

        props.ack(&local, &LastWriterWins);
        assert_eq!(props.values().get("color"), Some(&json!("blue")));
        assert!(!props.has_pending());
    }

    #[test]
    fn test_rollback_restores_sequenced_value() {
        let mut props = Properties::from_set(set(&[("color", json!("green"))]));
        let local = set(&[("color", json!("blue"))]);
        let prior = props.apply_local(&local, &LastWriterWins);

        props.apply_remote(&set(&[("color", json!("red"))]), &LastWriterWins);
        props.rollback(&local, &prior);

        assert_eq!(props.values().get("color"), Some(&json!("red")));
        assert!(!props.has_pending());
    }

    #[test]
    fn test_rollback_of_stacked_local_annotates() {
        let mut props = Properties::default();
        let first = set(&[("size", json!(10))]);
        let second = set(&[("size", json!(12))]);

        props.apply_local(&first, &LastWriterWins);
        let prior = props.apply_local(&second, &LastWriterWins);
        props.rollback(&second, &prior);
        assert_eq!(props.values().get("size"), Some(&json!(10)));

        props.ack(&first, &LastWriterWins);
        assert_eq!(props.values().get("size"), Some(&json!(10)));
        assert!(!props.has_pending());
    }

    #[test]
    fn test_sequenced_values_hide_pending() {
        let mut props = Properties::from_set(set(&[("color", json!("green"))]));
        props.apply_local(&set(&[("color", json!("blue")), ("bold", json!(true))]), &LastWriterWins);

        let sequenced = props.sequenced_values();
        assert_eq!(sequenced.get("color"), Some(&json!("green")));
        assert!(!sequenced.contains_key("bold"));
    }
}
