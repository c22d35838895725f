//! Pending field edits
//!
//! A [`PendingEdit`] accumulates field updates for one entity between
//! flushes. Merging is field-wise last-write-wins.

use crate::id::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Value of one profile field, already sanitized
pub type FieldValue = serde_json::Value;

/// Field -> latest value, accumulated since the last flush
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PendingEdit {
    fields: BTreeMap<String, FieldValue>,
}

impl PendingEdit {
    /// Create empty edit
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Edit touching a single field
    #[must_use]
    pub fn single(field: impl Into<String>, value: FieldValue) -> Self {
        let mut edit = Self::new();
        edit.set(field, value);
        edit
    }

    /// Set one field, replacing any earlier value
    #[inline]
    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }

    /// Builder form of [`PendingEdit::set`]
    #[inline]
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.set(field, value);
        self
    }

    /// Fold a newer edit into this one; fields in `newer` win
    pub fn merge(&mut self, newer: PendingEdit) {
        self.fields.extend(newer.fields);
    }

    /// Fold an older edit back in without overriding anything present
    ///
    /// Used when a write fails: the unsent snapshot is older than whatever
    /// accumulated while it was in flight.
    pub fn absorb_older(&mut self, older: PendingEdit) {
        for (field, value) in older.fields {
            self.fields.entry(field).or_insert(value);
        }
    }

    /// Move all fields out, leaving this edit empty
    #[inline]
    #[must_use]
    pub fn take(&mut self) -> PendingEdit {
        std::mem::take(self)
    }

    /// Value of one field
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Number of fields touched
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Nothing to flush
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Render as a JSON object
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for PendingEdit {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Acknowledgement of a successful profile write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    /// Entity that was written
    pub entity: EntityId,
    /// Store-assigned revision, if the store versions profiles
    pub revision: Option<String>,
}

impl WriteAck {
    /// Ack without revision
    #[inline]
    #[must_use]
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            revision: None,
        }
    }

    /// With revision
    #[inline]
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn merge_is_last_write_wins() {
        let mut edit = PendingEdit::single("bio", json!("a")).with("name", json!("Ada"));
        edit.merge(PendingEdit::single("bio", json!("ab")));

        assert_eq!(edit.len(), 2);
        assert_eq!(edit.get("bio"), Some(&json!("ab")));
        assert_eq!(edit.get("name"), Some(&json!("Ada")));
    }

    #[test]
    fn absorb_older_keeps_newer_values() {
        let mut newer = PendingEdit::single("bio", json!("new"));
        newer.absorb_older(PendingEdit::single("bio", json!("old")).with("city", json!("Oslo")));

        assert_eq!(newer.get("bio"), Some(&json!("new")));
        assert_eq!(newer.get("city"), Some(&json!("Oslo")));
    }

    #[test]
    fn take_leaves_empty() {
        let mut edit = PendingEdit::single("bio", json!("x"));
        let taken = edit.take();
        assert!(edit.is_empty());
        assert_eq!(taken.len(), 1);
    }

    #[test]
    fn serializes_as_plain_object() {
        let edit = PendingEdit::single("bio", json!("x")).with("age", json!(3));
        assert_eq!(serde_json::to_value(&edit).unwrap(), json!({"age": 3, "bio": "x"}));
        assert_eq!(edit.to_json(), json!({"age": 3, "bio": "x"}));
    }

    fn arb_edit() -> impl Strategy<Value = PendingEdit> {
        proptest::collection::btree_map("[a-d]", 0i64..5, 0..4).prop_map(|m| {
            m.into_iter()
                .map(|(k, v)| (k, json!(v)))
                .collect::<PendingEdit>()
        })
    }

    proptest! {
        #[test]
        fn merge_covers_union_and_prefers_newer(older in arb_edit(), newer in arb_edit()) {
            let mut merged = older.clone();
            merged.merge(newer.clone());

            for (field, value) in newer.iter() {
                prop_assert_eq!(merged.get(field), Some(value));
            }
            for (field, value) in older.iter() {
                if newer.get(field).is_none() {
                    prop_assert_eq!(merged.get(field), Some(value));
                }
            }
        }

        #[test]
        fn absorb_older_matches_merge_in_reverse(older in arb_edit(), newer in arb_edit()) {
            let mut absorbed = newer.clone();
            absorbed.absorb_older(older.clone());

            let mut merged = older;
            merged.merge(newer);
            prop_assert_eq!(absorbed, merged);
        }
    }
}
