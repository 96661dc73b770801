//! Structured old/new diffs for governed entities.
//!
//! A diff maps top-level field names to either a single old/new pair or, for
//! nested collections (pricing components, earnings policy), a map of
//! per-item pairs. Scalar fields appear only when they change; nested
//! collections always list every item so approvers see the full picture.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors produced while building or applying a diff.
#[derive(Debug, Error, PartialEq)]
pub enum DiffError {
    #[error("field {field} changed since the diff was computed")]
    Conflict {
        field: String,
        expected: Value,
        found: Value,
    },

    #[error("entity does not serialize to an object")]
    NotAnObject,

    #[error("diff serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DiffError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A single old/new value pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

impl FieldChange {
    pub fn new(old: Value, new: Value) -> Self {
        Self { old, new }
    }

    pub fn is_change(&self) -> bool {
        self.old != self.new
    }
}

/// One entry of a [`ChangeDiff`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffNode {
    Field(FieldChange),
    Nested { items: BTreeMap<String, FieldChange> },
}

impl DiffNode {
    pub fn is_change(&self) -> bool {
        match self {
            Self::Field(change) => change.is_change(),
            Self::Nested { items } => items.values().any(FieldChange::is_change),
        }
    }
}

/// Field name → change mapping describing a proposed mutation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeDiff {
    fields: BTreeMap<String, DiffNode>,
}

impl ChangeDiff {
    pub fn builder() -> DiffBuilder {
        DiffBuilder::default()
    }

    pub fn fields(&self) -> &BTreeMap<String, DiffNode> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&DiffNode> {
        self.fields.get(field)
    }

    /// Per-item changes of a nested collection.
    pub fn nested(&self, field: &str) -> Option<&BTreeMap<String, FieldChange>> {
        match self.fields.get(field) {
            Some(DiffNode::Nested { items }) => Some(items),
            _ => None,
        }
    }

    /// Whether applying this diff would change anything.
    pub fn has_changes(&self) -> bool {
        self.fields.values().any(DiffNode::is_change)
    }

    /// Names of top-level fields whose value actually changes.
    pub fn changed_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, node)| node.is_change())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Keys of a nested collection whose item actually changes.
    pub fn changed_items(&self, field: &str) -> Vec<&str> {
        self.nested(field)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, change)| change.is_change())
                    .map(|(key, _)| key.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every old value covered by the diff.
    pub fn old_snapshot(&self) -> Value {
        self.snapshot(|change| &change.old)
    }

    /// Snapshot of every new value covered by the diff.
    pub fn new_snapshot(&self) -> Value {
        self.snapshot(|change| &change.new)
    }

    fn snapshot(&self, side: impl Fn(&FieldChange) -> &Value) -> Value {
        let mut out = Map::new();
        for (name, node) in &self.fields {
            let value = match node {
                DiffNode::Field(change) => side(change).clone(),
                DiffNode::Nested { items } => Value::Object(
                    items
                        .iter()
                        .filter(|(_, change)| !side(change).is_null())
                        .map(|(key, change)| (key.clone(), side(change).clone()))
                        .collect(),
                ),
            };
            out.insert(name.clone(), value);
        }
        Value::Object(out)
    }

    /// Apply the diff to the current state of an entity.
    ///
    /// Every old value must still match the current state; otherwise the
    /// entity changed underneath the proposal and a conflict is returned.
    pub fn apply<T>(&self, current: &T) -> Result<T, DiffError>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut value = serde_json::to_value(current)?;
        let object = value.as_object_mut().ok_or(DiffError::NotAnObject)?;

        for (name, node) in &self.fields {
            match node {
                DiffNode::Field(change) => {
                    let found = object.get(name).cloned().unwrap_or(Value::Null);
                    if found != change.old {
                        return Err(DiffError::Conflict {
                            field: name.clone(),
                            expected: change.old.clone(),
                            found,
                        });
                    }
                    object.insert(name.clone(), change.new.clone());
                }
                DiffNode::Nested { items } => {
                    let target = object
                        .entry(name.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    let map = target.as_object_mut().ok_or(DiffError::NotAnObject)?;

                    for (key, change) in items {
                        let found = map.get(key).cloned().unwrap_or(Value::Null);
                        if found != change.old {
                            return Err(DiffError::Conflict {
                                field: format!("{}.{}", name, key),
                                expected: change.old.clone(),
                                found,
                            });
                        }
                        if change.new.is_null() {
                            map.remove(key);
                        } else {
                            map.insert(key.clone(), change.new.clone());
                        }
                    }
                }
            }
        }

        Ok(serde_json::from_value(value)?)
    }
}

/// Incremental builder for a [`ChangeDiff`].
#[derive(Debug, Default)]
pub struct DiffBuilder {
    fields: BTreeMap<String, DiffNode>,
    error: Option<DiffError>,
}

impl DiffBuilder {
    /// Record a scalar field; kept only if the value changes.
    pub fn field<T: Serialize + ?Sized>(mut self, name: &str, old: &T, new: &T) -> Self {
        match (serde_json::to_value(old), serde_json::to_value(new)) {
            (Ok(old), Ok(new)) => {
                let change = FieldChange::new(old, new);
                if change.is_change() {
                    self.fields.insert(name.to_string(), DiffNode::Field(change));
                }
            }
            (Err(err), _) | (_, Err(err)) => self.record_error(err.into()),
        }
        self
    }

    /// Record a keyed collection; every key from either side is kept.
    pub fn nested<V: Serialize>(
        mut self,
        name: &str,
        old: &BTreeMap<String, V>,
        new: &BTreeMap<String, V>,
    ) -> Self {
        let mut items = BTreeMap::new();
        for key in old.keys().chain(new.keys()) {
            if items.contains_key(key) {
                continue;
            }
            let old_value = old.get(key).map(serde_json::to_value).transpose();
            let new_value = new.get(key).map(serde_json::to_value).transpose();
            match (old_value, new_value) {
                (Ok(old_value), Ok(new_value)) => {
                    items.insert(
                        key.clone(),
                        FieldChange::new(
                            old_value.unwrap_or(Value::Null),
                            new_value.unwrap_or(Value::Null),
                        ),
                    );
                }
                (Err(err), _) | (_, Err(err)) => {
                    self.record_error(err.into());
                    return self;
                }
            }
        }
        self.fields
            .insert(name.to_string(), DiffNode::Nested { items });
        self
    }

    /// Record a nested struct field by field; every field is kept.
    pub fn nested_struct<T: Serialize>(self, name: &str, old: &T, new: &T) -> Self {
        let to_map = |value: &T| -> Result<BTreeMap<String, Value>, DiffError> {
            match serde_json::to_value(value)? {
                Value::Object(map) => Ok(map.into_iter().collect()),
                _ => Err(DiffError::NotAnObject),
            }
        };
        match (to_map(old), to_map(new)) {
            (Ok(old), Ok(new)) => self.nested(name, &old, &new),
            (Err(err), _) | (_, Err(err)) => {
                let mut this = self;
                this.record_error(err);
                this
            }
        }
    }

    pub fn build(self) -> Result<ChangeDiff, DiffError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(ChangeDiff {
                fields: self.fields,
            }),
        }
    }

    fn record_error(&mut self, err: DiffError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Fare {
        name: String,
        base: i64,
        #[serde(default)]
        note: Option<String>,
        parts: BTreeMap<String, i64>,
    }

    fn fare() -> Fare {
        Fare {
            name: "standard".into(),
            base: 250,
            note: None,
            parts: BTreeMap::from([("booking".into(), 100), ("airport".into(), 500)]),
        }
    }

    #[test]
    fn unchanged_scalars_are_omitted_but_nested_items_kept() {
        let old = fare();
        let mut new = fare();
        new.base = 300;

        let diff = ChangeDiff::builder()
            .field("name", &old.name, &new.name)
            .field("base", &old.base, &new.base)
            .nested("parts", &old.parts, &new.parts)
            .build()
            .unwrap();

        assert!(diff.get("name").is_none());
        assert_eq!(diff.changed_fields(), vec!["base"]);
        let parts = diff.nested("parts").unwrap();
        assert_eq!(parts.len(), 2);
        assert!(!parts["booking"].is_change());
        assert!(diff.changed_items("parts").is_empty());
    }

    #[test]
    fn apply_updates_fields_and_nested_items() {
        let old = fare();
        let mut new = fare();
        new.note = Some("holiday".into());
        new.parts.remove("airport");
        new.parts.insert("toll".into(), 75);

        let diff = ChangeDiff::builder()
            .field("note", &old.note, &new.note)
            .nested("parts", &old.parts, &new.parts)
            .build()
            .unwrap();

        assert_eq!(diff.changed_items("parts"), vec!["airport", "toll"]);
        let applied: Fare = diff.apply(&old).unwrap();
        assert_eq!(applied, new);
    }

    #[test]
    fn apply_detects_concurrent_change() {
        let old = fare();
        let mut new = fare();
        new.base = 400;
        let diff = ChangeDiff::builder()
            .field("base", &old.base, &new.base)
            .build()
            .unwrap();

        let mut drifted = fare();
        drifted.base = 275;
        match diff.apply(&drifted) {
            Err(DiffError::Conflict { field, expected, found }) => {
                assert_eq!(field, "base");
                assert_eq!(expected, json!(250));
                assert_eq!(found, json!(275));
            }
            other => panic!("expected conflict, got {:?}", other),
        }
    }

    #[test]
    fn snapshots_mirror_both_sides() {
        let old = fare();
        let mut new = fare();
        new.parts.insert("toll".into(), 75);
        let diff = ChangeDiff::builder()
            .nested("parts", &old.parts, &new.parts)
            .build()
            .unwrap();

        assert_eq!(diff.old_snapshot()["parts"], json!({"airport": 500, "booking": 100}));
        assert_eq!(
            diff.new_snapshot()["parts"],
            json!({"airport": 500, "booking": 100, "toll": 75})
        );
    }

    #[test]
    fn diff_serializes_with_kind_tags() {
        let diff = ChangeDiff::builder()
            .field("base", &1, &2)
            .build()
            .unwrap();
        let value = serde_json::to_value(&diff).unwrap();
        assert_eq!(value, json!({"base": {"kind": "field", "old": 1, "new": 2}}));
        let back: ChangeDiff = serde_json::from_value(value).unwrap();
        assert_eq!(back, diff);
    }
}
