use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::key::EntityKey;

/// Field map of one stored record or one result object.
pub type Fields = BTreeMap<String, Value>;

/// Dynamic value type for record fields.
///
/// References serialize as `{"__ref": "<key>"}`, everything else as plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Ref(Reference),
    Array(Vec<Value>),
    Object(Fields),
}

/// A pointer from one record to another entity in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    #[serde(rename = "__ref")]
    pub key: EntityKey,
}

/// The shape of a value, used to detect conflicting writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Ref,
    Array,
    Object,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Null => write!(f, "null"),
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Int => write!(f, "int"),
            ValueKind::Float => write!(f, "float"),
            ValueKind::String => write!(f, "string"),
            ValueKind::Ref => write!(f, "reference"),
            ValueKind::Array => write!(f, "array"),
            ValueKind::Object => write!(f, "object"),
        }
    }
}

impl Value {
    pub fn reference(key: EntityKey) -> Self {
        Value::Ref(Reference { key })
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Ref(_) => ValueKind::Ref,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn as_reference(&self) -> Option<&EntityKey> {
        match self {
            Value::Ref(r) => Some(&r.key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Fields> {
        match self {
            Value::Object(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Whether `other` may overwrite `self` in the same field.
    ///
    /// Null is compatible with everything and ints may widen to floats.
    pub fn is_compatible_with(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => true,
            (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => true,
            (a, b) => a.kind() == b.kind(),
        }
    }

    /// Rewrite every reference to `from` into `to`. Lists keep the first
    /// occurrence of a reference if the rewrite creates a duplicate.
    pub(crate) fn replace_reference(&mut self, from: &EntityKey, to: &EntityKey) -> bool {
        match self {
            Value::Ref(r) if r.key == *from => {
                r.key = to.clone();
                true
            }
            Value::Array(items) => {
                let mut changed = false;
                for item in items.iter_mut() {
                    changed |= item.replace_reference(from, to);
                }
                if changed {
                    dedup_references(items);
                }
                changed
            }
            Value::Object(fields) => fields
                .values_mut()
                .fold(false, |changed, v| v.replace_reference(from, to) || changed),
            _ => false,
        }
    }

    /// Drop list entries pointing at `key` and null out single references.
    pub(crate) fn strip_reference(&mut self, key: &EntityKey) -> bool {
        match self {
            Value::Ref(r) if r.key == *key => {
                *self = Value::Null;
                true
            }
            Value::Array(items) => {
                let before = items.len();
                items.retain(|item| item.as_reference() != Some(key));
                let mut changed = items.len() != before;
                for item in items.iter_mut() {
                    changed |= item.strip_reference(key);
                }
                changed
            }
            Value::Object(fields) => fields
                .values_mut()
                .fold(false, |changed, v| v.strip_reference(key) || changed),
            _ => false,
        }
    }
}

fn dedup_references(items: &mut Vec<Value>) {
    let mut seen = HashSet::new();
    items.retain(|item| match item.as_reference() {
        Some(key) => seen.insert(key.clone()),
        None => true,
    });
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<EntityKey> for Value {
    fn from(key: EntityKey) -> Self {
        Value::reference(key)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Fields> for Value {
    fn from(fields: Fields) -> Self {
        Value::Object(fields)
    }
}
