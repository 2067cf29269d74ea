//! Query views: normalization on write, denormalization on read.

use std::collections::BTreeSet;
use tracing::trace;

use crate::error::{CacheError, Result};
use crate::fragment::FragmentRegistry;
use crate::key::{EntityKey, Identity};
use crate::selection::SelectionSet;
use crate::store::NormalizedStore;
use crate::value::{Fields, Value};

/// A tree shape requested by a caller, rooted at one record.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryView {
    /// Root record; `None` means the configured query root.
    pub root: Option<EntityKey>,
    pub selection: SelectionSet,
}

impl QueryView {
    /// A view over the query root.
    pub fn query(selection: SelectionSet) -> Self {
        Self {
            root: None,
            selection,
        }
    }

    /// A view rooted at a single entity.
    pub fn entity(key: EntityKey, selection: SelectionSet) -> Self {
        Self {
            root: Some(key),
            selection,
        }
    }
}

/// Writes collected while normalizing a result tree, merged in one batch.
#[derive(Debug, Default)]
pub(crate) struct WriteBatch {
    writes: Vec<(EntityKey, Fields)>,
}

impl WriteBatch {
    pub(crate) fn push(&mut self, key: EntityKey, fields: Fields) {
        self.writes.push((key, fields));
    }

    pub(crate) fn keys(&self) -> BTreeSet<EntityKey> {
        self.writes.iter().map(|(key, _)| key.clone()).collect()
    }

    /// The last value this batch writes to `key.field`, if any.
    pub(crate) fn latest(&self, key: &EntityKey, field: &str) -> Option<&Value> {
        self.writes
            .iter()
            .rev()
            .filter(|(k, _)| k == key)
            .find_map(|(_, fields)| fields.get(field))
    }

    pub(crate) fn into_writes(self) -> Vec<(EntityKey, Fields)> {
        self.writes
    }
}

/// Splits result trees into flat records, replacing every identifiable
/// sub-object with a reference to its key.
pub(crate) struct Normalizer<'a> {
    pub(crate) identity: &'a Identity,
    pub(crate) fragments: &'a FragmentRegistry,
}

impl Normalizer<'_> {
    /// Normalize `data` into the record stored under `key`, stamping
    /// `typename` when given.
    pub(crate) fn write_entity(
        &self,
        key: &EntityKey,
        typename: Option<&str>,
        data: &Fields,
        selection: &SelectionSet,
        batch: &mut WriteBatch,
    ) -> Result<()> {
        let mut record = self.project(data, selection, batch)?;
        if let Some(typename) = typename {
            record.insert(
                self.identity.typename_field().to_string(),
                Value::String(typename.to_string()),
            );
        }
        batch.push(key.clone(), record);
        Ok(())
    }

    fn project(
        &self,
        data: &Fields,
        selection: &SelectionSet,
        batch: &mut WriteBatch,
    ) -> Result<Fields> {
        let mut record = Fields::new();
        for field in self.fragments.expand(selection)? {
            let Some(value) = data.get(field.response_key()) else {
                trace!(field = field.response_key(), "field absent from written data");
                continue;
            };
            let normalized = match &field.selection {
                Some(sub) => self.normalize_value(value, sub, batch)?,
                None => value.clone(),
            };
            record.insert(field.storage_key(), normalized);
        }
        Ok(record)
    }

    fn normalize_value(
        &self,
        value: &Value,
        selection: &SelectionSet,
        batch: &mut WriteBatch,
    ) -> Result<Value> {
        match value {
            Value::Object(obj) => {
                let hint = self.fragments.type_condition_of(selection);
                match self.identity.identify(obj, hint)? {
                    Some(key) => {
                        let typename = key.typename().to_string();
                        self.write_entity(&key, Some(&typename), obj, selection, batch)?;
                        Ok(Value::reference(key))
                    }
                    None => Ok(Value::Object(self.project(obj, selection, batch)?)),
                }
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.normalize_value(item, selection, batch))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }
}

/// Rebuilds result trees from the store by following references.
pub(crate) struct Denormalizer<'a> {
    pub(crate) store: &'a NormalizedStore,
    pub(crate) fragments: &'a FragmentRegistry,
}

impl Denormalizer<'_> {
    pub(crate) fn read_entity(&self, key: &EntityKey, selection: &SelectionSet) -> Result<Fields> {
        let record = self
            .store
            .get(key)
            .ok_or_else(|| CacheError::missing_entity(key))?;
        self.read_fields(key, record, selection)
    }

    fn read_fields(
        &self,
        owner: &EntityKey,
        record: &Fields,
        selection: &SelectionSet,
    ) -> Result<Fields> {
        let mut out = Fields::new();
        for field in self.fragments.expand(selection)? {
            let storage_key = field.storage_key();
            let value = record
                .get(&storage_key)
                .ok_or_else(|| CacheError::missing_field(owner, &storage_key))?;
            let resolved = match &field.selection {
                Some(sub) => self.resolve(owner, value, sub)?,
                None => value.clone(),
            };
            out.insert(field.response_key().to_string(), resolved);
        }
        Ok(out)
    }

    fn resolve(&self, owner: &EntityKey, value: &Value, selection: &SelectionSet) -> Result<Value> {
        match value {
            Value::Ref(r) => self.read_entity(&r.key, selection).map(Value::Object),
            Value::Object(inline) => self.read_fields(owner, inline, selection).map(Value::Object),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(owner, item, selection))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }
}
