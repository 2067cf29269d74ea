//! Entity keys and the identity policy that derives them.
//!
//! Every read and write path derives keys through [`EntityKey::new`], either
//! directly or via [`Identity::identify`]. Deriving a key anywhere else risks
//! two un-synchronized copies of the same entity.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::IdentityConfig;
use crate::error::{CacheError, Result};
use crate::value::{Fields, Value};

const SEPARATOR: char = ':';

/// Canonical identifier of one logical entity, `"{typename}:{id}"`.
///
/// Root records (`ROOT_QUERY`, `ROOT_MUTATION`) carry a bare name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(String);

impl EntityKey {
    /// Build the key for `(typename, id)`.
    ///
    /// `typename` must be a GraphQL name, so it never contains the separator
    /// and the mapping stays injective.
    pub fn new(typename: &str, id: &str) -> Self {
        Self(format!("{typename}{SEPARATOR}{id}"))
    }

    /// Build the key of a root record such as `ROOT_QUERY`.
    pub fn root(name: &str) -> Self {
        Self(name.to_string())
    }

    /// Parse a serialized key, validating its typename part.
    pub fn parse(raw: &str) -> Result<Self> {
        let typename = raw.split_once(SEPARATOR).map_or(raw, |(t, _)| t);
        if !is_valid_typename(typename) {
            return Err(CacheError::InvalidKey(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn typename(&self) -> &str {
        self.0.split_once(SEPARATOR).map_or(&self.0, |(t, _)| t)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.split_once(SEPARATOR).map(|(_, id)| id)
    }

    /// Split back into `(typename, id)`.
    pub fn parts(&self) -> (&str, Option<&str>) {
        (self.typename(), self.id())
    }

    pub fn is_root(&self) -> bool {
        self.id().is_none()
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether `name` matches `[_A-Za-z][_0-9A-Za-z]*`.
pub fn is_valid_typename(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Derives entity keys from result objects.
#[derive(Debug, Clone)]
pub struct Identity {
    typename_field: String,
    id_field: String,
    key_fields: BTreeMap<String, String>,
}

impl Identity {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            typename_field: config.typename_field.clone(),
            id_field: config.id_field.clone(),
            key_fields: config.key_fields.clone(),
        }
    }

    pub fn typename_field(&self) -> &str {
        &self.typename_field
    }

    /// The field holding the identifier of `typename` objects.
    pub fn id_field_for(&self, typename: &str) -> &str {
        self.key_fields
            .get(typename)
            .map_or(self.id_field.as_str(), String::as_str)
    }

    /// The typename of `fields`, preferring the object's own typename field
    /// over `hint`.
    pub fn typename_of<'a>(&self, fields: &'a Fields, hint: Option<&'a str>) -> Option<&'a str> {
        fields
            .get(&self.typename_field)
            .and_then(Value::as_str)
            .or(hint)
    }

    /// Compute the key of a result object, or `None` if it cannot be
    /// identified and must be stored inline.
    pub fn identify(&self, fields: &Fields, hint: Option<&str>) -> Result<Option<EntityKey>> {
        let Some(typename) = self.typename_of(fields, hint) else {
            return Ok(None);
        };
        if !is_valid_typename(typename) {
            return Err(CacheError::InvalidKey(format!(
                "invalid typename '{typename}'"
            )));
        }
        let id = match fields.get(self.id_field_for(typename)) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Int(i)) => i.to_string(),
            _ => return Ok(None),
        };
        Ok(Some(EntityKey::new(typename, &id)))
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new(&IdentityConfig::default())
    }
}
