use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::value::Value;

/// A requested tree of fields, possibly spreading named fragments.
///
/// ```
/// use normcache_core::SelectionSet;
///
/// let message = SelectionSet::new().field("id").field("content");
/// let chat = SelectionSet::new()
///     .field("id")
///     .object("lastMessage", message);
/// assert_eq!(chat.fields().count(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSet {
    pub items: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selection {
    Field(FieldSelection),
    Spread(String),
}

/// One selected field with optional alias, arguments and sub-selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSelection {
    pub name: String,
    pub alias: Option<String>,
    pub arguments: BTreeMap<String, Value>,
    pub selection: Option<SelectionSet>,
}

impl FieldSelection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            alias: None,
            arguments: BTreeMap::new(),
            selection: None,
        }
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.to_string());
        self
    }

    pub fn arg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.to_string(), value.into());
        self
    }

    pub fn select(mut self, selection: SelectionSet) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Key of this field in result objects.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Key of this field inside a stored record. Arguments are part of the
    /// key so `chat(chatId: 1)` and `chat(chatId: 2)` never collide.
    pub fn storage_key(&self) -> String {
        if self.arguments.is_empty() {
            return self.name.clone();
        }
        let args = serde_json::to_string(&self.arguments).unwrap_or_default();
        format!("{}({})", self.name, args)
    }
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a scalar field.
    pub fn field(self, name: &str) -> Self {
        self.with(FieldSelection::new(name))
    }

    /// Select an object or list field with a sub-selection.
    pub fn object(self, name: &str, selection: SelectionSet) -> Self {
        self.with(FieldSelection::new(name).select(selection))
    }

    pub fn with(mut self, field: FieldSelection) -> Self {
        self.items.push(Selection::Field(field));
        self
    }

    /// Spread a named fragment.
    pub fn spread(mut self, fragment: &str) -> Self {
        self.items.push(Selection::Spread(fragment.to_string()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldSelection> {
        self.items.iter().filter_map(|item| match item {
            Selection::Field(f) => Some(f),
            Selection::Spread(_) => None,
        })
    }

    pub fn spreads(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match item {
            Selection::Spread(name) => Some(name.as_str()),
            Selection::Field(_) => None,
        })
    }
}
