use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::key::is_valid_typename;
use crate::selection::{FieldSelection, Selection, SelectionSet};

/// A named, reusable selection of an entity type's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub name: String,
    pub type_condition: String,
    pub selection: SelectionSet,
}

impl Fragment {
    pub fn new(name: &str, type_condition: &str, selection: SelectionSet) -> Self {
        Self {
            name: name.to_string(),
            type_condition: type_condition.to_string(),
            selection,
        }
    }
}

/// Error from the fragment registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Fragment already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Fragment not found: {0}")]
    NotFound(String),

    #[error("Duplicate field '{field}' in fragment '{fragment}'")]
    DuplicateField { fragment: String, field: String },

    #[error("Fragment '{fragment}' spreads unregistered fragment '{spread}'")]
    UnknownSpread { fragment: String, spread: String },

    #[error("Invalid type condition '{0}'")]
    InvalidTypeCondition(String),
}

/// Registry of fragments, the one place that knows what each entity's
/// fragments look like.
///
/// A fragment may only spread fragments registered before it, so spreads
/// can never form a cycle.
pub struct FragmentRegistry {
    fragments: HashMap<String, Fragment>,
}

impl FragmentRegistry {
    pub fn new() -> Self {
        Self {
            fragments: HashMap::new(),
        }
    }

    /// Register a new fragment.
    pub fn register(&mut self, fragment: Fragment) -> Result<(), RegistryError> {
        if self.fragments.contains_key(&fragment.name) {
            return Err(RegistryError::AlreadyRegistered(fragment.name.clone()));
        }
        if !is_valid_typename(&fragment.type_condition) {
            return Err(RegistryError::InvalidTypeCondition(
                fragment.type_condition.clone(),
            ));
        }
        self.check_selection(&fragment.name, &fragment.selection)?;
        self.fragments.insert(fragment.name.clone(), fragment);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Fragment> {
        self.fragments.get(name)
    }

    pub fn list(&self) -> Vec<&Fragment> {
        self.fragments.values().collect()
    }

    /// Flatten spreads into a field list. Fields selected more than once
    /// are merged, sub-selections included.
    pub fn expand(&self, selection: &SelectionSet) -> Result<Vec<FieldSelection>, RegistryError> {
        let mut out = Vec::new();
        self.expand_into(selection, &mut out)?;
        Ok(out)
    }

    /// The type a selection is written against, taken from its first spread.
    pub fn type_condition_of(&self, selection: &SelectionSet) -> Option<&str> {
        selection
            .spreads()
            .find_map(|name| self.fragments.get(name))
            .map(|f| f.type_condition.as_str())
    }

    fn expand_into(
        &self,
        selection: &SelectionSet,
        out: &mut Vec<FieldSelection>,
    ) -> Result<(), RegistryError> {
        for item in &selection.items {
            match item {
                Selection::Field(field) => merge_field(out, field.clone()),
                Selection::Spread(name) => {
                    let fragment = self
                        .fragments
                        .get(name)
                        .ok_or_else(|| RegistryError::NotFound(name.clone()))?;
                    self.expand_into(&fragment.selection, out)?;
                }
            }
        }
        Ok(())
    }

    fn check_selection(
        &self,
        fragment: &str,
        selection: &SelectionSet,
    ) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for item in &selection.items {
            match item {
                Selection::Field(field) => {
                    if !seen.insert(field.response_key()) {
                        return Err(RegistryError::DuplicateField {
                            fragment: fragment.to_string(),
                            field: field.response_key().to_string(),
                        });
                    }
                    if let Some(sub) = &field.selection {
                        self.check_selection(fragment, sub)?;
                    }
                }
                Selection::Spread(name) => {
                    if !self.fragments.contains_key(name) {
                        return Err(RegistryError::UnknownSpread {
                            fragment: fragment.to_string(),
                            spread: name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

impl Default for FragmentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn merge_field(out: &mut Vec<FieldSelection>, field: FieldSelection) {
    let Some(idx) = out
        .iter()
        .position(|f| f.response_key() == field.response_key())
    else {
        out.push(field);
        return;
    };
    if let Some(extra) = field.selection {
        let existing = &mut out[idx];
        match &mut existing.selection {
            Some(current) => current.items.extend(extra.items),
            None => existing.selection = Some(extra),
        }
    }
}
