//! Error types for normcache-core

use thiserror::Error;

use crate::config::ConfigError;
use crate::fragment::RegistryError;
use crate::key::EntityKey;
use crate::mutation::{GraphQlError, MutationId, MutationState, TransportError};
use crate::value::ValueKind;

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Main error type for cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// Entity or field absent from the store; callers fall back to a remote fetch
    #[error("Not found: {key}{}", field_suffix(.field))]
    NotFound {
        key: EntityKey,
        field: Option<String>,
    },

    /// A write would change the kind of an existing field
    #[error("Schema mismatch on {key}.{field}: stored {existing}, incoming {incoming}")]
    SchemaMismatch {
        key: EntityKey,
        field: String,
        existing: ValueKind,
        incoming: ValueKind,
    },

    /// A key touched by an optimistic write changed before rollback
    #[error("Inconsistent rollback: {key} changed after the optimistic write")]
    InconsistentRollback { key: EntityKey },

    /// Fragment name not registered
    #[error("Unknown fragment: {0}")]
    UnknownFragment(String),

    /// Fragment applied to an entity of another type
    #[error("Fragment '{fragment}' on {expected} cannot be applied to {key}")]
    FragmentTypeMismatch {
        fragment: String,
        expected: String,
        key: EntityKey,
    },

    /// Malformed key or typename
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Result object carries no usable identity
    #[error("Cannot identify {0} result")]
    MissingIdentity(String),

    /// Mutation response lacks the expected result field
    #[error("Missing mutation result field: {0}")]
    MissingResult(String),

    /// No pending mutation under this id
    #[error("Unknown mutation: {0}")]
    UnknownMutation(MutationId),

    /// Mutation state machine violation
    #[error("Invalid mutation transition from {from} to {to}")]
    InvalidTransition {
        from: MutationState,
        to: MutationState,
    },

    /// Pending mutation limit reached
    #[error("Too many pending mutations (limit {0})")]
    TooManyPending(usize),

    /// The remote mutation returned errors
    #[error("Remote mutation failed: {}", join_messages(.0))]
    Remote(Vec<GraphQlError>),

    /// The transport failed; passed through unchanged
    #[error("Transport error: {0}")]
    Transport(#[source] TransportError),

    /// Fragment registry errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Snapshot encoding errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheError {
    pub(crate) fn missing_entity(key: &EntityKey) -> Self {
        CacheError::NotFound {
            key: key.clone(),
            field: None,
        }
    }

    pub(crate) fn missing_field(key: &EntityKey, field: &str) -> Self {
        CacheError::NotFound {
            key: key.clone(),
            field: Some(field.to_string()),
        }
    }

    /// Whether the caller should fall back to fetching from the server.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }
}

fn field_suffix(field: &Option<String>) -> String {
    field.as_ref().map(|f| format!(".{f}")).unwrap_or_default()
}

fn join_messages(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let key = EntityKey::new("Message", "1");
        assert_eq!(
            CacheError::missing_entity(&key).to_string(),
            "Not found: Message:1"
        );
        assert_eq!(
            CacheError::missing_field(&key, "content").to_string(),
            "Not found: Message:1.content"
        );
        assert!(CacheError::missing_entity(&key).is_cache_miss());
    }

    #[test]
    fn schema_mismatch_display() {
        let err = CacheError::SchemaMismatch {
            key: EntityKey::new("Chat", "1"),
            field: "name".into(),
            existing: ValueKind::String,
            incoming: ValueKind::Int,
        };
        let msg = err.to_string();
        assert!(msg.contains("Chat:1.name"));
        assert!(msg.contains("string"));
        assert!(!err.is_cache_miss());
    }

    #[test]
    fn remote_display_joins_messages() {
        let err = CacheError::Remote(vec![
            GraphQlError {
                message: "chat not found".into(),
                path: vec![],
            },
            GraphQlError {
                message: "unauthorized".into(),
                path: vec!["addMessage".into()],
            },
        ]);
        assert_eq!(
            err.to_string(),
            "Remote mutation failed: chat not found; unauthorized"
        );
    }
}
