//! Normcache Core - Normalized entity cache for a GraphQL chat client
//!
//! This crate keeps every entity the client has seen exactly once and
//! rebuilds query results from that single copy:
//!
//! - **Key**: Entity keys (`Type:id`) and the identity policy that derives them
//! - **Store**: Flat key→record map with shallow field merge and change subscriptions
//! - **Fragment**: Named field selections per entity type, read and written independently
//! - **View**: Normalization of result trees on write, denormalization on read
//! - **Mutation**: Result application, named view updates and optimistic writes with rollback
//! - **Config**: Identity, root and optimistic-write settings
//!
//! # Mutation lifecycle
//!
//! ```text
//! Idle → OptimisticWritten → Resolved → Idle
//!              ↓
//!         RolledBack → Idle
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod fragment;
pub mod key;
pub mod mutation;
pub mod schemas;
pub mod selection;
pub mod store;
pub mod value;
pub mod view;

pub use cache::Cache;
pub use config::{CacheConfig, ConfigError, IdentityConfig, OptimisticConfig, RootConfig};
pub use error::{CacheError, Result};
pub use event::{CacheEvent, WatchFilter};
pub use fragment::{Fragment, FragmentRegistry, RegistryError};
pub use key::{EntityKey, Identity};
pub use mutation::{
    GraphQlError, MutationId, MutationRequest, MutationResponse, MutationSpec, MutationState,
    MutationTransport, PendingMutation, TransportError, UpdateRule, ViewUpdate,
};
pub use selection::{FieldSelection, Selection, SelectionSet};
pub use store::{MergeOutcome, NormalizedStore, StoreSnapshot};
pub use value::{Fields, Reference, Value, ValueKind};
pub use view::QueryView;
