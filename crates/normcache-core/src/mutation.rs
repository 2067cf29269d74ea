//! Mutation effect application
//!
//! State transitions per mutation:
//! ```text
//! Idle → OptimisticWritten → Resolved → Idle
//!   ↓           ↓
//! Resolved   RolledBack
//! ```
//!
//! An optimistic write captures a pre-image of every key it touches. When
//! the real result arrives the placeholder's temporary key is rewritten to
//! the permanent key everywhere and removed. When the remote call fails the
//! pre-image is restored, unless some touched key changed in the meantime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::{CacheError, Result};
use crate::key::EntityKey;
use crate::selection::SelectionSet;
use crate::value::{Fields, Value, ValueKind};
use crate::view::WriteBatch;

/// Identifier of one mutation invocation.
pub type MutationId = Uuid;

/// Error returned by a [`MutationTransport`]; surfaced to callers unchanged.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Request sent upstream for one mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationRequest {
    pub operation_name: String,
    pub variables: Fields,
    pub selection_set: SelectionSet,
}

/// Response of a remote mutation. Only `data` feeds the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationResponse {
    pub data: Option<Fields>,
    #[serde(default)]
    pub errors: Vec<GraphQlError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default)]
    pub path: Vec<String>,
}

/// Sends mutations to the server.
pub trait MutationTransport {
    fn send(
        &self,
        request: &MutationRequest,
    ) -> std::result::Result<MutationResponse, TransportError>;
}

/// How a cached view changes when a mutation result lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateRule {
    /// Add the result to the end of a list, once.
    Append,
    /// Add the result to the start of a list, once.
    Prepend,
    /// Point a single reference at the result.
    Replace,
    /// Move `entry` to the start of a list, inserting it if absent.
    MoveToFront { entry: EntityKey },
}

/// A named update of one field of one cached record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewUpdate {
    pub name: String,
    pub target: EntityKey,
    pub field: String,
    pub rule: UpdateRule,
}

impl ViewUpdate {
    pub fn new(name: &str, target: EntityKey, field: &str, rule: UpdateRule) -> Self {
        Self {
            name: name.to_string(),
            target,
            field: field.to_string(),
            rule,
        }
    }
}

/// Everything the cache needs to apply one mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationSpec {
    pub request: MutationRequest,
    /// Response field holding the returned entity, e.g. `addMessage`.
    pub result_field: String,
    /// Fragment describing the returned entity.
    pub fragment: String,
    /// Predicted entity written before the server answers.
    pub optimistic: Option<Fields>,
    pub updates: Vec<ViewUpdate>,
}

/// The state of one mutation invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationState {
    /// Issued, nothing written yet
    Idle,
    /// Placeholder written, awaiting the server
    OptimisticWritten,
    /// Real result merged
    Resolved,
    /// Placeholder undone after a remote failure
    RolledBack,
}

impl MutationState {
    /// Check if a state transition is valid
    pub fn can_transition_to(&self, target: &MutationState) -> bool {
        matches!(
            (self, target),
            (MutationState::Idle, MutationState::OptimisticWritten)
                | (MutationState::Idle, MutationState::Resolved)
                | (MutationState::OptimisticWritten, MutationState::Resolved)
                | (MutationState::OptimisticWritten, MutationState::RolledBack)
                | (MutationState::Resolved, MutationState::Idle)
                | (MutationState::RolledBack, MutationState::Idle)
        )
    }
}

impl std::fmt::Display for MutationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MutationState::Idle => write!(f, "idle"),
            MutationState::OptimisticWritten => write!(f, "optimistic"),
            MutationState::Resolved => write!(f, "resolved"),
            MutationState::RolledBack => write!(f, "rolled back"),
        }
    }
}

#[derive(Debug, Clone)]
struct PreImageEntry {
    before: Option<Fields>,
    revision_after: Option<u64>,
}

/// A mutation that has been issued and not yet completed.
#[derive(Debug, Clone)]
pub struct PendingMutation {
    id: MutationId,
    state: MutationState,
    spec: MutationSpec,
    optimistic_key: Option<EntityKey>,
    pre_image: BTreeMap<EntityKey, PreImageEntry>,
}

impl PendingMutation {
    fn new(id: MutationId, spec: MutationSpec) -> Self {
        Self {
            id,
            state: MutationState::Idle,
            spec,
            optimistic_key: None,
            pre_image: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> MutationId {
        self.id
    }

    pub fn state(&self) -> MutationState {
        self.state
    }

    pub fn spec(&self) -> &MutationSpec {
        &self.spec
    }

    /// Key of the optimistic placeholder, if one was written.
    pub fn optimistic_key(&self) -> Option<&EntityKey> {
        self.optimistic_key.as_ref()
    }

    /// Keys the optimistic write touched.
    pub fn touched_keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.pre_image.keys()
    }

    fn transition(&mut self, to: MutationState) -> Result<()> {
        if !self.state.can_transition_to(&to) {
            return Err(CacheError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!(mutation = %self.id, from = %self.state, to = %to, "mutation transition");
        self.state = to;
        Ok(())
    }
}

impl Cache {
    /// Write a mutation's returned entity and apply its named view updates
    /// in one atomic batch. Applying the same result twice is a no-op.
    pub fn apply_mutation_result(
        &mut self,
        spec: &MutationSpec,
        entity: &Fields,
    ) -> Result<EntityKey> {
        let (key, batch) = self.result_batch(spec, entity, false)?;
        self.store.merge_batch(batch.into_writes())?;
        Ok(key)
    }

    /// Issue a mutation. With an optimistic value the placeholder is
    /// written now and the pre-image of every touched key is kept.
    pub fn begin_mutation(&mut self, spec: MutationSpec) -> Result<MutationId> {
        let limit = self.config.optimistic.max_pending;
        if self.pending.len() >= limit {
            return Err(CacheError::TooManyPending(limit));
        }

        let id = Uuid::new_v4();
        let mut pending = PendingMutation::new(id, spec);

        if let Some(optimistic) = pending.spec.optimistic.clone() {
            let optimistic = self.with_temporary_id(&pending.spec.fragment, optimistic)?;
            let (key, batch) = self.result_batch(&pending.spec, &optimistic, true)?;

            let before: Vec<(EntityKey, Option<Fields>)> = batch
                .keys()
                .into_iter()
                .map(|k| {
                    let record = self.store.get(&k).cloned();
                    (k, record)
                })
                .collect();
            self.store.merge_batch(batch.into_writes())?;

            pending.pre_image = before
                .into_iter()
                .map(|(k, before)| {
                    let revision_after = self.store.revision(&k);
                    (
                        k,
                        PreImageEntry {
                            before,
                            revision_after,
                        },
                    )
                })
                .collect();
            pending.optimistic_key = Some(key);
            pending.transition(MutationState::OptimisticWritten)?;
        }

        debug!(
            mutation = %id,
            operation = %pending.spec.request.operation_name,
            optimistic = pending.optimistic_key.is_some(),
            "began mutation"
        );
        self.pending.insert(id, pending);
        Ok(id)
    }

    /// Merge the authoritative result of a pending mutation.
    ///
    /// A response without the result entity, or a result that cannot be
    /// written, fails the mutation and rolls back any optimistic write. The
    /// error that caused the failure is returned.
    pub fn resolve_mutation(
        &mut self,
        id: MutationId,
        response: MutationResponse,
    ) -> Result<EntityKey> {
        let pending = self.pending.get(&id).ok_or(CacheError::UnknownMutation(id))?;
        if !pending.state.can_transition_to(&MutationState::Resolved) {
            return Err(CacheError::InvalidTransition {
                from: pending.state,
                to: MutationState::Resolved,
            });
        }

        let result_field = pending.spec.result_field.clone();
        let entity = match response.data.as_ref().and_then(|d| d.get(&result_field)) {
            Some(Value::Object(entity)) => entity.clone(),
            _ => {
                let cause = if response.errors.is_empty() {
                    CacheError::MissingResult(result_field)
                } else {
                    CacheError::Remote(response.errors)
                };
                return Err(self.abandon_mutation(id, cause));
            }
        };

        let temp = pending.optimistic_key.clone();
        let applied = self
            .result_batch(&pending.spec, &entity, false)
            .and_then(|(key, batch)| self.store.merge_batch(batch.into_writes()).map(|_| key));
        let key = match applied {
            Ok(key) => key,
            Err(cause) => return Err(self.abandon_mutation(id, cause)),
        };

        if let Some(temp) = temp.filter(|temp| *temp != key) {
            self.store.replace_references(&temp, &key);
            self.store.remove(&temp);
            debug!(mutation = %id, temp = %temp, key = %key, "superseded optimistic entity");
        }

        if let Some(mut pending) = self.pending.remove(&id) {
            pending.transition(MutationState::Resolved)?;
            pending.transition(MutationState::Idle)?;
        }
        Ok(key)
    }

    /// Fail a pending mutation, restoring the pre-image of an optimistic
    /// write. Returns the state the mutation ended in before going idle.
    pub fn fail_mutation(&mut self, id: MutationId) -> Result<MutationState> {
        let mut pending = self.pending.remove(&id).ok_or(CacheError::UnknownMutation(id))?;
        if pending.state != MutationState::OptimisticWritten {
            debug!(mutation = %id, "failed mutation without optimistic write");
            return Ok(pending.state);
        }

        let conflict = pending
            .pre_image
            .iter()
            .find(|(key, entry)| self.store.revision(key) != entry.revision_after)
            .map(|(key, _)| key.clone());
        if let Some(key) = conflict {
            warn!(
                mutation = %id,
                key = %key,
                "cannot roll back, key changed after optimistic write"
            );
            return Err(CacheError::InconsistentRollback { key });
        }

        for (key, entry) in std::mem::take(&mut pending.pre_image) {
            match entry.before {
                Some(fields) => self.store.restore_record(&key, fields),
                None => {
                    self.store.remove(&key);
                }
            }
        }
        pending.transition(MutationState::RolledBack)?;
        warn!(mutation = %id, "rolled back optimistic write");
        pending.transition(MutationState::Idle)?;
        Ok(MutationState::RolledBack)
    }

    /// Fail `id` after `cause` and hand `cause` back. A rollback blocked by
    /// later writes is logged; it never replaces `cause`.
    fn abandon_mutation(&mut self, id: MutationId, cause: CacheError) -> CacheError {
        match self.fail_mutation(id) {
            Ok(state) => {
                debug!(mutation = %id, state = %state, error = %cause, "abandoned mutation")
            }
            Err(CacheError::InconsistentRollback { key }) => warn!(
                mutation = %id,
                key = %key,
                error = %cause,
                "mutation failed, later writes kept the optimistic state"
            ),
            Err(err) => warn!(mutation = %id, error = %err, "could not fail mutation"),
        }
        cause
    }

    /// Run a mutation end to end through `transport`. Any failure rolls the
    /// optimistic write back and surfaces the failure unchanged.
    pub fn mutate<T>(&mut self, transport: &T, spec: MutationSpec) -> Result<EntityKey>
    where
        T: MutationTransport + ?Sized,
    {
        let request = spec.request.clone();
        let id = self.begin_mutation(spec)?;
        match transport.send(&request) {
            Ok(response) => self.resolve_mutation(id, response),
            Err(err) => Err(self.abandon_mutation(id, CacheError::Transport(err))),
        }
    }

    pub fn pending_mutation(&self, id: MutationId) -> Option<&PendingMutation> {
        self.pending.get(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn with_temporary_id(&self, fragment: &str, mut optimistic: Fields) -> Result<Fields> {
        let typename = self.fragment(fragment)?.type_condition.clone();
        let id_field = self.identity.id_field_for(&typename).to_string();
        if !optimistic.contains_key(&id_field) {
            let temp_id = format!("{}{}", self.config.optimistic.temp_id_prefix, Uuid::new_v4());
            optimistic.insert(id_field, Value::String(temp_id));
        }
        Ok(optimistic)
    }

    /// Batch writing `entity` and every view update. The mutation root only
    /// records authoritative results.
    fn result_batch(
        &self,
        spec: &MutationSpec,
        entity: &Fields,
        optimistic: bool,
    ) -> Result<(EntityKey, WriteBatch)> {
        let typename = self.fragment(&spec.fragment)?.type_condition.as_str();
        let key = self
            .identity
            .identify(entity, Some(typename))?
            .ok_or_else(|| CacheError::MissingIdentity(spec.result_field.clone()))?;

        let mut batch = self.fragment_batch(&spec.fragment, &key, entity)?;

        let root_field = spec
            .request
            .selection_set
            .fields()
            .find(|f| f.response_key() == spec.result_field);
        if let Some(field) = root_field.filter(|_| !optimistic) {
            batch.push(
                self.mutation_root(),
                Fields::from([(field.storage_key(), Value::reference(key.clone()))]),
            );
        }

        for update in &spec.updates {
            self.update_batch(update, &key, &mut batch)?;
        }
        Ok((key, batch))
    }

    fn update_batch(
        &self,
        update: &ViewUpdate,
        result: &EntityKey,
        batch: &mut WriteBatch,
    ) -> Result<()> {
        let Some(record) = self.store.get(&update.target) else {
            debug!(
                update = %update.name,
                target = %update.target,
                "target not cached, skipping update"
            );
            return Ok(());
        };
        let current = batch
            .latest(&update.target, &update.field)
            .or_else(|| record.get(&update.field));

        let next = match (&update.rule, current) {
            (UpdateRule::Replace, _) => Some(Value::reference(result.clone())),
            (_, None | Some(Value::Null)) => None,
            (UpdateRule::Append, Some(Value::Array(items))) => {
                let mut items = items.clone();
                (!contains_reference(&items, result)).then(|| {
                    items.push(Value::reference(result.clone()));
                    Value::Array(items)
                })
            }
            (UpdateRule::Prepend, Some(Value::Array(items))) => {
                let mut items = items.clone();
                (!contains_reference(&items, result)).then(|| {
                    items.insert(0, Value::reference(result.clone()));
                    Value::Array(items)
                })
            }
            (UpdateRule::MoveToFront { entry }, Some(Value::Array(items))) => {
                let first = items.first().and_then(Value::as_reference);
                (first != Some(entry)).then(|| {
                    let mut items: Vec<Value> = items
                        .iter()
                        .filter(|item| item.as_reference() != Some(entry))
                        .cloned()
                        .collect();
                    items.insert(0, Value::reference(entry.clone()));
                    Value::Array(items)
                })
            }
            (_, Some(other)) => {
                return Err(CacheError::SchemaMismatch {
                    key: update.target.clone(),
                    field: update.field.clone(),
                    existing: other.kind(),
                    incoming: ValueKind::Array,
                });
            }
        };

        match next {
            Some(value) => {
                debug!(
                    update = %update.name,
                    target = %update.target,
                    field = %update.field,
                    "applying view update"
                );
                batch.push(update.target.clone(), Fields::from([(update.field.clone(), value)]));
            }
            None => {
                debug!(update = %update.name, target = %update.target, "view already up to date")
            }
        }
        Ok(())
    }
}

fn contains_reference(items: &[Value], key: &EntityKey) -> bool {
    items.iter().any(|item| item.as_reference() == Some(key))
}
