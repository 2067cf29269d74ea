use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::event::{CacheEvent, WatchFilter};
use crate::fragment::{Fragment, FragmentRegistry};
use crate::key::{EntityKey, Identity};
use crate::mutation::{MutationId, PendingMutation};
use crate::store::{NormalizedStore, StoreSnapshot};
use crate::value::Fields;
use crate::view::{Denormalizer, Normalizer, QueryView, WriteBatch};

/// The client cache: one store, the fragments that describe its entities,
/// and the mutations awaiting a result.
///
/// A `Cache` is an explicit object passed to readers and writers. Every
/// operation takes `&self` or `&mut self`, so writes are serialized by the
/// borrow checker.
pub struct Cache {
    pub(crate) config: CacheConfig,
    pub(crate) identity: Identity,
    pub(crate) fragments: FragmentRegistry,
    pub(crate) store: NormalizedStore,
    pub(crate) pending: HashMap<MutationId, PendingMutation>,
}

impl Cache {
    /// Create an empty cache after validating `config`.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_fragments(config, FragmentRegistry::new())
    }

    pub fn with_fragments(config: CacheConfig, fragments: FragmentRegistry) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            identity: Identity::new(&config.identity),
            config,
            fragments,
            store: NormalizedStore::new(),
            pending: HashMap::new(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn fragments(&self) -> &FragmentRegistry {
        &self.fragments
    }

    pub fn store(&self) -> &NormalizedStore {
        &self.store
    }

    pub fn register_fragment(&mut self, fragment: Fragment) -> Result<()> {
        Ok(self.fragments.register(fragment)?)
    }

    pub fn query_root(&self) -> EntityKey {
        EntityKey::root(&self.config.roots.query)
    }

    pub fn mutation_root(&self) -> EntityKey {
        EntityKey::root(&self.config.roots.mutation)
    }

    /// Key of a result object under the configured identity policy.
    pub fn identify(
        &self,
        fields: &Fields,
        typename_hint: Option<&str>,
    ) -> Result<Option<EntityKey>> {
        self.identity.identify(fields, typename_hint)
    }

    pub(crate) fn fragment(&self, name: &str) -> Result<&Fragment> {
        self.fragments
            .get(name)
            .ok_or_else(|| CacheError::UnknownFragment(name.to_string()))
    }

    /// Read the fields `fragment` declares from the entity under `key`.
    pub fn read_fragment(&self, fragment: &str, key: &EntityKey) -> Result<Fields> {
        let selection = &self.fragment(fragment)?.selection;
        self.reader().read_entity(key, selection)
    }

    /// Merge the fields `fragment` declares from `value` into the entity
    /// under `key`. Fields the fragment does not declare are left alone.
    pub fn write_fragment(
        &mut self,
        fragment: &str,
        key: &EntityKey,
        value: &Fields,
    ) -> Result<()> {
        let batch = self.fragment_batch(fragment, key, value)?;
        self.store.merge_batch(batch.into_writes())?;
        Ok(())
    }

    pub(crate) fn fragment_batch(
        &self,
        fragment: &str,
        key: &EntityKey,
        value: &Fields,
    ) -> Result<WriteBatch> {
        let fragment = self.fragment(fragment)?;
        if key.typename() != fragment.type_condition {
            return Err(CacheError::FragmentTypeMismatch {
                fragment: fragment.name.clone(),
                expected: fragment.type_condition.clone(),
                key: key.clone(),
            });
        }
        let mut batch = WriteBatch::default();
        self.writer().write_entity(
            key,
            Some(&fragment.type_condition),
            value,
            &fragment.selection,
            &mut batch,
        )?;
        Ok(batch)
    }

    /// Denormalize `view` from the store.
    pub fn read_view(&self, view: &QueryView) -> Result<Fields> {
        let root = self.view_root(view);
        self.reader().read_entity(&root, &view.selection)
    }

    /// Normalize `data` into the store along the shape of `view`.
    pub fn write_view(&mut self, view: &QueryView, data: &Fields) -> Result<()> {
        let root = self.view_root(view);
        let typename = (!root.is_root()).then(|| root.typename().to_string());
        let mut batch = WriteBatch::default();
        self.writer()
            .write_entity(&root, typename.as_deref(), data, &view.selection, &mut batch)?;
        let outcomes = self.store.merge_batch(batch.into_writes())?;
        debug!(root = %root, records = outcomes.len(), "wrote view");
        Ok(())
    }

    /// Remove an entity and every reference to it.
    pub fn evict(&mut self, key: &EntityKey) -> bool {
        self.store.evict(key)
    }

    /// Drop every record and every pending mutation.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.store.clear();
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        self.store.restore(snapshot);
    }

    /// Be notified whenever a matching record changes.
    pub fn subscribe(&mut self, filter: WatchFilter) -> Receiver<CacheEvent> {
        self.store.subscribe(filter)
    }

    fn view_root(&self, view: &QueryView) -> EntityKey {
        view.root.clone().unwrap_or_else(|| self.query_root())
    }

    pub(crate) fn reader(&self) -> Denormalizer<'_> {
        Denormalizer {
            store: &self.store,
            fragments: &self.fragments,
        }
    }

    pub(crate) fn writer(&self) -> Normalizer<'_> {
        Normalizer {
            identity: &self.identity,
            fragments: &self.fragments,
        }
    }
}
