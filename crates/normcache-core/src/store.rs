use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, trace};

use crate::error::{CacheError, Result};
use crate::event::{CacheEvent, WatchFilter};
use crate::key::EntityKey;
use crate::value::{Fields, Value};

/// What a merge did to one record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub created: bool,
    pub changed: Vec<String>,
}

impl MergeOutcome {
    pub fn is_noop(&self) -> bool {
        !self.created && self.changed.is_empty()
    }
}

/// The whole store as a serializable map, for extract/restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreSnapshot {
    pub records: BTreeMap<EntityKey, Fields>,
}

impl StoreSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug)]
struct Watcher {
    filter: WatchFilter,
    tx: Sender<CacheEvent>,
}

/// Flat map from entity key to record.
///
/// Writes go through [`NormalizedStore::merge`] or
/// [`NormalizedStore::merge_batch`], which union fields instead of replacing
/// records. Each effective change bumps the key's revision from a store-wide
/// monotonic clock.
#[derive(Debug, Default)]
pub struct NormalizedStore {
    records: BTreeMap<EntityKey, Fields>,
    revisions: HashMap<EntityKey, u64>,
    clock: u64,
    watchers: Vec<Watcher>,
}

impl NormalizedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &EntityKey) -> Option<&Fields> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.records.keys()
    }

    /// Revision of the last effective change to `key`.
    pub fn revision(&self, key: &EntityKey) -> Option<u64> {
        self.revisions.get(key).copied()
    }

    /// Shallow field union into the record under `key`.
    pub fn merge(&mut self, key: &EntityKey, partial: Fields) -> Result<MergeOutcome> {
        let mut outcomes = self.merge_batch(vec![(key.clone(), partial)])?;
        Ok(outcomes
            .pop()
            .map(|(_, outcome)| outcome)
            .unwrap_or_default())
    }

    /// Merge several writes atomically.
    ///
    /// All writes are checked for conflicting field kinds, against the store
    /// and against each other, before any is applied.
    pub fn merge_batch(
        &mut self,
        writes: Vec<(EntityKey, Fields)>,
    ) -> Result<Vec<(EntityKey, MergeOutcome)>> {
        let mut combined: BTreeMap<EntityKey, Fields> = BTreeMap::new();
        // Last non-null value written to each field, so a later null in the
        // same batch cannot hide an earlier conflicting write.
        let mut written: HashMap<(EntityKey, String), Value> = HashMap::new();
        for (key, fields) in writes {
            let existing = self.records.get(&key);
            let pending = combined.entry(key.clone()).or_default();
            for (name, value) in fields {
                if let Some(current) = existing.and_then(|record| record.get(&name)) {
                    check_compatible(&key, &name, current, &value)?;
                }
                let slot = (key.clone(), name);
                if let Some(prev) = written.get(&slot) {
                    check_compatible(&key, &slot.1, prev, &value)?;
                }
                if value != Value::Null {
                    written.insert(slot.clone(), value.clone());
                }
                pending.insert(slot.1, value);
            }
        }

        let mut outcomes = Vec::with_capacity(combined.len());
        for (key, fields) in combined {
            let outcome = self.apply(&key, fields);
            outcomes.push((key, outcome));
        }
        Ok(outcomes)
    }

    fn apply(&mut self, key: &EntityKey, fields: Fields) -> MergeOutcome {
        let created = !self.records.contains_key(key);
        let record = self.records.entry(key.clone()).or_default();
        let mut changed = Vec::new();
        for (name, value) in fields {
            if record.get(&name) != Some(&value) {
                changed.push(name.clone());
                record.insert(name, value);
            }
        }

        let outcome = MergeOutcome { created, changed };
        if !outcome.is_noop() {
            self.bump(key);
            debug!(key = %key, created, fields = ?outcome.changed, "merged record");
            self.notify(CacheEvent::Written {
                key: key.clone(),
                fields: outcome.changed.clone(),
                created,
            });
        }
        outcome
    }

    /// Remove `key` and every reference to it. List entries pointing at the
    /// key are dropped; single references become null.
    pub fn evict(&mut self, key: &EntityKey) -> bool {
        if self.remove(key).is_none() {
            return false;
        }

        let mut touched = Vec::new();
        for (owner, record) in self.records.iter_mut() {
            let fields: Vec<String> = record
                .iter_mut()
                .filter_map(|(name, value)| value.strip_reference(key).then(|| name.clone()))
                .collect();
            if !fields.is_empty() {
                touched.push((owner.clone(), fields));
            }
        }

        debug!(key = %key, referrers = touched.len(), "evicted record");
        for (owner, fields) in touched {
            self.touch(&owner, fields);
        }
        true
    }

    /// Rewrite every reference to `from` so it points at `to`.
    /// Returns the keys of the records that changed.
    pub fn replace_references(&mut self, from: &EntityKey, to: &EntityKey) -> Vec<EntityKey> {
        let mut touched = Vec::new();
        for (owner, record) in self.records.iter_mut() {
            let fields: Vec<String> = record
                .iter_mut()
                .filter_map(|(name, value)| value.replace_reference(from, to).then(|| name.clone()))
                .collect();
            if !fields.is_empty() {
                touched.push((owner.clone(), fields));
            }
        }

        debug!(from = %from, to = %to, referrers = touched.len(), "rewrote references");
        let keys = touched.iter().map(|(owner, _)| owner.clone()).collect();
        for (owner, fields) in touched {
            self.touch(&owner, fields);
        }
        keys
    }

    /// Drop one record without touching references to it.
    pub(crate) fn remove(&mut self, key: &EntityKey) -> Option<Fields> {
        let removed = self.records.remove(key)?;
        self.revisions.remove(key);
        self.notify(CacheEvent::Evicted(key.clone()));
        Some(removed)
    }

    /// Put back a record exactly as captured in a pre-image.
    /// Nothing is bumped or emitted when the record already matches.
    pub(crate) fn restore_record(&mut self, key: &EntityKey, fields: Fields) {
        if self.records.get(key) == Some(&fields) {
            return;
        }
        let names = fields.keys().cloned().collect();
        let created = self.records.insert(key.clone(), fields).is_none();
        self.bump(key);
        self.notify(CacheEvent::Written {
            key: key.clone(),
            fields: names,
            created,
        });
    }

    /// Empty the store. Revisions keep counting from where they were.
    pub fn clear(&mut self) {
        self.records.clear();
        self.revisions.clear();
        debug!("cleared store");
        self.notify(CacheEvent::Cleared);
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            records: self.records.clone(),
        }
    }

    /// Replace the whole store with `snapshot`.
    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        self.records = snapshot.records;
        self.revisions.clear();
        let keys: Vec<EntityKey> = self.records.keys().cloned().collect();
        for key in &keys {
            self.bump(key);
        }
        debug!(records = keys.len(), "restored store");
        self.notify(CacheEvent::Restored);
    }

    /// Subscribe to changes. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self, filter: WatchFilter) -> Receiver<CacheEvent> {
        let (tx, rx) = mpsc::channel();
        self.watchers.push(Watcher { filter, tx });
        rx
    }

    fn touch(&mut self, key: &EntityKey, fields: Vec<String>) {
        self.bump(key);
        self.notify(CacheEvent::Written {
            key: key.clone(),
            fields,
            created: false,
        });
    }

    fn bump(&mut self, key: &EntityKey) {
        self.clock += 1;
        self.revisions.insert(key.clone(), self.clock);
    }

    fn notify(&mut self, event: CacheEvent) {
        let before = self.watchers.len();
        self.watchers
            .retain(|w| !w.filter.matches(&event) || w.tx.send(event.clone()).is_ok());
        if self.watchers.len() != before {
            trace!(dropped = before - self.watchers.len(), "dropped closed watchers");
        }
    }
}

fn check_compatible(
    key: &EntityKey,
    field: &str,
    existing: &Value,
    incoming: &Value,
) -> Result<()> {
    if existing.is_compatible_with(incoming) {
        Ok(())
    } else {
        Err(CacheError::SchemaMismatch {
            key: key.clone(),
            field: field.to_string(),
            existing: existing.kind(),
            incoming: incoming.kind(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueKind;

    fn key(t: &str, id: &str) -> EntityKey {
        EntityKey::new(t, id)
    }

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn merge_creates_then_unions() {
        let mut store = NormalizedStore::new();
        let k = key("Message", "1");

        let outcome = store
            .merge(&k, fields(&[("content", "hi".into())]))
            .unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.changed, vec!["content".to_string()]);

        let outcome = store
            .merge(&k, fields(&[("createdAt", Value::Int(100))]))
            .unwrap();
        assert!(!outcome.created);

        let record = store.get(&k).unwrap();
        assert_eq!(record.get("content"), Some(&Value::String("hi".into())));
        assert_eq!(record.get("createdAt"), Some(&Value::Int(100)));
    }

    #[test]
    fn merge_overwrites_matching_fields_only() {
        let mut store = NormalizedStore::new();
        let k = key("Chat", "1");
        store
            .merge(&k, fields(&[("name", "Ethan".into()), ("picture", "a.png".into())]))
            .unwrap();
        store.merge(&k, fields(&[("name", "Bryan".into())])).unwrap();
        let record = store.get(&k).unwrap();
        assert_eq!(record.get("name"), Some(&Value::String("Bryan".into())));
        assert_eq!(record.get("picture"), Some(&Value::String("a.png".into())));
    }

    #[test]
    fn identical_merge_is_noop_and_keeps_revision() {
        let mut store = NormalizedStore::new();
        let k = key("Message", "1");
        store.merge(&k, fields(&[("content", "hi".into())])).unwrap();
        let rev = store.revision(&k);
        let outcome = store.merge(&k, fields(&[("content", "hi".into())])).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(store.revision(&k), rev);
    }

    #[test]
    fn mismatched_kind_fails_without_partial_apply() {
        let mut store = NormalizedStore::new();
        let chat = key("Chat", "1");
        let msg = key("Message", "1");
        store.merge(&chat, fields(&[("name", "Ethan".into())])).unwrap();

        let err = store
            .merge_batch(vec![
                (msg.clone(), fields(&[("content", "hi".into())])),
                (chat.clone(), fields(&[("name", Value::Int(3))])),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::SchemaMismatch {
                existing: ValueKind::String,
                incoming: ValueKind::Int,
                ..
            }
        ));
        assert!(!store.contains(&msg));
        assert_eq!(
            store.get(&chat).unwrap().get("name"),
            Some(&Value::String("Ethan".into()))
        );
    }

    #[test]
    fn conflicting_writes_inside_one_batch_fail() {
        let mut store = NormalizedStore::new();
        let k = key("Chat", "1");
        let err = store
            .merge_batch(vec![
                (k.clone(), fields(&[("name", "a".into())])),
                (k.clone(), fields(&[("name", Value::Bool(true))])),
            ])
            .unwrap_err();
        assert!(matches!(err, CacheError::SchemaMismatch { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn null_in_batch_does_not_hide_conflict_with_stored_value() {
        let mut store = NormalizedStore::new();
        let k = key("Chat", "1");
        store.merge(&k, fields(&[("name", "Alice".into())])).unwrap();
        let before = store.snapshot();

        let err = store
            .merge_batch(vec![
                (k.clone(), fields(&[("name", Value::Int(1))])),
                (k.clone(), fields(&[("name", Value::Null)])),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::SchemaMismatch {
                existing: ValueKind::String,
                incoming: ValueKind::Int,
                ..
            }
        ));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn null_in_batch_does_not_hide_conflict_within_batch() {
        let mut store = NormalizedStore::new();
        let k = key("Chat", "1");
        let err = store
            .merge_batch(vec![
                (k.clone(), fields(&[("name", Value::Int(1))])),
                (k.clone(), fields(&[("name", Value::Null)])),
                (k.clone(), fields(&[("name", "Alice".into())])),
            ])
            .unwrap_err();
        assert!(matches!(err, CacheError::SchemaMismatch { .. }));
        assert!(store.is_empty());
    }

    #[test]
    fn restoring_an_unchanged_record_is_silent() {
        let mut store = NormalizedStore::new();
        let k = key("Chat", "1");
        store.merge(&k, fields(&[("name", "Alice".into())])).unwrap();
        let revision = store.revision(&k);
        let rx = store.subscribe(WatchFilter::All);

        store.restore_record(&k, fields(&[("name", "Alice".into())]));
        assert_eq!(store.revision(&k), revision);
        assert!(rx.try_recv().is_err());

        store.restore_record(&k, fields(&[("name", "Bob".into())]));
        assert!(store.revision(&k) > revision);
        assert!(matches!(rx.try_recv(), Ok(CacheEvent::Written { .. })));
    }

    #[test]
    fn null_and_numeric_widening_are_allowed() {
        let mut store = NormalizedStore::new();
        let k = key("Message", "1");
        store.merge(&k, fields(&[("createdAt", Value::Int(1))])).unwrap();
        store.merge(&k, fields(&[("createdAt", Value::Float(1.5))])).unwrap();
        store.merge(&k, fields(&[("createdAt", Value::Null)])).unwrap();
        store.merge(&k, fields(&[("createdAt", "later".into())])).unwrap();
    }

    #[test]
    fn evict_strips_list_entries_and_pointers() {
        let mut store = NormalizedStore::new();
        let chat = key("Chat", "1");
        let m1 = key("Message", "1");
        let m2 = key("Message", "2");
        store.merge(&m1, fields(&[("content", "a".into())])).unwrap();
        store.merge(&m2, fields(&[("content", "b".into())])).unwrap();
        store
            .merge(
                &chat,
                fields(&[
                    ("lastMessage", Value::reference(m2.clone())),
                    (
                        "messages",
                        Value::Array(vec![
                            Value::reference(m1.clone()),
                            Value::reference(m2.clone()),
                        ]),
                    ),
                ]),
            )
            .unwrap();

        assert!(store.evict(&m2));
        assert!(!store.contains(&m2));
        let record = store.get(&chat).unwrap();
        assert_eq!(record.get("lastMessage"), Some(&Value::Null));
        assert_eq!(
            record.get("messages"),
            Some(&Value::Array(vec![Value::reference(m1.clone())]))
        );
        assert!(!store.evict(&m2));
    }

    #[test]
    fn replace_references_rewrites_every_referrer() {
        let mut store = NormalizedStore::new();
        let temp = key("Message", "temp-1");
        let real = key("Message", "9");
        let chat = key("Chat", "1");
        store
            .merge(
                &chat,
                fields(&[
                    ("lastMessage", Value::reference(temp.clone())),
                    ("messages", Value::Array(vec![Value::reference(temp.clone())])),
                ]),
            )
            .unwrap();
        let touched = store.replace_references(&temp, &real);
        assert_eq!(touched, vec![chat.clone()]);
        let record = store.get(&chat).unwrap();
        assert_eq!(record.get("lastMessage"), Some(&Value::reference(real.clone())));
    }

    #[test]
    fn subscribers_receive_matching_events() {
        let mut store = NormalizedStore::new();
        let watched = key("Chat", "1");
        let rx = store.subscribe(WatchFilter::keys([watched.clone()]));
        let all = store.subscribe(WatchFilter::All);

        store.merge(&key("Chat", "2"), fields(&[("name", "x".into())])).unwrap();
        store.merge(&watched, fields(&[("name", "y".into())])).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.key(), Some(&watched));
        assert!(rx.try_recv().is_err());
        assert_eq!(all.try_iter().count(), 2);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let mut store = NormalizedStore::new();
        drop(store.subscribe(WatchFilter::All));
        store.merge(&key("Chat", "1"), fields(&[("name", "x".into())])).unwrap();
        assert!(store.watchers.is_empty());
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut store = NormalizedStore::new();
        store
            .merge(&key("Message", "1"), fields(&[("content", "hi".into())]))
            .unwrap();
        let snapshot = store.snapshot();
        let json = snapshot.to_json().unwrap();

        store.clear();
        assert!(store.is_empty());

        store.restore(StoreSnapshot::from_json(&json).unwrap());
        assert_eq!(store.snapshot(), snapshot);
        assert!(store.revision(&key("Message", "1")).is_some());
    }

    #[test]
    fn clear_keeps_clock_monotonic() {
        let mut store = NormalizedStore::new();
        let k = key("Message", "1");
        store.merge(&k, fields(&[("content", "a".into())])).unwrap();
        let first = store.revision(&k).unwrap();
        store.clear();
        store.merge(&k, fields(&[("content", "a".into())])).unwrap();
        assert!(store.revision(&k).unwrap() > first);
    }
}
