use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::key::EntityKey;

/// Events emitted by the store when records change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CacheEvent {
    Written {
        key: EntityKey,
        fields: Vec<String>,
        created: bool,
    },
    Evicted(EntityKey),
    Cleared,
    Restored,
}

impl CacheEvent {
    /// The key this event concerns, or `None` for store-wide events.
    pub fn key(&self) -> Option<&EntityKey> {
        match self {
            CacheEvent::Written { key, .. } | CacheEvent::Evicted(key) => Some(key),
            CacheEvent::Cleared | CacheEvent::Restored => None,
        }
    }
}

/// Which events a subscriber receives. Store-wide events reach everyone.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum WatchFilter {
    #[default]
    All,
    Keys(BTreeSet<EntityKey>),
}

impl WatchFilter {
    pub fn keys(keys: impl IntoIterator<Item = EntityKey>) -> Self {
        WatchFilter::Keys(keys.into_iter().collect())
    }

    pub fn matches(&self, event: &CacheEvent) -> bool {
        match (self, event.key()) {
            (WatchFilter::All, _) | (_, None) => true,
            (WatchFilter::Keys(keys), Some(key)) => keys.contains(key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serde_round_trip() {
        let events = vec![
            CacheEvent::Written {
                key: EntityKey::new("Chat", "1"),
                fields: vec!["lastMessage".into()],
                created: false,
            },
            CacheEvent::Evicted(EntityKey::new("Message", "1")),
            CacheEvent::Cleared,
        ];
        for e in &events {
            let json = serde_json::to_string(e).unwrap();
            let back: CacheEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(*e, back);
        }
    }

    #[test]
    fn key_filter_passes_store_wide_events() {
        let filter = WatchFilter::keys([EntityKey::new("Chat", "1")]);
        assert!(filter.matches(&CacheEvent::Evicted(EntityKey::new("Chat", "1"))));
        assert!(!filter.matches(&CacheEvent::Evicted(EntityKey::new("Chat", "2"))));
        assert!(filter.matches(&CacheEvent::Cleared));
        assert!(WatchFilter::All.matches(&CacheEvent::Evicted(EntityKey::new("Chat", "2"))));
    }
}
