//! Shared fixtures: a chat cache seeded with two chats.

#![allow(dead_code)]

use normcache_core::schemas::chat::{
    chat_query, chats_query, message_data, register_chat_fragments,
};
use normcache_core::{
    Cache, CacheConfig, EntityKey, Fields, FragmentRegistry, MutationRequest, MutationResponse,
    MutationTransport, QueryView, TransportError, Value,
};

pub fn obj(pairs: &[(&str, Value)]) -> Fields {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn chat_key(id: &str) -> EntityKey {
    EntityKey::new("Chat", id)
}

pub fn message_key(id: &str) -> EntityKey {
    EntityKey::new("Message", id)
}

/// Route cache logs to the test output; `RUST_LOG=normcache_core=debug`
/// shows merges and mutation transitions.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn empty_cache() -> Cache {
    init_logging();
    let mut fragments = FragmentRegistry::new();
    register_chat_fragments(&mut fragments).unwrap();
    Cache::with_fragments(CacheConfig::default(), fragments).unwrap()
}

/// Chat list `[Chat:2, Chat:1]`; Chat:1 has one message and its full
/// history cached.
pub fn seeded_cache() -> Cache {
    let mut cache = empty_cache();

    let bob = obj(&[
        ("__typename", "Chat".into()),
        ("id", "2".into()),
        ("name", "Bob".into()),
        ("picture", Value::Null),
        ("lastMessage", Value::Null),
    ]);
    let alice = obj(&[
        ("__typename", "Chat".into()),
        ("id", "1".into()),
        ("name", "Alice".into()),
        ("picture", "alice.png".into()),
        ("lastMessage", Value::Object(message_data("1", "hello", 1_000))),
    ]);
    cache
        .write_view(
            &QueryView::query(chats_query()),
            &obj(&[(
                "chats",
                Value::Array(vec![Value::Object(bob), Value::Object(alice.clone())]),
            )]),
        )
        .unwrap();

    let mut full = alice;
    full.insert(
        "messages".into(),
        Value::Array(vec![Value::Object(message_data("1", "hello", 1_000))]),
    );
    cache
        .write_view(&QueryView::query(chat_query("1")), &obj(&[("chat", Value::Object(full))]))
        .unwrap();
    cache
}

pub fn add_message_response(id: &str, content: &str) -> MutationResponse {
    MutationResponse {
        data: Some(obj(&[(
            "addMessage",
            Value::Object(message_data(id, content, 2_000)),
        )])),
        errors: vec![],
    }
}

/// Transport answering every request with a fixed response, or failing
/// when it has none.
pub struct FakeTransport {
    pub response: Option<MutationResponse>,
}

impl MutationTransport for FakeTransport {
    fn send(&self, _request: &MutationRequest) -> Result<MutationResponse, TransportError> {
        self.response.clone().ok_or_else(|| "network unreachable".into())
    }
}
