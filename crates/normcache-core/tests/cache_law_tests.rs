//! Property tests for the cache laws
//!
//! Round-trip, no-clobber between sibling fragments, idempotent mutation
//! results, and key injectivity.

mod common;

use common::{empty_cache, message_key, obj, seeded_cache};
use normcache_core::schemas::chat::{add_message, message_data, MESSAGE};
use normcache_core::{EntityKey, Fragment, SelectionSet, Value};
use proptest::prelude::*;

fn message_meta() -> Fragment {
    Fragment::new(
        "MessageMeta",
        "Message",
        SelectionSet::new().field("id").field("sender").field("read"),
    )
}

proptest! {
    #[test]
    fn test_fragment_round_trip(
        id in "[a-z0-9]{1,8}",
        content in "[a-zA-Z0-9 ,.!?]{0,40}",
        created_at in any::<i64>(),
    ) {
        let mut cache = empty_cache();
        let key = message_key(&id);
        let mut message = message_data(&id, &content, created_at);
        cache.write_fragment(MESSAGE, &key, &message).unwrap();

        message.remove("__typename");
        prop_assert_eq!(cache.read_fragment(MESSAGE, &key).unwrap(), message);
    }

    #[test]
    fn test_sibling_fragment_never_clobbers(
        id in "[a-z0-9]{1,8}",
        content in "[a-z ]{0,20}",
        sender in "[A-Z][a-z]{0,10}",
        read in any::<bool>(),
    ) {
        let mut cache = empty_cache();
        cache.register_fragment(message_meta()).unwrap();
        let key = message_key(&id);

        cache
            .write_fragment(MESSAGE, &key, &message_data(&id, &content, 7))
            .unwrap();
        let before = cache.read_fragment(MESSAGE, &key).unwrap();

        cache
            .write_fragment(
                "MessageMeta",
                &key,
                &obj(&[
                    ("id", id.as_str().into()),
                    ("sender", sender.as_str().into()),
                    ("read", read.into()),
                ]),
            )
            .unwrap();

        prop_assert_eq!(cache.read_fragment(MESSAGE, &key).unwrap(), before);
        let meta = cache.read_fragment("MessageMeta", &key).unwrap();
        prop_assert_eq!(meta.get("sender"), Some(&Value::String(sender)));
        prop_assert_eq!(meta.get("read"), Some(&Value::Bool(read)));
    }

    #[test]
    fn test_mutation_result_is_idempotent(
        id in "[0-9]{2,6}",
        content in "[a-z ]{1,20}",
        repeats in 2usize..5,
    ) {
        let mut cache = seeded_cache();
        let spec = add_message(&cache.query_root(), "1", &content);
        let message = message_data(&id, &content, 2_000);

        cache.apply_mutation_result(&spec, &message).unwrap();
        let once = cache.snapshot();
        for _ in 1..repeats {
            cache.apply_mutation_result(&spec, &message).unwrap();
        }
        prop_assert_eq!(cache.snapshot(), once);
    }

    #[test]
    fn test_keys_are_injective(
        t1 in "[A-Z][a-z]{0,6}",
        id1 in "[a-z0-9:]{0,6}",
        t2 in "[A-Z][a-z]{0,6}",
        id2 in "[a-z0-9:]{0,6}",
    ) {
        let same = t1 == t2 && id1 == id2;
        prop_assert_eq!(EntityKey::new(&t1, &id1) == EntityKey::new(&t2, &id2), same);
    }

    #[test]
    fn test_rollback_restores_any_seeded_state(content in "[a-z ]{1,20}") {
        let mut cache = seeded_cache();
        let before = cache.snapshot();
        let id = cache
            .begin_mutation(add_message(&cache.query_root(), "1", &content))
            .unwrap();
        cache.fail_mutation(id).unwrap();
        prop_assert_eq!(cache.snapshot(), before);
    }
}
