//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check key derivation and the memoization protocol over
//! generated arguments.

use proptest::prelude::*;
use std::cell::Cell;
use std::collections::HashSet;

use chrono::Utc;
use tempfile::TempDir;

use crate::cache::{key, Cache, EntryMeta, Format, Manifest};
use crate::error::CacheError;

// == Strategies ==
/// Generates argument tuples with a mix of numbers and text
fn args_strategy() -> impl Strategy<Value = (i64, String)> {
    (any::<i64>(), "[a-zA-Z0-9 ,()]{0,24}")
}

/// Generates manifest keys in the shape produced by the key deriver
fn manifest_key_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,8}\\.[a-z]{1,8}\\([a-z0-9, ]{0,16}\\)"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    // Equal operation and arguments always derive the same key.
    #[test]
    fn prop_key_is_deterministic(args in args_strategy()) {
        let first = key::derive("module.op", &args, None).unwrap();
        let second = key::derive("module.op", &args.clone(), None).unwrap();
        prop_assert_eq!(first, second);
    }

    // Distinct numeric arguments never share a key under the default serialization.
    #[test]
    fn prop_distinct_numbers_distinct_keys(a in any::<i64>(), b in any::<i64>()) {
        prop_assume!(a != b);
        let first = key::derive("module.op", &(a,), None).unwrap();
        let second = key::derive("module.op", &(b,), None).unwrap();
        prop_assert_ne!(first, second);
    }

    // With a custom serializer, calls share an entry exactly when their serializations match.
    #[test]
    fn prop_custom_serializer_controls_sharing(
        calls in prop::collection::vec((0u8..4, 0u8..4), 1..24)
    ) {
        let cache = Cache::memory_only();
        let invocations = Cell::new(0usize);
        let memo = cache
            .wrap(|&(a, b): &(u8, u8)| {
                invocations.set(invocations.get() + 1);
                Ok::<_, CacheError>(u16::from(a) + u16::from(b))
            })
            .name("prop.sum")
            .serialize(|&(a, b): &(u8, u8)| Ok((u16::from(a) + u16::from(b)).to_string()));

        let mut distinct = HashSet::new();
        for (a, b) in calls {
            let result = memo.call((a, b)).unwrap();
            prop_assert_eq!(result, u16::from(a) + u16::from(b));
            distinct.insert(u16::from(a) + u16::from(b));
        }
        prop_assert_eq!(invocations.get(), distinct.len());
    }

    // Repeated calls invoke the operation at most once per distinct argument.
    #[test]
    fn prop_at_most_once_per_argument(calls in prop::collection::vec(args_strategy(), 1..16)) {
        let cache = Cache::memory_only();
        let invocations = Cell::new(0usize);
        let memo = cache
            .wrap(|(n, s): &(i64, String)| {
                invocations.set(invocations.get() + 1);
                Ok::<_, CacheError>(format!("{}:{}", n, s))
            })
            .name("prop.concat");

        let distinct: HashSet<(i64, String)> = calls.iter().cloned().collect();
        for args in calls {
            let expected = format!("{}:{}", args.0, args.1);
            prop_assert_eq!(memo.call(args).unwrap(), expected);
        }
        prop_assert_eq!(invocations.get(), distinct.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    // Every recorded key is found again after a save and a fresh load.
    #[test]
    fn prop_manifest_survives_reload(keys in prop::collection::hash_set(manifest_key_strategy(), 1..12)) {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::load(dir.path()).unwrap();
        for (i, key) in keys.iter().enumerate() {
            manifest.record(key.clone(), EntryMeta {
                path: format!("{}.json", i),
                created_at: Utc::now(),
                expires_at: None,
                format: Format::Json,
            });
        }
        manifest.save().unwrap();

        let reloaded = Manifest::load(dir.path()).unwrap();
        prop_assert_eq!(reloaded.len(), keys.len());
        for key in &keys {
            prop_assert_eq!(reloaded.lookup(key), manifest.lookup(key));
        }
    }
}
