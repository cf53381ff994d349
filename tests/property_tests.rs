// SPDX-License-Identifier: MIT
//! Property-based tests using proptest
//!
//! Codec round trips, the never-grow guarantee, and merge semantics over
//! arbitrary inputs.

use std::collections::HashMap;

use proptest::prelude::*;

use respack::{
    CompressionConfig, CompressionEngine, CompressionMethod, GroupReference, ResourceEntry,
    ResourceGroup,
};

/// Bytes ranging from noise to highly repetitive text
fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..2048),
        ("[a-z ]{1,16}", 1usize..200).prop_map(|(s, n)| s.repeat(n).into_bytes()),
    ]
}

fn extension_strategy() -> impl Strategy<Value = Option<&'static str>> {
    prop_oneof![
        Just(None),
        Just(Some("txt")),
        Just(Some("png")),
        Just(Some("class")),
        Just(Some("JPG")),
    ]
}

fn method_strategy() -> impl Strategy<Value = CompressionMethod> {
    prop::sample::select(CompressionMethod::all().to_vec())
}

fn engine_strategy() -> impl Strategy<Value = CompressionEngine> {
    prop_oneof![
        Just(CompressionConfig::smart()),
        Just(CompressionConfig::fast()),
    ]
    .prop_map(CompressionEngine::new)
}

/// Entries named from a small alphabet so that collisions are common
fn group_strategy() -> impl Strategy<Value = ResourceGroup> {
    prop::collection::vec(("[a-e]", 0u64..1000), 0..12).prop_map(|items| {
        items
            .into_iter()
            .map(|(name, offset)| {
                ResourceEntry::new(name, offset, 4, CompressionMethod::GeneralPurpose, 2).unwrap()
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_compress_round_trip(
        engine in engine_strategy(),
        data in payload_strategy(),
        ext in extension_strategy(),
    ) {
        let compressed = engine.compress(&data, ext);
        let restored = engine
            .decompress(compressed.method, &compressed.data, data.len() as u64)
            .unwrap();
        prop_assert_eq!(restored, data);
    }

    #[test]
    fn prop_every_method_round_trips(
        method in method_strategy(),
        data in payload_strategy(),
    ) {
        let engine = CompressionEngine::default();
        let compressed = engine.compress_with(method, &data);
        let restored = engine
            .decompress(compressed.method, &compressed.data, data.len() as u64)
            .unwrap();
        prop_assert_eq!(restored, data);
    }

    #[test]
    fn prop_output_never_grows(
        method in method_strategy(),
        data in payload_strategy(),
    ) {
        let engine = CompressionEngine::default();
        let compressed = engine.compress_with(method, &data);
        prop_assert!(compressed.data.len() <= data.len());
        if compressed.method == CompressionMethod::Store {
            prop_assert_eq!(compressed.data, data);
        }
    }

    #[test]
    fn prop_small_inputs_are_stored(data in prop::collection::vec(any::<u8>(), 0..=16)) {
        let engine = CompressionEngine::default();
        prop_assert_eq!(engine.compress(&data, Some("txt")).method, CompressionMethod::Store);
    }

    #[test]
    fn prop_merge_last_writer_wins(a in group_strategy(), b in group_strategy()) {
        let mut merged = a.clone();
        merged.merge(&b);

        let mut expected: HashMap<&str, u64> = HashMap::new();
        for entry in a.iter().chain(b.iter()) {
            expected.insert(entry.name(), entry.data_offset());
        }

        prop_assert_eq!(merged.len(), expected.len());
        for (name, offset) in expected {
            prop_assert_eq!(merged.get(name).unwrap().data_offset(), offset);
        }

        // Names first seen in `a` keep their position
        let a_names: Vec<_> = a.names().collect();
        let merged_prefix: Vec<_> = merged.names().take(a_names.len()).collect();
        prop_assert_eq!(merged_prefix, a_names);
    }

    #[test]
    fn prop_merge_is_idempotent(a in group_strategy()) {
        let mut merged = a.clone();
        merged.merge(&a);
        prop_assert_eq!(merged, a);
    }

    #[test]
    fn prop_index_list_display_parses_back(indices in prop::collection::vec(0usize..5000, 1..8)) {
        let reference = GroupReference::Packed(indices);
        let text = reference.to_string();
        prop_assert!(!text.starts_with('E'));
        prop_assert_eq!(text.parse::<GroupReference>().unwrap(), reference);
    }
}
