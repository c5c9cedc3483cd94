//! Property-based tests for the string codec and capacity planner
//!
//! Uses proptest to check the layout invariants across random strings,
//! start blocks and media profiles.

use cardstore_rs::core::codec::encode_with_format;
use cardstore_rs::core::planner::usable_block_count;
use cardstore_rs::{
    available_bytes_from, decode, encode, usable_blocks_from, Block, CardError, HeaderFormat,
    MediaProfile, Result, Role,
};
use proptest::prelude::*;
use std::collections::HashMap;

fn profile_strategy() -> impl Strategy<Value = MediaProfile> {
    prop_oneof![
        Just(MediaProfile::MINI),
        Just(MediaProfile::CLASSIC_1K),
        Just(MediaProfile::CLASSIC_4K),
    ]
}

/// Classic media plus unknown media large enough that a short legacy
/// header also parses as a plausible 4-byte length
fn legacy_profile_strategy() -> impl Strategy<Value = MediaProfile> {
    prop_oneof![
        profile_strategy(),
        Just(MediaProfile::unknown(6528).unwrap()),
        Just(MediaProfile::unknown(64_128).unwrap()),
    ]
}

/// First data block at or after `raw`, wrapped into the medium
fn data_start(profile: &MediaProfile, raw: u32) -> Option<u32> {
    usable_blocks_from(raw % profile.total_blocks, profile).next()
}

/// Longest prefix of `text` that fits in `budget` bytes
fn fit(text: &str, budget: usize) -> String {
    let mut out = String::new();
    for c in text.chars() {
        if out.len() + c.len_utf8() > budget {
            break;
        }
        out.push(c);
    }
    out
}

fn write_all(blocks: &[(u32, Block)]) -> HashMap<u32, Block> {
    blocks.iter().copied().collect()
}

fn read_back(medium: &HashMap<u32, Block>, start: u32, profile: &MediaProfile) -> Result<String> {
    let mut reader =
        |index: u32| -> Result<Block> { Ok(medium.get(&index).copied().unwrap_or([0u8; 16])) };
    decode(&mut reader, start, profile)
}

proptest! {
    #[test]
    fn prop_round_trip(
        profile in profile_strategy(),
        raw_start in 0u32..256,
        text in "\\PC{0,400}",
    ) {
        let start = data_start(&profile, raw_start);
        prop_assume!(start.is_some());
        let start = start.unwrap();

        let text = fit(&text, available_bytes_from(start, &profile, HeaderFormat::Current));
        let plan = encode(&text, start, &profile).unwrap();
        let medium = write_all(&plan.blocks);

        prop_assert_eq!(read_back(&medium, start, &profile).unwrap(), text);
    }

    #[test]
    fn prop_plan_never_touches_reserved_blocks(
        profile in profile_strategy(),
        raw_start in 0u32..256,
        len in 0usize..1200,
    ) {
        let start = data_start(&profile, raw_start);
        prop_assume!(start.is_some());
        let start = start.unwrap();

        let len = len.min(available_bytes_from(start, &profile, HeaderFormat::Current));
        let plan = encode(&"r".repeat(len), start, &profile).unwrap();

        prop_assert_eq!(plan.blocks[0].0, start);
        for window in plan.blocks.windows(2) {
            prop_assert!(window[0].0 < window[1].0);
        }
        for (index, _) in &plan.blocks {
            prop_assert_eq!(profile.role_of(*index).unwrap(), Role::Data);
        }
    }

    #[test]
    fn prop_capacity_non_increasing(
        profile in profile_strategy(),
        a in 0u32..256,
        b in 0u32..256,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        for format in [HeaderFormat::Legacy, HeaderFormat::Current] {
            let from_lo = available_bytes_from(lo, &profile, format);
            let from_hi = available_bytes_from(hi, &profile, format);
            prop_assert!(from_lo >= from_hi);
        }
        prop_assert!(usable_block_count(lo, &profile) >= usable_block_count(hi, &profile));
    }

    #[test]
    fn prop_overflow_by_one_rejected(
        profile in profile_strategy(),
        raw_start in 0u32..256,
    ) {
        let start = data_start(&profile, raw_start);
        prop_assume!(start.is_some());
        let start = start.unwrap();

        let budget = available_bytes_from(start, &profile, HeaderFormat::Current);
        let result = encode(&"o".repeat(budget + 1), start, &profile);
        let is_capacity_error = matches!(result, Err(CardError::Capacity { .. }));
        prop_assert!(is_capacity_error);
    }

    #[test]
    fn prop_legacy_detected_without_hint(
        profile in legacy_profile_strategy(),
        raw_start in 0u32..256,
        text in "[a-zA-Z0-9 ]{0,300}",
    ) {
        let start = data_start(&profile, raw_start);
        prop_assume!(start.is_some());
        let start = start.unwrap();

        let text = fit(&text, available_bytes_from(start, &profile, HeaderFormat::Legacy));
        let plan = encode_with_format(&text, start, &profile, HeaderFormat::Legacy).unwrap();
        let medium = write_all(&plan.blocks);

        prop_assert_eq!(read_back(&medium, start, &profile).unwrap(), text);
    }
}
