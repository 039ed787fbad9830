//! Unit tests for granary-types

use crate::{Position, TrunkId};

// ============================================================================
// TrunkId Tests
// ============================================================================

#[test]
fn trunk_id_from_u32_roundtrip() {
    let id = TrunkId::new(42);
    let raw: u32 = id.into();
    assert_eq!(raw, 42);
}

#[test]
fn trunk_id_next_increments() {
    assert_eq!(TrunkId::new(0).next(), TrunkId::new(1));
    assert_eq!(TrunkId::new(7).next().as_u32(), 8);
}

#[test]
fn trunk_id_display_is_numeric() {
    assert_eq!(TrunkId::new(19).to_string(), "19");
}

// ============================================================================
// Position Tests
// ============================================================================

#[test]
fn position_packs_trunk_and_offset() {
    let pos = Position::new(TrunkId::new(3), 128);
    assert_eq!(pos.trunk(), TrunkId::new(3));
    assert_eq!(pos.offset(), 128);
    assert_eq!(pos.as_u64(), (3u64 << 32) | 128);
}

#[test]
fn position_zero_is_trunk_zero_offset_zero() {
    let pos = Position::from(0u64);
    assert_eq!(pos.trunk(), TrunkId::new(0));
    assert_eq!(pos.offset(), 0);
}

#[test]
fn position_offset_may_equal_trunk_size() {
    // An append that exactly fills a trunk reports the full trunk length
    // as its end offset before the stream rotates.
    let pos = Position::new(TrunkId::new(1), 1 << 25);
    assert_eq!(pos.offset(), 1 << 25);
    assert_eq!(pos.trunk().as_u32(), 1);
}

#[test]
fn position_max_values_roundtrip() {
    let pos = Position::new(TrunkId::new(u32::MAX), u32::MAX);
    assert_eq!(pos.trunk().as_u32(), u32::MAX);
    assert_eq!(pos.offset(), u32::MAX);
}

#[test]
fn position_le_bytes_encoding_is_stable() {
    // The on-disk layout is the little-endian u64; readers of existing
    // datasets depend on it.
    let pos = Position::new(TrunkId::new(1), 2);
    let raw = (1u64 << 32) | 2;
    assert_eq!(pos.to_le_bytes(), raw.to_le_bytes());
    assert_eq!(Position::from_le_bytes(raw.to_le_bytes()), pos);
}

#[test]
fn position_display_shows_trunk_and_offset() {
    assert_eq!(Position::new(TrunkId::new(4), 96).to_string(), "4:96");
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn position_roundtrip(trunk in any::<u32>(), offset in any::<u32>()) {
            let pos = Position::new(TrunkId::new(trunk), offset);
            prop_assert_eq!(pos.trunk().as_u32(), trunk);
            prop_assert_eq!(pos.offset(), offset);
        }

        #[test]
        fn position_le_bytes_roundtrip(raw in any::<u64>()) {
            let pos = Position::from(raw);
            prop_assert_eq!(Position::from_le_bytes(pos.to_le_bytes()), pos);
            prop_assert_eq!(pos.as_u64(), raw);
        }

        #[test]
        fn trunk_id_roundtrip(id in any::<u32>()) {
            let trunk = TrunkId::new(id);
            let raw: u32 = trunk.into();
            prop_assert_eq!(raw, id);
        }
    }
}
