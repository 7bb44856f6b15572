#![allow(dead_code)]

use proptest::prelude::*;

/// Stage durations in whole hours: (germination, blackout, light). Blackout may be
/// zero, which makes the recipe skip it.
pub fn stage_hours_strategy() -> impl Strategy<Value = (u32, u32, u32)> {
    (24u32..=240, prop_oneof![Just(0u32), 24u32..=120], 24u32..=240)
}

/// Delay after the final due time before the dispatcher catches up
pub fn catch_up_hours_strategy() -> impl Strategy<Value = u32> {
    0u32..=72
}

/// Share of the light period elapsed before a manual harvest, away from the
/// rejection threshold
pub fn elapsed_ratio_strategy() -> impl Strategy<Value = f64> {
    prop_oneof![0.05f64..0.85, 0.95f64..1.5]
}

/// Manual operations on one crop: `true` advances, `false` reverts, each after the
/// given number of hours
pub fn transition_ops_strategy() -> impl Strategy<Value = Vec<(bool, u32)>> {
    prop::collection::vec((any::<bool>(), 0u32..=240), 1..24)
}
