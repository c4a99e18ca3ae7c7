//! Algebraic law property tests for `Cause`.
//!
//! # Laws Tested
//!
//! - `combine` is associative
//! - `Empty` is the identity of `combine`
//! - `concurrent` is commutative under equality
//! - `failures` of a combination is the concatenation of both sides
//! - `map` preserves structure (identity and composition)

#[macro_use]
mod common;

use common::{init_test_logging, test_proptest_config};
use proptest::prelude::*;
use strand::types::{Cause, Defect, FiberId, Time};

// ============================================================================
// Arbitrary Implementations for proptest
// ============================================================================

fn arb_time() -> impl Strategy<Value = Time> {
    (0u64..1_000_000).prop_map(Time::from_millis)
}

fn arb_fiber_id() -> impl Strategy<Value = FiberId> {
    prop_oneof![
        Just(FiberId::None),
        (0u64..64, arb_time()).prop_map(|(id, time)| FiberId::new(id, time)),
    ]
}

fn arb_leaf() -> impl Strategy<Value = Cause<i32>> {
    prop_oneof![
        Just(Cause::Empty),
        (arb_time(), any::<i32>()).prop_map(|(time, error)| Cause::expected(time, error)),
        (arb_time(), "[a-z]{1,8}")
            .prop_map(|(time, message)| Cause::unexpected(time, Defect::new(message))),
        (arb_time(), arb_fiber_id()).prop_map(|(time, fiber)| Cause::interrupted(time, fiber)),
    ]
}

fn arb_cause() -> impl Strategy<Value = Cause<i32>> {
    arb_leaf().prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a.combine(b)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Cause::concurrent(a, b)),
            (inner, "[a-z]{1,6}").prop_map(|(cause, label)| cause.traced(label)),
        ]
    })
}

// ============================================================================
// Monoid Laws
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(300))]

    #[test]
    fn combine_is_associative(a in arb_cause(), b in arb_cause(), c in arb_cause()) {
        init_test_logging();
        let left = a.clone().combine(b.clone()).combine(c.clone());
        let right = a.combine(b.combine(c));
        prop_assert_eq!(left, right);
    }

    #[test]
    fn empty_is_identity(a in arb_cause()) {
        init_test_logging();
        prop_assert_eq!(Cause::Empty.combine(a.clone()), a.clone());
        prop_assert_eq!(a.clone().combine(Cause::Empty), a);
    }

    #[test]
    fn concurrent_is_commutative(a in arb_cause(), b in arb_cause()) {
        init_test_logging();
        prop_assert_eq!(
            Cause::concurrent(a.clone(), b.clone()),
            Cause::concurrent(b, a)
        );
    }

    #[test]
    fn combine_concatenates_failures(a in arb_cause(), b in arb_cause()) {
        init_test_logging();
        let mut expected: Vec<i32> = a.failures().into_iter().copied().collect();
        expected.extend(b.failures().into_iter().copied());
        let combined = a.combine(b);
        let actual: Vec<i32> = combined.failures().into_iter().copied().collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn combine_keeps_every_interruptor(a in arb_cause(), b in arb_cause()) {
        init_test_logging();
        let count = a.interruptors().len() + b.interruptors().len();
        let combined = a.combine(b);
        prop_assert_eq!(combined.interruptors().len(), count);
    }
}

// ============================================================================
// Functor Laws
// ============================================================================

proptest! {
    #![proptest_config(test_proptest_config(200))]

    #[test]
    fn map_identity(a in arb_cause()) {
        init_test_logging();
        prop_assert_eq!(a.clone().map(|e| e), a);
    }

    #[test]
    fn map_composition(a in arb_cause()) {
        init_test_logging();
        let f = |e: i32| i64::from(e) * 2;
        let g = |e: i64| e - 1;
        let composed = a.clone().map(|e| g(f(e)));
        let chained = a.map(f).map(g);
        prop_assert_eq!(composed, chained);
    }

    #[test]
    fn map_keeps_defects_and_interruptions(a in arb_cause()) {
        init_test_logging();
        let defects = a.defects().len();
        let interruptors = a.interruptors();
        let mapped = a.map(|e| e.to_string());
        prop_assert_eq!(mapped.defects().len(), defects);
        prop_assert_eq!(mapped.interruptors(), interruptors);
    }
}

#[test]
fn interruption_only_cause_is_recognized() {
    init_test_logging();
    test_phase!("interruption_only_cause_is_recognized");
    let by = FiberId::new(3, Time::ZERO);
    let only: Cause<i32> = Cause::interrupted(Time::from_millis(1), by)
        .combine(Cause::interrupted(Time::from_millis(2), FiberId::None));
    assert_with_log!(only.is_interrupted_only(), "only interruptions", true, only.is_interrupted_only());
    let mixed = only.clone().combine(Cause::expected(Time::ZERO, 7));
    assert_with_log!(!mixed.is_interrupted_only(), "mixed", false, mixed.is_interrupted_only());
    assert_with_log!(mixed.is_interrupted(), "still interrupted", true, mixed.is_interrupted());
    test_complete!("interruption_only_cause_is_recognized");
}
