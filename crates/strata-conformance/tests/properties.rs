#![forbid(unsafe_code)]

//! Property suite for the engine's quantified invariants: mask/set
//! agreement, the cell monoid laws, join/merge key semantics, reduction
//! consistency, roll-forward boundedness, and sort stability.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use strata_cell::{AbsDiff, Additive, Cell, F64Field};
use strata_conformance::{keys_of, series_of};
use strata_frame::Series;
use strata_mask::Mask;
use strata_reduce::Mean;

// ---------------------------------------------------------------------------
// Strategy generators
// ---------------------------------------------------------------------------

fn arb_bits() -> impl Strategy<Value = BTreeSet<usize>> {
    proptest::collection::btree_set(0_usize..512, 0..48)
}

fn arb_cell() -> impl Strategy<Value = Cell<f64>> {
    prop_oneof![
        3 => (-1.0e6_f64..1.0e6_f64).prop_map(Cell::Value),
        1 => Just(Cell::NA),
        1 => Just(Cell::NM),
    ]
}

fn arb_pairs(max_len: usize) -> impl Strategy<Value = Vec<(i64, Cell<f64>)>> {
    proptest::collection::vec((0_i64..20, arb_cell()), 0..max_len)
}

fn mask_from(bits: &BTreeSet<usize>) -> Mask {
    bits.iter().copied().collect()
}

// ---------------------------------------------------------------------------
// Mask invariants
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn mask_round_trips_through_bit_sets(bits in arb_bits()) {
        let mask = mask_from(&bits);
        prop_assert_eq!(mask.to_vec(), bits.iter().copied().collect::<Vec<_>>());
        prop_assert_eq!(mask.size(), bits.len());
        prop_assert_eq!(mask.min(), bits.iter().next().copied());
        prop_assert_eq!(mask.max(), bits.iter().next_back().copied());
    }

    #[test]
    fn mask_algebra_matches_set_logic(a in arb_bits(), b in arb_bits()) {
        let (ma, mb) = (mask_from(&a), mask_from(&b));
        let union = &ma | &mb;
        let both = &ma & &mb;
        let diff = &ma - &mb;
        for bit in 0..520_usize {
            prop_assert_eq!(union.contains(bit), a.contains(&bit) || b.contains(&bit));
            prop_assert_eq!(both.contains(bit), a.contains(&bit) && b.contains(&bit));
            prop_assert_eq!(diff.contains(bit), a.contains(&bit) && !b.contains(&bit));
        }
        prop_assert_eq!(union.size(), a.union(&b).count());
        prop_assert_eq!(both.size(), a.intersection(&b).count());
        prop_assert_eq!(diff.size(), a.difference(&b).count());
    }

    #[test]
    fn mask_equality_survives_backing_growth(bits in arb_bits(), extra in 512_usize..4096) {
        let a = mask_from(&bits);
        let mut b = a.clone();
        b.insert(extra);
        b.remove(extra);
        // The backings now differ in length; the sets do not.
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.size(), b.size());
    }
}

// ---------------------------------------------------------------------------
// Cell monoid laws
// ---------------------------------------------------------------------------

fn arb_int_cell() -> impl Strategy<Value = Cell<i64>> {
    prop_oneof![
        3 => (-1000_i64..1000).prop_map(Cell::Value),
        1 => Just(Cell::NA),
        1 => Just(Cell::NM),
    ]
}

proptest! {
    #[test]
    fn na_is_the_identity_of_the_cell_monoid(a in arb_int_cell()) {
        prop_assert_eq!(a.combine(Cell::NA, &Additive), a);
        prop_assert_eq!(Cell::NA.combine(a, &Additive), a);
    }

    #[test]
    fn nm_absorbs_in_the_cell_monoid(a in arb_int_cell()) {
        prop_assert_eq!(a.combine(Cell::NM, &Additive), Cell::NM);
        prop_assert_eq!(Cell::NM.combine(a, &Additive), Cell::NM);
    }

    #[test]
    fn cell_combination_is_associative(
        a in arb_int_cell(),
        b in arb_int_cell(),
        c in arb_int_cell(),
    ) {
        prop_assert_eq!(
            a.combine(b, &Additive).combine(c, &Additive),
            a.combine(b.combine(c, &Additive), &Additive)
        );
    }
}

// ---------------------------------------------------------------------------
// Series algebra
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn zip_map_keys_are_the_key_intersection(
        a_keys in proptest::collection::btree_set(0_i64..24, 0..12),
        b_keys in proptest::collection::btree_set(0_i64..24, 0..12),
    ) {
        let left: Series<i64, f64> =
            Series::from_values(a_keys.iter().map(|&k| (k, 1.0)).collect());
        let right: Series<i64, f64> =
            Series::from_values(b_keys.iter().map(|&k| (k, 2.0)).collect());

        let zipped = left.zip_map(&right, |a, b| a + b);
        let expected: Vec<i64> = a_keys.intersection(&b_keys).copied().collect();
        prop_assert_eq!(keys_of(&zipped), expected);
    }

    #[test]
    fn outer_merge_is_commutative_with_a_commutative_semigroup(
        a in arb_pairs(12),
        b in arb_pairs(12),
    ) {
        let left = series_of(&a);
        let right = series_of(&b);
        prop_assert_eq!(
            left.merge(&right, &Additive),
            right.merge(&left, &Additive)
        );
    }

    #[test]
    fn outer_merge_keys_are_the_union_multiset(a in arb_pairs(12), b in arb_pairs(12)) {
        let merged = series_of(&a).merge(&series_of(&b), &Additive);

        // Pair-wise alignment: each key appears max(left count, right
        // count) times.
        let mut counts = BTreeMap::<i64, (usize, usize)>::new();
        for (key, _) in &a {
            counts.entry(*key).or_default().0 += 1;
        }
        for (key, _) in &b {
            counts.entry(*key).or_default().1 += 1;
        }
        let expected: Vec<i64> = counts
            .iter()
            .flat_map(|(&key, &(la, lb))| std::iter::repeat(key).take(la.max(lb)))
            .collect();
        prop_assert_eq!(keys_of(&merged), expected);
    }

    #[test]
    fn or_else_is_idempotent(pairs in arb_pairs(12)) {
        let series = series_of(&pairs);
        prop_assert_eq!(series.or_else(&series), series.sorted());
    }

    #[test]
    fn reduce_by_key_matches_reduce_for_a_single_key(
        cells in proptest::collection::vec(arb_cell(), 1..12),
    ) {
        let pairs: Vec<(i64, Cell<f64>)> = cells.into_iter().map(|cell| (7, cell)).collect();
        let series = series_of(&pairs);
        let mean = Mean::new(F64Field);

        let by_key = series.reduce_by_key(&mean);
        prop_assert_eq!(by_key.len(), 1);
        prop_assert_eq!(by_key.get(&7), series.reduce(&mean));
    }

    #[test]
    fn roll_forward_redirects_only_within_delta(
        pairs in arb_pairs(16),
        delta in 0_u64..4,
    ) {
        let series = series_of(&pairs);
        let rolled = series.roll_forward_up_to(&AbsDiff, delta);

        let originals = series.cells();
        let outcomes = rolled.cells();
        let keys = keys_of(&series);

        let mut last_valid: Option<usize> = None;
        for position in 0..originals.len() {
            match &originals[position] {
                Cell::NA => {
                    let replaced = outcomes[position] != Cell::NA;
                    match last_valid {
                        Some(prior) => {
                            let distance = keys[position].abs_diff(keys[prior]);
                            prop_assert_eq!(replaced, distance <= delta);
                            if replaced {
                                prop_assert_eq!(&outcomes[position], &originals[prior]);
                            }
                        }
                        None => prop_assert!(!replaced, "nothing valid to roll from"),
                    }
                }
                _ => {
                    prop_assert_eq!(&outcomes[position], &originals[position]);
                    last_valid = Some(position);
                }
            }
        }
    }

    #[test]
    fn sorted_is_stable_within_equal_keys(
        keys in proptest::collection::vec(0_i64..5, 0..20),
    ) {
        // Stamp each row with its insertion position; stability means the
        // stamps stay ascending inside every key run.
        let pairs: Vec<(i64, Cell<i64>)> = keys
            .iter()
            .enumerate()
            .map(|(position, &key)| (key, Cell::Value(position as i64)))
            .collect();
        let sorted = series_of(&pairs).sorted();

        let rows = sorted.to_vec();
        for pair in rows.windows(2) {
            let (ref key_a, ref stamp_a) = pair[0];
            let (ref key_b, ref stamp_b) = pair[1];
            prop_assert!(key_a <= key_b);
            if key_a == key_b {
                prop_assert!(
                    stamp_a.clone().unwrap_value() < stamp_b.clone().unwrap_value(),
                    "equal keys must keep insertion order"
                );
            }
        }
    }
}
