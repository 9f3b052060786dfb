#![forbid(unsafe_code)]

//! Shared fixtures for the workspace property and scenario suites.
//!
//! Everything here is plain construction sugar; the invariants under test
//! live in `tests/`.

use strata_cell::Cell;
use strata_frame::Series;
use strata_mask::Mask;

/// Build a mask from literal bit positions.
#[must_use]
pub fn mask_of(bits: &[usize]) -> Mask {
    bits.iter().copied().collect()
}

/// Build an integer-keyed series from literal `(key, cell)` rows, in row
/// order (no sorting).
#[must_use]
pub fn series_of<V: Clone + Default>(pairs: &[(i64, Cell<V>)]) -> Series<i64, V> {
    Series::from_cells(pairs.to_vec())
}

/// Build an integer-keyed series of plain values.
#[must_use]
pub fn values_of<V: Clone + Default>(pairs: &[(i64, V)]) -> Series<i64, V> {
    Series::from_values(pairs.to_vec())
}

/// The keys of a series, cloned out for assertions.
#[must_use]
pub fn keys_of<V: Clone>(series: &Series<i64, V>) -> Vec<i64> {
    series.keys().to_vec()
}
