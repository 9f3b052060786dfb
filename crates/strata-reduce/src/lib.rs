#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::marker::PhantomData;

use strata_cell::{Cell, Field, Monoid, NonValue, Semigroup};
use strata_column::Column;

/// A pure fold over a column window bounded by an indices slice.
///
/// The window is `indices[start..end]`; each entry addresses a row of the
/// column. Implementations must not touch positions outside the window,
/// must not assume valid rows are contiguous, and must surface NM unless
/// their semantics are explicitly defined on presence alone.
pub trait Reducer<A> {
    type Out;

    fn reduce(
        &self,
        column: &Column<A>,
        indices: &[usize],
        start: usize,
        end: usize,
    ) -> Cell<Self::Out>;
}

/// Number of values in the window. Counting is defined on presence alone:
/// NM rows are not counted and do not poison the result.
#[derive(Debug, Clone, Copy, Default)]
pub struct Count;

impl<A: Clone> Reducer<A> for Count {
    type Out = usize;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<usize> {
        let count = indices[start..end]
            .iter()
            .filter(|&&row| column.is_value_at(row))
            .count();
        Cell::Value(count)
    }
}

/// First value in the window; NM anywhere in the window wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct First;

impl<A: Clone> Reducer<A> for First {
    type Out = A;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<A> {
        let mut first = None;
        for &row in &indices[start..end] {
            if column.is_value_at(row) {
                if first.is_none() {
                    first = Some(column.value_at(row));
                }
            } else if column.non_value_at(row) == NonValue::NM {
                return Cell::NM;
            }
        }
        first.into()
    }
}

/// Last value in the window; NM anywhere in the window wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct Last;

impl<A: Clone> Reducer<A> for Last {
    type Out = A;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<A> {
        let mut last = None;
        for &row in &indices[start..end] {
            if column.is_value_at(row) {
                last = Some(column.value_at(row));
            } else if column.non_value_at(row) == NonValue::NM {
                return Cell::NM;
            }
        }
        last.into()
    }
}

fn window_values<A: Clone>(
    column: &Column<A>,
    indices: &[usize],
    start: usize,
    end: usize,
) -> Cell<Vec<A>> {
    let mut values = Vec::new();
    for &row in &indices[start..end] {
        if column.is_value_at(row) {
            values.push(column.value_at(row));
        } else if column.non_value_at(row) == NonValue::NM {
            return Cell::NM;
        }
    }
    Cell::Value(values)
}

/// The first `n` values, NA when fewer are present.
#[derive(Debug, Clone, Copy)]
pub struct FirstN {
    n: usize,
}

impl FirstN {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl<A: Clone> Reducer<A> for FirstN {
    type Out = Vec<A>;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<Vec<A>> {
        window_values(column, indices, start, end).flat_map(|mut values| {
            if values.len() < self.n {
                Cell::NA
            } else {
                values.truncate(self.n);
                Cell::Value(values)
            }
        })
    }
}

/// The trailing `n` values in window order, NA when fewer are present.
#[derive(Debug, Clone, Copy)]
pub struct LastN {
    n: usize,
}

impl LastN {
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self { n }
    }
}

impl<A: Clone> Reducer<A> for LastN {
    type Out = Vec<A>;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<Vec<A>> {
        window_values(column, indices, start, end).flat_map(|mut values| {
            if values.len() < self.n {
                Cell::NA
            } else {
                Cell::Value(values.split_off(values.len() - self.n))
            }
        })
    }
}

/// Extremum by the value order; incomparable candidates never displace
/// the current extremum.
#[derive(Debug, Clone, Copy, Default)]
pub struct Max;

impl<A: Clone + PartialOrd> Reducer<A> for Max {
    type Out = A;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<A> {
        window_values(column, indices, start, end).flat_map(|values| {
            let mut best: Option<A> = None;
            for value in values {
                let replace = match &best {
                    Some(current) => value > *current,
                    None => true,
                };
                if replace {
                    best = Some(value);
                }
            }
            best.into()
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Min;

impl<A: Clone + PartialOrd> Reducer<A> for Min {
    type Out = A;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<A> {
        window_values(column, indices, start, end).flat_map(|values| {
            let mut best: Option<A> = None;
            for value in values {
                let replace = match &best {
                    Some(current) => value < *current,
                    None => true,
                };
                if replace {
                    best = Some(value);
                }
            }
            best.into()
        })
    }
}

/// Fold the window through a monoid; the empty window is the identity.
#[derive(Debug, Clone, Copy)]
pub struct MonoidReducer<M> {
    monoid: M,
}

impl<M> MonoidReducer<M> {
    #[must_use]
    pub fn new(monoid: M) -> Self {
        Self { monoid }
    }
}

impl<A: Clone, M: Monoid<A>> Reducer<A> for MonoidReducer<M> {
    type Out = A;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<A> {
        let mut acc = self.monoid.empty();
        for &row in &indices[start..end] {
            if column.is_value_at(row) {
                acc = self.monoid.combine(acc, column.value_at(row));
            } else if column.non_value_at(row) == NonValue::NM {
                return Cell::NM;
            }
        }
        Cell::Value(acc)
    }
}

/// Fold the window through a semigroup; a window with no values is NA.
#[derive(Debug, Clone, Copy)]
pub struct SemigroupReducer<S> {
    semigroup: S,
}

impl<S> SemigroupReducer<S> {
    #[must_use]
    pub fn new(semigroup: S) -> Self {
        Self { semigroup }
    }
}

impl<A: Clone, S: Semigroup<A>> Reducer<A> for SemigroupReducer<S> {
    type Out = A;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<A> {
        let mut acc: Option<A> = None;
        for &row in &indices[start..end] {
            if column.is_value_at(row) {
                let value = column.value_at(row);
                acc = Some(match acc {
                    Some(current) => self.semigroup.combine(current, value),
                    None => value,
                });
            } else if column.non_value_at(row) == NonValue::NM {
                return Cell::NM;
            }
        }
        acc.into()
    }
}

/// Sum of values divided by their count, in the given field.
#[derive(Debug, Clone, Copy)]
pub struct Mean<F> {
    field: F,
}

impl<F> Mean<F> {
    #[must_use]
    pub fn new(field: F) -> Self {
        Self { field }
    }
}

impl<A: Clone, F: Field<A>> Reducer<A> for Mean<F> {
    type Out = A;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<A> {
        let mut sum = self.field.zero();
        let mut count = 0_usize;
        for &row in &indices[start..end] {
            if column.is_value_at(row) {
                sum = self.field.add(sum, column.value_at(row));
                count += 1;
            } else if column.non_value_at(row) == NonValue::NM {
                return Cell::NM;
            }
        }
        if count == 0 {
            return Cell::NA;
        }
        match self.field.div(sum, self.field.from_count(count)) {
            Some(mean) => Cell::Value(mean),
            None => Cell::NM,
        }
    }
}

/// Median by quick-select on a copied value buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Median;

impl Reducer<f64> for Median {
    type Out = f64;

    fn reduce(&self, column: &Column<f64>, indices: &[usize], start: usize, end: usize) -> Cell<f64> {
        window_values(column, indices, start, end).flat_map(|mut values| {
            if values.is_empty() {
                return Cell::NA;
            }
            let len = values.len();
            let mid = len / 2;
            let (below, upper, _) = values.select_nth_unstable_by(mid, f64::total_cmp);
            let upper = *upper;
            if len % 2 == 1 {
                Cell::Value(upper)
            } else {
                let lower = below.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Cell::Value((lower + upper) / 2.0)
            }
        })
    }
}

/// Interpolated quantile of a sorted copy: for rank `h = p * (n - 1)`,
/// linear interpolation between the neighbouring samples.
fn quantile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    let rank = p * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    sorted[low] + (rank - low as f64) * (sorted[high] - sorted[low])
}

/// One interpolated quantile per requested probability.
#[derive(Debug, Clone)]
pub struct Quantile {
    probabilities: Vec<f64>,
}

impl Quantile {
    /// A probability outside `[0, 1]` is a contract violation.
    #[must_use]
    pub fn new(probabilities: Vec<f64>) -> Self {
        assert!(
            probabilities.iter().all(|p| (0.0..=1.0).contains(p)),
            "quantile probabilities must lie in [0, 1]"
        );
        Self { probabilities }
    }
}

impl Reducer<f64> for Quantile {
    type Out = Vec<(f64, f64)>;

    fn reduce(
        &self,
        column: &Column<f64>,
        indices: &[usize],
        start: usize,
        end: usize,
    ) -> Cell<Vec<(f64, f64)>> {
        window_values(column, indices, start, end).flat_map(|mut values| {
            if values.is_empty() {
                return Cell::NA;
            }
            values.sort_by(f64::total_cmp);
            Cell::Value(
                self.probabilities
                    .iter()
                    .map(|&p| (p, quantile_of_sorted(&values, p)))
                    .collect(),
            )
        })
    }
}

/// Values outside Tukey's fences `[Q1 - k·IQR, Q3 + k·IQR]`, in window
/// order.
#[derive(Debug, Clone, Copy)]
pub struct Outliers {
    k: f64,
}

impl Outliers {
    #[must_use]
    pub fn new(k: f64) -> Self {
        Self { k }
    }
}

impl Default for Outliers {
    fn default() -> Self {
        Self { k: 1.5 }
    }
}

impl Reducer<f64> for Outliers {
    type Out = Vec<f64>;

    fn reduce(
        &self,
        column: &Column<f64>,
        indices: &[usize],
        start: usize,
        end: usize,
    ) -> Cell<Vec<f64>> {
        window_values(column, indices, start, end).flat_map(|values| {
            if values.is_empty() {
                return Cell::NA;
            }
            let mut sorted = values.clone();
            sorted.sort_by(f64::total_cmp);
            let q1 = quantile_of_sorted(&sorted, 0.25);
            let q3 = quantile_of_sorted(&sorted, 0.75);
            let spread = self.k * (q3 - q1);
            let (lower, upper) = (q1 - spread, q3 + spread);
            Cell::Value(
                values
                    .into_iter()
                    .filter(|&v| v < lower || v > upper)
                    .collect(),
            )
        })
    }
}

/// The set of distinct values; NM anywhere in the window wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unique;

impl<A: Clone + Ord> Reducer<A> for Unique {
    type Out = BTreeSet<A>;

    fn reduce(
        &self,
        column: &Column<A>,
        indices: &[usize],
        start: usize,
        end: usize,
    ) -> Cell<BTreeSet<A>> {
        window_values(column, indices, start, end).map(|values| values.into_iter().collect())
    }
}

/// Whether any value satisfies the predicate. Defined on presence alone:
/// NM rows are skipped.
#[derive(Debug, Clone, Copy)]
pub struct Exists<P, A> {
    predicate: P,
    marker: PhantomData<fn(&A)>,
}

impl<P, A> Exists<P, A> {
    #[must_use]
    pub fn new(predicate: P) -> Self {
        Self {
            predicate,
            marker: PhantomData,
        }
    }
}

impl<A: Clone, P: Fn(&A) -> bool> Reducer<A> for Exists<P, A> {
    type Out = bool;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<bool> {
        let found = indices[start..end].iter().any(|&row| {
            column.is_value_at(row) && (self.predicate)(&column.value_at(row))
        });
        Cell::Value(found)
    }
}

/// Whether every value satisfies the predicate; vacuously true. NM rows
/// are skipped.
#[derive(Debug, Clone, Copy)]
pub struct ForAll<P, A> {
    predicate: P,
    marker: PhantomData<fn(&A)>,
}

impl<P, A> ForAll<P, A> {
    #[must_use]
    pub fn new(predicate: P) -> Self {
        Self {
            predicate,
            marker: PhantomData,
        }
    }
}

impl<A: Clone, P: Fn(&A) -> bool> Reducer<A> for ForAll<P, A> {
    type Out = bool;

    fn reduce(&self, column: &Column<A>, indices: &[usize], start: usize, end: usize) -> Cell<bool> {
        let holds = indices[start..end].iter().all(|&row| {
            !column.is_value_at(row) || (self.predicate)(&column.value_at(row))
        });
        Cell::Value(holds)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use strata_cell::{Additive, Cell, F64Field, StringConcat};
    use strata_column::{Column, ColumnBuilder};

    use super::{
        Count, Exists, First, FirstN, ForAll, Last, LastN, Max, Mean, Median, Min, MonoidReducer,
        Outliers, Quantile, Reducer, SemigroupReducer, Unique,
    };

    fn column_of(cells: Vec<Cell<f64>>) -> (Column<f64>, Vec<usize>) {
        let indices = (0..cells.len()).collect();
        (Column::from_cells(cells), indices)
    }

    fn reduce_all<R: Reducer<f64>>(reducer: &R, cells: Vec<Cell<f64>>) -> Cell<R::Out> {
        let (column, indices) = column_of(cells);
        reducer.reduce(&column, &indices, 0, indices.len())
    }

    #[test]
    fn count_ignores_nm_and_counts_values() {
        let cells = vec![Cell::Value(1.0), Cell::NA, Cell::NM, Cell::Value(2.0)];
        assert_eq!(reduce_all(&Count, cells), Cell::Value(2));
        assert_eq!(reduce_all(&Count, vec![]), Cell::Value(0));
    }

    #[test]
    fn first_and_last_skip_na_but_surface_nm() {
        let cells = vec![Cell::NA, Cell::Value(1.0), Cell::Value(2.0)];
        assert_eq!(reduce_all(&First, cells.clone()), Cell::Value(1.0));
        assert_eq!(reduce_all(&Last, cells), Cell::Value(2.0));

        let tainted = vec![Cell::Value(1.0), Cell::NM];
        assert_eq!(reduce_all(&First, tainted.clone()), Cell::NM);
        assert_eq!(reduce_all(&Last, tainted), Cell::NM);

        assert_eq!(reduce_all(&First, vec![Cell::NA]), Cell::NA);
        assert_eq!(reduce_all(&Last, vec![]), Cell::NA);
    }

    #[test]
    fn first_n_and_last_n_require_enough_values() {
        let cells = vec![
            Cell::Value(1.0),
            Cell::NA,
            Cell::Value(2.0),
            Cell::Value(3.0),
        ];
        assert_eq!(
            reduce_all(&FirstN::new(2), cells.clone()),
            Cell::Value(vec![1.0, 2.0])
        );
        assert_eq!(
            reduce_all(&LastN::new(2), cells.clone()),
            Cell::Value(vec![2.0, 3.0])
        );
        assert_eq!(reduce_all(&FirstN::new(4), cells), Cell::NA);
        assert_eq!(
            reduce_all(&FirstN::new(1), vec![Cell::NM, Cell::Value(1.0)]),
            Cell::NM
        );
    }

    #[test]
    fn extrema_by_order() {
        let cells = vec![Cell::Value(3.0), Cell::NA, Cell::Value(-1.0), Cell::Value(7.0)];
        assert_eq!(reduce_all(&Max, cells.clone()), Cell::Value(7.0));
        assert_eq!(reduce_all(&Min, cells), Cell::Value(-1.0));
        assert_eq!(reduce_all(&Max, vec![Cell::NA]), Cell::NA);
        assert_eq!(reduce_all(&Min, vec![Cell::NM]), Cell::NM);
    }

    #[test]
    fn monoid_reducer_folds_with_identity_on_empty() {
        let sum = MonoidReducer::new(Additive);
        let cells = vec![Cell::Value(1.0), Cell::NA, Cell::Value(2.5)];
        assert_eq!(reduce_all(&sum, cells), Cell::Value(3.5));
        assert_eq!(reduce_all(&sum, vec![]), Cell::Value(0.0));
        assert_eq!(reduce_all(&sum, vec![Cell::NM]), Cell::NM);
    }

    #[test]
    fn semigroup_reducer_is_na_on_empty_fold() {
        let mut builder = ColumnBuilder::new();
        builder.push_value("a".to_owned());
        builder.push_na();
        builder.push_value("b".to_owned());
        let column = builder.build();
        let concat = SemigroupReducer::new(StringConcat);
        assert_eq!(
            concat.reduce(&column, &[0, 1, 2], 0, 3),
            Cell::Value("ab".to_owned())
        );
        assert_eq!(concat.reduce(&column, &[1], 0, 1), Cell::NA);
    }

    #[test]
    fn mean_divides_sum_by_count() {
        let mean = Mean::new(F64Field);
        let cells = vec![Cell::Value(2.0), Cell::NA, Cell::Value(4.0)];
        assert_eq!(reduce_all(&mean, cells), Cell::Value(3.0));
        assert_eq!(reduce_all(&mean, vec![Cell::NA]), Cell::NA);
        assert_eq!(reduce_all(&mean, vec![Cell::Value(1.0), Cell::NM]), Cell::NM);
    }

    #[test]
    fn median_on_odd_and_even_windows() {
        let odd = vec![Cell::Value(3.0), Cell::Value(1.0), Cell::Value(2.0)];
        assert_eq!(reduce_all(&Median, odd), Cell::Value(2.0));

        let even = vec![
            Cell::Value(4.0),
            Cell::Value(1.0),
            Cell::Value(3.0),
            Cell::Value(2.0),
        ];
        assert_eq!(reduce_all(&Median, even), Cell::Value(2.5));
        assert_eq!(reduce_all(&Median, vec![Cell::NA]), Cell::NA);
    }

    #[test]
    fn quantiles_interpolate_linearly() {
        let cells = vec![
            Cell::Value(1.0),
            Cell::Value(2.0),
            Cell::Value(3.0),
            Cell::Value(4.0),
            Cell::Value(5.0),
        ];
        let reducer = Quantile::new(vec![0.0, 0.5, 0.9, 1.0]);
        let quantiles = reduce_all(&reducer, cells).unwrap_value();
        assert_eq!(quantiles[0], (0.0, 1.0));
        assert_eq!(quantiles[1], (0.5, 3.0));
        assert!((quantiles[2].1 - 4.6).abs() < 1e-12);
        assert_eq!(quantiles[3], (1.0, 5.0));
    }

    #[test]
    #[should_panic(expected = "quantile probabilities must lie in [0, 1]")]
    fn quantile_rejects_out_of_range_probability() {
        let _ = Quantile::new(vec![1.5]);
    }

    #[test]
    fn outliers_apply_tukeys_fences() {
        let mut cells: Vec<Cell<f64>> = (1..=9).map(|v| Cell::Value(f64::from(v))).collect();
        cells.push(Cell::Value(100.0));
        let outliers = reduce_all(&Outliers::default(), cells).unwrap_value();
        assert_eq!(outliers, vec![100.0]);

        let tight = vec![Cell::Value(1.0), Cell::Value(2.0), Cell::Value(3.0)];
        assert_eq!(
            reduce_all(&Outliers::default(), tight),
            Cell::Value(Vec::new())
        );
    }

    #[test]
    fn unique_collects_distinct_values_and_surfaces_nm() {
        let mut builder = ColumnBuilder::new();
        builder.push_value(2_i64);
        builder.push_value(1);
        builder.push_value(2);
        builder.push_na();
        let column = builder.build();
        assert_eq!(
            Unique.reduce(&column, &[0, 1, 2, 3], 0, 4),
            Cell::Value(BTreeSet::from([1, 2]))
        );

        let mut tainted = ColumnBuilder::new();
        tainted.push_value(1_i64);
        tainted.push_nm();
        let column = tainted.build();
        assert_eq!(Unique.reduce(&column, &[0, 1], 0, 2), Cell::NM);

        let empty: Column<i64> = Column::empty();
        assert_eq!(
            Unique.reduce(&empty, &[], 0, 0),
            Cell::Value(BTreeSet::new())
        );
    }

    #[test]
    fn exists_and_for_all_skip_nm_rows() {
        let cells = vec![Cell::Value(1.0), Cell::NM, Cell::Value(3.0)];
        let positive = Exists::new(|v: &f64| *v > 2.0);
        assert_eq!(reduce_all(&positive, cells.clone()), Cell::Value(true));

        let all_positive = ForAll::new(|v: &f64| *v > 0.0);
        assert_eq!(reduce_all(&all_positive, cells), Cell::Value(true));

        let none = Exists::new(|v: &f64| *v > 10.0);
        assert_eq!(reduce_all(&none, vec![]), Cell::Value(false));

        let vacuous = ForAll::new(|v: &f64| *v > 10.0);
        assert_eq!(reduce_all(&vacuous, vec![]), Cell::Value(true));
    }

    #[test]
    fn reducers_honor_window_bounds() {
        let (column, indices) = column_of(vec![
            Cell::Value(1.0),
            Cell::Value(2.0),
            Cell::NM,
            Cell::Value(4.0),
        ]);
        // The NM at position 2 sits outside the [0, 2) window.
        assert_eq!(First.reduce(&column, &indices, 0, 2), Cell::Value(1.0));
        assert_eq!(Count.reduce(&column, &indices, 0, 2), Cell::Value(2));
        assert_eq!(Last.reduce(&column, &indices, 3, 4), Cell::Value(4.0));
    }
}
