#![forbid(unsafe_code)]

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use strata_cell::{Cell, Metric, NonValue, Semigroup};
use strata_column::{Column, ColumnBuilder};
use strata_index::{Grouper, Index, KeyRun};
use strata_join::{join_positions, merge_positions, JoinKind, MergeKind};
use strata_reduce::Reducer;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SeriesError {
    #[error("ordered builder received a key out of order at position {position}")]
    KeysOutOfOrder { position: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("duplicate column key")]
    DuplicateColumnKey,
    #[error("missing column")]
    MissingColumn,
}

/// The pairing of an index and a column: row `i` yields
/// `(keys[i], column[indices[i]])`.
///
/// Series are immutable; every transformation returns a new one. The
/// column is shared, never copied, unless an operation materializes.
#[derive(Debug, Clone)]
pub struct Series<K, V> {
    index: Index<K>,
    column: Column<V>,
}

fn cell_at<V: Clone>(column: &Column<V>, position: Option<usize>) -> Cell<V> {
    match position {
        Some(row) => column.get(row),
        None => Cell::NA,
    }
}

impl<K: Ord + Clone, V: Clone> Series<K, V> {
    #[must_use]
    pub fn new(index: Index<K>, column: Column<V>) -> Self {
        Self { index, column }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            index: Index::empty(),
            column: Column::empty(),
        }
    }

    pub fn from_cells(pairs: Vec<(K, Cell<V>)>) -> Self
    where
        V: Default,
    {
        let mut keys = Vec::with_capacity(pairs.len());
        let mut builder = ColumnBuilder::with_capacity(pairs.len());
        for (key, cell) in pairs {
            keys.push(key);
            builder.push(cell);
        }
        Self {
            index: Index::from_keys(keys),
            column: builder.build(),
        }
    }

    pub fn from_values(pairs: Vec<(K, V)>) -> Self
    where
        V: Default,
    {
        Self::from_cells(pairs.into_iter().map(|(k, v)| (k, Cell::Value(v))).collect())
    }

    #[must_use]
    pub fn index(&self) -> &Index<K> {
        &self.index
    }

    #[must_use]
    pub fn column(&self) -> &Column<V> {
        &self.column
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> &[K] {
        self.index.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, Cell<V>)> + '_ {
        self.index
            .iter()
            .map(|(key, row)| (key, self.column.get(row)))
    }

    #[must_use]
    pub fn cells(&self) -> Vec<Cell<V>> {
        self.iter().map(|(_, cell)| cell).collect()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<(K, Cell<V>)> {
        self.iter().map(|(key, cell)| (key.clone(), cell)).collect()
    }

    /// Cell at the first occurrence of `key`; an unknown key is NA.
    #[must_use]
    pub fn get(&self, key: &K) -> Cell<V> {
        match self.index.get(key) {
            Some(position) => self.column.get(self.index.index_at(position)),
            None => Cell::NA,
        }
    }

    #[must_use]
    pub fn count_values(&self) -> usize {
        self.index
            .indices()
            .iter()
            .filter(|&&row| self.column.is_value_at(row))
            .count()
    }

    /// Stable sort by key.
    #[must_use]
    pub fn sorted(&self) -> Self {
        Self {
            index: self.index.sorted(),
            column: self.column.clone(),
        }
    }

    /// Materialize a dense column over exactly the rows the index visits
    /// and reset the indices to `0..n`, dropping any view chain.
    #[must_use]
    pub fn compact(&self) -> Self
    where
        V: Default,
    {
        let mut builder = ColumnBuilder::with_capacity(self.len());
        for &row in self.index.indices() {
            builder.push(self.column.get(row));
        }
        Self {
            index: self.index.reset_indices(),
            column: builder.build(),
        }
    }

    #[must_use]
    pub fn map_values<W, F>(&self, f: F) -> Series<K, W>
    where
        V: Send + Sync + 'static,
        W: Clone,
        F: Fn(V) -> W + Send + Sync + 'static,
    {
        Series {
            index: self.index.clone(),
            column: self.column.map(f),
        }
    }

    fn ordered_index(&self) -> Cow<'_, Index<K>> {
        if self.index.is_ordered() {
            Cow::Borrowed(&self.index)
        } else {
            Cow::Owned(self.index.sorted())
        }
    }

    /// Inner join of both key sets (Cartesian across duplicate keys);
    /// `f` combines the aligned values, with NM winning over NA wherever
    /// a side is absent.
    #[must_use]
    pub fn zip_map<W, X, F>(&self, that: &Series<K, W>, f: F) -> Series<K, X>
    where
        W: Clone,
        X: Clone + Default,
        F: Fn(V, W) -> X,
    {
        let state = join_positions(
            &self.ordered_index(),
            &that.ordered_index(),
            JoinKind::Inner,
        );
        let mut builder = ColumnBuilder::with_capacity(state.len());
        for (lpos, rpos) in state.pairs() {
            let left = cell_at(&self.column, lpos);
            let right = cell_at(&that.column, rpos);
            builder.push(left.zip_with(right, &f));
        }
        let indices = (0..state.keys.len()).collect();
        Series {
            index: Index::ordered_unchecked(state.keys, indices),
            column: builder.build(),
        }
    }

    /// Outer union of both key sets, rows of a shared key aligned
    /// pair-wise; aligned cells combine through the semigroup with NA as
    /// identity and NM absorbing.
    #[must_use]
    pub fn merge<S>(&self, that: &Self, semigroup: &S) -> Self
    where
        V: Default,
        S: Semigroup<V> + ?Sized,
    {
        let state = merge_positions(
            &self.ordered_index(),
            &that.ordered_index(),
            MergeKind::Outer,
        );
        let mut builder = ColumnBuilder::with_capacity(state.len());
        for (lpos, rpos) in state.pairs() {
            let left = cell_at(&self.column, lpos);
            let right = cell_at(&that.column, rpos);
            builder.push(left.combine(right, semigroup));
        }
        let indices = (0..state.keys.len()).collect();
        Series {
            index: Index::ordered_unchecked(state.keys, indices),
            column: builder.build(),
        }
    }

    /// Outer union preferring this series' cells; `that` fills the
    /// holes. When both sides are absent, NM absorbs.
    #[must_use]
    pub fn or_else(&self, that: &Self) -> Self
    where
        V: Default,
    {
        let state = merge_positions(
            &self.ordered_index(),
            &that.ordered_index(),
            MergeKind::Outer,
        );
        let mut builder = ColumnBuilder::with_capacity(state.len());
        for (lpos, rpos) in state.pairs() {
            let left = cell_at(&self.column, lpos);
            let right = cell_at(&that.column, rpos);
            builder.push(left.or_else(right));
        }
        let indices = (0..state.keys.len()).collect();
        Series {
            index: Index::ordered_unchecked(state.keys, indices),
            column: builder.build(),
        }
    }

    /// Row concatenation with no realignment. The result stays ordered
    /// only when `that`'s keys follow this series' keys.
    #[must_use]
    pub fn concat(&self, that: &Self) -> Self
    where
        V: Default,
    {
        let mut keys = Vec::with_capacity(self.len() + that.len());
        keys.extend_from_slice(self.index.keys());
        keys.extend_from_slice(that.index.keys());
        let mut builder = ColumnBuilder::with_capacity(keys.len());
        for (_, cell) in self.iter() {
            builder.push(cell);
        }
        for (_, cell) in that.iter() {
            builder.push(cell);
        }
        Series {
            index: Index::from_keys(keys),
            column: builder.build(),
        }
    }

    /// Reduce every row of this series in logical order.
    #[must_use]
    pub fn reduce<R: Reducer<V>>(&self, reducer: &R) -> Cell<R::Out> {
        reducer.reduce(&self.column, self.index.indices(), 0, self.index.len())
    }

    /// Reduce each run of equal keys; the output is the distinct keys in
    /// key order with one reduced cell each.
    #[must_use]
    pub fn reduce_by_key<R>(&self, reducer: &R) -> Series<K, R::Out>
    where
        R: Reducer<V>,
        R::Out: Clone + Default,
    {
        let ordered = self.ordered_index();
        let (keys, builder) = ordered.group(&GroupReduce {
            column: &self.column,
            reducer,
        });
        let indices = (0..keys.len()).collect();
        Series {
            index: Index::ordered_unchecked(keys, indices),
            column: builder.build(),
        }
    }

    /// Redirect every NA row at the last valid (value or NM) row seen
    /// before it, regardless of key distance.
    #[must_use]
    pub fn roll_forward(&self) -> Self {
        self.roll_forward_where(|_, _| true)
    }

    /// Redirect an NA row at the last valid row only when the key
    /// distance between them is within `delta`.
    #[must_use]
    pub fn roll_forward_up_to<M: Metric<K>>(&self, metric: &M, delta: M::Distance) -> Self {
        self.roll_forward_where(|current, last| metric.distance(current, last) <= delta)
    }

    fn roll_forward_where(&self, within: impl Fn(&K, &K) -> bool) -> Self {
        let mut indices = Vec::with_capacity(self.len());
        let mut last_valid: Option<usize> = None;
        for position in 0..self.len() {
            let row = self.index.index_at(position);
            match self.column.get(row) {
                Cell::NA => match last_valid {
                    Some(prior)
                        if within(self.index.key_at(position), self.index.key_at(prior)) =>
                    {
                        indices.push(self.index.index_at(prior));
                    }
                    _ => indices.push(row),
                },
                _ => {
                    last_valid = Some(position);
                    indices.push(row);
                }
            }
        }
        Self {
            index: self.index.with_indices(indices),
            column: self.column.clone(),
        }
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> PartialEq for Series<K, V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

struct GroupReduce<'a, V, R> {
    column: &'a Column<V>,
    reducer: &'a R,
}

impl<K, V, R> Grouper<K> for GroupReduce<'_, V, R>
where
    K: Ord + Clone,
    V: Clone,
    R: Reducer<V>,
    R::Out: Clone + Default,
{
    type State = (Vec<K>, ColumnBuilder<R::Out>);

    fn init(&self) -> Self::State {
        (Vec::new(), ColumnBuilder::new())
    }

    fn group(&self, state: Self::State, run: KeyRun<'_, K>) -> Self::State {
        let (mut keys, mut builder) = state;
        keys.push(run.key().clone());
        builder.push(
            self.reducer
                .reduce(self.column, run.indices, run.start, run.end),
        );
        (keys, builder)
    }
}

/// Accumulates `(key, cell)` rows; `build` sorts stably by key when the
/// appends did not arrive in order.
#[derive(Debug)]
pub struct SeriesBuilder<K, V> {
    keys: Vec<K>,
    column: ColumnBuilder<V>,
}

impl<K: Ord + Clone, V: Clone + Default> Default for SeriesBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone + Default> SeriesBuilder<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            column: ColumnBuilder::new(),
        }
    }

    pub fn size_hint(&mut self, additional: usize) {
        self.keys.reserve(additional);
        self.column.size_hint(additional);
    }

    pub fn append(&mut self, key: K, cell: Cell<V>) {
        self.keys.push(key);
        self.column.push(cell);
    }

    pub fn append_value(&mut self, key: K, value: V) {
        self.append(key, Cell::Value(value));
    }

    pub fn append_non_value(&mut self, key: K, non_value: NonValue) {
        self.append(key, non_value.into());
    }

    #[must_use]
    pub fn build(self) -> Series<K, V> {
        let series = Series {
            index: Index::from_keys(self.keys),
            column: self.column.build(),
        };
        if series.index.is_ordered() {
            series
        } else {
            series.sorted()
        }
    }
}

/// Accumulates rows whose keys must arrive monotonically; a key that
/// moves backwards is rejected.
#[derive(Debug)]
pub struct OrderedSeriesBuilder<K, V> {
    keys: Vec<K>,
    column: ColumnBuilder<V>,
}

impl<K: Ord + Clone, V: Clone + Default> Default for OrderedSeriesBuilder<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone + Default> OrderedSeriesBuilder<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            column: ColumnBuilder::new(),
        }
    }

    pub fn size_hint(&mut self, additional: usize) {
        self.keys.reserve(additional);
        self.column.size_hint(additional);
    }

    pub fn append(&mut self, key: K, cell: Cell<V>) -> Result<(), SeriesError> {
        if self.keys.last().is_some_and(|last| key < *last) {
            return Err(SeriesError::KeysOutOfOrder {
                position: self.keys.len(),
            });
        }
        self.keys.push(key);
        self.column.push(cell);
        Ok(())
    }

    pub fn append_value(&mut self, key: K, value: V) -> Result<(), SeriesError> {
        self.append(key, Cell::Value(value))
    }

    pub fn append_non_value(&mut self, key: K, non_value: NonValue) -> Result<(), SeriesError> {
        self.append(key, non_value.into())
    }

    #[must_use]
    pub fn build(self) -> Series<K, V> {
        let indices = (0..self.keys.len()).collect();
        Series {
            index: Index::ordered_unchecked(self.keys, indices),
            column: self.column.build(),
        }
    }
}

// ── Frame boundary ─────────────────────────────────────────────────────

/// The operations a frame needs from a column without knowing its value
/// type.
trait ColumnOps: Any + Send + Sync {
    fn reindexed_by_positions(&self, positions: &[Option<usize>]) -> UntypedColumn;
    fn as_any(&self) -> &dyn Any;
}

impl<A: Clone + Send + Sync + 'static> ColumnOps for Column<A> {
    fn reindexed_by_positions(&self, positions: &[Option<usize>]) -> UntypedColumn {
        UntypedColumn::new(self.reindex_by_positions(positions))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A type-erased column. Casting back to a typed column succeeds exactly
/// when the value type matches; a failed cast reads NM at every row.
#[derive(Clone)]
pub struct UntypedColumn {
    inner: Arc<dyn ColumnOps>,
}

impl fmt::Debug for UntypedColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UntypedColumn")
    }
}

impl UntypedColumn {
    #[must_use]
    pub fn new<A: Clone + Send + Sync + 'static>(column: Column<A>) -> Self {
        Self {
            inner: Arc::new(column),
        }
    }

    #[must_use]
    pub fn cast<A: Clone + Send + Sync + 'static>(&self) -> Column<A> {
        match self.inner.as_any().downcast_ref::<Column<A>>() {
            Some(column) => column.clone(),
            None => Column::from_fn(|_| Cell::NM),
        }
    }

    fn reindexed(&self, positions: &[Option<usize>]) -> Self {
        self.inner.reindexed_by_positions(positions)
    }
}

/// A column-oriented table: one row index shared by every column, one
/// key per column. Columns are stored untyped and positioned by frame
/// row, i.e. row `i` of the frame reads row `i` of each column.
#[derive(Debug, Clone)]
pub struct Frame<R, C> {
    row_index: Index<R>,
    col_index: Index<C>,
    columns: Vec<UntypedColumn>,
}

impl<R: Ord + Clone, C: Ord + Clone> Frame<R, C> {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            row_index: Index::empty(),
            col_index: Index::empty(),
            columns: Vec::new(),
        }
    }

    pub fn new(row_keys: Vec<R>, columns: Vec<(C, UntypedColumn)>) -> Result<Self, FrameError> {
        let mut col_keys = Vec::with_capacity(columns.len());
        let mut untyped = Vec::with_capacity(columns.len());
        for (key, column) in columns {
            if col_keys.contains(&key) {
                return Err(FrameError::DuplicateColumnKey);
            }
            col_keys.push(key);
            untyped.push(column);
        }
        Ok(Self {
            row_index: Index::from_keys(row_keys),
            col_index: Index::from_keys(col_keys),
            columns: untyped,
        })
    }

    /// A single-column frame. The series is compacted so the frame's
    /// positional addressing holds.
    #[must_use]
    pub fn from_series<V>(key: C, series: &Series<R, V>) -> Self
    where
        V: Clone + Default + Send + Sync + 'static,
    {
        let compacted = series.compact();
        Self {
            row_index: compacted.index,
            col_index: Index::from_keys(vec![key]),
            columns: vec![UntypedColumn::new(compacted.column)],
        }
    }

    #[must_use]
    pub fn nrows(&self) -> usize {
        self.row_index.len()
    }

    #[must_use]
    pub fn ncols(&self) -> usize {
        self.col_index.len()
    }

    #[must_use]
    pub fn row_keys(&self) -> &[R] {
        self.row_index.keys()
    }

    #[must_use]
    pub fn col_keys(&self) -> &[C] {
        self.col_index.keys()
    }

    #[must_use]
    pub fn contains_column(&self, key: &C) -> bool {
        self.col_index.contains(key)
    }

    /// Extract a column as a typed series over the frame's row index.
    /// A value-type mismatch yields a series that is NM at every row.
    #[must_use]
    pub fn column<A: Clone + Send + Sync + 'static>(&self, key: &C) -> Option<Series<R, A>> {
        let position = self.col_index.get(key)?;
        let column = self.columns[self.col_index.index_at(position)].cast::<A>();
        Some(Series {
            index: self.row_index.clone(),
            column,
        })
    }

    /// Add a column, aligning the series onto the frame's rows by key
    /// (first occurrence wins; rows the series lacks read NA).
    pub fn insert<V>(&self, key: C, series: &Series<R, V>) -> Result<Self, FrameError>
    where
        V: Clone + Send + Sync + 'static,
    {
        if self.col_index.contains(&key) {
            return Err(FrameError::DuplicateColumnKey);
        }
        let positions: Vec<Option<usize>> = self
            .row_index
            .keys()
            .iter()
            .map(|row_key| {
                series
                    .index()
                    .get(row_key)
                    .map(|pos| series.index().index_at(pos))
            })
            .collect();
        let column = series.column().reindex_by_positions(&positions);

        let mut columns = self.columns.clone();
        columns.push(UntypedColumn::new(column));
        let mut keys = self.col_index.keys().to_vec();
        keys.push(key);
        let mut indices = self.col_index.indices().to_vec();
        indices.push(columns.len() - 1);
        Ok(Self {
            row_index: self.row_index.clone(),
            col_index: Index::new(keys, indices),
            columns,
        })
    }

    pub fn drop_column(&self, key: &C) -> Result<Self, FrameError> {
        let position = self.col_index.get(key).ok_or(FrameError::MissingColumn)?;
        let dropped = self.col_index.index_at(position);
        let columns: Vec<UntypedColumn> = self
            .columns
            .iter()
            .enumerate()
            .filter(|&(slot, _)| slot != dropped)
            .map(|(_, column)| column.clone())
            .collect();
        let keys: Vec<C> = self
            .col_index
            .keys()
            .iter()
            .enumerate()
            .filter(|&(logical, _)| logical != position)
            .map(|(_, key)| key.clone())
            .collect();
        // Column slots shift past the dropped one, so the key index is
        // rebuilt positionally instead of patched.
        Ok(Self {
            row_index: self.row_index.clone(),
            col_index: Index::from_keys(keys),
            columns,
        })
    }

    /// Join two frames on their row keys. Every left column is carried,
    /// then every right column; a shared column key is an error.
    pub fn join(&self, other: &Frame<R, C>, kind: JoinKind) -> Result<Frame<R, C>, FrameError> {
        for key in other.col_index.keys() {
            if self.col_index.contains(key) {
                return Err(FrameError::DuplicateColumnKey);
            }
        }

        let left_rows = if self.row_index.is_ordered() {
            Cow::Borrowed(&self.row_index)
        } else {
            Cow::Owned(self.row_index.sorted())
        };
        let right_rows = if other.row_index.is_ordered() {
            Cow::Borrowed(&other.row_index)
        } else {
            Cow::Owned(other.row_index.sorted())
        };
        let state = join_positions(&left_rows, &right_rows, kind);

        let mut columns = Vec::with_capacity(self.columns.len() + other.columns.len());
        for column in &self.columns {
            columns.push(column.reindexed(&state.lefts));
        }
        for column in &other.columns {
            columns.push(column.reindexed(&state.rights));
        }

        let mut col_keys = self.col_index.keys().to_vec();
        col_keys.extend_from_slice(other.col_index.keys());

        Ok(Frame {
            row_index: Index::from_keys(state.keys),
            col_index: Index::from_keys(col_keys),
            columns,
        })
    }
}
