#![forbid(unsafe_code)]

use std::fmt;
use std::sync::Arc;

use strata_cell::{Cell, Field, NonValue};
use strata_mask::Mask;

/// Sentinel translation target used by position-based reindexing for rows
/// with no source ("Skip"). Reads as NA.
const ABSENT: usize = usize::MAX;

type EvalFn<A> = Arc<dyn Fn(usize) -> Cell<A> + Send + Sync>;

/// A sparse, potentially unbounded mapping from row position to `Cell<A>`.
///
/// Columns are immutable and cheaply cloneable; any number of series may
/// share one. Three shapes exist: a dense backing (values plus NA/NM
/// masks), a reindexing translation over a base column, and a lazily
/// evaluated view. `force` collapses any chain back to a dense backing.
pub struct Column<A> {
    repr: Arc<Repr<A>>,
}

enum Repr<A> {
    Dense {
        values: Vec<A>,
        na: Mask,
        nm: Mask,
    },
    Reindexed {
        indices: Vec<usize>,
        base: Column<A>,
    },
    Eval(EvalFn<A>),
}

impl<A> Clone for Column<A> {
    fn clone(&self) -> Self {
        Self {
            repr: Arc::clone(&self.repr),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for Column<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.repr {
            Repr::Dense { values, na, nm } => f
                .debug_struct("DenseColumn")
                .field("values", values)
                .field("na", na)
                .field("nm", nm)
                .finish(),
            Repr::Reindexed { indices, base } => f
                .debug_struct("ReindexedColumn")
                .field("indices", indices)
                .field("base", base)
                .finish(),
            Repr::Eval(_) => f.write_str("EvalColumn"),
        }
    }
}

impl<A: Clone> Column<A> {
    /// A column that is NA at every row.
    #[must_use]
    pub fn empty() -> Self {
        Self::dense(Vec::new(), Mask::new(), Mask::new())
    }

    #[must_use]
    pub fn from_values(values: Vec<A>) -> Self {
        Self::dense(values, Mask::new(), Mask::new())
    }

    pub fn from_cells(cells: impl IntoIterator<Item = Cell<A>>) -> Self
    where
        A: Default,
    {
        let mut builder = ColumnBuilder::new();
        for cell in cells {
            builder.push(cell);
        }
        builder.build()
    }

    fn dense(values: Vec<A>, na: Mask, nm: Mask) -> Self {
        assert!(
            (&na & &nm).is_empty(),
            "NA and NM masks must be disjoint"
        );
        Self {
            repr: Arc::new(Repr::Dense { values, na, nm }),
        }
    }

    /// A lazily evaluated column. The closure must be total over all row
    /// positions.
    pub fn from_fn(f: impl Fn(usize) -> Cell<A> + Send + Sync + 'static) -> Self {
        Self {
            repr: Arc::new(Repr::Eval(Arc::new(f))),
        }
    }

    #[must_use]
    pub fn get(&self, row: usize) -> Cell<A> {
        match &*self.repr {
            Repr::Dense { values, na, nm } => {
                if row >= values.len() || na.contains(row) {
                    Cell::NA
                } else if nm.contains(row) {
                    Cell::NM
                } else {
                    Cell::Value(values[row].clone())
                }
            }
            Repr::Reindexed { indices, base } => match indices.get(row) {
                Some(&ABSENT) | None => Cell::NA,
                Some(&target) => base.get(target),
            },
            Repr::Eval(f) => f(row),
        }
    }

    #[must_use]
    pub fn is_value_at(&self, row: usize) -> bool {
        match &*self.repr {
            Repr::Dense { values, na, nm } => {
                row < values.len() && !na.contains(row) && !nm.contains(row)
            }
            Repr::Reindexed { indices, base } => match indices.get(row) {
                Some(&ABSENT) | None => false,
                Some(&target) => base.is_value_at(target),
            },
            Repr::Eval(f) => f(row).is_value(),
        }
    }

    /// The value at `row`. Calling this on a non-value row is a contract
    /// violation and panics.
    #[must_use]
    pub fn value_at(&self, row: usize) -> A {
        match self.get(row) {
            Cell::Value(value) => value,
            Cell::NA => panic!("value_at called on an NA row ({row})"),
            Cell::NM => panic!("value_at called on an NM row ({row})"),
        }
    }

    /// The flavor of absence at `row`. Calling this on a value row is a
    /// contract violation and panics.
    #[must_use]
    pub fn non_value_at(&self, row: usize) -> NonValue {
        match self.get(row) {
            Cell::NA => NonValue::NA,
            Cell::NM => NonValue::NM,
            Cell::Value(_) => panic!("non_value_at called on a value row ({row})"),
        }
    }

    /// A translation view: row `i` of the view reads row `indices[i]` of
    /// `self`; positions past `indices` read NA.
    #[must_use]
    pub fn reindex(&self, indices: &[usize]) -> Self {
        Self {
            repr: Arc::new(Repr::Reindexed {
                indices: indices.to_vec(),
                base: self.clone(),
            }),
        }
    }

    /// Like `reindex`, with `None` marking rows that have no source.
    #[must_use]
    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Self {
        let indices = positions
            .iter()
            .map(|slot| slot.unwrap_or(ABSENT))
            .collect();
        Self {
            repr: Arc::new(Repr::Reindexed {
                indices,
                base: self.clone(),
            }),
        }
    }

    /// Materialize rows `0..len` into a fresh dense backing, dropping any
    /// reindex or evaluation chain.
    #[must_use]
    pub fn force(&self, len: usize) -> Self
    where
        A: Default,
    {
        let mut builder = ColumnBuilder::with_capacity(len);
        for row in 0..len {
            builder.push(self.get(row));
        }
        builder.build()
    }
}

impl<A: Clone + Send + Sync + 'static> Column<A> {
    /// A lazily mapped view of this column.
    #[must_use]
    pub fn map<B, F>(&self, f: F) -> Column<B>
    where
        B: Clone,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        let base = self.clone();
        Column::from_fn(move |row| base.get(row).map(&f))
    }

    /// Cell-wise combination of two columns as a lazy view.
    #[must_use]
    pub fn zip_cells<B, C, F>(&self, that: &Column<B>, f: F) -> Column<C>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone,
        F: Fn(A, B) -> C + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = that.clone();
        Column::from_fn(move |row| left.get(row).zip_with(right.get(row), &f))
    }

    // ── Cell-wise numeric algebra ──────────────────────────────────────

    #[must_use]
    pub fn add<F>(&self, that: &Column<A>, field: F) -> Column<A>
    where
        F: Field<A> + Send + Sync + 'static,
    {
        self.zip_cells(that, move |left, right| field.add(left, right))
    }

    #[must_use]
    pub fn sub<F>(&self, that: &Column<A>, field: F) -> Column<A>
    where
        F: Field<A> + Send + Sync + 'static,
    {
        self.zip_cells(that, move |left, right| field.sub(left, right))
    }

    #[must_use]
    pub fn mul<F>(&self, that: &Column<A>, field: F) -> Column<A>
    where
        F: Field<A> + Send + Sync + 'static,
    {
        self.zip_cells(that, move |left, right| field.mul(left, right))
    }

    /// Cell-wise division; a non-invertible divisor yields NM.
    #[must_use]
    pub fn div<F>(&self, that: &Column<A>, field: F) -> Column<A>
    where
        F: Field<A> + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = that.clone();
        Column::from_fn(move |row| {
            left.get(row)
                .zip_with(right.get(row), |a, b| field.div(a, b))
                .flat_map(|quotient| match quotient {
                    Some(value) => Cell::Value(value),
                    None => Cell::NM,
                })
        })
    }
}

/// Accumulates cells into a dense column; row `i` of the result is exactly
/// the `i`-th push. Owned by a single caller, not thread-safe.
///
/// Masked slots hold an `A::default()` filler in the value vector so rows
/// stay positionally addressable.
#[derive(Debug)]
pub struct ColumnBuilder<A> {
    values: Vec<A>,
    na: Mask,
    nm: Mask,
}

impl<A: Default> Default for ColumnBuilder<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Default> ColumnBuilder<A> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            na: Mask::new(),
            nm: Mask::new(),
        }
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut builder = Self::new();
        builder.size_hint(capacity);
        builder
    }

    pub fn size_hint(&mut self, additional: usize) {
        self.values.reserve(additional);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn push_value(&mut self, value: A) {
        self.values.push(value);
    }

    pub fn push_na(&mut self) {
        let row = self.values.len();
        self.values.push(A::default());
        self.na.insert(row);
    }

    pub fn push_nm(&mut self) {
        let row = self.values.len();
        self.values.push(A::default());
        self.nm.insert(row);
    }

    pub fn push_non_value(&mut self, non_value: NonValue) {
        match non_value {
            NonValue::NA => self.push_na(),
            NonValue::NM => self.push_nm(),
        }
    }

    pub fn push(&mut self, cell: Cell<A>) {
        match cell {
            Cell::Value(value) => self.push_value(value),
            Cell::NA => self.push_na(),
            Cell::NM => self.push_nm(),
        }
    }

    #[must_use]
    pub fn build(self) -> Column<A>
    where
        A: Clone,
    {
        Column::dense(self.values, self.na, self.nm)
    }
}
