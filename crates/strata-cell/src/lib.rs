#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

/// The two flavors of absence: a datum that is missing, and a datum that
/// exists but is defined to be undefined (e.g. a division by zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonValue {
    NA,
    NM,
}

/// A three-valued wrapper carried at every public boundary of the engine.
///
/// `NA` is the identity of the cell monoid; `NM` absorbs. Missing data is
/// data here, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Cell<A> {
    Value(A),
    NA,
    NM,
}

impl<A> Cell<A> {
    #[must_use]
    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    #[must_use]
    pub fn is_na(&self) -> bool {
        matches!(self, Self::NA)
    }

    #[must_use]
    pub fn is_nm(&self) -> bool {
        matches!(self, Self::NM)
    }

    #[must_use]
    pub fn is_non_value(&self) -> bool {
        !self.is_value()
    }

    #[must_use]
    pub fn value(self) -> Option<A> {
        match self {
            Self::Value(value) => Some(value),
            Self::NA | Self::NM => None,
        }
    }

    #[must_use]
    pub fn as_ref(&self) -> Cell<&A> {
        match self {
            Self::Value(value) => Cell::Value(value),
            Self::NA => Cell::NA,
            Self::NM => Cell::NM,
        }
    }

    /// Mapping preserves the variant.
    #[must_use]
    pub fn map<B>(self, f: impl FnOnce(A) -> B) -> Cell<B> {
        match self {
            Self::Value(value) => Cell::Value(f(value)),
            Self::NA => Cell::NA,
            Self::NM => Cell::NM,
        }
    }

    /// `NA`/`NM` short-circuit; a `Value` may introduce either.
    #[must_use]
    pub fn flat_map<B>(self, f: impl FnOnce(A) -> Cell<B>) -> Cell<B> {
        match self {
            Self::Value(value) => f(value),
            Self::NA => Cell::NA,
            Self::NM => Cell::NM,
        }
    }

    /// Combine two cells with `f` when both carry values; otherwise NM
    /// wins over NA.
    #[must_use]
    pub fn zip_with<B, C>(self, other: Cell<B>, f: impl FnOnce(A, B) -> C) -> Cell<C> {
        match (self, other) {
            (Self::Value(left), Cell::Value(right)) => Cell::Value(f(left, right)),
            (Self::NM, _) | (_, Cell::NM) => Cell::NM,
            _ => Cell::NA,
        }
    }

    /// First non-absent cell wins, `self` taking precedence. When both
    /// are absent, NM absorbs.
    #[must_use]
    pub fn or_else(self, other: Cell<A>) -> Cell<A> {
        match (self, other) {
            (Self::Value(value), _) => Cell::Value(value),
            (_, Cell::Value(value)) => Cell::Value(value),
            (Self::NM, _) | (_, Cell::NM) => Cell::NM,
            (Self::NA, Cell::NA) => Cell::NA,
        }
    }

    /// The cell monoid over a value semigroup: NA is the identity, NM is
    /// absorbing.
    #[must_use]
    pub fn combine<S>(self, other: Cell<A>, semigroup: &S) -> Cell<A>
    where
        S: Semigroup<A> + ?Sized,
    {
        match (self, other) {
            (Self::NM, _) | (_, Cell::NM) => Cell::NM,
            (Self::Value(left), Cell::Value(right)) => Cell::Value(semigroup.combine(left, right)),
            (Self::Value(value), Cell::NA) | (Self::NA, Cell::Value(value)) => Cell::Value(value),
            (Self::NA, Cell::NA) => Cell::NA,
        }
    }

    #[must_use]
    pub fn unwrap_value(self) -> A {
        match self {
            Self::Value(value) => value,
            Self::NA => panic!("unwrap_value on NA"),
            Self::NM => panic!("unwrap_value on NM"),
        }
    }
}

impl<A> From<Option<A>> for Cell<A> {
    fn from(value: Option<A>) -> Self {
        match value {
            Some(value) => Self::Value(value),
            None => Self::NA,
        }
    }
}

impl<A> From<NonValue> for Cell<A> {
    fn from(non_value: NonValue) -> Self {
        match non_value {
            NonValue::NA => Self::NA,
            NonValue::NM => Self::NM,
        }
    }
}

// ── Algebra strategies ─────────────────────────────────────────────────
//
// The operations that need an algebra take it as an explicit parameter;
// there is no ambient instance resolution.

pub trait Semigroup<A> {
    fn combine(&self, left: A, right: A) -> A;
}

pub trait Monoid<A>: Semigroup<A> {
    fn empty(&self) -> A;
}

/// A numeric field with an explicit non-invertible-divisor signal, plus
/// the count embedding the mean reduction needs.
pub trait Field<A> {
    fn zero(&self) -> A;
    fn add(&self, left: A, right: A) -> A;
    fn sub(&self, left: A, right: A) -> A;
    fn mul(&self, left: A, right: A) -> A;
    /// `None` when `right` has no inverse (division by zero).
    fn div(&self, left: A, right: A) -> Option<A>;
    fn from_count(&self, count: usize) -> A;
}

/// Distance between two keys, for bounded roll-forward.
pub trait Metric<K> {
    type Distance: PartialOrd;

    fn distance(&self, from: &K, to: &K) -> Self::Distance;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Additive;

impl Semigroup<i64> for Additive {
    fn combine(&self, left: i64, right: i64) -> i64 {
        left + right
    }
}

impl Monoid<i64> for Additive {
    fn empty(&self) -> i64 {
        0
    }
}

impl Semigroup<f64> for Additive {
    fn combine(&self, left: f64, right: f64) -> f64 {
        left + right
    }
}

impl Monoid<f64> for Additive {
    fn empty(&self) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StringConcat;

impl Semigroup<String> for StringConcat {
    fn combine(&self, mut left: String, right: String) -> String {
        left.push_str(&right);
        left
    }
}

impl Monoid<String> for StringConcat {
    fn empty(&self) -> String {
        String::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinOf;

impl<A: PartialOrd> Semigroup<A> for MinOf {
    fn combine(&self, left: A, right: A) -> A {
        if right < left { right } else { left }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaxOf;

impl<A: PartialOrd> Semigroup<A> for MaxOf {
    fn combine(&self, left: A, right: A) -> A {
        if right > left { right } else { left }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct F64Field;

impl Field<f64> for F64Field {
    fn zero(&self) -> f64 {
        0.0
    }

    fn add(&self, left: f64, right: f64) -> f64 {
        left + right
    }

    fn sub(&self, left: f64, right: f64) -> f64 {
        left - right
    }

    fn mul(&self, left: f64, right: f64) -> f64 {
        left * right
    }

    fn div(&self, left: f64, right: f64) -> Option<f64> {
        if right == 0.0 { None } else { Some(left / right) }
    }

    fn from_count(&self, count: usize) -> f64 {
        count as f64
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct I64Field;

impl Field<i64> for I64Field {
    fn zero(&self) -> i64 {
        0
    }

    fn add(&self, left: i64, right: i64) -> i64 {
        left + right
    }

    fn sub(&self, left: i64, right: i64) -> i64 {
        left - right
    }

    fn mul(&self, left: i64, right: i64) -> i64 {
        left * right
    }

    fn div(&self, left: i64, right: i64) -> Option<i64> {
        if right == 0 { None } else { Some(left / right) }
    }

    fn from_count(&self, count: usize) -> i64 {
        count as i64
    }
}

/// Absolute difference over integer keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsDiff;

impl Metric<i64> for AbsDiff {
    type Distance = u64;

    fn distance(&self, from: &i64, to: &i64) -> u64 {
        from.abs_diff(*to)
    }
}

impl Metric<f64> for AbsDiff {
    type Distance = f64;

    fn distance(&self, from: &f64, to: &f64) -> f64 {
        (from - to).abs()
    }
}
