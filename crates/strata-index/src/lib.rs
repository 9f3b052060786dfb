#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A keyed mapping from logical position to `(key, row index)`.
///
/// `keys[i]` is the key at logical position `i` and `indices[i]` the row
/// it addresses in an associated column. Keys may repeat. When `ordered`
/// is set the keys are non-decreasing, which `group` and `cogroup` rely
/// on. Indexes are immutable; every transformation returns a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index<K> {
    keys: Vec<K>,
    indices: Vec<usize>,
    ordered: bool,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("keys are not in non-decreasing order at position {position}")]
    UnsortedKeys { position: usize },
}

fn is_non_decreasing<K: Ord>(keys: &[K]) -> bool {
    keys.windows(2).all(|pair| pair[0] <= pair[1])
}

impl<K: Ord + Clone> Index<K> {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            keys: Vec::new(),
            indices: Vec::new(),
            ordered: true,
        }
    }

    /// Index the given keys positionally (row `i` for key `i`), detecting
    /// whether they arrive in order.
    #[must_use]
    pub fn from_keys(keys: Vec<K>) -> Self {
        let indices = (0..keys.len()).collect();
        let ordered = is_non_decreasing(&keys);
        Self {
            keys,
            indices,
            ordered,
        }
    }

    /// Pair keys with explicit row indices, detecting order.
    ///
    /// Mismatched lengths are a contract violation.
    #[must_use]
    pub fn new(keys: Vec<K>, indices: Vec<usize>) -> Self {
        assert_eq!(
            keys.len(),
            indices.len(),
            "keys and indices must have equal length"
        );
        let ordered = is_non_decreasing(&keys);
        Self {
            keys,
            indices,
            ordered,
        }
    }

    /// Construct an ordered index, verifying monotonicity.
    pub fn ordered(keys: Vec<K>, indices: Vec<usize>) -> Result<Self, IndexError> {
        assert_eq!(
            keys.len(),
            indices.len(),
            "keys and indices must have equal length"
        );
        if let Some(position) = keys.windows(2).position(|pair| pair[0] > pair[1]) {
            return Err(IndexError::UnsortedKeys {
                position: position + 1,
            });
        }
        Ok(Self {
            keys,
            indices,
            ordered: true,
        })
    }

    /// Construct an index known to be ordered, skipping the scan.
    #[must_use]
    pub fn ordered_unchecked(keys: Vec<K>, indices: Vec<usize>) -> Self {
        debug_assert_eq!(keys.len(), indices.len());
        debug_assert!(is_non_decreasing(&keys));
        Self {
            keys,
            indices,
            ordered: true,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.ordered
    }

    #[must_use]
    pub fn keys(&self) -> &[K] {
        &self.keys
    }

    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    #[must_use]
    pub fn key_at(&self, position: usize) -> &K {
        &self.keys[position]
    }

    #[must_use]
    pub fn index_at(&self, position: usize) -> usize {
        self.indices[position]
    }

    /// Logical position of the first occurrence of `key`: a binary search
    /// for ordered indexes, a linear scan otherwise.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<usize> {
        if self.ordered {
            let position = self.keys.partition_point(|probe| probe < key);
            (position < self.keys.len() && self.keys[position] == *key).then_some(position)
        } else {
            self.keys.iter().position(|probe| probe == key)
        }
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, usize)> + '_ {
        self.keys.iter().zip(self.indices.iter().copied())
    }

    /// Stable sort by key; insertion order is preserved within runs of
    /// equal keys.
    #[must_use]
    pub fn sorted(&self) -> Self {
        if self.ordered {
            return self.clone();
        }
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by(|&left, &right| self.keys[left].cmp(&self.keys[right]));
        let keys = order.iter().map(|&pos| self.keys[pos].clone()).collect();
        let indices = order.iter().map(|&pos| self.indices[pos]).collect();
        Self {
            keys,
            indices,
            ordered: true,
        }
    }

    /// The same keys addressing rows `0..n`.
    #[must_use]
    pub fn reset_indices(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            indices: (0..self.len()).collect(),
            ordered: self.ordered,
        }
    }

    /// The same keys with replacement row indices.
    ///
    /// A length mismatch is a contract violation.
    #[must_use]
    pub fn with_indices(&self, indices: Vec<usize>) -> Self {
        assert_eq!(
            self.keys.len(),
            indices.len(),
            "replacement indices must match key count"
        );
        Self {
            keys: self.keys.clone(),
            indices,
            ordered: self.ordered,
        }
    }

    /// Select logical positions into a new index.
    #[must_use]
    pub fn take(&self, positions: &[usize]) -> Self {
        let keys: Vec<K> = positions.iter().map(|&pos| self.keys[pos].clone()).collect();
        let indices = positions.iter().map(|&pos| self.indices[pos]).collect();
        let ordered = is_non_decreasing(&keys);
        Self {
            keys,
            indices,
            ordered,
        }
    }

    /// Walk contiguous runs of equal keys, feeding each run to the
    /// grouper. Calling this on an unordered index is a contract
    /// violation.
    pub fn group<G: Grouper<K>>(&self, grouper: &G) -> G::State {
        assert!(self.ordered, "group requires an ordered index");
        let mut state = grouper.init();
        let mut start = 0;
        while start < self.keys.len() {
            let end = run_end(&self.keys, start);
            state = grouper.group(
                state,
                KeyRun {
                    keys: &self.keys,
                    indices: &self.indices,
                    start,
                    end,
                },
            );
            start = end;
        }
        state
    }
}

/// A contiguous run of equal keys inside an index: the full key and row
/// slices plus the `[start, end)` window of this run.
#[derive(Debug, Clone, Copy)]
pub struct KeyRun<'a, K> {
    pub keys: &'a [K],
    pub indices: &'a [usize],
    pub start: usize,
    pub end: usize,
}

impl<'a, K> KeyRun<'a, K> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// The run's key. Calling this on an empty run is a contract
    /// violation.
    #[must_use]
    pub fn key(&self) -> &'a K {
        &self.keys[self.start]
    }

    /// The rows this run addresses.
    #[must_use]
    pub fn rows(&self) -> &'a [usize] {
        &self.indices[self.start..self.end]
    }

    fn empty_at(keys: &'a [K], indices: &'a [usize], position: usize) -> Self {
        Self {
            keys,
            indices,
            start: position,
            end: position,
        }
    }
}

/// Strategy consuming the runs of one ordered index.
pub trait Grouper<K> {
    type State;

    fn init(&self) -> Self::State;
    fn group(&self, state: Self::State, run: KeyRun<'_, K>) -> Self::State;
}

/// Strategy consuming aligned key runs from two ordered indexes. For a
/// key present on a single side, the other side's run is empty.
pub trait Cogrouper<K> {
    type State;

    fn init(&self) -> Self::State;
    fn cogroup(&self, state: Self::State, left: KeyRun<'_, K>, right: KeyRun<'_, K>)
        -> Self::State;
}

fn run_end<K: Ord>(keys: &[K], start: usize) -> usize {
    let key = &keys[start];
    let mut end = start + 1;
    while end < keys.len() && keys[end] == *key {
        end += 1;
    }
    end
}

/// Walk two ordered indexes in lockstep, presenting each maximal run of
/// equal keys to the cogrouper. The side holding the smaller key is
/// emitted alone first; equal keys go together.
pub fn cogroup<K: Ord + Clone, C: Cogrouper<K>>(
    lhs: &Index<K>,
    rhs: &Index<K>,
    cogrouper: &C,
) -> C::State {
    assert!(lhs.ordered, "cogroup requires ordered indexes");
    assert!(rhs.ordered, "cogroup requires ordered indexes");

    let (lkeys, lindices) = (&lhs.keys, &lhs.indices);
    let (rkeys, rindices) = (&rhs.keys, &rhs.indices);

    let mut state = cogrouper.init();
    let mut left = 0;
    let mut right = 0;

    while left < lkeys.len() && right < rkeys.len() {
        match lkeys[left].cmp(&rkeys[right]) {
            std::cmp::Ordering::Less => {
                let end = run_end(lkeys, left);
                state = cogrouper.cogroup(
                    state,
                    KeyRun {
                        keys: lkeys,
                        indices: lindices,
                        start: left,
                        end,
                    },
                    KeyRun::empty_at(rkeys, rindices, right),
                );
                left = end;
            }
            std::cmp::Ordering::Greater => {
                let end = run_end(rkeys, right);
                state = cogrouper.cogroup(
                    state,
                    KeyRun::empty_at(lkeys, lindices, left),
                    KeyRun {
                        keys: rkeys,
                        indices: rindices,
                        start: right,
                        end,
                    },
                );
                right = end;
            }
            std::cmp::Ordering::Equal => {
                let lend = run_end(lkeys, left);
                let rend = run_end(rkeys, right);
                state = cogrouper.cogroup(
                    state,
                    KeyRun {
                        keys: lkeys,
                        indices: lindices,
                        start: left,
                        end: lend,
                    },
                    KeyRun {
                        keys: rkeys,
                        indices: rindices,
                        start: right,
                        end: rend,
                    },
                );
                left = lend;
                right = rend;
            }
        }
    }

    while left < lkeys.len() {
        let end = run_end(lkeys, left);
        state = cogrouper.cogroup(
            state,
            KeyRun {
                keys: lkeys,
                indices: lindices,
                start: left,
                end,
            },
            KeyRun::empty_at(rkeys, rindices, rkeys.len()),
        );
        left = end;
    }

    while right < rkeys.len() {
        let end = run_end(rkeys, right);
        state = cogrouper.cogroup(
            state,
            KeyRun::empty_at(lkeys, lindices, lkeys.len()),
            KeyRun {
                keys: rkeys,
                indices: rindices,
                start: right,
                end,
            },
        );
        right = end;
    }

    state
}
