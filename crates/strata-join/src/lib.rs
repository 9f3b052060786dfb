#![forbid(unsafe_code)]

use std::mem::size_of;

use bumpalo::{collections::Vec as BumpVec, Bump};
use serde::{Deserialize, Serialize};
use strata_index::{cogroup, Cogrouper, Index, KeyRun};

/// Join flavor for the Cartesian cogrouper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinKind {
    #[must_use]
    pub fn left_outer(self) -> bool {
        matches!(self, Self::Left | Self::Outer)
    }

    #[must_use]
    pub fn right_outer(self) -> bool {
        matches!(self, Self::Right | Self::Outer)
    }
}

/// Merge flavor for the pairwise cogrouper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeKind {
    Inner,
    Outer,
}

/// Aligned output of a cogroup pass: one key per output row plus the rows
/// each side contributes. `None` is the skip sentinel for "no match on
/// this side"; the keys become the index of the output column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CogroupState<K> {
    pub keys: Vec<K>,
    pub lefts: Vec<Option<usize>>,
    pub rights: Vec<Option<usize>>,
}

impl<K> CogroupState<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
            lefts: Vec::with_capacity(capacity),
            rights: Vec::with_capacity(capacity),
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

    pub fn push(&mut self, key: K, left: Option<usize>, right: Option<usize>) {
        self.keys.push(key);
        self.lefts.push(left);
        self.rights.push(right);
    }

    /// Iterate the aligned position pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (Option<usize>, Option<usize>)> + '_ {
        self.lefts
            .iter()
            .copied()
            .zip(self.rights.iter().copied())
    }
}

impl<K> Default for CogroupState<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a cogrouper writes its aligned rows. Lets the same run logic
/// fill heap-backed state and arena-backed intermediates.
trait PositionSink<K> {
    fn push_row(&mut self, key: K, left: Option<usize>, right: Option<usize>);
}

impl<K> PositionSink<K> for CogroupState<K> {
    fn push_row(&mut self, key: K, left: Option<usize>, right: Option<usize>) {
        self.push(key, left, right);
    }
}

fn emit_join<K: Clone, S: PositionSink<K>>(
    kind: JoinKind,
    sink: &mut S,
    left: &KeyRun<'_, K>,
    right: &KeyRun<'_, K>,
) {
    if !left.is_empty() && !right.is_empty() {
        // Both sides matched: full Cartesian product of the two runs.
        let key = left.key();
        for &lrow in left.rows() {
            for &rrow in right.rows() {
                sink.push_row(key.clone(), Some(lrow), Some(rrow));
            }
        }
    } else if !left.is_empty() {
        if kind.left_outer() {
            let key = left.key();
            for &lrow in left.rows() {
                sink.push_row(key.clone(), Some(lrow), None);
            }
        }
    } else if !right.is_empty() && kind.right_outer() {
        let key = right.key();
        for &rrow in right.rows() {
            sink.push_row(key.clone(), None, Some(rrow));
        }
    }
}

fn emit_merge<K: Clone, S: PositionSink<K>>(
    kind: MergeKind,
    sink: &mut S,
    left: &KeyRun<'_, K>,
    right: &KeyRun<'_, K>,
) {
    let lrows = left.rows();
    let rrows = right.rows();

    if lrows.is_empty() && rrows.is_empty() {
        return;
    }
    if lrows.is_empty() || rrows.is_empty() {
        if matches!(kind, MergeKind::Outer) {
            let key = if lrows.is_empty() {
                right.key()
            } else {
                left.key()
            };
            for &lrow in lrows {
                sink.push_row(key.clone(), Some(lrow), None);
            }
            for &rrow in rrows {
                sink.push_row(key.clone(), None, Some(rrow));
            }
        }
        return;
    }

    // Both sides matched: align pair-wise by run position, never
    // Cartesian.
    let key = left.key();
    let count = match kind {
        MergeKind::Inner => lrows.len().min(rrows.len()),
        MergeKind::Outer => lrows.len().max(rrows.len()),
    };
    for slot in 0..count {
        sink.push_row(
            key.clone(),
            lrows.get(slot).copied(),
            rrows.get(slot).copied(),
        );
    }
}

/// Cartesian cogrouper: every left row of a key run pairs with every
/// right row; unmatched sides are kept or dropped per the join kind.
#[derive(Debug, Clone, Copy)]
pub struct Joiner {
    kind: JoinKind,
    capacity: usize,
}

impl Joiner {
    #[must_use]
    pub fn new(kind: JoinKind) -> Self {
        Self { kind, capacity: 0 }
    }

    #[must_use]
    pub fn with_capacity(kind: JoinKind, capacity: usize) -> Self {
        Self { kind, capacity }
    }
}

impl<K: Ord + Clone> Cogrouper<K> for Joiner {
    type State = CogroupState<K>;

    fn init(&self) -> Self::State {
        CogroupState::with_capacity(self.capacity)
    }

    fn cogroup(
        &self,
        mut state: Self::State,
        left: KeyRun<'_, K>,
        right: KeyRun<'_, K>,
    ) -> Self::State {
        emit_join(self.kind, &mut state, &left, &right);
        state
    }
}

/// Pairwise cogrouper: rows of a shared key run are aligned by position;
/// under `Outer` the shorter run is padded with skips.
#[derive(Debug, Clone, Copy)]
pub struct Merger {
    kind: MergeKind,
    capacity: usize,
}

impl Merger {
    #[must_use]
    pub fn new(kind: MergeKind) -> Self {
        Self { kind, capacity: 0 }
    }

    #[must_use]
    pub fn with_capacity(kind: MergeKind, capacity: usize) -> Self {
        Self { kind, capacity }
    }
}

impl<K: Ord + Clone> Cogrouper<K> for Merger {
    type State = CogroupState<K>;

    fn init(&self) -> Self::State {
        CogroupState::with_capacity(self.capacity)
    }

    fn cogroup(
        &self,
        mut state: Self::State,
        left: KeyRun<'_, K>,
        right: KeyRun<'_, K>,
    ) -> Self::State {
        emit_merge(self.kind, &mut state, &left, &right);
        state
    }
}

// ── Position engine ────────────────────────────────────────────────────
//
// A counting pre-pass sizes the output, then the position vectors are
// accumulated either in an arena or through the global allocator,
// depending on the estimated intermediate footprint.

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for JoinExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

fn estimate_intermediate_bytes<K>(output_rows: usize) -> usize {
    output_rows.saturating_mul(
        size_of::<Option<usize>>()
            .saturating_mul(2)
            .saturating_add(size_of::<K>()),
    )
}

struct JoinRowCount {
    kind: JoinKind,
}

impl<K: Ord + Clone> Cogrouper<K> for JoinRowCount {
    type State = usize;

    fn init(&self) -> usize {
        0
    }

    fn cogroup(&self, count: usize, left: KeyRun<'_, K>, right: KeyRun<'_, K>) -> usize {
        count
            + if !left.is_empty() && !right.is_empty() {
                left.len() * right.len()
            } else if !left.is_empty() {
                if self.kind.left_outer() { left.len() } else { 0 }
            } else if self.kind.right_outer() {
                right.len()
            } else {
                0
            }
    }
}

struct MergeRowCount {
    kind: MergeKind,
}

impl<K: Ord + Clone> Cogrouper<K> for MergeRowCount {
    type State = usize;

    fn init(&self) -> usize {
        0
    }

    fn cogroup(&self, count: usize, left: KeyRun<'_, K>, right: KeyRun<'_, K>) -> usize {
        count
            + match self.kind {
                MergeKind::Inner if left.is_empty() || right.is_empty() => 0,
                MergeKind::Inner => left.len().min(right.len()),
                MergeKind::Outer => left.len().max(right.len()),
            }
    }
}

struct ArenaSink<'bump, K> {
    keys: Vec<K>,
    lefts: BumpVec<'bump, Option<usize>>,
    rights: BumpVec<'bump, Option<usize>>,
}

impl<'bump, K> ArenaSink<'bump, K> {
    fn with_capacity_in(capacity: usize, arena: &'bump Bump) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
            lefts: BumpVec::with_capacity_in(capacity, arena),
            rights: BumpVec::with_capacity_in(capacity, arena),
        }
    }

    fn into_state(self) -> CogroupState<K> {
        CogroupState {
            keys: self.keys,
            lefts: self.lefts.as_slice().to_vec(),
            rights: self.rights.as_slice().to_vec(),
        }
    }
}

impl<K> PositionSink<K> for ArenaSink<'_, K> {
    fn push_row(&mut self, key: K, left: Option<usize>, right: Option<usize>) {
        self.keys.push(key);
        self.lefts.push(left);
        self.rights.push(right);
    }
}

struct ArenaJoiner<'bump> {
    kind: JoinKind,
    capacity: usize,
    arena: &'bump Bump,
}

impl<'bump, K: Ord + Clone> Cogrouper<K> for ArenaJoiner<'bump> {
    type State = ArenaSink<'bump, K>;

    fn init(&self) -> Self::State {
        ArenaSink::with_capacity_in(self.capacity, self.arena)
    }

    fn cogroup(
        &self,
        mut sink: Self::State,
        left: KeyRun<'_, K>,
        right: KeyRun<'_, K>,
    ) -> Self::State {
        emit_join(self.kind, &mut sink, &left, &right);
        sink
    }
}

struct ArenaMerger<'bump> {
    kind: MergeKind,
    capacity: usize,
    arena: &'bump Bump,
}

impl<'bump, K: Ord + Clone> Cogrouper<K> for ArenaMerger<'bump> {
    type State = ArenaSink<'bump, K>;

    fn init(&self) -> Self::State {
        ArenaSink::with_capacity_in(self.capacity, self.arena)
    }

    fn cogroup(
        &self,
        mut sink: Self::State,
        left: KeyRun<'_, K>,
        right: KeyRun<'_, K>,
    ) -> Self::State {
        emit_merge(self.kind, &mut sink, &left, &right);
        sink
    }
}

pub fn join_positions<K: Ord + Clone>(
    left: &Index<K>,
    right: &Index<K>,
    kind: JoinKind,
) -> CogroupState<K> {
    join_positions_with_options(left, right, kind, JoinExecutionOptions::default())
}

pub fn join_positions_with_options<K: Ord + Clone>(
    left: &Index<K>,
    right: &Index<K>,
    kind: JoinKind,
    options: JoinExecutionOptions,
) -> CogroupState<K> {
    let output_rows = cogroup(left, right, &JoinRowCount { kind });
    let estimated = estimate_intermediate_bytes::<K>(output_rows);
    if options.use_arena && estimated <= options.arena_budget_bytes {
        let arena = Bump::new();
        let sink = cogroup(
            left,
            right,
            &ArenaJoiner {
                kind,
                capacity: output_rows,
                arena: &arena,
            },
        );
        sink.into_state()
    } else {
        cogroup(left, right, &Joiner::with_capacity(kind, output_rows))
    }
}

pub fn merge_positions<K: Ord + Clone>(
    left: &Index<K>,
    right: &Index<K>,
    kind: MergeKind,
) -> CogroupState<K> {
    merge_positions_with_options(left, right, kind, JoinExecutionOptions::default())
}

pub fn merge_positions_with_options<K: Ord + Clone>(
    left: &Index<K>,
    right: &Index<K>,
    kind: MergeKind,
    options: JoinExecutionOptions,
) -> CogroupState<K> {
    let output_rows = cogroup(left, right, &MergeRowCount { kind });
    let estimated = estimate_intermediate_bytes::<K>(output_rows);
    if options.use_arena && estimated <= options.arena_budget_bytes {
        let arena = Bump::new();
        let sink = cogroup(
            left,
            right,
            &ArenaMerger {
                kind,
                capacity: output_rows,
                arena: &arena,
            },
        );
        sink.into_state()
    } else {
        cogroup(left, right, &Merger::with_capacity(kind, output_rows))
    }
}

#[cfg(test)]
mod tests {
    use strata_index::Index;

    use super::{
        join_positions, join_positions_with_options, merge_positions, CogroupState,
        JoinExecutionOptions, JoinKind, MergeKind,
    };

    fn expected(rows: &[(i64, Option<usize>, Option<usize>)]) -> CogroupState<i64> {
        let mut state = CogroupState::new();
        for &(key, left, right) in rows {
            state.push(key, left, right);
        }
        state
    }

    #[test]
    fn inner_join_is_cartesian_per_key() {
        let lhs = Index::from_keys(vec![1, 2, 2]);
        let rhs = Index::from_keys(vec![2, 2, 3]);
        let state = join_positions(&lhs, &rhs, JoinKind::Inner);
        assert_eq!(
            state,
            expected(&[
                (2, Some(1), Some(0)),
                (2, Some(1), Some(1)),
                (2, Some(2), Some(0)),
                (2, Some(2), Some(1)),
            ])
        );
    }

    #[test]
    fn left_join_keeps_unmatched_left_rows() {
        let lhs = Index::from_keys(vec![1, 2]);
        let rhs = Index::from_keys(vec![2]);
        let state = join_positions(&lhs, &rhs, JoinKind::Left);
        assert_eq!(
            state,
            expected(&[(1, Some(0), None), (2, Some(1), Some(0))])
        );
    }

    #[test]
    fn right_join_keeps_unmatched_right_rows() {
        let lhs = Index::from_keys(vec![2]);
        let rhs = Index::from_keys(vec![1, 2]);
        let state = join_positions(&lhs, &rhs, JoinKind::Right);
        assert_eq!(
            state,
            expected(&[(1, None, Some(0)), (2, Some(0), Some(1))])
        );
    }

    #[test]
    fn outer_join_keeps_both_sides() {
        let lhs = Index::from_keys(vec![1, 3]);
        let rhs = Index::from_keys(vec![2, 3]);
        let state = join_positions(&lhs, &rhs, JoinKind::Outer);
        assert_eq!(
            state,
            expected(&[
                (1, Some(0), None),
                (2, None, Some(0)),
                (3, Some(1), Some(1)),
            ])
        );
    }

    #[test]
    fn outer_merge_aligns_pairwise_with_skip_padding() {
        let lhs = Index::from_keys(vec![7, 7, 7]);
        let rhs = Index::from_keys(vec![7]);
        let state = merge_positions(&lhs, &rhs, MergeKind::Outer);
        assert_eq!(
            state,
            expected(&[
                (7, Some(0), Some(0)),
                (7, Some(1), None),
                (7, Some(2), None),
            ])
        );
    }

    #[test]
    fn inner_merge_stops_at_shorter_run() {
        let lhs = Index::from_keys(vec![7, 7, 7]);
        let rhs = Index::from_keys(vec![7]);
        let state = merge_positions(&lhs, &rhs, MergeKind::Inner);
        assert_eq!(state, expected(&[(7, Some(0), Some(0))]));
    }

    #[test]
    fn inner_merge_drops_single_sided_keys() {
        let lhs = Index::from_keys(vec![1, 2]);
        let rhs = Index::from_keys(vec![2, 3]);
        let state = merge_positions(&lhs, &rhs, MergeKind::Inner);
        assert_eq!(state, expected(&[(2, Some(1), Some(0))]));
    }

    #[test]
    fn outer_merge_emits_single_sided_keys_with_skips() {
        let lhs = Index::from_keys(vec![1]);
        let rhs = Index::from_keys(vec![2, 2]);
        let state = merge_positions(&lhs, &rhs, MergeKind::Outer);
        assert_eq!(
            state,
            expected(&[
                (1, Some(0), None),
                (2, None, Some(0)),
                (2, None, Some(1)),
            ])
        );
    }

    #[test]
    fn arena_and_global_paths_agree() {
        let lhs = Index::from_keys(vec![1, 2, 2, 5]);
        let rhs = Index::from_keys(vec![2, 2, 4, 5]);
        let arena = join_positions_with_options(
            &lhs,
            &rhs,
            JoinKind::Outer,
            JoinExecutionOptions::default(),
        );
        let global = join_positions_with_options(
            &lhs,
            &rhs,
            JoinKind::Outer,
            JoinExecutionOptions {
                use_arena: false,
                ..JoinExecutionOptions::default()
            },
        );
        assert_eq!(arena, global);
    }

    #[test]
    fn join_uses_underlying_rows_not_positions() {
        // Sorted views of unsorted indexes carry permuted row indices;
        // those, not the logical positions, must land in the state.
        let lhs = Index::from_keys(vec![2, 1]).sorted();
        let rhs = Index::from_keys(vec![1, 2]);
        let state = join_positions(&lhs, &rhs, JoinKind::Inner);
        assert_eq!(
            state,
            expected(&[(1, Some(1), Some(0)), (2, Some(0), Some(1))])
        );
    }
}
