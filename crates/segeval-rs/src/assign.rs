//! One-to-one assignment of ground-truth rows to predicted columns that
//! maximizes the summed IoU.
//!
//! Among assignments with the same total, the lexicographically smallest one
//! wins: ground-truth row 0 takes the lowest column it can take without
//! losing total IoU, then row 1, and so on, with "unmatched" ordered after
//! every column. Both solvers follow this rule, so their output is identical.

use log::{debug, trace};
use pathfinding::kuhn_munkres::kuhn_munkres;
use pathfinding::matrix::Matrix;

use crate::params::AssignmentStrategy;

/// IoU is solved in fixed point, in units of 2^-40, so totals compare exactly.
const WEIGHT_SCALE: f64 = (1u64 << 40) as f64;

/// Totals within this many units (about 1e-9) of the optimum count as ties.
const TIE_TOLERANCE: i64 = 1 << 10;

/// Largest side the exhaustive solver will enumerate.
const EXHAUSTIVE_LIMIT: usize = 7;

/// Solved assignment for one IoU matrix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignment {
    /// `(row, col, iou)`, ordered by row.
    pub pairs: Vec<(usize, usize, f64)>,
    pub unmatched_rows: Vec<usize>,
    pub unmatched_cols: Vec<usize>,
}

impl Assignment {
    pub fn total(&self) -> f64 {
        self.pairs.iter().map(|&(_, _, w)| w).sum()
    }
}

/// Match `rows` ground-truth instances to `cols` predictions.
///
/// A pair is eligible only if its IoU is positive and at least `threshold`.
/// Every row and column ends up either in a pair or in the unmatched lists.
pub fn solve(
    ious: &[Vec<f64>],
    rows: usize,
    cols: usize,
    threshold: f64,
    strategy: AssignmentStrategy,
) -> Assignment {
    let weights: Vec<Vec<f64>> = (0..rows)
        .map(|i| {
            (0..cols)
                .map(|j| {
                    let v = ious
                        .get(i)
                        .and_then(|row| row.get(j))
                        .copied()
                        .unwrap_or(0.0);
                    if v > 0.0 && v >= threshold {
                        v
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();
    let fixed = to_fixed(&weights);

    let row_to_col = match strategy {
        AssignmentStrategy::Exhaustive if rows.max(cols) <= EXHAUSTIVE_LIMIT => {
            exhaustive(&fixed, rows, cols)
        }
        AssignmentStrategy::Exhaustive => {
            debug!(
                "{}x{} matrix too large for exhaustive search, using Hungarian",
                rows, cols
            );
            lexicographic_hungarian(&fixed, rows, cols)
        }
        AssignmentStrategy::Hungarian => lexicographic_hungarian(&fixed, rows, cols),
    };

    let mut assignment = Assignment::default();
    let mut col_used = vec![false; cols];
    for (i, choice) in row_to_col.into_iter().enumerate() {
        match choice {
            Some(j) => {
                col_used[j] = true;
                assignment.pairs.push((i, j, weights[i][j]));
            }
            None => assignment.unmatched_rows.push(i),
        }
    }
    assignment.unmatched_cols = (0..cols).filter(|&j| !col_used[j]).collect();
    trace!(
        "assigned {} pair(s), total {:.6}, {} unmatched row(s), {} unmatched col(s)",
        assignment.pairs.len(),
        assignment.total(),
        assignment.unmatched_rows.len(),
        assignment.unmatched_cols.len()
    );
    assignment
}

/// Maximum-weight assignment on a rectangular IoU matrix.
///
/// Returns the best total and, per row, the column it was assigned. When
/// there are more rows than columns some rows get `None`. Zero-weight cells
/// may be assigned; callers treat them as unmatched.
pub fn hungarian_max(weights: &[Vec<f64>]) -> (f64, Vec<Option<usize>>) {
    let (_, row_to_col) = max_weight(&to_fixed(weights));
    let total = row_to_col
        .iter()
        .enumerate()
        .filter_map(|(i, c)| c.map(|j| weights[i][j]))
        .sum();
    (total, row_to_col)
}

fn to_fixed(weights: &[Vec<f64>]) -> Vec<Vec<i64>> {
    weights
        .iter()
        .map(|row| row.iter().map(|&w| (w * WEIGHT_SCALE).round() as i64).collect())
        .collect()
}

/// Kuhn–Munkres on fixed-point weights. `kuhn_munkres` needs at least as
/// many columns as rows, so taller matrices are solved transposed.
fn max_weight(weights: &[Vec<i64>]) -> (i64, Vec<Option<usize>>) {
    let n = weights.len();
    let m = weights.first().map_or(0, |row| row.len());
    if n == 0 || m == 0 {
        return (0, vec![None; n]);
    }

    if n > m {
        let transposed: Vec<Vec<i64>> = (0..m)
            .map(|j| (0..n).map(|i| weights[i][j]).collect())
            .collect();
        let (total, col_to_row) = max_weight(&transposed);
        let mut row_to_col = vec![None; n];
        for (j, row) in col_to_row.into_iter().enumerate() {
            if let Some(i) = row {
                row_to_col[i] = Some(j);
            }
        }
        return (total, row_to_col);
    }

    let mut matrix = Matrix::new(n, m, 0i64);
    for (i, row) in weights.iter().enumerate() {
        for (j, &w) in row.iter().enumerate() {
            matrix[(i, j)] = w;
        }
    }
    let (total, assigned) = kuhn_munkres(&matrix);
    (total, assigned.into_iter().map(Some).collect())
}

/// Best achievable total using only the given rows and columns.
fn best_total(weights: &[Vec<i64>], rows: &[usize], cols: &[usize]) -> i64 {
    if rows.is_empty() || cols.is_empty() {
        return 0;
    }
    let sub: Vec<Vec<i64>> = rows
        .iter()
        .map(|&i| cols.iter().map(|&j| weights[i][j]).collect())
        .collect();
    max_weight(&sub).0
}

/// Fix rows one at a time to the lowest column that still admits an optimal
/// completion.
fn lexicographic_hungarian(weights: &[Vec<i64>], rows: usize, cols: usize) -> Vec<Option<usize>> {
    let all_rows: Vec<usize> = (0..rows).collect();
    let mut free_cols: Vec<usize> = (0..cols).collect();
    let optimum = best_total(weights, &all_rows, &free_cols);

    let mut fixed = 0i64;
    let mut row_to_col = Vec::with_capacity(rows);
    for i in 0..rows {
        let rest_rows = &all_rows[i + 1..];
        let mut chosen = None;
        for (pos, &j) in free_cols.iter().enumerate() {
            let w = weights[i][j];
            if w <= 0 {
                continue;
            }
            let mut rest_cols = free_cols.clone();
            rest_cols.remove(pos);
            if fixed + w + best_total(weights, rest_rows, &rest_cols) >= optimum - TIE_TOLERANCE {
                chosen = Some((pos, j));
                break;
            }
        }
        match chosen {
            Some((pos, j)) => {
                fixed += weights[i][j];
                free_cols.remove(pos);
                row_to_col.push(Some(j));
            }
            None => row_to_col.push(None),
        }
    }
    row_to_col
}

/// Enumerate every matching in lexicographic order and keep the first one
/// within tolerance of the best total.
fn exhaustive(weights: &[Vec<i64>], rows: usize, cols: usize) -> Vec<Option<usize>> {
    fn best(weights: &[Vec<i64>], i: usize, used: &mut [bool]) -> i64 {
        if i == weights.len() {
            return 0;
        }
        let mut top = best(weights, i + 1, used);
        for j in 0..used.len() {
            if used[j] || weights[i][j] <= 0 {
                continue;
            }
            used[j] = true;
            top = top.max(weights[i][j] + best(weights, i + 1, used));
            used[j] = false;
        }
        top
    }

    fn first_within(
        weights: &[Vec<i64>],
        i: usize,
        acc: i64,
        target: i64,
        used: &mut [bool],
        path: &mut Vec<Option<usize>>,
    ) -> bool {
        if i == weights.len() {
            return acc >= target;
        }
        for j in 0..used.len() {
            if used[j] || weights[i][j] <= 0 {
                continue;
            }
            used[j] = true;
            path.push(Some(j));
            if first_within(weights, i + 1, acc + weights[i][j], target, used, path) {
                return true;
            }
            path.pop();
            used[j] = false;
        }
        path.push(None);
        if first_within(weights, i + 1, acc, target, used, path) {
            return true;
        }
        path.pop();
        false
    }

    let mut used = vec![false; cols];
    let optimum = best(weights, 0, &mut used);
    let mut path = Vec::with_capacity(rows);
    if first_within(weights, 0, 0, optimum - TIE_TOLERANCE, &mut used, &mut path) {
        path
    } else {
        vec![None; rows]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    fn pairs(a: &Assignment) -> Vec<(usize, usize)> {
        a.pairs.iter().map(|&(i, j, _)| (i, j)).collect()
    }

    /// The two-instance rule this solver replaces: keep the identity pairing
    /// unless the swapped pairing sums strictly higher.
    fn legacy_swap_total(m: &[Vec<f64>]) -> f64 {
        let straight = m[0][0] + m[1][1];
        let swapped = m[0][1] + m[1][0];
        if swapped > straight {
            swapped
        } else {
            straight
        }
    }

    #[test]
    fn test_prefers_higher_total_over_greedy() {
        // greedy on row 0 would take col 0 (0.9) and leave row 1 with 0.1
        let m = vec![vec![0.9, 0.8], vec![0.7, 0.1]];
        let a = solve(&m, 2, 2, 0.0, AssignmentStrategy::Hungarian);
        assert_eq!(pairs(&a), vec![(0, 1), (1, 0)]);
        assert_abs_diff_eq!(a.total(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_threshold_excludes_pairs() {
        let m = vec![vec![0.4, 0.0], vec![0.0, 0.6]];
        let a = solve(&m, 2, 2, 0.5, AssignmentStrategy::Hungarian);
        assert_eq!(pairs(&a), vec![(1, 1)]);
        assert_eq!(a.unmatched_rows, vec![0]);
        assert_eq!(a.unmatched_cols, vec![0]);
    }

    #[test]
    fn test_iou_equal_to_threshold_is_eligible() {
        let m = vec![vec![0.5]];
        for strategy in [AssignmentStrategy::Hungarian, AssignmentStrategy::Exhaustive] {
            let a = solve(&m, 1, 1, 0.5, strategy);
            assert_eq!(pairs(&a), vec![(0, 0)]);
            assert!(a.unmatched_rows.is_empty());
            assert!(a.unmatched_cols.is_empty());
        }
    }

    #[test]
    fn test_near_equal_totals_are_ties() {
        // 1e-12 apart is below the tie tolerance, so the lower column wins
        let m = vec![vec![0.5, 0.5 + 1e-12]];
        for strategy in [AssignmentStrategy::Hungarian, AssignmentStrategy::Exhaustive] {
            let a = solve(&m, 1, 2, 0.0, strategy);
            assert_eq!(pairs(&a), vec![(0, 0)]);
        }
    }

    #[test]
    fn test_zero_iou_never_matched() {
        let m = vec![vec![0.0, 0.0]];
        let a = solve(&m, 1, 2, 0.0, AssignmentStrategy::Hungarian);
        assert!(a.pairs.is_empty());
        assert_eq!(a.unmatched_rows, vec![0]);
        assert_eq!(a.unmatched_cols, vec![0, 1]);
    }

    #[test]
    fn test_ties_go_to_lowest_indices() {
        let m = vec![vec![0.5, 0.5], vec![0.5, 0.5]];
        for strategy in [AssignmentStrategy::Hungarian, AssignmentStrategy::Exhaustive] {
            let a = solve(&m, 2, 2, 0.0, strategy);
            assert_eq!(pairs(&a), vec![(0, 0), (1, 1)]);
        }
    }

    #[test]
    fn test_tie_between_single_pairs() {
        // one ground truth, two equally good predictions
        let m = vec![vec![0.7, 0.7]];
        let a = solve(&m, 1, 2, 0.0, AssignmentStrategy::Hungarian);
        assert_eq!(pairs(&a), vec![(0, 0)]);
        assert_eq!(a.unmatched_cols, vec![1]);
    }

    #[test]
    fn test_more_rows_than_columns() {
        let m = vec![vec![0.2], vec![0.9], vec![0.5]];
        let a = solve(&m, 3, 1, 0.0, AssignmentStrategy::Hungarian);
        assert_eq!(pairs(&a), vec![(1, 0)]);
        assert_eq!(a.unmatched_rows, vec![0, 2]);
        assert!(a.unmatched_cols.is_empty());
    }

    #[test]
    fn test_empty_sides() {
        let a = solve(&[], 0, 3, 0.5, AssignmentStrategy::Hungarian);
        assert_eq!(a.unmatched_cols, vec![0, 1, 2]);
        let b = solve(&[vec![], vec![]], 2, 0, 0.5, AssignmentStrategy::Hungarian);
        assert_eq!(b.unmatched_rows, vec![0, 1]);
    }

    #[test]
    fn test_three_by_three() {
        let m = vec![
            vec![0.9, 0.6, 0.0],
            vec![0.8, 0.0, 0.3],
            vec![0.0, 0.7, 0.6],
        ];
        let a = solve(&m, 3, 3, 0.0, AssignmentStrategy::Hungarian);
        // 0.6 + 0.8 + 0.6 = 2.0 beats 0.9 + 0.3 + 0.7 = 1.9
        assert_eq!(pairs(&a), vec![(0, 1), (1, 0), (2, 2)]);
    }

    #[test]
    fn test_hungarian_max_transposes() {
        let m = vec![vec![1.0], vec![3.0]];
        let (total, row_to_col) = hungarian_max(&m);
        assert_eq!(total, 3.0);
        assert_eq!(row_to_col, vec![None, Some(0)]);
    }

    fn arb_matrix(max_side: usize) -> impl Strategy<Value = Vec<Vec<f64>>> {
        (1..=max_side, 1..=max_side).prop_flat_map(|(n, m)| {
            prop::collection::vec(
                prop::collection::vec(
                    prop_oneof![Just(0.0), Just(0.5), 0.0..=1.0f64],
                    m,
                ),
                n,
            )
        })
    }

    proptest! {
        #[test]
        fn prop_small_solvers_agree(m in arb_matrix(2), thr in prop_oneof![Just(0.0), Just(0.5)]) {
            let (n, c) = (m.len(), m[0].len());
            let h = solve(&m, n, c, thr, AssignmentStrategy::Hungarian);
            let e = solve(&m, n, c, thr, AssignmentStrategy::Exhaustive);
            prop_assert_eq!(h, e);
        }

        #[test]
        fn prop_solvers_agree_up_to_five(m in arb_matrix(5)) {
            let (n, c) = (m.len(), m[0].len());
            let h = solve(&m, n, c, 0.0, AssignmentStrategy::Hungarian);
            let e = solve(&m, n, c, 0.0, AssignmentStrategy::Exhaustive);
            prop_assert_eq!(pairs(&h), pairs(&e));
        }

        #[test]
        fn prop_never_worse_than_legacy_swap(
            a in 0.0..=1.0f64, b in 0.0..=1.0f64, c in 0.0..=1.0f64, d in 0.0..=1.0f64
        ) {
            let m = vec![vec![a, b], vec![c, d]];
            let solved = solve(&m, 2, 2, 0.0, AssignmentStrategy::Hungarian);
            prop_assert!(solved.total() >= legacy_swap_total(&m) - 1e-9);
        }

        #[test]
        fn prop_every_index_accounted_for(m in arb_matrix(6), thr in 0.0..=1.0f64) {
            let (n, c) = (m.len(), m[0].len());
            let a = solve(&m, n, c, thr, AssignmentStrategy::Hungarian);
            prop_assert_eq!(a.pairs.len() + a.unmatched_rows.len(), n);
            prop_assert_eq!(a.pairs.len() + a.unmatched_cols.len(), c);
            for &(i, j, w) in &a.pairs {
                prop_assert!(w >= thr && w > 0.0);
                prop_assert_eq!(w, m[i][j]);
            }
        }
    }
}
