//! Min-cost bipartite assignment for detection-to-track matching.
//!
//! Classic Hungarian algorithm with row/column potentials, O(n^2 * m).
//! Matrices here are tiny (a handful of faces), so clarity wins over
//! cleverness.

/// Sentinel cost for pairs rejected by a hard gate. Any selected pair whose
/// cost exceeds `COST_INVALID / 2` is dropped after the solve.
pub const COST_INVALID: f32 = 1.0e6;

/// Optimal assignment over a rows x cols cost matrix.
///
/// Returns (row, col) pairs sorted by row; min(rows, cols) pairs are
/// produced, every row (or column, whichever is fewer) being assigned.
pub fn min_cost_assignment(cost: &[Vec<f32>]) -> Vec<(usize, usize)> {
    let rows = cost.len();
    let cols = cost.first().map_or(0, |r| r.len());
    if rows == 0 || cols == 0 {
        return Vec::new();
    }

    if rows <= cols {
        solve(rows, cols, |i, j| cost[i][j] as f64)
    } else {
        let mut flipped: Vec<(usize, usize)> = solve(cols, rows, |i, j| cost[j][i] as f64)
            .into_iter()
            .map(|(col, row)| (row, col))
            .collect();
        flipped.sort_unstable();
        flipped
    }
}

/// Potentials-based Hungarian for `n <= m`, 1-indexed internally with a
/// virtual zero column.
fn solve(n: usize, m: usize, cost: impl Fn(usize, usize) -> f64) -> Vec<(usize, usize)> {
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    // p[j]: row (1-based) assigned to column j; 0 = unassigned.
    let mut p = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        p[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = p[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;

            for j in 1..=m {
                if !used[j] {
                    let cur = cost(i0 - 1, j - 1) - u[i0] - v[j];
                    if cur < minv[j] {
                        minv[j] = cur;
                        way[j] = j0;
                    }
                    if minv[j] < delta {
                        delta = minv[j];
                        j1 = j;
                    }
                }
            }

            for j in 0..=m {
                if used[j] {
                    u[p[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }

            j0 = j1;
            if p[j0] == 0 {
                break;
            }
        }

        // Augment along the alternating path back to the virtual column.
        loop {
            let j1 = way[j0];
            p[j0] = p[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut result: Vec<(usize, usize)> = (1..=m)
        .filter(|&j| p[j] != 0)
        .map(|j| (p[j] - 1, j - 1))
        .collect();
    result.sort_unstable();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(cost: &[Vec<f32>], pairs: &[(usize, usize)]) -> f64 {
        pairs.iter().map(|&(r, c)| cost[r][c] as f64).sum()
    }

    /// Exhaustive optimum for small matrices.
    fn brute_force(cost: &[Vec<f32>]) -> f64 {
        let rows = cost.len();
        let cols = cost[0].len();
        let k = rows.min(cols);
        let mut best = f64::INFINITY;

        fn recurse(
            cost: &[Vec<f32>],
            row: usize,
            taken: &mut Vec<bool>,
            chosen: usize,
            k: usize,
            acc: f64,
            best: &mut f64,
        ) {
            if chosen == k {
                *best = best.min(acc);
                return;
            }
            if row == cost.len() {
                return;
            }
            // Skip this row only if rows > cols.
            if cost.len() > cost[0].len() {
                recurse(cost, row + 1, taken, chosen, k, acc, best);
            }
            for c in 0..cost[0].len() {
                if !taken[c] {
                    taken[c] = true;
                    recurse(cost, row + 1, taken, chosen + 1, k, acc + cost[row][c] as f64, best);
                    taken[c] = false;
                }
            }
        }

        let mut taken = vec![false; cols];
        recurse(cost, 0, &mut taken, 0, k, 0.0, &mut best);
        best
    }

    #[test]
    fn picks_the_cheap_diagonal() {
        let cost = vec![vec![1.0, 10.0], vec![10.0, 1.0]];
        let pairs = min_cost_assignment(&cost);
        assert_eq!(pairs, vec![(0, 0), (1, 1)]);
    }

    #[test]
    fn picks_the_cheap_anti_diagonal() {
        let cost = vec![vec![10.0, 1.0], vec![1.0, 10.0]];
        let pairs = min_cost_assignment(&cost);
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn avoids_greedy_trap() {
        // Greedy would grab (0,0)=1 and be forced into (1,1)=100.
        let cost = vec![vec![1.0, 2.0], vec![2.0, 100.0]];
        let pairs = min_cost_assignment(&cost);
        assert_eq!(pairs, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn rectangular_more_columns() {
        let cost = vec![vec![5.0, 1.0, 9.0], vec![4.0, 8.0, 2.0]];
        let pairs = min_cost_assignment(&cost);
        assert_eq!(pairs.len(), 2);
        assert!((total(&cost, &pairs) - brute_force(&cost)).abs() < 1e-9);
    }

    #[test]
    fn rectangular_more_rows() {
        let cost = vec![vec![3.0, 7.0], vec![1.0, 4.0], vec![6.0, 2.0]];
        let pairs = min_cost_assignment(&cost);
        assert_eq!(pairs.len(), 2);
        // No column used twice.
        let mut cols: Vec<usize> = pairs.iter().map(|p| p.1).collect();
        cols.dedup();
        assert_eq!(cols.len(), pairs.len());
        assert!((total(&cost, &pairs) - brute_force(&cost)).abs() < 1e-9);
    }

    #[test]
    fn matches_brute_force_on_fixed_matrices() {
        let matrices = vec![
            vec![
                vec![4.0, 1.0, 3.0],
                vec![2.0, 0.0, 5.0],
                vec![3.0, 2.0, 2.0],
            ],
            vec![
                vec![0.9, COST_INVALID, 0.1],
                vec![COST_INVALID, 0.2, 0.8],
                vec![0.3, 0.7, COST_INVALID],
            ],
            vec![
                vec![7.0, 5.3, 8.8, 0.4],
                vec![1.1, 0.2, 9.9, 6.0],
                vec![3.3, 8.1, 0.7, 4.4],
            ],
        ];
        for cost in matrices {
            let pairs = min_cost_assignment(&cost);
            assert!(
                (total(&cost, &pairs) - brute_force(&cost)).abs() < 1e-6,
                "suboptimal assignment for {cost:?}: {pairs:?}"
            );
        }
    }

    #[test]
    fn empty_inputs_yield_no_pairs() {
        assert!(min_cost_assignment(&[]).is_empty());
        assert!(min_cost_assignment(&[vec![]]).is_empty());
    }
}
