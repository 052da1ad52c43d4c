//! LH-007: Dense two-phase simplex for small allocation programs.
//!
//! Minimises `c·x` subject to rows `a·x {<=,>=,=} b`, `x >= 0`. Bland's rule
//! picks entering and leaving columns so the method cannot cycle. Problem
//! sizes here are (liquids x plate types) variables, so a dense tableau is
//! plenty.

use thiserror::Error;

const EPS: f64 = 1e-9;
const MAX_PIVOTS: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Le,
    Ge,
    Eq,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LpError {
    #[error("linear program is infeasible")]
    Infeasible,
    #[error("linear program is unbounded")]
    Unbounded,
    #[error("simplex did not converge within {0} pivots")]
    PivotLimit(usize),
}

#[derive(Debug, Clone)]
struct Row {
    coeffs: Vec<f64>,
    cmp: Cmp,
    rhs: f64,
}

/// A linear program in natural form.
#[derive(Debug, Clone)]
pub struct LinearProgram {
    objective: Vec<f64>,
    rows: Vec<Row>,
}

/// Optimal point and objective value.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub x: Vec<f64>,
    pub objective: f64,
}

impl LinearProgram {
    /// Minimise `objective · x`.
    pub fn minimize(objective: Vec<f64>) -> Self {
        Self {
            objective,
            rows: Vec::new(),
        }
    }

    pub fn vars(&self) -> usize {
        self.objective.len()
    }

    /// Add `coeffs · x cmp rhs`; short coefficient vectors are zero-padded.
    pub fn constrain(&mut self, mut coeffs: Vec<f64>, cmp: Cmp, rhs: f64) -> &mut Self {
        coeffs.resize(self.vars(), 0.0);
        self.rows.push(Row { coeffs, cmp, rhs });
        self
    }

    pub fn solve(&self) -> Result<Solution, LpError> {
        let n = self.vars();
        let m = self.rows.len();
        if m == 0 {
            // x = 0 is optimal unless some cost is negative
            if self.objective.iter().any(|&c| c < -EPS) {
                return Err(LpError::Unbounded);
            }
            return Ok(Solution {
                x: vec![0.0; n],
                objective: 0.0,
            });
        }

        // Normalise to non-negative right-hand sides
        let rows: Vec<Row> = self
            .rows
            .iter()
            .map(|r| {
                if r.rhs < 0.0 {
                    Row {
                        coeffs: r.coeffs.iter().map(|c| -c).collect(),
                        cmp: match r.cmp {
                            Cmp::Le => Cmp::Ge,
                            Cmp::Ge => Cmp::Le,
                            Cmp::Eq => Cmp::Eq,
                        },
                        rhs: -r.rhs,
                    }
                } else {
                    r.clone()
                }
            })
            .collect();

        let slacks = rows.iter().filter(|r| r.cmp != Cmp::Eq).count();
        let artificials = rows.iter().filter(|r| r.cmp != Cmp::Le).count();
        let cols = n + slacks + artificials;
        let rhs_col = cols;

        let mut t = vec![vec![0.0; cols + 1]; m];
        let mut basis = vec![0usize; m];
        let mut is_artificial = vec![false; cols];
        let mut next_slack = n;
        let mut next_art = n + slacks;

        for (i, r) in rows.iter().enumerate() {
            t[i][..n].copy_from_slice(&r.coeffs);
            t[i][rhs_col] = r.rhs;
            match r.cmp {
                Cmp::Le => {
                    t[i][next_slack] = 1.0;
                    basis[i] = next_slack;
                    next_slack += 1;
                }
                Cmp::Ge => {
                    t[i][next_slack] = -1.0;
                    next_slack += 1;
                    t[i][next_art] = 1.0;
                    is_artificial[next_art] = true;
                    basis[i] = next_art;
                    next_art += 1;
                }
                Cmp::Eq => {
                    t[i][next_art] = 1.0;
                    is_artificial[next_art] = true;
                    basis[i] = next_art;
                    next_art += 1;
                }
            }
        }

        // Phase 1: minimise the sum of artificials
        if artificials > 0 {
            let cost: Vec<f64> = is_artificial
                .iter()
                .map(|&a| if a { 1.0 } else { 0.0 })
                .collect();
            let allowed = vec![true; cols];
            optimize(&mut t, &mut basis, &cost, &allowed)?;
            let infeasibility: f64 = basis
                .iter()
                .enumerate()
                .filter(|(_, &b)| is_artificial[b])
                .map(|(i, _)| t[i][rhs_col])
                .sum();
            if infeasibility > 1e-7 {
                return Err(LpError::Infeasible);
            }
            // Drive zero-valued artificials out of the basis where possible
            for i in 0..m {
                if !is_artificial[basis[i]] {
                    continue;
                }
                if let Some(j) = (0..cols).find(|&j| !is_artificial[j] && t[i][j].abs() > EPS) {
                    pivot(&mut t, &mut basis, i, j);
                }
            }
        }

        // Phase 2: the real objective, artificials barred from entering
        let mut cost = vec![0.0; cols];
        cost[..n].copy_from_slice(&self.objective);
        let allowed: Vec<bool> = is_artificial.iter().map(|a| !a).collect();
        optimize(&mut t, &mut basis, &cost, &allowed)?;

        let mut x = vec![0.0; n];
        for (i, &b) in basis.iter().enumerate() {
            if b < n {
                x[b] = t[i][rhs_col].max(0.0);
            }
        }
        let objective = x.iter().zip(&self.objective).map(|(a, b)| a * b).sum();
        Ok(Solution { x, objective })
    }
}

fn pivot(t: &mut [Vec<f64>], basis: &mut [usize], row: usize, col: usize) {
    let p = t[row][col];
    for v in t[row].iter_mut() {
        *v /= p;
    }
    let pivot_row = t[row].clone();
    for (i, r) in t.iter_mut().enumerate() {
        if i == row {
            continue;
        }
        let factor = r[col];
        if factor.abs() <= EPS {
            continue;
        }
        for (v, pv) in r.iter_mut().zip(&pivot_row) {
            *v -= factor * pv;
        }
    }
    basis[row] = col;
}

fn optimize(
    t: &mut [Vec<f64>],
    basis: &mut [usize],
    cost: &[f64],
    allowed: &[bool],
) -> Result<(), LpError> {
    let cols = cost.len();
    let rhs_col = cols;
    for _ in 0..MAX_PIVOTS {
        // Reduced costs: c_j - sum_i c_B(i) * t[i][j]
        let entering = (0..cols).find(|&j| {
            if !allowed[j] || basis.contains(&j) {
                return false;
            }
            let z: f64 = basis
                .iter()
                .enumerate()
                .map(|(i, &b)| cost[b] * t[i][j])
                .sum();
            cost[j] - z < -EPS
        });
        let j = match entering {
            Some(j) => j,
            None => return Ok(()),
        };

        let mut leaving: Option<(usize, f64)> = None;
        for (i, row) in t.iter().enumerate() {
            if row[j] > EPS {
                let ratio = row[rhs_col] / row[j];
                leaving = match leaving {
                    None => Some((i, ratio)),
                    Some((li, lr)) => {
                        if ratio < lr - EPS || (ratio <= lr + EPS && basis[i] < basis[li]) {
                            Some((i, ratio))
                        } else {
                            Some((li, lr))
                        }
                    }
                };
            }
        }
        let (row, _) = leaving.ok_or(LpError::Unbounded)?;
        pivot(t, basis, row, j);
    }
    Err(LpError::PivotLimit(MAX_PIVOTS))
}
