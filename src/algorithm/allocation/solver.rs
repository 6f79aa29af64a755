//! Nonnegative weighted least squares for household allocation
//!
//! The allocation objective is a convex quadratic over `w >= 0`:
//!
//! ```text
//! sum_k d_k (sum_i w_i x_i[k] - t_k)^2 + lambda * sum_i (w_i - w0_i)^2
//! ```
//!
//! optionally subject to `sum_i w_i == total`. Solvers sit behind
//! [`AllocationSolver`] so the allocator does not depend on a particular one.

use log::{debug, warn};
use std::time::{Duration, Instant};

use crate::config::AllocatorConfig;
use crate::error::{Result, SynthError};

/// Allowed violation of the total constraint, relative to `max(total, 1)`
pub const EQUALITY_TOLERANCE: f64 = 1e-6;

/// Data of one allocation solve
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationProblem {
    /// Indicator vector per sample, `indicators[i][k]`
    pub indicators: Vec<Vec<f64>>,
    /// Marginal target per category
    pub targets: Vec<f64>,
    /// Original survey weight per sample
    pub prior_weights: Vec<f64>,
    pub regularization: f64,
    pub normalize: bool,
    /// Hard constraint on the sum of weights
    pub total: Option<f64>,
}

impl AllocationProblem {
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.indicators.len()
    }

    /// Scale applied to the squared deviation of category `k`
    #[must_use]
    pub fn category_scale(&self, k: usize) -> f64 {
        if self.normalize {
            1.0 / self.targets[k].max(1.0)
        } else {
            1.0
        }
    }

    /// `sum_i w_i x_i - t`
    #[must_use]
    pub fn residual(&self, weights: &[f64]) -> Vec<f64> {
        let mut residual: Vec<f64> = self.targets.iter().map(|t| -t).collect();
        for (x, w) in self.indicators.iter().zip(weights) {
            for (r, v) in residual.iter_mut().zip(x) {
                *r += w * v;
            }
        }
        residual
    }

    /// `||residual|| / max(||t||, 1)`
    #[must_use]
    pub fn relative_residual(&self, weights: &[f64]) -> f64 {
        let norm = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>().sqrt();
        norm(&self.residual(weights)) / norm(&self.targets).max(1.0)
    }

    /// Value of the objective, without the total constraint
    #[must_use]
    pub fn objective(&self, weights: &[f64]) -> f64 {
        let fit: f64 = self
            .residual(weights)
            .iter()
            .enumerate()
            .map(|(k, r)| self.category_scale(k) * r * r)
            .sum();
        let pull: f64 = weights
            .iter()
            .zip(&self.prior_weights)
            .map(|(w, w0)| (w - w0) * (w - w0))
            .sum();
        fit + self.regularization * pull
    }

    /// Whether `weights` meet the total constraint, if there is one
    #[must_use]
    pub fn meets_total(&self, weights: &[f64]) -> bool {
        self.total.is_none_or(|total| {
            let sum: f64 = weights.iter().sum();
            (sum - total).abs() <= EQUALITY_TOLERANCE * total.abs().max(1.0)
        })
    }
}

/// Weights returned by a solver
#[derive(Debug, Clone, PartialEq)]
pub struct SolverSolution {
    pub weights: Vec<f64>,
    pub iterations: usize,
    pub converged: bool,
}

/// Solves an [`AllocationProblem`]
pub trait AllocationSolver: Send + Sync {
    fn solve(&self, problem: &AllocationProblem) -> Result<SolverSolution>;
}

/// Projected coordinate descent
///
/// Each step minimizes the quadratic exactly along one weight and clamps at
/// zero. The total constraint is handled with an augmented Lagrangian.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateDescentSolver {
    pub max_iterations: usize,
    pub convergence: f64,
    pub time_budget: Option<Duration>,
    /// Outer multiplier updates for the total constraint
    pub max_outer_iterations: usize,
}

impl Default for CoordinateDescentSolver {
    fn default() -> Self {
        Self::from_config(&AllocatorConfig::default())
    }
}

impl CoordinateDescentSolver {
    #[must_use]
    pub fn from_config(config: &AllocatorConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            convergence: config.convergence,
            time_budget: config.time_budget(),
            max_outer_iterations: 30,
        }
    }
}

/// Nonzero entries of one indicator vector
type SparseColumn = Vec<(usize, f64)>;

impl AllocationSolver for CoordinateDescentSolver {
    fn solve(&self, problem: &AllocationProblem) -> Result<SolverSolution> {
        let started = Instant::now();
        let n = problem.num_samples();
        let scales: Vec<f64> = (0..problem.targets.len())
            .map(|k| problem.category_scale(k))
            .collect();
        let columns: Vec<SparseColumn> = problem
            .indicators
            .iter()
            .map(|x| {
                x.iter()
                    .enumerate()
                    .filter(|(_, v)| **v != 0.0)
                    .map(|(k, v)| (k, *v))
                    .collect()
            })
            .collect();
        let curvature: Vec<f64> = columns
            .iter()
            .map(|col| {
                2.0 * col.iter().map(|(k, v)| scales[*k] * v * v).sum::<f64>()
                    + 2.0 * problem.regularization
            })
            .collect();

        let mut weights: Vec<f64> = problem.prior_weights.iter().map(|w| w.max(0.0)).collect();
        let mut residual = problem.residual(&weights);
        let mut sum: f64 = weights.iter().sum();

        // Augmented Lagrangian terms for the total constraint
        let penalty = match problem.total {
            Some(_) => curvature.iter().copied().fold(1.0, f64::max),
            None => 0.0,
        };
        let mut multiplier = 0.0;
        let outer_rounds = if problem.total.is_some() {
            self.max_outer_iterations
        } else {
            1
        };

        let mut iterations = 0;
        let mut converged = false;
        for _ in 0..outer_rounds {
            converged = false;
            while iterations < self.max_iterations {
                iterations += 1;
                let mut largest_step: f64 = 0.0;
                for j in 0..n {
                    let mut gradient =
                        2.0 * problem.regularization * (weights[j] - problem.prior_weights[j]);
                    for (k, v) in &columns[j] {
                        gradient += 2.0 * scales[*k] * v * residual[*k];
                    }
                    let mut hessian = curvature[j];
                    if let Some(total) = problem.total {
                        gradient += multiplier + penalty * (sum - total);
                        hessian += penalty;
                    }
                    if hessian <= 0.0 {
                        continue;
                    }

                    let updated = (weights[j] - gradient / hessian).max(0.0);
                    let step = updated - weights[j];
                    if step != 0.0 {
                        for (k, v) in &columns[j] {
                            residual[*k] += step * v;
                        }
                        sum += step;
                        weights[j] = updated;
                        largest_step = largest_step.max(step.abs());
                    }
                }

                if let Some(budget) = self.time_budget {
                    if started.elapsed() >= budget {
                        return Err(SynthError::SolverTimeout {
                            iterations,
                            elapsed_ms: started.elapsed().as_millis(),
                        });
                    }
                }
                let scale = weights.iter().copied().fold(1.0, f64::max);
                if largest_step <= self.convergence * scale {
                    converged = true;
                    break;
                }
            }

            match problem.total {
                Some(total) if !problem.meets_total(&weights) && iterations < self.max_iterations => {
                    multiplier += penalty * (sum - total);
                }
                _ => break,
            }
        }

        if !converged {
            warn!(
                "Coordinate descent stopped after {iterations} sweeps without converging"
            );
        }
        debug!(
            "Solved allocation over {n} samples in {iterations} sweeps ({:?})",
            started.elapsed()
        );
        Ok(SolverSolution {
            weights,
            iterations,
            converged,
        })
    }
}
