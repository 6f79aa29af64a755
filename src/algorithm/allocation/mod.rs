//! Household allocation against marginal controls
//!
//! Each microdata household sample receives a nonnegative weight so that the
//! weighted sum of its indicator vectors approximates a geography's marginal
//! targets. Weights are then integerized so generation can replicate every
//! sample a whole number of times.

pub mod integerize;
pub mod solver;

use log::{debug, info, warn};
use rustc_hash::FxHashSet;
use std::sync::Arc;

use crate::config::AllocatorConfig;
use crate::data::{ControlCategory, GeographyMarginals, HouseholdKey, MicrodataTable};
use crate::error::{Result, SynthError};
use crate::registry::FieldRole;

pub use integerize::largest_remainder;
pub use solver::{AllocationProblem, AllocationSolver, CoordinateDescentSolver, SolverSolution};

/// A household sample as the allocator sees it
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationSample {
    pub key: HouseholdKey,
    /// Contribution of one copy of this household to each category
    pub indicators: Vec<f64>,
    /// Original survey weight
    pub prior_weight: f64,
}

/// Weight and integer count of one sample
#[derive(Debug, Clone, PartialEq)]
pub struct SampleAllocation {
    pub key: HouseholdKey,
    pub weight: f64,
    pub count: u64,
}

/// How well the allocation matches the targets
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationDiagnostics {
    /// `sum_i w_i x_i[k] - t_k` per category
    pub residual: Vec<f64>,
    pub relative_residual: f64,
    pub tolerance: f64,
    pub iterations: usize,
    pub converged: bool,
    /// The total-households constraint was dropped to reach a solution
    pub relaxed: bool,
}

impl AllocationDiagnostics {
    #[must_use]
    pub fn within_tolerance(&self) -> bool {
        self.relative_residual <= self.tolerance
    }
}

/// Allocation of one geography
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationResult {
    pub geography_id: String,
    pub categories: Vec<String>,
    pub allocations: Vec<SampleAllocation>,
    pub diagnostics: AllocationDiagnostics,
}

impl AllocationResult {
    /// Sum of integer counts
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.allocations.iter().map(|a| a.count).sum()
    }

    /// Sum of continuous weights
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.allocations.iter().map(|a| a.weight).sum()
    }

    /// Samples with a nonzero count
    pub fn allocated(&self) -> impl Iterator<Item = &SampleAllocation> {
        self.allocations.iter().filter(|a| a.count > 0)
    }

    /// Fail with `InfeasibleAllocation` when the residual misses the tolerance
    pub fn check_tolerance(&self) -> Result<()> {
        if self.diagnostics.within_tolerance() {
            return Ok(());
        }
        Err(SynthError::InfeasibleAllocation {
            geography: self.geography_id.clone(),
            relative_residual: self.diagnostics.relative_residual,
            tolerance: self.diagnostics.tolerance,
            residual: self.diagnostics.residual.clone(),
        })
    }
}

/// Allocates microdata households to one geography
#[derive(Clone)]
pub struct HouseholdAllocator {
    geography_id: String,
    categories: Vec<String>,
    targets: Vec<f64>,
    samples: Vec<AllocationSample>,
    config: AllocatorConfig,
    solver: Arc<dyn AllocationSolver>,
}

impl std::fmt::Debug for HouseholdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HouseholdAllocator")
            .field("geography_id", &self.geography_id)
            .field("categories", &self.categories)
            .field("samples", &self.samples.len())
            .finish_non_exhaustive()
    }
}

impl HouseholdAllocator {
    /// Build indicator vectors by joining each household to its persons
    ///
    /// Only controls with a target in `marginals` take part. Marginal keys no
    /// control describes are ignored with a warning.
    pub fn from_cleaned_data(
        marginals: &GeographyMarginals,
        controls: &[ControlCategory],
        households: &MicrodataTable,
        persons: &MicrodataTable,
        household_weight: &str,
        config: &AllocatorConfig,
    ) -> Result<Self> {
        if households.role != FieldRole::Household || persons.role != FieldRole::Person {
            return Err(SynthError::validation(
                "allocation needs a household table and a person table",
            ));
        }

        let active: Vec<&ControlCategory> = controls
            .iter()
            .filter(|c| marginals.targets.contains_key(&c.key))
            .collect();
        for key in marginals.targets.keys() {
            if !controls.iter().any(|c| &c.key == key) {
                warn!(
                    "Marginal category {key} of geography {} has no control definition, ignoring",
                    marginals.geography_id
                );
            }
        }
        if active.is_empty() {
            return Err(SynthError::validation(format!(
                "no configured control matches the marginals of geography {}",
                marginals.geography_id
            )));
        }

        let members = persons.by_household();
        let mut samples = Vec::with_capacity(households.len());
        for household in &households.records {
            let household_members = members
                .get(&household.key)
                .map_or(&[][..], Vec::as_slice);
            samples.push(AllocationSample {
                key: household.key.clone(),
                indicators: active
                    .iter()
                    .map(|c| c.count(household, household_members))
                    .collect(),
                prior_weight: household.weight(household_weight)?,
            });
        }

        let known: FxHashSet<&HouseholdKey> = households.records.iter().map(|h| &h.key).collect();
        let orphans = members.keys().filter(|key| !known.contains(**key)).count();
        if orphans > 0 {
            warn!("{orphans} person households have no matching household record");
        }

        Self::from_matrix(
            &marginals.geography_id,
            active.iter().map(|c| c.key.clone()).collect(),
            active.iter().map(|c| marginals.targets[&c.key]).collect(),
            samples,
            config,
        )
    }

    /// Build directly from targets and precomputed indicator vectors
    pub fn from_matrix(
        geography_id: &str,
        categories: Vec<String>,
        targets: Vec<f64>,
        samples: Vec<AllocationSample>,
        config: &AllocatorConfig,
    ) -> Result<Self> {
        if categories.len() != targets.len() {
            return Err(SynthError::validation(format!(
                "{} categories but {} targets",
                categories.len(),
                targets.len()
            )));
        }
        if targets.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(SynthError::validation("targets must be nonnegative numbers"));
        }
        for sample in &samples {
            if sample.indicators.len() != targets.len() {
                return Err(SynthError::validation(format!(
                    "sample {} has {} indicators for {} categories",
                    sample.key,
                    sample.indicators.len(),
                    targets.len()
                )));
            }
            if !sample.prior_weight.is_finite() || sample.prior_weight < 0.0 {
                return Err(SynthError::validation(format!(
                    "sample {} has invalid prior weight {}",
                    sample.key, sample.prior_weight
                )));
            }
        }
        debug!(
            "Allocator for {geography_id}: {} samples, {} categories",
            samples.len(),
            categories.len()
        );
        Ok(Self {
            geography_id: geography_id.to_string(),
            categories,
            targets,
            samples,
            config: config.clone(),
            solver: Arc::new(CoordinateDescentSolver::from_config(config)),
        })
    }

    /// Replace the default solver
    #[must_use]
    pub fn with_solver(mut self, solver: Arc<dyn AllocationSolver>) -> Self {
        self.solver = solver;
        self
    }

    #[must_use]
    pub fn geography_id(&self) -> &str {
        &self.geography_id
    }

    #[must_use]
    pub fn samples(&self) -> &[AllocationSample] {
        &self.samples
    }

    fn problem(&self, total: Option<f64>) -> AllocationProblem {
        AllocationProblem {
            indicators: self.samples.iter().map(|s| s.indicators.clone()).collect(),
            targets: self.targets.clone(),
            prior_weights: self.samples.iter().map(|s| s.prior_weight).collect(),
            regularization: self.config.regularization,
            normalize: self.config.normalize,
            total,
        }
    }

    /// Solve for weights and integerize them
    ///
    /// When the solver cannot satisfy a configured total the constraint is
    /// dropped and the nonnegative minimum is used instead. A residual beyond
    /// tolerance is logged as `InfeasibleAllocation` and reported in the
    /// diagnostics; the best-effort weights are still returned.
    pub fn allocate(&self) -> Result<AllocationResult> {
        let mut problem = self.problem(self.config.total_households);
        let mut solution = self.solver.solve(&problem)?;
        let mut relaxed = false;

        if !problem.meets_total(&solution.weights) {
            warn!(
                "Total-households constraint not attainable for {}, relaxing to nonnegative minimum",
                self.geography_id
            );
            problem = self.problem(None);
            solution = self.solver.solve(&problem)?;
            relaxed = true;
        }

        let weights: Vec<f64> = solution.weights.iter().map(|w| w.max(0.0)).collect();
        let counts = largest_remainder(&weights);
        let diagnostics = AllocationDiagnostics {
            residual: problem.residual(&weights),
            relative_residual: problem.relative_residual(&weights),
            tolerance: self.config.tolerance,
            iterations: solution.iterations,
            converged: solution.converged,
            relaxed,
        };

        let result = AllocationResult {
            geography_id: self.geography_id.clone(),
            categories: self.categories.clone(),
            allocations: self
                .samples
                .iter()
                .zip(weights)
                .zip(counts)
                .map(|((sample, weight), count)| SampleAllocation {
                    key: sample.key.clone(),
                    weight,
                    count,
                })
                .collect(),
            diagnostics,
        };

        if let Err(infeasible) = result.check_tolerance() {
            warn!("{infeasible}; continuing with minimum-deviation weights");
        }
        info!(
            "Allocated {} households to {} from {} samples (relative residual {:.4})",
            result.total_count(),
            self.geography_id,
            self.samples.len(),
            result.diagnostics.relative_residual
        );
        Ok(result)
    }
}
