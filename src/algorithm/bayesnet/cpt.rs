//! Conditional probability tables
//!
//! Rows are stored densely. The row of a parent value combination is its
//! mixed-radix index with the first parent as the most significant digit, so
//! a table with no parents has exactly one row.

use itertools::Itertools;
use smallvec::SmallVec;

use crate::error::{Result, SynthError};

/// Allowed deviation of a row sum from 1
pub const ROW_TOLERANCE: f64 = 1e-6;

/// Parent value indices of one row
pub type ParentIndices = SmallVec<[usize; 4]>;

/// Turns weighted counts into a table of distributions
///
/// `counts[row][value]` holds the weighted number of observations of `value`
/// under the parent combination `row`; the result must have the same shape
/// with every row a probability distribution.
pub trait CptEstimator: Send + Sync {
    fn fit(&self, counts: &[Vec<f64>]) -> Result<Vec<Vec<f64>>>;
}

/// Additive smoothing: `(count + pseudocount) / (row total + pseudocount * k)`
///
/// A positive pseudocount keeps every entry above zero, so parent
/// combinations never observed in training still sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaplaceEstimator {
    pub pseudocount: f64,
}

impl Default for LaplaceEstimator {
    fn default() -> Self {
        Self { pseudocount: 1.0 }
    }
}

impl CptEstimator for LaplaceEstimator {
    fn fit(&self, counts: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        if !(self.pseudocount > 0.0 && self.pseudocount.is_finite()) {
            return Err(SynthError::validation(format!(
                "pseudocount must be positive, got {}",
                self.pseudocount
            )));
        }
        Ok(counts
            .iter()
            .map(|row| {
                let total: f64 = row.iter().sum::<f64>() + self.pseudocount * row.len() as f64;
                row.iter().map(|c| (c + self.pseudocount) / total).collect()
            })
            .collect())
    }
}

/// Distribution of one field given its parents
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionalTable {
    pub field: String,
    pub domain: Vec<String>,
    pub parents: Vec<String>,
    /// Domains of the parents, in `parents` order
    pub parent_domains: Vec<Vec<String>>,
    rows: Vec<Vec<f64>>,
}

impl ConditionalTable {
    /// Build a table, checking its shape and that every row is a distribution
    pub fn new(
        field: String,
        domain: Vec<String>,
        parents: Vec<String>,
        parent_domains: Vec<Vec<String>>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if parents.len() != parent_domains.len() {
            return Err(SynthError::validation(format!(
                "table {field} lists {} parents but {} parent domains",
                parents.len(),
                parent_domains.len()
            )));
        }
        let expected_rows = Self::row_count_for(&parent_domains);
        if rows.len() != expected_rows {
            return Err(SynthError::validation(format!(
                "table {field} has {} rows, expected {expected_rows}",
                rows.len()
            )));
        }
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != domain.len() {
                return Err(SynthError::validation(format!(
                    "row {idx} of {field} has {} entries for a domain of {}",
                    row.len(),
                    domain.len()
                )));
            }
            if row.iter().any(|p| !p.is_finite() || *p < 0.0) {
                return Err(SynthError::validation(format!(
                    "row {idx} of {field} holds a negative or non-finite probability"
                )));
            }
            let sum: f64 = row.iter().sum();
            if (sum - 1.0).abs() > ROW_TOLERANCE {
                return Err(SynthError::validation(format!(
                    "row {idx} of {field} sums to {sum}"
                )));
            }
        }
        Ok(Self {
            field,
            domain,
            parents,
            parent_domains,
            rows,
        })
    }

    fn row_count_for(parent_domains: &[Vec<String>]) -> usize {
        parent_domains.iter().map(Vec::len).product()
    }

    /// Number of parent combinations
    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Row of a parent value combination
    #[must_use]
    pub fn row_index(&self, parent_indices: &[usize]) -> usize {
        parent_indices
            .iter()
            .zip(&self.parent_domains)
            .fold(0, |acc, (idx, domain)| acc * domain.len() + idx)
    }

    /// Distribution over `domain` given parent value indices
    #[must_use]
    pub fn distribution(&self, parent_indices: &[usize]) -> &[f64] {
        &self.rows[self.row_index(parent_indices)]
    }

    /// All rows in index order
    #[must_use]
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Probability of `value` given parent values by name
    #[must_use]
    pub fn probability(&self, value: &str, parent_values: &[&str]) -> Option<f64> {
        if parent_values.len() != self.parents.len() {
            return None;
        }
        let value_idx = self.domain.iter().position(|v| v == value)?;
        let parent_indices = parent_values
            .iter()
            .zip(&self.parent_domains)
            .map(|(v, domain)| domain.iter().position(|d| d == v))
            .collect::<Option<ParentIndices>>()?;
        Some(self.distribution(&parent_indices)[value_idx])
    }

    /// Parent value combinations in row order
    #[must_use]
    pub fn parent_combinations(&self) -> Vec<Vec<&str>> {
        if self.parent_domains.is_empty() {
            return vec![Vec::new()];
        }
        self.parent_domains
            .iter()
            .map(|domain| domain.iter().map(String::as_str))
            .multi_cartesian_product()
            .collect()
    }
}
