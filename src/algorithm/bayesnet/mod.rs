//! Segmented discrete Bayesian networks
//!
//! Structures are supplied, never learned. Each field's table is fitted from
//! weighted counts with additive smoothing, and records are produced by
//! ancestral sampling in topological order.

pub mod cpt;
pub mod model;
pub mod network;
pub mod structure;

pub use cpt::{ConditionalTable, CptEstimator, LaplaceEstimator, ROW_TOLERANCE};
pub use model::SegmentedModel;
pub use network::{BayesianNetwork, Evidence, Samples, SyntheticRecord};
pub use structure::GraphStructure;
