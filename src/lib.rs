//! Synthetic household and person populations.
//!
//! Survey microdata is segmented and used to train one Bayesian network per
//! segment and role. Microdata households are allocated to a geography so
//! that weighted indicator sums match its marginal controls, and each
//! allocated household is then replicated with attributes resampled from
//! the trained networks.

pub mod algorithm;
pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod registry;
pub mod utils;

// Core types
pub use config::{AllocatorConfig, Configuration, GenerationConfig, TrainingConfig};
pub use error::{Result, SynthError};
pub use registry::{FieldDefinition, FieldRegistry, FieldRole};

// Input data
pub use data::{ControlCategory, MarginalControl, Marginals, MicrodataRecord, MicrodataTable};

// Algorithms
pub use algorithm::allocation::{AllocationResult, HouseholdAllocator};
pub use algorithm::bayesnet::{BayesianNetwork, GraphStructure, SegmentedModel};
pub use algorithm::population::{Population, PopulationGenerator};
pub use algorithm::segmentation::{SegmentationStrategy, SegmentedData};

// Runs
pub use io::ArtifactPaths;
pub use pipeline::{run_batch, run_puma};
