//! Configuration for population synthesis
//!
//! A run is described by one JSON document: which fields and graph structure
//! each role uses, how training data is segmented, which marginal categories
//! the allocator fits, and the solver and sampler settings. Every section has
//! defaults matching the standard PUMS field catalogue.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::algorithm::bayesnet::GraphStructure;
use crate::algorithm::segmentation::SegmentationSpec;
use crate::data::ControlCategory;
use crate::error::util::open_artifact;
use crate::error::{Result, SynthError};
use crate::registry::{FieldDefinition, FieldRegistry, FieldRole};

/// Settings for conditional probability table estimation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Additive smoothing added to every (value, parent combination) count
    pub pseudocount: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self { pseudocount: 1.0 }
    }
}

/// Settings for the household allocation solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Weight of the pull toward each sample's original survey weight
    pub regularization: f64,
    /// Divide each squared deviation by `max(target, 1)`
    pub normalize: bool,
    /// Acceptable relative residual `||Xw - t|| / ||t||`
    pub tolerance: f64,
    /// Maximum coordinate-descent sweeps
    pub max_iterations: usize,
    /// Stop when the largest weight change in a sweep falls below this
    pub convergence: f64,
    /// Wall-clock budget for one solve, in milliseconds
    pub time_budget_ms: Option<u64>,
    /// Optional hard constraint on the sum of weights
    pub total_households: Option<f64>,
}

impl AllocatorConfig {
    /// Wall-clock budget as a `Duration`
    #[must_use]
    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_ms.map(Duration::from_millis)
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            regularization: 1e-4,
            normalize: true,
            tolerance: 0.05,
            max_iterations: 10_000,
            convergence: 1e-9,
            time_budget_ms: Some(30_000),
            total_households: None,
        }
    }
}

/// Settings for sampling synthetic records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Base seed; every household replica derives its own generator from it
    pub seed: u64,
    /// Household field holding the number of members
    pub num_people_field: String,
    /// Household fields pinned for every sampled household
    pub household_evidence: BTreeMap<String, String>,
    /// Pin the value implied by a person's segment key
    pub pin_person_segment: bool,
    /// Pin the value implied by the source household's segment key; off so
    /// household attributes are fully resynthesized
    pub pin_household_segment: bool,
    /// Person field tallied in run summaries
    pub summary_person_field: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            num_people_field: "num_people".to_string(),
            household_evidence: BTreeMap::new(),
            pin_person_segment: true,
            pin_household_segment: false,
            summary_person_field: "age".to_string(),
        }
    }
}

/// Complete configuration of a synthesis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Custom field catalogue; the standard PUMS catalogue when absent
    pub fields: Option<Vec<FieldDefinition>>,
    pub person_fields: Vec<String>,
    pub household_fields: Vec<String>,
    pub person_structure: GraphStructure,
    pub household_structure: GraphStructure,
    pub person_segmentation: SegmentationSpec,
    pub household_segmentation: SegmentationSpec,
    /// Weight column of person microdata
    pub person_weight: String,
    /// Weight column of household microdata
    pub household_weight: String,
    /// Marginal categories the allocator fits
    pub controls: Vec<ControlCategory>,
    pub training: TrainingConfig,
    pub allocation: AllocatorConfig,
    pub generation: GenerationConfig,
    /// Geographies processed concurrently
    pub workers: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        let person_structure = GraphStructure::from_edges(&[
            ("age", &[]),
            ("sex", &[]),
            ("individual_income", &["age", "sex"]),
        ]);
        let household_structure = GraphStructure::from_edges(&[
            ("num_people", &[]),
            ("household_income", &["num_people"]),
            ("num_vehicles", &["household_income", "num_people"]),
        ]);
        Self {
            fields: None,
            person_fields: vec!["age".into(), "sex".into(), "individual_income".into()],
            household_fields: vec![
                "num_people".into(),
                "household_income".into(),
                "num_vehicles".into(),
            ],
            person_structure,
            household_structure,
            person_segmentation: SegmentationSpec::AgeBracket {
                field: "age".into(),
            },
            household_segmentation: SegmentationSpec::HouseholdSizeBucket {
                field: "num_people".into(),
            },
            person_weight: "person_weight".into(),
            household_weight: "household_weight".into(),
            controls: ControlCategory::standard_set(),
            training: TrainingConfig::default(),
            allocation: AllocatorConfig::default(),
            generation: GenerationConfig::default(),
            workers: num_cpus::get(),
        }
    }
}

impl Configuration {
    /// Load a configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = open_artifact(path, "configuration")?;
        let config: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// The field registry this configuration refers to
    pub fn registry(&self) -> Result<FieldRegistry> {
        match &self.fields {
            Some(fields) => FieldRegistry::new(fields.clone()),
            None => Ok(FieldRegistry::standard()),
        }
    }

    /// Fields modelled for a role
    #[must_use]
    pub fn fields_for(&self, role: FieldRole) -> &[String] {
        match role {
            FieldRole::Person => &self.person_fields,
            FieldRole::Household => &self.household_fields,
        }
    }

    /// Graph structure for a role
    #[must_use]
    pub fn structure_for(&self, role: FieldRole) -> &GraphStructure {
        match role {
            FieldRole::Person => &self.person_structure,
            FieldRole::Household => &self.household_structure,
        }
    }

    /// Segmentation for a role
    #[must_use]
    pub fn segmentation_for(&self, role: FieldRole) -> &SegmentationSpec {
        match role {
            FieldRole::Person => &self.person_segmentation,
            FieldRole::Household => &self.household_segmentation,
        }
    }

    /// Weight column for a role
    #[must_use]
    pub fn weight_for(&self, role: FieldRole) -> &str {
        match role {
            FieldRole::Person => &self.person_weight,
            FieldRole::Household => &self.household_weight,
        }
    }

    /// Check every name against the registry and the numeric settings for sanity
    pub fn validate(&self) -> Result<()> {
        let registry = self.registry()?;
        for role in [FieldRole::Person, FieldRole::Household] {
            for name in self.fields_for(role) {
                let field = registry.require(name)?;
                if field.role != role {
                    return Err(SynthError::validation(format!(
                        "{name} is a {} field but is listed under {role} fields",
                        field.role
                    )));
                }
            }
            self.structure_for(role).validate(self.fields_for(role))?;
        }
        for category in &self.controls {
            category.validate(&registry)?;
        }
        for (field, value) in &self.generation.household_evidence {
            registry.validate_value(field, value)?;
        }
        if !self.person_fields.contains(&self.generation.summary_person_field) {
            return Err(SynthError::validation(format!(
                "generation.summary_person_field {} is not a person field",
                self.generation.summary_person_field
            )));
        }
        if self.training.pseudocount <= 0.0 || !self.training.pseudocount.is_finite() {
            return Err(SynthError::validation(
                "training.pseudocount must be positive so no table entry is zero",
            ));
        }
        if self.allocation.regularization < 0.0 || self.allocation.tolerance < 0.0 {
            return Err(SynthError::validation(
                "allocation.regularization and allocation.tolerance must be nonnegative",
            ));
        }
        if self.workers == 0 {
            return Err(SynthError::validation("workers must be at least 1"));
        }
        Ok(())
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Synthesis Configuration:")?;
        writeln!(f, "  Person Fields: {}", self.person_fields.join(", "))?;
        writeln!(f, "  Household Fields: {}", self.household_fields.join(", "))?;
        writeln!(f, "  Person Segmentation: {}", self.person_segmentation)?;
        writeln!(f, "  Household Segmentation: {}", self.household_segmentation)?;
        writeln!(f, "  Controls: {}", self.controls.len())?;
        writeln!(f, "  Regularization: {}", self.allocation.regularization)?;
        if let Some(total) = self.allocation.total_households {
            writeln!(f, "  Total Households: {total}")?;
        }
        writeln!(f, "  Seed: {}", self.generation.seed)?;
        writeln!(f, "  Workers: {}", self.workers)?;
        Ok(())
    }
}
