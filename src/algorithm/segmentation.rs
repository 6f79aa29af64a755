//! Segmented training data
//!
//! Sub-populations such as age brackets have materially different conditional
//! structure, so each segment gets its own model. A segmentation strategy maps
//! a microdata row to exactly one key from a domain the strategy declares up
//! front.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::data::{MicrodataRecord, MicrodataTable};
use crate::error::{Result, SynthError};
use crate::registry::{FieldRegistry, FieldRole};

/// Classifier used by [`SegmentationStrategy::CustomPredicate`]
pub type SegmentFn = Arc<dyn Fn(&MicrodataRecord) -> Option<String> + Send + Sync>;

/// Key of the single segment produced by [`SegmentationStrategy::unsegmented`]
pub const ALL_SEGMENT: &str = "all";

/// How rows are assigned to segments
#[derive(Clone)]
pub enum SegmentationStrategy {
    /// One segment per value of a person age field
    AgeBracket { field: String, brackets: Vec<String> },
    /// One segment per value of a household size field
    HouseholdSizeBucket { field: String, buckets: Vec<String> },
    /// Caller supplied classifier over a declared key domain
    CustomPredicate {
        name: String,
        key_domain: Vec<String>,
        classify: SegmentFn,
    },
}

impl fmt::Debug for SegmentationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgeBracket { field, brackets } => f
                .debug_struct("AgeBracket")
                .field("field", field)
                .field("brackets", brackets)
                .finish(),
            Self::HouseholdSizeBucket { field, buckets } => f
                .debug_struct("HouseholdSizeBucket")
                .field("field", field)
                .field("buckets", buckets)
                .finish(),
            Self::CustomPredicate {
                name, key_domain, ..
            } => f
                .debug_struct("CustomPredicate")
                .field("name", name)
                .field("key_domain", key_domain)
                .finish_non_exhaustive(),
        }
    }
}

impl SegmentationStrategy {
    /// Segment persons by an age bracket field; keys are the field's domain
    pub fn age_bracket(registry: &FieldRegistry, field: &str) -> Result<Self> {
        let definition = registry.require(field)?;
        if definition.role != FieldRole::Person {
            return Err(SynthError::validation(format!(
                "age bracket segmentation needs a person field, {field} is a {} field",
                definition.role
            )));
        }
        Ok(Self::AgeBracket {
            field: field.to_string(),
            brackets: definition.domain.clone(),
        })
    }

    /// Segment households by a household size field; keys are the field's domain
    pub fn household_size_bucket(registry: &FieldRegistry, field: &str) -> Result<Self> {
        let definition = registry.require(field)?;
        if definition.role != FieldRole::Household {
            return Err(SynthError::validation(format!(
                "household size segmentation needs a household field, {field} is a {} field",
                definition.role
            )));
        }
        Ok(Self::HouseholdSizeBucket {
            field: field.to_string(),
            buckets: definition.domain.clone(),
        })
    }

    /// Segment with an arbitrary classifier over `key_domain`
    pub fn custom<F>(name: &str, key_domain: Vec<String>, classify: F) -> Self
    where
        F: Fn(&MicrodataRecord) -> Option<String> + Send + Sync + 'static,
    {
        Self::CustomPredicate {
            name: name.to_string(),
            key_domain,
            classify: Arc::new(classify),
        }
    }

    /// A single segment holding every row
    #[must_use]
    pub fn unsegmented() -> Self {
        Self::custom(ALL_SEGMENT, vec![ALL_SEGMENT.to_string()], |_| {
            Some(ALL_SEGMENT.to_string())
        })
    }

    /// Keys this strategy may produce
    #[must_use]
    pub fn key_domain(&self) -> &[String] {
        match self {
            Self::AgeBracket { brackets, .. } => brackets,
            Self::HouseholdSizeBucket { buckets, .. } => buckets,
            Self::CustomPredicate { key_domain, .. } => key_domain,
        }
    }

    /// Segment key of a row, checked against the declared key domain
    pub fn segment_of(&self, record: &MicrodataRecord) -> Result<String> {
        let key = match self {
            Self::AgeBracket { field, .. } | Self::HouseholdSizeBucket { field, .. } => {
                record.require_value(field)?.to_string()
            }
            Self::CustomPredicate { name, classify, .. } => {
                classify(record).ok_or_else(|| {
                    SynthError::validation(format!(
                        "segmentation {name} produced no key for record {}",
                        record.key
                    ))
                })?
            }
        };
        if !self.key_domain().contains(&key) {
            return Err(SynthError::validation(format!(
                "segment key {key:?} of record {} is outside the domain of {}",
                record.key,
                self.spec()
            )));
        }
        Ok(key)
    }

    /// Field value implied by belonging to segment `key`, if any
    #[must_use]
    pub fn evidence_for(&self, key: &str) -> Option<(String, String)> {
        match self {
            Self::AgeBracket { field, .. } | Self::HouseholdSizeBucket { field, .. } => {
                Some((field.clone(), key.to_string()))
            }
            Self::CustomPredicate { .. } => None,
        }
    }

    /// Serializable descriptor of this strategy
    #[must_use]
    pub fn spec(&self) -> SegmentationSpec {
        match self {
            Self::AgeBracket { field, .. } => SegmentationSpec::AgeBracket {
                field: field.clone(),
            },
            Self::HouseholdSizeBucket { field, .. } => SegmentationSpec::HouseholdSizeBucket {
                field: field.clone(),
            },
            Self::CustomPredicate { name, .. } if name == ALL_SEGMENT => {
                SegmentationSpec::Unsegmented
            }
            Self::CustomPredicate { name, .. } => SegmentationSpec::Custom { name: name.clone() },
        }
    }
}

/// Serializable description of a segmentation, used in configuration and model files
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentationSpec {
    AgeBracket {
        field: String,
    },
    HouseholdSizeBucket {
        field: String,
    },
    #[default]
    Unsegmented,
    /// Custom classifiers cannot be persisted; only their name is recorded
    Custom {
        name: String,
    },
}

impl SegmentationSpec {
    /// Rebuild the strategy this descriptor names
    pub fn to_strategy(&self, registry: &FieldRegistry) -> Result<SegmentationStrategy> {
        match self {
            Self::AgeBracket { field } => SegmentationStrategy::age_bracket(registry, field),
            Self::HouseholdSizeBucket { field } => {
                SegmentationStrategy::household_size_bucket(registry, field)
            }
            Self::Unsegmented => Ok(SegmentationStrategy::unsegmented()),
            Self::Custom { name } => Err(SynthError::validation(format!(
                "custom segmentation {name} must be supplied by the caller"
            ))),
        }
    }
}

impl fmt::Display for SegmentationSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AgeBracket { field } => write!(f, "age bracket ({field})"),
            Self::HouseholdSizeBucket { field } => write!(f, "household size ({field})"),
            Self::Unsegmented => write!(f, "unsegmented"),
            Self::Custom { name } => write!(f, "custom ({name})"),
        }
    }
}

/// Projected, weighted rows of one segment
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub key: String,
    /// One projected row per source record, values in `SegmentedData::fields` order
    pub rows: Vec<Vec<String>>,
    pub weights: Vec<f64>,
}

impl Segment {
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.weights.iter().sum()
    }
}

/// Training data partitioned into segments
#[derive(Debug, Clone)]
pub struct SegmentedData {
    pub role: FieldRole,
    pub fields: Vec<String>,
    pub segmentation: SegmentationSpec,
    segments: BTreeMap<String, Segment>,
}

impl SegmentedData {
    /// Partition `table` into segments of projected, weighted rows
    ///
    /// Each row lands in exactly one segment. Retained fields must be declared
    /// by the registry and every retained value must lie in its domain;
    /// offending rows fail the whole build rather than being skipped.
    pub fn from_data(
        table: &MicrodataTable,
        fields: &[String],
        weight_field: &str,
        strategy: &SegmentationStrategy,
        registry: &FieldRegistry,
    ) -> Result<Self> {
        for name in fields {
            registry.require(name)?;
        }

        let mut segments: BTreeMap<String, Segment> = BTreeMap::new();
        for record in &table.records {
            let mut row = Vec::with_capacity(fields.len());
            for name in fields {
                let value = record.require_value(name)?;
                registry.validate_value(name, value).map_err(|e| {
                    SynthError::validation(format!("record {} rejected: {e}", record.key))
                })?;
                row.push(value.to_string());
            }
            let weight = record.weight(weight_field)?;
            let key = strategy.segment_of(record)?;

            let segment = segments.entry(key.clone()).or_insert_with(|| Segment {
                key,
                rows: Vec::new(),
                weights: Vec::new(),
            });
            segment.rows.push(row);
            segment.weights.push(weight);
        }

        for segment in segments.values() {
            debug!(
                "Segment {} holds {} rows (weight {:.1})",
                segment.key,
                segment.len(),
                segment.total_weight()
            );
        }
        info!(
            "Partitioned {} {} rows into {} segments by {}",
            table.len(),
            table.role,
            segments.len(),
            strategy.spec()
        );

        Ok(Self {
            role: table.role,
            fields: fields.to_vec(),
            segmentation: strategy.spec(),
            segments,
        })
    }

    /// Segments in key order
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Segment> {
        self.segments.get(key)
    }

    /// Number of non-empty segments
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Rows across all segments
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.segments.values().map(Segment::len).sum()
    }
}
