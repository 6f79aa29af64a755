//! Survey microdata records
//!
//! Households are keyed by `(tract, serial_number)`. Person records carry the
//! same key as a foreign key plus a person index within the household.

use itertools::Itertools;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SynthError};
use crate::registry::{FieldRegistry, FieldRole};

/// Identity of a household sample
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HouseholdKey {
    pub tract: String,
    pub serial_number: String,
}

impl HouseholdKey {
    pub fn new(tract: impl Into<String>, serial_number: impl Into<String>) -> Self {
        Self {
            tract: tract.into(),
            serial_number: serial_number.into(),
        }
    }
}

impl fmt::Display for HouseholdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tract, self.serial_number)
    }
}

/// One household or person row of discretized microdata
#[derive(Debug, Clone, PartialEq)]
pub struct MicrodataRecord {
    /// Household identity (foreign key for persons)
    pub key: HouseholdKey,
    /// Position within the household, persons only
    pub person_index: Option<u32>,
    /// Discretized field values by field name
    pub values: FxHashMap<String, String>,
    /// Survey weights by weight column name
    pub weights: FxHashMap<String, f64>,
}

impl MicrodataRecord {
    /// Create a household record
    pub fn household(key: HouseholdKey) -> Self {
        Self {
            key,
            person_index: None,
            values: FxHashMap::default(),
            weights: FxHashMap::default(),
        }
    }

    /// Create a person record belonging to `key`
    pub fn person(key: HouseholdKey, person_index: u32) -> Self {
        Self {
            person_index: Some(person_index),
            ..Self::household(key)
        }
    }

    /// Builder-style setter for a field value
    #[must_use]
    pub fn with_value(mut self, field: &str, value: &str) -> Self {
        self.values.insert(field.to_string(), value.to_string());
        self
    }

    /// Builder-style setter for a weight column
    #[must_use]
    pub fn with_weight(mut self, column: &str, weight: f64) -> Self {
        self.weights.insert(column.to_string(), weight);
        self
    }

    /// Value of a field, if present
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    /// Value of a field, failing when absent
    pub fn require_value(&self, field: &str) -> Result<&str> {
        self.value(field).ok_or_else(|| {
            SynthError::validation(format!("record {} has no value for {field}", self.key))
        })
    }

    /// Weight from a weight column; must be finite and nonnegative
    pub fn weight(&self, column: &str) -> Result<f64> {
        match self.weights.get(column) {
            Some(&w) if w.is_finite() && w >= 0.0 => Ok(w),
            Some(&w) => Err(SynthError::validation(format!(
                "record {} has invalid weight {w} in {column}",
                self.key
            ))),
            None => Err(SynthError::validation(format!(
                "record {} has no weight column {column}",
                self.key
            ))),
        }
    }
}

/// A table of microdata records of a single role
#[derive(Debug, Clone)]
pub struct MicrodataTable {
    pub role: FieldRole,
    pub records: Vec<MicrodataRecord>,
}

impl MicrodataTable {
    pub fn new(role: FieldRole, records: Vec<MicrodataRecord>) -> Self {
        Self { role, records }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Check every value against the registry and the table's role
    ///
    /// Household tables must not repeat a `(tract, serial_number)` key and
    /// person tables must not repeat a `(key, person_index)` pair.
    pub fn validate(&self, registry: &FieldRegistry) -> Result<()> {
        for record in &self.records {
            for (field, value) in &record.values {
                let definition = registry.require(field)?;
                if definition.role != self.role {
                    return Err(SynthError::validation(format!(
                        "{} field {field} found in {} table",
                        definition.role, self.role
                    )));
                }
                registry.validate_value(field, value)?;
            }
            if self.role == FieldRole::Person && record.person_index.is_none() {
                return Err(SynthError::validation(format!(
                    "person record in household {} has no person index",
                    record.key
                )));
            }
        }

        let duplicates = match self.role {
            FieldRole::Household => self
                .records
                .iter()
                .map(|r| &r.key)
                .duplicates()
                .count(),
            FieldRole::Person => self
                .records
                .iter()
                .map(|r| (&r.key, r.person_index))
                .duplicates()
                .count(),
        };
        if duplicates > 0 {
            return Err(SynthError::validation(format!(
                "{duplicates} duplicate {} identities",
                self.role
            )));
        }
        Ok(())
    }

    /// Group records by household key, preserving record order within groups
    #[must_use]
    pub fn by_household(&self) -> FxHashMap<&HouseholdKey, Vec<&MicrodataRecord>> {
        let mut groups: FxHashMap<&HouseholdKey, Vec<&MicrodataRecord>> = FxHashMap::default();
        for record in &self.records {
            groups.entry(&record.key).or_default().push(record);
        }
        for members in groups.values_mut() {
            members.sort_by_key(|r| r.person_index);
        }
        groups
    }
}
