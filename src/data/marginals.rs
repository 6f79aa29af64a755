//! Marginal control totals and the categories they count

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::microdata::MicrodataRecord;
use crate::error::{Result, SynthError};
use crate::registry::field_definitions::{AGE_DOMAIN, NUM_PEOPLE_DOMAIN};
use crate::registry::{FieldRegistry, FieldRole};

/// A published target count for one category in one geography
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginalControl {
    pub geography_id: String,
    pub category_key: String,
    pub target_count: f64,
}

impl MarginalControl {
    pub fn new(geography_id: &str, category_key: &str, target_count: f64) -> Self {
        Self {
            geography_id: geography_id.to_string(),
            category_key: category_key.to_string(),
            target_count,
        }
    }
}

/// All marginal controls of a run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Marginals {
    controls: Vec<MarginalControl>,
}

impl Marginals {
    /// Validate and wrap a list of controls
    ///
    /// Targets must be finite and nonnegative, and each
    /// `(geography_id, category_key)` pair may appear only once.
    pub fn new(controls: Vec<MarginalControl>) -> Result<Self> {
        if let Some(bad) = controls
            .iter()
            .find(|c| !c.target_count.is_finite() || c.target_count < 0.0)
        {
            return Err(SynthError::validation(format!(
                "target {} for {}/{} must be a nonnegative number",
                bad.target_count, bad.geography_id, bad.category_key
            )));
        }
        if let Some((geo, key)) = controls
            .iter()
            .map(|c| (&c.geography_id, &c.category_key))
            .duplicates()
            .next()
        {
            return Err(SynthError::validation(format!(
                "duplicate marginal control {geo}/{key}"
            )));
        }
        Ok(Self { controls })
    }

    #[must_use]
    pub fn controls(&self) -> &[MarginalControl] {
        &self.controls
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Distinct geography ids, sorted
    #[must_use]
    pub fn geographies(&self) -> Vec<&str> {
        self.controls
            .iter()
            .map(|c| c.geography_id.as_str())
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Targets for a single geography
    pub fn for_geography(&self, geography_id: &str) -> Result<GeographyMarginals> {
        let targets: BTreeMap<String, f64> = self
            .controls
            .iter()
            .filter(|c| c.geography_id == geography_id)
            .map(|c| (c.category_key.clone(), c.target_count))
            .collect();
        if targets.is_empty() {
            return Err(SynthError::validation(format!(
                "no marginal controls for geography {geography_id}"
            )));
        }
        Ok(GeographyMarginals {
            geography_id: geography_id.to_string(),
            targets,
        })
    }
}

/// Target vector of one geography, keyed by category
#[derive(Debug, Clone, PartialEq)]
pub struct GeographyMarginals {
    pub geography_id: String,
    pub targets: BTreeMap<String, f64>,
}

/// What a control category counts for a household sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CategoryMatcher {
    /// One per household
    Households,
    /// One per household member
    Persons,
    /// One if the household's field has the value
    HouseholdField { field: String, value: String },
    /// Number of members whose field has the value
    PersonField { field: String, value: String },
}

/// Maps a marginal `category_key` to a counting rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCategory {
    pub key: String,
    #[serde(flatten)]
    pub matcher: CategoryMatcher,
}

impl ControlCategory {
    pub fn household_field(key: &str, field: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            matcher: CategoryMatcher::HouseholdField {
                field: field.to_string(),
                value: value.to_string(),
            },
        }
    }

    pub fn person_field(key: &str, field: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            matcher: CategoryMatcher::PersonField {
                field: field.to_string(),
                value: value.to_string(),
            },
        }
    }

    /// Age brackets and household sizes, the controls published per tract
    #[must_use]
    pub fn standard_set() -> Vec<Self> {
        let ages = AGE_DOMAIN
            .iter()
            .map(|v| Self::person_field(&format!("age_{v}"), "age", v));
        let sizes = NUM_PEOPLE_DOMAIN
            .iter()
            .map(|v| Self::household_field(&format!("num_people_{v}"), "num_people", v));
        ages.chain(sizes).collect()
    }

    /// Check field names, roles and values against the registry
    pub fn validate(&self, registry: &FieldRegistry) -> Result<()> {
        let (field, value, role) = match &self.matcher {
            CategoryMatcher::Households | CategoryMatcher::Persons => return Ok(()),
            CategoryMatcher::HouseholdField { field, value } => {
                (field, value, FieldRole::Household)
            }
            CategoryMatcher::PersonField { field, value } => (field, value, FieldRole::Person),
        };
        let definition = registry.require(field)?;
        if definition.role != role {
            return Err(SynthError::validation(format!(
                "control {} expects a {role} field but {field} is a {} field",
                self.key, definition.role
            )));
        }
        registry.validate_value(field, value)?;
        Ok(())
    }

    /// Contribution of one household and its members to this category
    #[must_use]
    pub fn count(&self, household: &MicrodataRecord, members: &[&MicrodataRecord]) -> f64 {
        match &self.matcher {
            CategoryMatcher::Households => 1.0,
            CategoryMatcher::Persons => members.len() as f64,
            CategoryMatcher::HouseholdField { field, value } => {
                f64::from(u8::from(household.value(field) == Some(value.as_str())))
            }
            CategoryMatcher::PersonField { field, value } => members
                .iter()
                .filter(|m| m.value(field) == Some(value.as_str()))
                .count() as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::microdata::HouseholdKey;

    #[test]
    fn test_negative_target_rejected() {
        let result = Marginals::new(vec![MarginalControl::new("t1", "age_0-17", -3.0)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_control_rejected() {
        let result = Marginals::new(vec![
            MarginalControl::new("t1", "age_0-17", 3.0),
            MarginalControl::new("t1", "age_0-17", 4.0),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_geographies_are_sorted_and_unique() {
        let marginals = Marginals::new(vec![
            MarginalControl::new("t2", "age_0-17", 1.0),
            MarginalControl::new("t1", "age_0-17", 1.0),
            MarginalControl::new("t2", "age_65+", 1.0),
        ])
        .unwrap();
        assert_eq!(marginals.geographies(), vec!["t1", "t2"]);
        assert_eq!(marginals.for_geography("t2").unwrap().targets.len(), 2);
        assert!(marginals.for_geography("t3").is_err());
    }

    #[test]
    fn test_category_counts() {
        let key = HouseholdKey::new("t1", "7");
        let household = MicrodataRecord::household(key.clone()).with_value("num_people", "2");
        let a = MicrodataRecord::person(key.clone(), 0).with_value("age", "0-17");
        let b = MicrodataRecord::person(key, 1).with_value("age", "35-64");
        let members = vec![&a, &b];

        let kids = ControlCategory::person_field("age_0-17", "age", "0-17");
        let size = ControlCategory::household_field("num_people_2", "num_people", "2");
        assert_eq!(kids.count(&household, &members), 1.0);
        assert_eq!(size.count(&household, &members), 1.0);
        let persons = ControlCategory {
            key: "persons".into(),
            matcher: CategoryMatcher::Persons,
        };
        assert_eq!(persons.count(&household, &members), 2.0);
    }

    #[test]
    fn test_standard_set_validates() {
        let registry = FieldRegistry::standard();
        for category in ControlCategory::standard_set() {
            category.validate(&registry).unwrap();
        }
    }

    #[test]
    fn test_category_role_mismatch() {
        let wrong = ControlCategory::household_field("age_0-17", "age", "0-17");
        assert!(wrong.validate(&FieldRegistry::standard()).is_err());
    }
}
