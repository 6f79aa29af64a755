//! Standard PUMS field definitions
//!
//! Domains are the bins produced by the upstream preprocessing step.

use super::{FieldDefinition, FieldRole};

/// Household size bins; the last bin is open ended
pub const NUM_PEOPLE_DOMAIN: &[&str] = &["1", "2", "3", "4+"];

/// Age bracket bins used for person segmentation
pub const AGE_DOMAIN: &[&str] = &["0-17", "18-34", "35-64", "65+"];

/// Field definitions for the standard PUMS extract
#[derive(Debug)]
pub struct PumsFields;

impl PumsFields {
    // Person fields

    /// Age bracket
    #[must_use]
    pub fn age() -> FieldDefinition {
        FieldDefinition::new("age", "Age bracket", FieldRole::Person, AGE_DOMAIN)
    }

    /// Sex
    #[must_use]
    pub fn sex() -> FieldDefinition {
        FieldDefinition::new("sex", "Sex", FieldRole::Person, &["M", "F"])
    }

    /// Individual income bracket
    #[must_use]
    pub fn individual_income() -> FieldDefinition {
        FieldDefinition::new(
            "individual_income",
            "Individual income bracket (USD)",
            FieldRole::Person,
            &["<=0", "1-40k", "40k-80k", "80k+"],
        )
    }

    /// Employment status
    #[must_use]
    pub fn employment() -> FieldDefinition {
        FieldDefinition::new(
            "employment",
            "Employment status",
            FieldRole::Person,
            &["employed", "unemployed", "not_in_labor_force", "under_16"],
        )
    }

    // Household fields

    /// Number of people in the household
    #[must_use]
    pub fn num_people() -> FieldDefinition {
        FieldDefinition::new(
            "num_people",
            "Number of persons in household",
            FieldRole::Household,
            NUM_PEOPLE_DOMAIN,
        )
    }

    /// Household income bracket
    #[must_use]
    pub fn household_income() -> FieldDefinition {
        FieldDefinition::new(
            "household_income",
            "Household income bracket (USD)",
            FieldRole::Household,
            &["<=0", "1-40k", "40k-80k", "80k-120k", "120k+"],
        )
    }

    /// Number of vehicles available
    #[must_use]
    pub fn num_vehicles() -> FieldDefinition {
        FieldDefinition::new(
            "num_vehicles",
            "Vehicles available",
            FieldRole::Household,
            &["0", "1", "2", "3+"],
        )
    }

    /// Every standard field, persons first
    #[must_use]
    pub fn all() -> Vec<FieldDefinition> {
        vec![
            Self::age(),
            Self::sex(),
            Self::individual_income(),
            Self::employment(),
            Self::num_people(),
            Self::household_income(),
            Self::num_vehicles(),
        ]
    }
}
