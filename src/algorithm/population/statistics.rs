//! Population statistics and summaries

use std::collections::BTreeMap;
use std::fmt::Write;

use super::generator::Population;

/// Basic counts of a generated population
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulationStats {
    pub household_count: usize,
    pub person_count: usize,
    /// Households per value of a household field
    pub households_by_value: BTreeMap<String, usize>,
    /// Persons per value of a person field
    pub persons_by_value: BTreeMap<String, usize>,
}

impl PopulationStats {
    /// Tally a population on one household field and one person field
    #[must_use]
    pub fn calculate(population: &Population, household_field: &str, person_field: &str) -> Self {
        let mut households_by_value = BTreeMap::new();
        for household in &population.households {
            if let Some(value) = household.attributes.get(household_field) {
                *households_by_value.entry(value.clone()).or_insert(0) += 1;
            }
        }
        let mut persons_by_value = BTreeMap::new();
        for person in &population.persons {
            if let Some(value) = person.attributes.get(person_field) {
                *persons_by_value.entry(value.clone()).or_insert(0) += 1;
            }
        }
        Self {
            household_count: population.households.len(),
            person_count: population.persons.len(),
            households_by_value,
            persons_by_value,
        }
    }

    /// Mean household size, zero for an empty population
    #[must_use]
    pub fn mean_household_size(&self) -> f64 {
        if self.household_count == 0 {
            0.0
        } else {
            self.person_count as f64 / self.household_count as f64
        }
    }

    /// Multi-line human readable summary
    #[must_use]
    pub fn summary(&self, geography_id: &str) -> String {
        let mut summary = String::new();
        let _ = writeln!(summary, "Synthetic Population Summary ({geography_id}):");
        let _ = writeln!(summary, "  Total Households: {}", self.household_count);
        let _ = writeln!(summary, "  Total Persons: {}", self.person_count);
        let _ = writeln!(
            summary,
            "  Mean Household Size: {:.2}",
            self.mean_household_size()
        );
        if !self.households_by_value.is_empty() {
            summary.push_str("  Households by value:\n");
            for (value, count) in &self.households_by_value {
                let _ = writeln!(summary, "    {value}: {count}");
            }
        }
        if !self.persons_by_value.is_empty() {
            summary.push_str("  Persons by value:\n");
            for (value, count) in &self.persons_by_value {
                let _ = writeln!(summary, "    {value}: {count}");
            }
        }
        summary
    }
}
