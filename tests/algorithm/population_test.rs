use std::collections::BTreeSet;

use synthpop::algorithm::allocation::{AllocationDiagnostics, AllocationResult, SampleAllocation};
use synthpop::algorithm::population::{PopulationGenerator, parse_count};
use synthpop::data::HouseholdKey;
use synthpop::pipeline::{TrainedModels, train_models};
use synthpop::{FieldRegistry, GenerationConfig, Population, SynthError};

use crate::utils::{SOURCE_TRACT, sample_microdata, test_configuration};

fn models() -> TrainedModels {
    let (households, persons) = sample_microdata();
    train_models(
        &test_configuration(),
        &FieldRegistry::standard(),
        &households,
        &persons,
    )
    .unwrap()
}

fn allocation(counts: &[(&str, u64)]) -> AllocationResult {
    AllocationResult {
        geography_id: "g1".into(),
        categories: Vec::new(),
        allocations: counts
            .iter()
            .map(|&(serial, count)| SampleAllocation {
                key: HouseholdKey::new(SOURCE_TRACT, serial),
                weight: count as f64,
                count,
            })
            .collect(),
        diagnostics: AllocationDiagnostics {
            residual: Vec::new(),
            relative_residual: 0.0,
            tolerance: 0.05,
            iterations: 0,
            converged: true,
            relaxed: false,
        },
    }
}

fn generate(result: &AllocationResult, config: &GenerationConfig) -> Population {
    let (households, persons) = sample_microdata();
    let models = models();
    Population::generate(
        result,
        &households,
        &persons,
        &models.person,
        &models.household,
        &FieldRegistry::standard(),
        config,
    )
    .unwrap()
}

#[test]
fn test_count_three_yields_three_replicas() {
    let population = generate(&allocation(&[("3", 3)]), &GenerationConfig::default());

    let repeats: BTreeSet<u64> = population
        .households
        .iter()
        .map(|h| h.key.repeat_index)
        .collect();
    assert_eq!(repeats, BTreeSet::from([0, 1, 2]));
    assert_eq!(population.households.len(), 3);

    for household in &population.households {
        let size = parse_count(&household.attributes["num_people"]).unwrap();
        let members = population
            .persons
            .iter()
            .filter(|p| p.key == household.key)
            .count();
        assert_eq!(members, size);
        assert_eq!(household.key.geography_id, "g1");
        assert_eq!(household.key.tract, SOURCE_TRACT);
        assert_eq!(household.key.serial_number, "3");
    }
    population.validate_join("num_people").unwrap();
}

#[test]
fn test_household_size_follows_source_segment() {
    let config = GenerationConfig {
        pin_household_segment: true,
        ..GenerationConfig::default()
    };
    let population = generate(&allocation(&[("1", 4), ("4", 2), ("6", 3)]), &config);
    for household in &population.households {
        let expected = match household.key.serial_number.as_str() {
            "1" => "1",
            "4" => "4+",
            _ => "2",
        };
        assert_eq!(household.attributes["num_people"], expected);
    }
    assert_eq!(population.persons.len(), 4 + 2 * 4 + 3 * 2);
    population.validate_join("num_people").unwrap();
}

#[test]
fn test_generation_is_deterministic() {
    let result = allocation(&[("1", 2), ("2", 5), ("3", 1), ("4", 3), ("5", 0), ("6", 4)]);
    let config = GenerationConfig {
        seed: 99,
        ..GenerationConfig::default()
    };
    let first = generate(&result, &config);
    let second = generate(&result, &config);
    assert_eq!(first, second);
    assert_eq!(first.households.len(), 15);
    assert!(first.households.iter().all(|h| h.key.serial_number != "5"));
}

#[test]
fn test_joined_rows_carry_both_roles() {
    let population = generate(&allocation(&[("2", 2)]), &GenerationConfig::default());
    let joined = population.joined();
    assert_eq!(joined.len(), population.persons.len());
    for row in &joined {
        assert!(row.attributes.contains_key("num_vehicles"));
        assert!(row.attributes.contains_key("individual_income"));
    }
}

#[test]
fn test_unknown_allocated_household_rejected() {
    let (households, persons) = sample_microdata();
    let models = models();
    let config = GenerationConfig::default();
    let generator = PopulationGenerator::new(
        &FieldRegistry::standard(),
        &config,
        &models.household,
        &models.person,
    )
    .unwrap();
    let result = generator.generate(&allocation(&[("999", 1)]), &households, &persons);
    assert!(matches!(result, Err(SynthError::Validation(_))));
}

#[test]
fn test_swapped_models_rejected() {
    let models = models();
    let config = GenerationConfig::default();
    let result = PopulationGenerator::new(
        &FieldRegistry::standard(),
        &config,
        &models.person,
        &models.household,
    );
    assert!(result.is_err());
}

#[test]
fn test_out_of_domain_household_evidence() {
    let mut config = GenerationConfig::default();
    config
        .household_evidence
        .insert("num_vehicles".into(), "7".into());
    let (households, persons) = sample_microdata();
    let models = models();
    let result = Population::generate(
        &allocation(&[("1", 1)]),
        &households,
        &persons,
        &models.person,
        &models.household,
        &FieldRegistry::standard(),
        &config,
    );
    assert!(matches!(
        result,
        Err(SynthError::UnsupportedEvidence { .. })
    ));
}
