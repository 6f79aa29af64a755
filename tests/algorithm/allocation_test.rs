use proptest::prelude::*;
use synthpop::algorithm::allocation::{AllocationSample, HouseholdAllocator, largest_remainder};
use synthpop::data::HouseholdKey;
use synthpop::{AllocatorConfig, ControlCategory};

use crate::utils::{sample_marginals, sample_microdata};

fn sample(serial: &str, indicators: Vec<f64>, prior: f64) -> AllocationSample {
    AllocationSample {
        key: HouseholdKey::new("t1", serial),
        indicators,
        prior_weight: prior,
    }
}

#[test]
fn test_two_samples_meet_age_targets() {
    let allocator = HouseholdAllocator::from_matrix(
        "t1",
        vec!["under18".into(), "age18_64".into(), "age65+".into()],
        vec![100.0, 300.0, 50.0],
        vec![
            sample("1", vec![20.0, 0.0, 0.0], 10.0),
            sample("2", vec![0.0, 60.0, 10.0], 5.0),
        ],
        &AllocatorConfig::default(),
    )
    .unwrap();

    let result = allocator.allocate().unwrap();
    assert!((result.allocations[0].weight - 5.0).abs() < 0.05);
    assert!((result.allocations[1].weight - 5.0).abs() < 0.05);
    assert_eq!(result.allocations[0].count, 5);
    assert_eq!(result.allocations[1].count, 5);
    assert!(result.diagnostics.within_tolerance());
    result.check_tolerance().unwrap();
}

#[test]
fn test_allocation_from_microdata_matches_marginals() {
    let (households, persons) = sample_microdata();
    let marginals = sample_marginals();
    let allocator = HouseholdAllocator::from_cleaned_data(
        &marginals.for_geography("g1").unwrap(),
        &ControlCategory::standard_set(),
        &households,
        &persons,
        "household_weight",
        &AllocatorConfig::default(),
    )
    .unwrap();

    let result = allocator.allocate().unwrap();
    assert_eq!(result.allocations.len(), 6);
    assert!(
        result.diagnostics.relative_residual < 0.01,
        "relative residual {}",
        result.diagnostics.relative_residual
    );
    let total = result.total_count();
    assert!((53..=55).contains(&total), "allocated {total} households");
}

#[test]
fn test_total_households_constraint() {
    let (households, persons) = sample_microdata();
    let config = AllocatorConfig {
        total_households: Some(54.0),
        ..AllocatorConfig::default()
    };
    let result = HouseholdAllocator::from_cleaned_data(
        &sample_marginals().for_geography("g1").unwrap(),
        &ControlCategory::standard_set(),
        &households,
        &persons,
        "household_weight",
        &config,
    )
    .unwrap()
    .allocate()
    .unwrap();

    assert!(!result.diagnostics.relaxed);
    assert!((result.total_weight() - 54.0).abs() < 1e-3);
    assert_eq!(result.total_count(), 54);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_allocation_is_nonnegative_and_conserved(
        matrix in prop::collection::vec(prop::collection::vec(0.0f64..5.0, 3), 1..6),
        priors in prop::collection::vec(0.0f64..20.0, 6),
        targets in prop::collection::vec(0.0f64..100.0, 3),
    ) {
        let samples = matrix
            .into_iter()
            .enumerate()
            .map(|(i, indicators)| sample(&i.to_string(), indicators, priors[i]))
            .collect();
        let result = HouseholdAllocator::from_matrix(
            "g",
            vec!["a".into(), "b".into(), "c".into()],
            targets,
            samples,
            &AllocatorConfig::default(),
        )
        .unwrap()
        .allocate()
        .unwrap();

        for allocation in &result.allocations {
            prop_assert!(allocation.weight >= 0.0);
        }
        let expected = result.total_weight().round() as u64;
        prop_assert_eq!(result.total_count(), expected);
    }

    #[test]
    fn prop_largest_remainder_conserves_total(
        weights in prop::collection::vec(0.0f64..50.0, 0..40),
    ) {
        let counts = largest_remainder(&weights);
        let total: u64 = counts.iter().sum();
        prop_assert_eq!(total, weights.iter().sum::<f64>().round() as u64);
        for (count, weight) in counts.iter().zip(&weights) {
            let floor = weight.floor() as u64;
            prop_assert!(*count == floor || *count == floor + 1);
        }
    }
}
