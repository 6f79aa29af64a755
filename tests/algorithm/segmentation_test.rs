use proptest::prelude::*;
use synthpop::algorithm::segmentation::{SegmentationStrategy, SegmentedData};
use synthpop::data::HouseholdKey;
use synthpop::registry::field_definitions::AGE_DOMAIN;
use synthpop::{FieldRegistry, FieldRole, MicrodataRecord, MicrodataTable, SynthError};

use crate::utils::sample_microdata;

fn fields(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

#[test]
fn test_households_segmented_by_size() {
    let registry = FieldRegistry::standard();
    let (households, _) = sample_microdata();
    let strategy = SegmentationStrategy::household_size_bucket(&registry, "num_people").unwrap();
    let data = SegmentedData::from_data(
        &households,
        &fields(&["num_people", "num_vehicles"]),
        "household_weight",
        &strategy,
        &registry,
    )
    .unwrap();

    assert_eq!(data.total_rows(), households.len());
    let pairs = data.get("1").unwrap();
    assert_eq!(pairs.len(), 2);
    assert!((pairs.total_weight() - 32.0).abs() < 1e-12);
    assert!(data.get("4+").is_some());
}

#[test]
fn test_custom_predicate_with_declared_domain() {
    let registry = FieldRegistry::standard();
    let (_, persons) = sample_microdata();
    let strategy = SegmentationStrategy::custom(
        "adult",
        vec!["child".into(), "adult".into()],
        |record: &MicrodataRecord| {
            record
                .value("age")
                .map(|age| if age == "0-17" { "child" } else { "adult" }.to_string())
        },
    );
    let data = SegmentedData::from_data(
        &persons,
        &fields(&["sex"]),
        "person_weight",
        &strategy,
        &registry,
    )
    .unwrap();
    assert_eq!(data.get("child").unwrap().len(), 3);
    assert_eq!(data.get("adult").unwrap().len(), 10);
}

#[test]
fn test_key_outside_declared_domain_rejected() {
    let registry = FieldRegistry::standard();
    let (_, persons) = sample_microdata();
    let strategy = SegmentationStrategy::custom("broken", vec!["a".into()], |_| {
        Some("b".to_string())
    });
    let result = SegmentedData::from_data(
        &persons,
        &fields(&["sex"]),
        "person_weight",
        &strategy,
        &registry,
    );
    assert!(matches!(result, Err(SynthError::Validation(_))));
}

#[test]
fn test_unknown_field_rejected() {
    let registry = FieldRegistry::standard();
    let (_, persons) = sample_microdata();
    let strategy = SegmentationStrategy::age_bracket(&registry, "age").unwrap();
    let result = SegmentedData::from_data(
        &persons,
        &fields(&["agep"]),
        "person_weight",
        &strategy,
        &registry,
    );
    assert!(matches!(result, Err(SynthError::UnknownField(_))));
}

proptest! {
    #[test]
    fn prop_every_row_lands_in_exactly_one_segment(
        ages in prop::collection::vec(0usize..AGE_DOMAIN.len(), 0..60),
    ) {
        let registry = FieldRegistry::standard();
        let records = ages
            .iter()
            .enumerate()
            .map(|(i, &age)| {
                MicrodataRecord::person(HouseholdKey::new("t", &i.to_string()), 0)
                    .with_value("age", AGE_DOMAIN[age])
                    .with_value("sex", if i % 2 == 0 { "M" } else { "F" })
                    .with_weight("person_weight", 1.0 + i as f64)
            })
            .collect();
        let table = MicrodataTable::new(FieldRole::Person, records);
        let strategy = SegmentationStrategy::age_bracket(&registry, "age").unwrap();
        let data = SegmentedData::from_data(
            &table,
            &fields(&["age", "sex"]),
            "person_weight",
            &strategy,
            &registry,
        )
        .unwrap();

        prop_assert_eq!(data.total_rows(), ages.len());
        let total_weight: f64 = data.segments().map(|s| s.total_weight()).sum();
        let expected: f64 = (0..ages.len()).map(|i| 1.0 + i as f64).sum();
        prop_assert!((total_weight - expected).abs() < 1e-9);
        for segment in data.segments() {
            for row in &segment.rows {
                prop_assert_eq!(&row[0], &segment.key);
            }
        }
    }
}
