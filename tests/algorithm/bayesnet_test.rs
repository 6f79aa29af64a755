use std::fs;

use synthpop::algorithm::bayesnet::{
    BayesianNetwork, Evidence, GraphStructure, LaplaceEstimator, ROW_TOLERANCE, SegmentedModel,
};
use synthpop::algorithm::segmentation::Segment;
use synthpop::pipeline::train_model;
use synthpop::{FieldRegistry, SynthError};
use tempfile::TempDir;

use crate::utils::{sample_microdata, test_configuration};

fn trained_person_model() -> SegmentedModel {
    let config = test_configuration();
    let (_, persons) = sample_microdata();
    train_model(&config, &FieldRegistry::standard(), &persons).unwrap()
}

#[test]
fn test_sex_frequencies_recovered() {
    let segment = Segment {
        key: "all".into(),
        rows: vec![vec!["M".into()], vec!["F".into()]],
        weights: vec![60.0, 40.0],
    };
    let network = BayesianNetwork::train(
        &segment,
        &["sex".to_string()],
        &GraphStructure::new(),
        &FieldRegistry::standard(),
        &LaplaceEstimator::default(),
    )
    .unwrap();

    let p_male = network.table("sex").unwrap().probability("M", &[]).unwrap();
    assert!((p_male - 0.6).abs() < 0.01, "P(M) = {p_male}");

    let n = 10_000;
    let males = network
        .generate(n, &Evidence::new(), 42)
        .unwrap()
        .filter(|record| record["sex"] == "M")
        .count();
    let expected_m = p_male * n as f64;
    let expected_f = n as f64 - expected_m;
    let observed_m = males as f64;
    let observed_f = n as f64 - observed_m;
    let chi_square = (observed_m - expected_m).powi(2) / expected_m
        + (observed_f - expected_f).powi(2) / expected_f;
    // 0.001 critical value of chi-square with one degree of freedom
    assert!(chi_square < 10.83, "chi-square {chi_square}");
}

#[test]
fn test_trained_tables_are_distributions() {
    let model = trained_person_model();
    assert!(model.segment_keys().count() > 0);
    for key in model.segment_keys() {
        let network = model.get(key).unwrap();
        for table in network.tables() {
            assert_eq!(table.row_count(), table.parent_combinations().len());
            for row in table.rows() {
                let sum: f64 = row.iter().sum();
                assert!((sum - 1.0).abs() < ROW_TOLERANCE);
                assert!(row.iter().all(|p| *p >= 0.0));
            }
        }
    }
}

#[test]
fn test_samples_stay_in_domain_and_repeat_per_seed() {
    let registry = FieldRegistry::standard();
    let model = trained_person_model();
    let network = model.get("35-64").unwrap();

    let first: Vec<_> = network.generate(200, &Evidence::new(), 9).unwrap().collect();
    let second: Vec<_> = network.generate(200, &Evidence::new(), 9).unwrap().collect();
    assert_eq!(first, second);

    for record in &first {
        assert_eq!(record.len(), 3);
        for (field, value) in record {
            registry.validate_value(field, value).unwrap();
        }
    }
}

#[test]
fn test_evidence_is_respected() {
    let model = trained_person_model();
    let network = model.get("18-34").unwrap();
    let evidence = Evidence::from([("sex".to_string(), "F".to_string())]);
    assert!(
        network
            .generate(100, &evidence, 3)
            .unwrap()
            .all(|record| record["sex"] == "F")
    );

    let outside = Evidence::from([("sex".to_string(), "X".to_string())]);
    assert!(matches!(
        network.generate(1, &outside, 3),
        Err(SynthError::UnsupportedEvidence { .. })
    ));
}

#[test]
fn test_model_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("person_model.json");
    let model = trained_person_model();

    model.write(&path).unwrap();
    let loaded = SegmentedModel::read(&path).unwrap();
    assert_eq!(loaded, model);

    let a: Vec<_> = model
        .get("0-17")
        .unwrap()
        .generate(50, &Evidence::new(), 5)
        .unwrap()
        .collect();
    let b: Vec<_> = loaded
        .get("0-17")
        .unwrap()
        .generate(50, &Evidence::new(), 5)
        .unwrap()
        .collect();
    assert_eq!(a, b);
}

#[test]
fn test_truncated_model_file_is_corrupt() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("person_model.json");
    trained_person_model().write(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    fs::write(&path, &text[..text.len() / 2]).unwrap();
    assert!(matches!(
        SegmentedModel::read(&path),
        Err(SynthError::CorruptModelFile { .. })
    ));
}

#[test]
fn test_cyclic_structure_rejected_before_training() {
    let config = test_configuration();
    let (_, persons) = sample_microdata();
    let mut cyclic = config.clone();
    cyclic.person_structure = GraphStructure::from_edges(&[
        ("individual_income", &["sex"][..]),
        ("sex", &["individual_income"][..]),
    ]);
    let result = train_model(&cyclic, &FieldRegistry::standard(), &persons);
    assert!(matches!(
        result,
        Err(SynthError::DisconnectedStructure(_))
    ));
}

#[test]
fn test_unknown_structure_field_rejected() {
    let config = test_configuration();
    let (_, persons) = sample_microdata();
    let mut typo = config.clone();
    typo.person_structure = GraphStructure::from_edges(&[("individual_income", &["agep"][..])]);
    let result = train_model(&typo, &FieldRegistry::standard(), &persons);
    assert!(matches!(result, Err(SynthError::UnknownField(field)) if field == "agep"));
}
