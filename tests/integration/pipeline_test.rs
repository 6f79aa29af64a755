use std::fs;

use synthpop::io::ArtifactPaths;
use synthpop::io::marginals::read_marginals;
use synthpop::pipeline::{TrainedModels, require_existing_marginals};
use synthpop::data::{MarginalControl, Marginals};
use synthpop::{FieldRole, SynthError, run_batch, run_puma};
use tempfile::TempDir;

use crate::utils::{sample_marginals, test_configuration, write_puma};

#[test]
fn test_puma_run_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = test_configuration();
    let paths = write_puma(dir.path(), "06", "00101", &config).unwrap();

    let summary = run_puma(&config, &paths, || Ok(sample_marginals())).unwrap();

    assert_eq!(summary.geographies.len(), 2);
    assert!(summary.skipped.is_empty());
    assert_eq!(summary.infeasible().count(), 0);
    let g1 = &summary.geographies[0];
    assert_eq!(g1.geography_id, "g1");
    assert!((53..=55).contains(&g1.households), "{} households", g1.households);
    assert_eq!(
        summary.stats.household_count,
        summary.geographies.iter().map(|g| g.households).sum::<usize>()
    );
    assert!(summary.stats.persons_by_value.keys().all(|age| {
        ["0-17", "18-34", "35-64", "65+"].contains(&age.as_str())
    }));
    assert_eq!(
        summary.stats.persons_by_value.values().sum::<usize>(),
        summary.stats.person_count
    );

    for artifact in [
        paths.model(FieldRole::Person),
        paths.model(FieldRole::Household),
        paths.marginals(),
        paths.generated(FieldRole::Person),
        paths.generated(FieldRole::Household),
        paths.joined(),
    ] {
        assert!(artifact.is_file(), "missing {}", artifact.display());
    }

    let models = TrainedModels::read(&paths).unwrap();
    assert_eq!(models.person.role(), FieldRole::Person);
    assert_eq!(read_marginals(&paths.marginals()).unwrap(), sample_marginals());
}

#[test]
fn test_cached_marginals_skip_fetch() {
    let dir = TempDir::new().unwrap();
    let config = test_configuration();
    let paths = write_puma(dir.path(), "06", "00102", &config).unwrap();

    run_puma(&config, &paths, || Ok(sample_marginals())).unwrap();
    let rerun = run_puma(&config, &paths, || {
        Err(SynthError::validation("fetch must not run when marginals exist"))
    })
    .unwrap();
    assert_eq!(rerun.geographies.len(), 2);
}

#[test]
fn test_failing_geography_is_skipped() {
    let dir = TempDir::new().unwrap();
    let config = test_configuration();
    let paths = write_puma(dir.path(), "06", "00105", &config).unwrap();
    let mut controls = sample_marginals().controls().to_vec();
    controls.push(MarginalControl::new("g3", "median_rent", 1200.0));
    let marginals = Marginals::new(controls).unwrap();

    let summary = run_puma(&config, &paths, || Ok(marginals)).unwrap();

    let generated: Vec<&str> = summary
        .geographies
        .iter()
        .map(|g| g.geography_id.as_str())
        .collect();
    assert_eq!(generated, vec!["g1", "g2"]);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].0, "g3");
    assert!(paths.joined().is_file());
    assert_eq!(
        summary.stats.household_count,
        summary.geographies.iter().map(|g| g.households).sum::<usize>()
    );
}

#[test]
fn test_batch_isolates_failing_puma() {
    let dir = TempDir::new().unwrap();
    let config = test_configuration();
    let good = write_puma(dir.path(), "06", "00101", &config).unwrap();
    let missing = ArtifactPaths::new(dir.path(), "06", "99999");
    let corrupt = write_puma(dir.path(), "06", "00103", &config).unwrap();
    fs::write(corrupt.microdata(FieldRole::Person), b"not parquet").unwrap();

    let outcomes = run_batch(
        &config,
        &[good.clone(), missing.clone(), corrupt.clone()],
        |_| Ok(sample_marginals()),
    );

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].is_ok());
    assert_eq!(outcomes[0].paths, good);
    assert!(matches!(outcomes[1].result, Err(SynthError::Io(_))));
    assert!(!outcomes[2].is_ok());
    assert!(good.joined().is_file());
}

#[test]
fn test_missing_marginals_without_fetcher() {
    let dir = TempDir::new().unwrap();
    let config = test_configuration();
    let paths = write_puma(dir.path(), "06", "00104", &config).unwrap();
    let outcomes = run_batch(&config, std::slice::from_ref(&paths), require_existing_marginals);
    assert!(matches!(outcomes[0].result, Err(SynthError::Validation(_))));
}
