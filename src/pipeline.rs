//! End-to-end runs: train, allocate and generate for one or many PUMAs
//!
//! A PUMA run trains a household and a person model from that PUMA's
//! microdata, persists them, then allocates and generates every geography
//! found in the marginal controls. Batches isolate failures per PUMA, and
//! within a PUMA recoverable failures are isolated per geography.

use std::time::Instant;

use log::{error, info, warn};
use rayon::prelude::*;

use crate::algorithm::allocation::{AllocationDiagnostics, HouseholdAllocator};
use crate::algorithm::bayesnet::SegmentedModel;
use crate::algorithm::population::{Population, PopulationGenerator, PopulationStats};
use crate::algorithm::segmentation::SegmentedData;
use crate::config::{Configuration, GenerationConfig};
use crate::data::{GeographyMarginals, Marginals, MicrodataTable};
use crate::error::{Result, SynthError};
use crate::io::ArtifactPaths;
use crate::io::marginals::load_or_fetch;
use crate::io::microdata::read_microdata;
use crate::io::population::write_population;
use crate::registry::{FieldRegistry, FieldRole};
use crate::utils::logging::{
    create_batch_progress_bar, finish_progress_bar, log_operation_complete, log_operation_start,
};

/// Household and person models of one PUMA
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModels {
    pub household: SegmentedModel,
    pub person: SegmentedModel,
}

impl TrainedModels {
    /// Persist both models next to the other artifacts of the run
    pub fn write(&self, paths: &ArtifactPaths) -> Result<()> {
        self.household.write(&paths.model(FieldRole::Household))?;
        self.person.write(&paths.model(FieldRole::Person))
    }

    pub fn read(paths: &ArtifactPaths) -> Result<Self> {
        Ok(Self {
            household: SegmentedModel::read(&paths.model(FieldRole::Household))?,
            person: SegmentedModel::read(&paths.model(FieldRole::Person))?,
        })
    }
}

/// Train the model of one role as configured
pub fn train_model(
    config: &Configuration,
    registry: &FieldRegistry,
    table: &MicrodataTable,
) -> Result<SegmentedModel> {
    let role = table.role;
    let strategy = config.segmentation_for(role).to_strategy(registry)?;
    let fields = config.fields_for(role);
    let data = SegmentedData::from_data(
        table,
        fields,
        config.weight_for(role),
        &strategy,
        registry,
    )?;
    SegmentedModel::train_with_config(
        &data,
        config.structure_for(role),
        fields,
        registry,
        &config.training,
    )
}

pub fn train_models(
    config: &Configuration,
    registry: &FieldRegistry,
    households: &MicrodataTable,
    persons: &MicrodataTable,
) -> Result<TrainedModels> {
    let (household, person) = rayon::join(
        || train_model(config, registry, households),
        || train_model(config, registry, persons),
    );
    Ok(TrainedModels {
        household: household?,
        person: person?,
    })
}

/// Outcome of one geography within a PUMA run
#[derive(Debug, Clone, PartialEq)]
pub struct GeographyOutcome {
    pub geography_id: String,
    pub diagnostics: AllocationDiagnostics,
    pub households: usize,
    pub persons: usize,
}

/// Allocate and generate a single geography
pub fn synthesize_geography(
    config: &Configuration,
    registry: &FieldRegistry,
    models: &TrainedModels,
    marginals: &GeographyMarginals,
    households: &MicrodataTable,
    persons: &MicrodataTable,
    generation: &GenerationConfig,
) -> Result<(Population, AllocationDiagnostics)> {
    let allocation = HouseholdAllocator::from_cleaned_data(
        marginals,
        &config.controls,
        households,
        persons,
        &config.household_weight,
        &config.allocation,
    )?
    .allocate()?;

    let population = PopulationGenerator::new(registry, generation, &models.household, &models.person)?
        .generate(&allocation, households, persons)?;
    population.validate_join(&generation.num_people_field)?;
    Ok((population, allocation.diagnostics))
}

/// Generation settings of the `index`-th geography of a run
fn generation_for(config: &GenerationConfig, index: usize) -> GenerationConfig {
    GenerationConfig {
        seed: config
            .seed
            .wrapping_add((index as u64).wrapping_mul(0xD1B5_4A32_D192_ED03)),
        ..config.clone()
    }
}

/// Summary of a finished PUMA run
#[derive(Debug, Clone, PartialEq)]
pub struct PumaSummary {
    pub paths: ArtifactPaths,
    pub geographies: Vec<GeographyOutcome>,
    /// Geographies whose synthesis failed, with the reason
    pub skipped: Vec<(String, String)>,
    pub stats: PopulationStats,
}

impl PumaSummary {
    /// Geographies whose allocation missed the tolerance but were still generated
    pub fn infeasible(&self) -> impl Iterator<Item = &GeographyOutcome> {
        self.geographies
            .iter()
            .filter(|g| !g.diagnostics.within_tolerance())
    }
}

/// Run one PUMA end to end
///
/// Marginals are read from the run's marginals file when it exists and
/// otherwise obtained from `fetch` and persisted.
pub fn run_puma<F>(config: &Configuration, paths: &ArtifactPaths, fetch: F) -> Result<PumaSummary>
where
    F: FnOnce() -> Result<Marginals>,
{
    let start = Instant::now();
    let scope = format!("state {} PUMA {}", paths.state, paths.puma);
    config.validate()?;
    let registry = config.registry()?;

    let households = read_microdata(
        &paths.microdata(FieldRole::Household),
        FieldRole::Household,
        config.fields_for(FieldRole::Household),
        config.weight_for(FieldRole::Household),
        &registry,
    )?;
    let persons = read_microdata(
        &paths.microdata(FieldRole::Person),
        FieldRole::Person,
        config.fields_for(FieldRole::Person),
        config.weight_for(FieldRole::Person),
        &registry,
    )?;

    log_operation_start("Training models", &scope);
    let models = train_models(config, &registry, &households, &persons)?;
    models.write(paths)?;

    let marginals = load_or_fetch(&paths.marginals(), fetch)?;
    let geographies = marginals.geographies();
    log_operation_start("Allocating and generating", &scope);

    let results = geographies
        .par_iter()
        .enumerate()
        .map(|(index, &geography_id)| {
            let generation = generation_for(&config.generation, index);
            let outcome = marginals.for_geography(geography_id).and_then(|targets| {
                synthesize_geography(
                    config,
                    &registry,
                    &models,
                    &targets,
                    &households,
                    &persons,
                    &generation,
                )
            });
            (geography_id, outcome)
        })
        .collect::<Vec<_>>();

    let mut population = Population::default();
    let mut outcomes = Vec::new();
    let mut skipped = Vec::new();
    for (geography_id, result) in results {
        match result {
            Ok((generated, diagnostics)) => {
                outcomes.push(GeographyOutcome {
                    geography_id: geography_id.to_string(),
                    diagnostics,
                    households: generated.households.len(),
                    persons: generated.persons.len(),
                });
                population.extend(generated);
            }
            Err(e) => {
                if e.is_recoverable() {
                    warn!("Skipping geography {geography_id} of {scope}: {e}");
                } else {
                    error!("Geography {geography_id} of {scope} failed: {e}");
                }
                skipped.push((geography_id.to_string(), e.to_string()));
            }
        }
    }

    population.validate_join(&config.generation.num_people_field)?;
    write_population(paths, &population)?;

    let stats = PopulationStats::calculate(
        &population,
        &config.generation.num_people_field,
        &config.generation.summary_person_field,
    );
    log_operation_complete(
        "population synthesis",
        &scope,
        population.households.len() + population.persons.len(),
        start.elapsed(),
    );
    Ok(PumaSummary {
        paths: paths.clone(),
        geographies: outcomes,
        skipped,
        stats,
    })
}

/// Result of one PUMA within a batch
#[derive(Debug)]
pub struct BatchOutcome {
    pub paths: ArtifactPaths,
    pub result: Result<PumaSummary>,
}

impl BatchOutcome {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run many PUMAs in parallel; a failing PUMA never stops the others
pub fn run_batch<F>(config: &Configuration, runs: &[ArtifactPaths], fetch: F) -> Vec<BatchOutcome>
where
    F: Fn(&ArtifactPaths) -> Result<Marginals> + Sync,
{
    let pb = create_batch_progress_bar(runs.len() as u64, Some("Synthesizing PUMAs"));
    let outcomes = runs
        .par_iter()
        .map(|paths| {
            let result = run_puma(config, paths, || fetch(paths));
            if let Err(e) = &result {
                error!(
                    "State {} PUMA {} failed: {e}",
                    paths.state, paths.puma
                );
            }
            pb.inc(1);
            BatchOutcome {
                paths: paths.clone(),
                result,
            }
        })
        .collect::<Vec<_>>();

    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    finish_progress_bar(
        &pb,
        Some(&format!("{} succeeded, {failed} failed", runs.len() - failed)),
    );
    info!(
        "Batch finished: {} of {} PUMAs succeeded",
        runs.len() - failed,
        runs.len()
    );
    outcomes
}

/// Fetcher for runs whose marginals must already be on disk
pub fn require_existing_marginals(paths: &ArtifactPaths) -> Result<Marginals> {
    Err(SynthError::validation(format!(
        "no marginals at {} and no fetcher configured",
        paths.marginals().display()
    )))
}
