use std::path::Path;

use synthpop::io::ArtifactPaths;
use synthpop::io::microdata::write_microdata;
use synthpop::{
    Configuration, FieldRole, MarginalControl, Marginals, MicrodataRecord, MicrodataTable, Result,
};
use synthpop::data::HouseholdKey;

/// Tract shared by every fixture household
pub const SOURCE_TRACT: &str = "p1";

/// A household row with the standard household fields
#[must_use]
pub fn household(serial: &str, size: &str, income: &str, vehicles: &str, weight: f64) -> MicrodataRecord {
    MicrodataRecord::household(HouseholdKey::new(SOURCE_TRACT, serial))
        .with_value("num_people", size)
        .with_value("household_income", income)
        .with_value("num_vehicles", vehicles)
        .with_weight("household_weight", weight)
}

/// A person row with the standard person fields
#[must_use]
pub fn person(serial: &str, idx: u32, age: &str, sex: &str, income: &str, weight: f64) -> MicrodataRecord {
    MicrodataRecord::person(HouseholdKey::new(SOURCE_TRACT, serial), idx)
        .with_value("age", age)
        .with_value("sex", sex)
        .with_value("individual_income", income)
        .with_weight("person_weight", weight)
}

/// Six households of sizes one to four and their fourteen members
#[must_use]
pub fn sample_microdata() -> (MicrodataTable, MicrodataTable) {
    let households = vec![
        household("1", "1", "1-40k", "1", 20.0),
        household("2", "2", "40k-80k", "2", 15.0),
        household("3", "3", "80k-120k", "2", 10.0),
        household("4", "4+", "120k+", "3+", 8.0),
        household("5", "1", "<=0", "0", 12.0),
        household("6", "2", "1-40k", "1", 9.0),
    ];
    let persons = vec![
        person("1", 0, "65+", "F", "1-40k", 20.0),
        person("2", 0, "35-64", "M", "40k-80k", 15.0),
        person("2", 1, "35-64", "F", "1-40k", 15.0),
        person("3", 0, "35-64", "M", "80k+", 10.0),
        person("3", 1, "35-64", "F", "40k-80k", 10.0),
        person("3", 2, "0-17", "M", "<=0", 10.0),
        person("4", 0, "35-64", "F", "80k+", 8.0),
        person("4", 1, "35-64", "M", "80k+", 8.0),
        person("4", 2, "0-17", "F", "<=0", 8.0),
        person("4", 3, "0-17", "M", "<=0", 8.0),
        person("5", 0, "18-34", "M", "<=0", 12.0),
        person("6", 0, "18-34", "F", "1-40k", 9.0),
        person("6", 1, "18-34", "M", "1-40k", 9.0),
    ];
    (
        MicrodataTable::new(FieldRole::Household, households),
        MicrodataTable::new(FieldRole::Person, persons),
    )
}

/// Controls that the fixture households meet exactly
///
/// `g1` is hit by weights `[10, 12, 5, 4, 15, 8]` and `g2` by
/// `[3, 2, 1, 1, 2, 1]`.
#[must_use]
pub fn sample_marginals() -> Marginals {
    let targets = [
        ("g1", [13.0, 31.0, 42.0, 10.0], [25.0, 20.0, 5.0, 4.0]),
        ("g2", [3.0, 4.0, 8.0, 3.0], [5.0, 3.0, 1.0, 1.0]),
    ];
    let mut controls = Vec::new();
    for (geography, ages, sizes) in targets {
        for (bracket, target) in ["0-17", "18-34", "35-64", "65+"].iter().zip(ages) {
            controls.push(MarginalControl::new(geography, &format!("age_{bracket}"), target));
        }
        for (size, target) in ["1", "2", "3", "4+"].iter().zip(sizes) {
            controls.push(MarginalControl::new(
                geography,
                &format!("num_people_{size}"),
                target,
            ));
        }
    }
    Marginals::new(controls).expect("fixture marginals are valid")
}

/// Default configuration pinned to one worker and a fixed seed
#[must_use]
pub fn test_configuration() -> Configuration {
    let mut config = Configuration::default();
    config.workers = 1;
    config.generation.seed = 17;
    config
}

/// Write the fixture microdata as the inputs of one PUMA run
pub fn write_puma(dir: &Path, state: &str, puma: &str, config: &Configuration) -> Result<ArtifactPaths> {
    let paths = ArtifactPaths::new(dir, state, puma);
    let (households, persons) = sample_microdata();
    write_microdata(
        &paths.microdata(FieldRole::Household),
        &households,
        config.fields_for(FieldRole::Household),
        &config.household_weight,
    )?;
    write_microdata(
        &paths.microdata(FieldRole::Person),
        &persons,
        config.fields_for(FieldRole::Person),
        &config.person_weight,
    )?;
    Ok(paths)
}
