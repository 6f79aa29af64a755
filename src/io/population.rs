//! Generated population output
//!
//! Households, persons and the joined table share the replica key columns
//! `geography_id`, `tract`, `serial_number` and `repeat_index`, followed by
//! one text column per generated field.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, StringArray, UInt32Array, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use log::info;

use super::{
    ArtifactPaths, GEOGRAPHY_COLUMN, PERSON_INDEX_COLUMN, REPEAT_INDEX_COLUMN, SERIAL_COLUMN, TRACT_COLUMN,
    write_batch,
};
use crate::algorithm::bayesnet::SyntheticRecord;
use crate::algorithm::population::{Population, ReplicaKey};
use crate::error::{Result, SynthError};
use crate::registry::FieldRole;

struct Row<'a> {
    key: &'a ReplicaKey,
    person_index: Option<u32>,
    attributes: &'a SyntheticRecord,
}

fn write_rows(path: &Path, rows: &[Row<'_>], with_person_index: bool) -> Result<()> {
    let attribute_names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.attributes.keys().map(String::as_str))
        .collect();

    let mut fields = vec![
        Field::new(GEOGRAPHY_COLUMN, DataType::Utf8, false),
        Field::new(TRACT_COLUMN, DataType::Utf8, false),
        Field::new(SERIAL_COLUMN, DataType::Utf8, false),
        Field::new(REPEAT_INDEX_COLUMN, DataType::UInt64, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.key.geography_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.key.tract.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.key.serial_number.as_str()),
        )),
        Arc::new(UInt64Array::from_iter_values(
            rows.iter().map(|r| r.key.repeat_index),
        )),
    ];
    if with_person_index {
        fields.push(Field::new(PERSON_INDEX_COLUMN, DataType::UInt32, false));
        columns.push(Arc::new(UInt32Array::from_iter_values(
            rows.iter().map(|r| r.person_index.unwrap_or_default()),
        )));
    }

    for name in attribute_names {
        let values = rows
            .iter()
            .map(|r| {
                r.attributes.get(name).map(String::as_str).ok_or_else(|| {
                    SynthError::validation(format!("{} has no value for {name}", r.key))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        fields.push(Field::new(name, DataType::Utf8, false));
        columns.push(Arc::new(StringArray::from_iter_values(values)));
    }

    write_batch(path, Arc::new(Schema::new(fields)), columns)
}

pub fn write_households(path: &Path, population: &Population) -> Result<()> {
    let rows = population
        .households
        .iter()
        .map(|h| Row {
            key: &h.key,
            person_index: None,
            attributes: &h.attributes,
        })
        .collect::<Vec<_>>();
    write_rows(path, &rows, false)
}

pub fn write_persons(path: &Path, population: &Population) -> Result<()> {
    let rows = population
        .persons
        .iter()
        .map(|p| Row {
            key: &p.key,
            person_index: Some(p.person_index),
            attributes: &p.attributes,
        })
        .collect::<Vec<_>>();
    write_rows(path, &rows, true)
}

/// Persons merged with their household attributes
pub fn write_joined(path: &Path, population: &Population) -> Result<()> {
    let joined = population.joined();
    let rows = joined
        .iter()
        .map(|j| Row {
            key: &j.key,
            person_index: Some(j.person_index),
            attributes: &j.attributes,
        })
        .collect::<Vec<_>>();
    write_rows(path, &rows, true)
}

/// Write all three output tables of a run
pub fn write_population(paths: &ArtifactPaths, population: &Population) -> Result<()> {
    write_households(&paths.generated(FieldRole::Household), population)?;
    write_persons(&paths.generated(FieldRole::Person), population)?;
    write_joined(&paths.joined(), population)?;
    info!(
        "Wrote {} households and {} persons for state {} PUMA {}",
        population.households.len(),
        population.persons.len(),
        paths.state,
        paths.puma
    );
    Ok(())
}
