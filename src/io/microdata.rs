//! Microdata Parquet files
//!
//! One row per household (household role) or per person (person role). Key
//! columns are `tract`, `serial_number` and, for persons, `person_index`;
//! every configured field is a text column holding a discretized value.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use arrow::array::{ArrayRef, Float64Array, StringArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema};
use log::info;

use super::{
    PERSON_INDEX_COLUMN, SERIAL_COLUMN, TRACT_COLUMN, float_column, index_column, read_batches,
    string_column, write_batch,
};
use crate::data::{HouseholdKey, MicrodataRecord, MicrodataTable};
use crate::error::{Result, SynthError};
use crate::registry::{FieldRegistry, FieldRole};

/// Read a microdata table and validate it against the registry
///
/// Only `fields` and the `weight_column` are loaded; other columns are
/// ignored.
pub fn read_microdata(
    path: &Path,
    role: FieldRole,
    fields: &[String],
    weight_column: &str,
    registry: &FieldRegistry,
) -> Result<MicrodataTable> {
    let start = Instant::now();
    for field in fields {
        registry.require(field)?;
    }

    let mut records = Vec::new();
    for batch in read_batches(path, &format!("{role} microdata"))? {
        let tracts = string_column(&batch, TRACT_COLUMN)?;
        let serials = string_column(&batch, SERIAL_COLUMN)?;
        let person_indices = match role {
            FieldRole::Person => Some(index_column(&batch, PERSON_INDEX_COLUMN)?),
            FieldRole::Household => None,
        };
        let weights = float_column(&batch, weight_column)?;
        let values = fields
            .iter()
            .map(|f| string_column(&batch, f))
            .collect::<Result<Vec<_>>>()?;

        for row in 0..batch.num_rows() {
            let key = HouseholdKey::new(tracts[row].clone(), serials[row].clone());
            let mut record = match &person_indices {
                Some(indices) => MicrodataRecord::person(key, indices[row]),
                None => MicrodataRecord::household(key),
            };
            record = record.with_weight(weight_column, weights[row]);
            for (field, column) in fields.iter().zip(&values) {
                record = record.with_value(field, &column[row]);
            }
            records.push(record);
        }
    }

    let table = MicrodataTable::new(role, records);
    table.validate(registry)?;
    info!(
        "Loaded {} {role} records from {} in {:?}",
        table.len(),
        path.display(),
        start.elapsed()
    );
    Ok(table)
}

/// Write a microdata table with the given field and weight columns
pub fn write_microdata(
    path: &Path,
    table: &MicrodataTable,
    fields: &[String],
    weight_column: &str,
) -> Result<()> {
    let mut schema_fields = vec![
        Field::new(TRACT_COLUMN, DataType::Utf8, false),
        Field::new(SERIAL_COLUMN, DataType::Utf8, false),
    ];
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            table.records.iter().map(|r| r.key.tract.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            table.records.iter().map(|r| r.key.serial_number.as_str()),
        )),
    ];

    if table.role == FieldRole::Person {
        let indices = table
            .records
            .iter()
            .map(|r| {
                r.person_index.ok_or_else(|| {
                    SynthError::validation(format!("person record of {} has no index", r.key))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        schema_fields.push(Field::new(PERSON_INDEX_COLUMN, DataType::UInt32, false));
        columns.push(Arc::new(UInt32Array::from(indices)));
    }

    let weights = table
        .records
        .iter()
        .map(|r| r.weight(weight_column))
        .collect::<Result<Vec<_>>>()?;
    schema_fields.push(Field::new(weight_column, DataType::Float64, false));
    columns.push(Arc::new(Float64Array::from(weights)));

    for field in fields {
        let values = table
            .records
            .iter()
            .map(|r| r.require_value(field))
            .collect::<Result<Vec<_>>>()?;
        schema_fields.push(Field::new(field.as_str(), DataType::Utf8, false));
        columns.push(Arc::new(StringArray::from_iter_values(values)));
    }

    write_batch(path, Arc::new(Schema::new(schema_fields)), columns)
}
