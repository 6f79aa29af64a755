//! Parquet adapters for microdata, marginals and generated output
//!
//! Files live in one data directory and are named after the state and PUMA
//! they belong to, see [`ArtifactPaths`].

pub mod marginals;
pub mod microdata;
pub mod population;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, Float64Array, StringArray, UInt32Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use log::debug;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::util::{ensure_directory, open_artifact};
use crate::error::{Result, SynthError};
use crate::registry::FieldRole;

/// Column holding the geography a household was allocated to
pub const GEOGRAPHY_COLUMN: &str = "geography_id";
/// Column holding the census tract of a household
pub const TRACT_COLUMN: &str = "tract";
/// Column holding the survey serial number of a household
pub const SERIAL_COLUMN: &str = "serial_number";
/// Column holding a person's position within the household
pub const PERSON_INDEX_COLUMN: &str = "person_index";
/// Column holding the replica number of a generated household
pub const REPEAT_INDEX_COLUMN: &str = "repeat_index";

/// File locations of one state/PUMA run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub directory: PathBuf,
    pub state: String,
    pub puma: String,
}

impl ArtifactPaths {
    pub fn new(directory: impl Into<PathBuf>, state: &str, puma: &str) -> Self {
        Self {
            directory: directory.into(),
            state: state.to_string(),
            puma: puma.to_string(),
        }
    }

    /// `state_{state}_puma_{puma}_{suffix}` inside the data directory
    #[must_use]
    pub fn file(&self, suffix: &str) -> PathBuf {
        self.directory
            .join(format!("state_{}_puma_{}_{suffix}", self.state, self.puma))
    }

    #[must_use]
    pub fn microdata(&self, role: FieldRole) -> PathBuf {
        match role {
            FieldRole::Person => self.file("person_pums.parquet"),
            FieldRole::Household => self.file("household_pums.parquet"),
        }
    }

    #[must_use]
    pub fn model(&self, role: FieldRole) -> PathBuf {
        match role {
            FieldRole::Person => self.file("person_model.json"),
            FieldRole::Household => self.file("household_model.json"),
        }
    }

    #[must_use]
    pub fn marginals(&self) -> PathBuf {
        self.file("marginals.parquet")
    }

    #[must_use]
    pub fn generated(&self, role: FieldRole) -> PathBuf {
        match role {
            FieldRole::Person => self.file("generated_persons.parquet"),
            FieldRole::Household => self.file("generated_households.parquet"),
        }
    }

    #[must_use]
    pub fn joined(&self) -> PathBuf {
        self.file("generated_joined.parquet")
    }
}

/// Read every record batch of a Parquet file
pub(crate) fn read_batches(path: &Path, purpose: &str) -> Result<Vec<RecordBatch>> {
    let file = open_artifact(path, purpose)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    debug!(
        "Read {} rows from {}",
        batches.iter().map(RecordBatch::num_rows).sum::<usize>(),
        path.display()
    );
    Ok(batches)
}

/// Write one batch to a Snappy compressed Parquet file
pub(crate) fn write_batch(path: &Path, schema: Arc<Schema>, columns: Vec<ArrayRef>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }
    let batch = RecordBatch::try_new(schema.clone(), columns)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    debug!("Wrote {} rows to {}", batch.num_rows(), path.display());
    Ok(())
}

/// Look up a column and cast it to the wanted type
fn column_as(batch: &RecordBatch, name: &str, data_type: &DataType) -> Result<ArrayRef> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| SynthError::UnknownField(name.to_string()))?;
    let column = batch.column(idx);
    if column.data_type() == data_type {
        Ok(column.clone())
    } else {
        Ok(cast(column, data_type)?)
    }
}

fn missing(name: &str, row: usize) -> SynthError {
    SynthError::validation(format!("column {name} is null in row {row}"))
}

/// Non-null string values of a column, numeric columns are rendered as text
pub(crate) fn string_column(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    let array = column_as(batch, name, &DataType::Utf8)?;
    let strings = array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| SynthError::validation(format!("column {name} is not text")))?;
    (0..strings.len())
        .map(|row| {
            if strings.is_null(row) {
                Err(missing(name, row))
            } else {
                Ok(strings.value(row).to_string())
            }
        })
        .collect()
}

pub(crate) fn float_column(batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let array = column_as(batch, name, &DataType::Float64)?;
    let floats = array
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| SynthError::validation(format!("column {name} is not numeric")))?;
    (0..floats.len())
        .map(|row| {
            if floats.is_null(row) {
                Err(missing(name, row))
            } else {
                Ok(floats.value(row))
            }
        })
        .collect()
}

pub(crate) fn index_column(batch: &RecordBatch, name: &str) -> Result<Vec<u32>> {
    let array = column_as(batch, name, &DataType::UInt32)?;
    let indices = array
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| SynthError::validation(format!("column {name} is not an index")))?;
    (0..indices.len())
        .map(|row| {
            if indices.is_null(row) {
                Err(missing(name, row))
            } else {
                Ok(indices.value(row))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_naming() {
        let paths = ArtifactPaths::new("/data", "06", "00101");
        assert_eq!(
            paths.model(FieldRole::Person),
            PathBuf::from("/data/state_06_puma_00101_person_model.json")
        );
        assert_eq!(
            paths.marginals(),
            PathBuf::from("/data/state_06_puma_00101_marginals.parquet")
        );
    }
}
