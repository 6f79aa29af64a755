//! Marginal control files
//!
//! Columns: `geography_id`, `category_key`, `target_count`.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use log::info;

use super::{GEOGRAPHY_COLUMN, float_column, read_batches, string_column, write_batch};
use crate::data::{MarginalControl, Marginals};
use crate::error::Result;

pub const CATEGORY_COLUMN: &str = "category_key";
pub const TARGET_COLUMN: &str = "target_count";

pub fn read_marginals(path: &Path) -> Result<Marginals> {
    let mut controls = Vec::new();
    for batch in read_batches(path, "marginal controls")? {
        let geographies = string_column(&batch, GEOGRAPHY_COLUMN)?;
        let categories = string_column(&batch, CATEGORY_COLUMN)?;
        let targets = float_column(&batch, TARGET_COLUMN)?;
        controls.extend(
            geographies
                .iter()
                .zip(&categories)
                .zip(&targets)
                .map(|((geo, key), &target)| MarginalControl::new(geo, key, target)),
        );
    }
    Marginals::new(controls)
}

pub fn write_marginals(path: &Path, marginals: &Marginals) -> Result<()> {
    let controls = marginals.controls();
    let schema = Arc::new(Schema::new(vec![
        Field::new(GEOGRAPHY_COLUMN, DataType::Utf8, false),
        Field::new(CATEGORY_COLUMN, DataType::Utf8, false),
        Field::new(TARGET_COLUMN, DataType::Float64, false),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            controls.iter().map(|c| c.geography_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            controls.iter().map(|c| c.category_key.as_str()),
        )),
        Arc::new(Float64Array::from_iter_values(
            controls.iter().map(|c| c.target_count),
        )),
    ];
    write_batch(path, schema, columns)
}

/// Read marginals from `path`, or obtain them from `fetch` and persist them
///
/// The file is probed for existence only; `fetch` runs when it is absent.
pub fn load_or_fetch<F>(path: &Path, fetch: F) -> Result<Marginals>
where
    F: FnOnce() -> Result<Marginals>,
{
    if path.is_file() {
        info!("Loading marginals from {}", path.display());
        return read_marginals(path);
    }
    info!("No marginals at {}, fetching", path.display());
    let marginals = fetch()?;
    write_marginals(path, &marginals)?;
    Ok(marginals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn sample() -> Marginals {
        Marginals::new(vec![
            MarginalControl::new("g1", "num_people_1", 10.0),
            MarginalControl::new("g1", "age_18-34", 14.5),
            MarginalControl::new("g2", "num_people_1", 3.0),
        ])
        .unwrap()
    }

    #[test]
    fn test_fetch_runs_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marginals.parquet");
        let calls = Cell::new(0);
        let fetch = || {
            calls.set(calls.get() + 1);
            Ok(sample())
        };

        let first = load_or_fetch(&path, fetch).unwrap();
        let second = load_or_fetch(&path, fetch).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(first.len(), 3);
        assert_eq!(second.controls(), first.controls());
        assert_eq!(
            second.for_geography("g1").unwrap().targets["age_18-34"],
            14.5
        );
    }

    #[test]
    fn test_fetch_error_propagates() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marginals.parquet");
        let result = load_or_fetch(&path, || {
            Err(crate::error::SynthError::validation("census api unavailable"))
        });
        assert!(result.is_err());
        assert!(!path.exists());
    }
}
