//! One trained network per segment, with JSON persistence

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use super::cpt::{ConditionalTable, CptEstimator, LaplaceEstimator};
use super::network::BayesianNetwork;
use super::structure::GraphStructure;
use crate::algorithm::segmentation::{SegmentationSpec, SegmentedData};
use crate::config::TrainingConfig;
use crate::error::util::open_artifact;
use crate::error::{Result, SynthError};
use crate::registry::{FieldRegistry, FieldRole};

/// Trained networks for every segment of one role
///
/// Immutable once trained; retraining builds a new value.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedModel {
    role: FieldRole,
    fields: Vec<String>,
    segmentation: SegmentationSpec,
    segments: BTreeMap<String, BayesianNetwork>,
}

impl SegmentedModel {
    /// Train one network per segment
    ///
    /// The structure is validated once before any segment is fitted; a
    /// failure in any segment fails the model.
    pub fn train(
        data: &SegmentedData,
        structure: &GraphStructure,
        fields: &[String],
        registry: &FieldRegistry,
        estimator: &dyn CptEstimator,
    ) -> Result<Self> {
        if fields != data.fields.as_slice() {
            return Err(SynthError::validation(format!(
                "training data holds [{}] but the model expects [{}]",
                data.fields.join(", "),
                fields.join(", ")
            )));
        }
        structure.validate(fields)?;
        for field in fields {
            registry.require(field)?;
        }

        let segments = data
            .segments()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|segment| {
                BayesianNetwork::train(segment, fields, structure, registry, estimator)
                    .map(|network| (segment.key.clone(), network))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        info!(
            "Trained {} {} networks segmented by {}",
            segments.len(),
            data.role,
            data.segmentation
        );
        Ok(Self {
            role: data.role,
            fields: fields.to_vec(),
            segmentation: data.segmentation.clone(),
            segments,
        })
    }

    /// Train with additive smoothing as configured
    pub fn train_with_config(
        data: &SegmentedData,
        structure: &GraphStructure,
        fields: &[String],
        registry: &FieldRegistry,
        training: &TrainingConfig,
    ) -> Result<Self> {
        let estimator = LaplaceEstimator {
            pseudocount: training.pseudocount,
        };
        Self::train(data, structure, fields, registry, &estimator)
    }

    #[must_use]
    pub fn role(&self) -> FieldRole {
        self.role
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[must_use]
    pub fn segmentation(&self) -> &SegmentationSpec {
        &self.segmentation
    }

    /// Segment keys in order
    pub fn segment_keys(&self) -> impl Iterator<Item = &str> {
        self.segments.keys().map(String::as_str)
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BayesianNetwork> {
        self.segments.get(key)
    }

    /// Segment trained on the largest total weight
    #[must_use]
    pub fn heaviest_segment(&self) -> Option<&str> {
        self.segments
            .iter()
            .max_by(|a, b| a.1.training_weight().total_cmp(&b.1.training_weight()))
            .map(|(key, _)| key.as_str())
    }

    /// Network for `key`, falling back to the heaviest segment when `key` was never trained
    pub fn network_for(&self, key: &str) -> Result<(&str, &BayesianNetwork)> {
        if let Some((key, network)) = self.segments.get_key_value(key) {
            return Ok((key.as_str(), network));
        }
        let fallback = self.heaviest_segment().ok_or_else(|| {
            SynthError::validation(format!("{} model has no trained segments", self.role))
        })?;
        warn!(
            "No {} network for segment {key}, using segment {fallback}",
            self.role
        );
        Ok((fallback, &self.segments[fallback]))
    }

    /// Persist the model as JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), &ModelFile::from(self))?;
        info!("Wrote {} model to {}", self.role, path.display());
        Ok(())
    }

    /// Load and validate a model written by [`SegmentedModel::write`]
    pub fn read(path: &Path) -> Result<Self> {
        let file = open_artifact(path, "trained model")?;
        let display = path.display().to_string();
        let parsed: ModelFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SynthError::corrupt_model(&display, e.to_string()))?;
        parsed
            .into_model()
            .map_err(|e| SynthError::corrupt_model(&display, e.to_string()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ModelFile {
    role: FieldRole,
    fields: Vec<String>,
    segmentation: SegmentationSpec,
    segments: BTreeMap<String, NetworkFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NetworkFile {
    training_weight: f64,
    structure: GraphStructure,
    tables: Vec<TableFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    field: String,
    domain: Vec<String>,
    parents: Vec<String>,
    rows: Vec<RowFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RowFile {
    parents: Vec<String>,
    probabilities: Vec<f64>,
}

impl From<&SegmentedModel> for ModelFile {
    fn from(model: &SegmentedModel) -> Self {
        let segments = model
            .segments
            .iter()
            .map(|(key, network)| {
                let tables = network
                    .tables()
                    .iter()
                    .map(|table| TableFile {
                        field: table.field.clone(),
                        domain: table.domain.clone(),
                        parents: table.parents.clone(),
                        rows: table
                            .parent_combinations()
                            .into_iter()
                            .zip(table.rows())
                            .map(|(combo, probabilities)| RowFile {
                                parents: combo.into_iter().map(str::to_string).collect(),
                                probabilities: probabilities.clone(),
                            })
                            .collect(),
                    })
                    .collect();
                let file = NetworkFile {
                    training_weight: network.training_weight(),
                    structure: network.structure().clone(),
                    tables,
                };
                (key.clone(), file)
            })
            .collect();
        Self {
            role: model.role,
            fields: model.fields.clone(),
            segmentation: model.segmentation.clone(),
            segments,
        }
    }
}

impl ModelFile {
    fn into_model(self) -> Result<SegmentedModel> {
        let mut segments = BTreeMap::new();
        for (key, network) in self.segments {
            network.structure.validate(&self.fields)?;
            let nodes = network.structure.nodes();
            if let Some(missing) = self.fields.iter().find(|f| !nodes.contains(f.as_str())) {
                return Err(SynthError::validation(format!(
                    "segment {key} has no node for field {missing}"
                )));
            }
            let domains: BTreeMap<&str, &Vec<String>> = network
                .tables
                .iter()
                .map(|t| (t.field.as_str(), &t.domain))
                .collect();

            let mut tables = Vec::with_capacity(network.tables.len());
            for table in &network.tables {
                let parent_domains = table
                    .parents
                    .iter()
                    .map(|p| {
                        domains.get(p.as_str()).map(|d| (*d).clone()).ok_or_else(|| {
                            SynthError::validation(format!(
                                "table {} has parent {p} without a table",
                                table.field
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                let rows = dense_rows(table, &parent_domains)?;
                tables.push(ConditionalTable::new(
                    table.field.clone(),
                    table.domain.clone(),
                    table.parents.clone(),
                    parent_domains,
                    rows,
                )?);
            }
            let network =
                BayesianNetwork::from_tables(network.structure, tables, network.training_weight)
                    .map_err(|e| SynthError::validation(format!("segment {key}: {e}")))?;
            segments.insert(key, network);
        }
        Ok(SegmentedModel {
            role: self.role,
            fields: self.fields,
            segmentation: self.segmentation,
            segments,
        })
    }
}

/// Place each stored row at its mixed-radix index; every combination must appear once
fn dense_rows(table: &TableFile, parent_domains: &[Vec<String>]) -> Result<Vec<Vec<f64>>> {
    let row_count: usize = parent_domains.iter().map(Vec::len).product();
    let mut rows: Vec<Option<Vec<f64>>> = vec![None; row_count];
    for row in &table.rows {
        if row.parents.len() != parent_domains.len() {
            return Err(SynthError::validation(format!(
                "row of {} names {} parent values, expected {}",
                table.field,
                row.parents.len(),
                parent_domains.len()
            )));
        }
        let mut idx = 0;
        for (value, domain) in row.parents.iter().zip(parent_domains) {
            let position = domain.iter().position(|d| d == value).ok_or_else(|| {
                SynthError::validation(format!(
                    "row of {} uses unknown parent value {value}",
                    table.field
                ))
            })?;
            idx = idx * domain.len() + position;
        }
        if rows[idx].replace(row.probabilities.clone()).is_some() {
            return Err(SynthError::validation(format!(
                "table {} repeats parent combination [{}]",
                table.field,
                row.parents.join(", ")
            )));
        }
    }
    rows.into_iter()
        .enumerate()
        .map(|(idx, row)| {
            row.ok_or_else(|| {
                SynthError::validation(format!(
                    "table {} is missing parent combination #{idx}",
                    table.field
                ))
            })
        })
        .collect()
}
