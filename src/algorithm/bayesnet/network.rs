//! Discrete Bayesian network for a single segment

use log::debug;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeMap;

use super::cpt::{ConditionalTable, CptEstimator, ParentIndices};
use super::structure::GraphStructure;
use crate::algorithm::segmentation::Segment;
use crate::error::{Result, SynthError};
use crate::registry::FieldRegistry;

/// Field values fixed before sampling
pub type Evidence = BTreeMap<String, String>;

/// One sampled record, field name to value
pub type SyntheticRecord = BTreeMap<String, String>;

/// Trained network: a structure plus one table per field
///
/// Tables are kept in topological order, which is computed once at
/// construction and reused by every draw.
#[derive(Debug, Clone)]
pub struct BayesianNetwork {
    structure: GraphStructure,
    tables: Vec<ConditionalTable>,
    /// Position in `tables` of each table's parents
    parent_slots: Vec<SmallVec<[usize; 4]>>,
    /// One sampler per table row
    samplers: Vec<Vec<WeightedIndex<f64>>>,
    training_weight: f64,
}

impl PartialEq for BayesianNetwork {
    fn eq(&self, other: &Self) -> bool {
        self.structure == other.structure
            && self.tables == other.tables
            && self.training_weight == other.training_weight
    }
}

impl BayesianNetwork {
    /// Fit one table per field from the weighted rows of a segment
    ///
    /// `fields` gives the column order of `segment.rows`. Fields absent from
    /// `structure` are modelled as roots.
    pub fn train(
        segment: &Segment,
        fields: &[String],
        structure: &GraphStructure,
        registry: &FieldRegistry,
        estimator: &dyn CptEstimator,
    ) -> Result<Self> {
        structure.validate(fields)?;
        let structure = structure.completed(fields);
        let order = structure.topological_order()?;
        let column: FxHashMap<&str, usize> = fields
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();

        let mut tables = Vec::with_capacity(order.len());
        for field in &order {
            let definition = registry.require(field)?;
            let parents = structure.parents_of(field).to_vec();
            let parent_definitions = parents
                .iter()
                .map(|p| registry.require(p))
                .collect::<Result<Vec<_>>>()?;
            let row_count: usize = parent_definitions.iter().map(|d| d.cardinality()).product();
            let mut counts = vec![vec![0.0; definition.cardinality()]; row_count];

            for (row, weight) in segment.rows.iter().zip(&segment.weights) {
                let value = &row[column[field.as_str()]];
                let value_idx = definition.index_of(value).ok_or_else(|| {
                    SynthError::validation(format!("{field}={value} is outside its domain"))
                })?;
                let mut row_idx = 0;
                for (parent, parent_def) in parents.iter().zip(&parent_definitions) {
                    let parent_value = &row[column[parent.as_str()]];
                    let parent_idx = parent_def.index_of(parent_value).ok_or_else(|| {
                        SynthError::validation(format!(
                            "{parent}={parent_value} is outside its domain"
                        ))
                    })?;
                    row_idx = row_idx * parent_def.cardinality() + parent_idx;
                }
                counts[row_idx][value_idx] += weight;
            }

            let rows = estimator.fit(&counts)?;
            tables.push(ConditionalTable::new(
                field.clone(),
                definition.domain.clone(),
                parents,
                parent_definitions.iter().map(|d| d.domain.clone()).collect(),
                rows,
            )?);
        }

        debug!(
            "Trained network for segment {} over {} fields",
            segment.key,
            tables.len()
        );
        Self::from_tables(structure, tables, segment.total_weight())
    }

    /// Assemble a network from already fitted tables
    ///
    /// Every node of `structure` needs exactly one table whose parents match
    /// the structure and whose parent domains match the parents' own tables.
    pub fn from_tables(
        structure: GraphStructure,
        tables: Vec<ConditionalTable>,
        training_weight: f64,
    ) -> Result<Self> {
        let order = structure.topological_order()?;
        let mut by_field: FxHashMap<String, ConditionalTable> = FxHashMap::default();
        for table in tables {
            let field = table.field.clone();
            if by_field.insert(field.clone(), table).is_some() {
                return Err(SynthError::validation(format!("two tables for field {field}")));
            }
        }
        if by_field.len() != order.len() {
            return Err(SynthError::validation(format!(
                "{} tables for {} structure nodes",
                by_field.len(),
                order.len()
            )));
        }

        let mut ordered: Vec<ConditionalTable> = Vec::with_capacity(order.len());
        let mut slot_of: FxHashMap<&str, usize> = FxHashMap::default();
        let mut parent_slots = Vec::with_capacity(order.len());
        for (slot, field) in order.iter().enumerate() {
            let table = by_field
                .remove(field)
                .ok_or_else(|| SynthError::UnknownField(field.clone()))?;
            if table.parents != structure.parents_of(field) {
                return Err(SynthError::validation(format!(
                    "table {field} is indexed by [{}] but the structure declares [{}]",
                    table.parents.join(", "),
                    structure.parents_of(field).join(", ")
                )));
            }
            let mut slots = SmallVec::new();
            for (parent, domain) in table.parents.iter().zip(&table.parent_domains) {
                let parent_slot = slot_of[parent.as_str()];
                if &ordered[parent_slot].domain != domain {
                    return Err(SynthError::validation(format!(
                        "table {field} disagrees with table {parent} on the domain of {parent}"
                    )));
                }
                slots.push(parent_slot);
            }
            parent_slots.push(slots);
            slot_of.insert(field.as_str(), slot);
            ordered.push(table);
        }

        let samplers = ordered
            .iter()
            .map(|table| {
                table
                    .rows()
                    .iter()
                    .map(|row| {
                        WeightedIndex::new(row).map_err(|e| {
                            SynthError::validation(format!(
                                "cannot sample from a row of {}: {e}",
                                table.field
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            structure,
            tables: ordered,
            parent_slots,
            samplers,
            training_weight,
        })
    }

    #[must_use]
    pub fn structure(&self) -> &GraphStructure {
        &self.structure
    }

    /// Tables in topological order
    #[must_use]
    pub fn tables(&self) -> &[ConditionalTable] {
        &self.tables
    }

    #[must_use]
    pub fn table(&self, field: &str) -> Option<&ConditionalTable> {
        self.tables.iter().find(|t| t.field == field)
    }

    /// Field names in sampling order
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().map(|t| t.field.as_str())
    }

    /// Total weight of the rows the network was trained on
    #[must_use]
    pub fn training_weight(&self) -> f64 {
        self.training_weight
    }

    /// Lazily draw `n` records with a generator seeded from `seed`
    ///
    /// The same seed always yields the same sequence; a fresh seed restarts
    /// an independent one.
    pub fn generate(&self, n: usize, evidence: &Evidence, seed: u64) -> Result<Samples<'_>> {
        Ok(Samples {
            network: self,
            pinned: self.resolve_evidence(evidence)?,
            rng: StdRng::seed_from_u64(seed),
            remaining: n,
        })
    }

    /// Draw a single record using a caller-owned generator
    pub fn sample_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        evidence: &Evidence,
    ) -> Result<SyntheticRecord> {
        let pinned = self.resolve_evidence(evidence)?;
        Ok(self.to_record(&self.draw(rng, &pinned)))
    }

    fn resolve_evidence(&self, evidence: &Evidence) -> Result<Vec<Option<usize>>> {
        let mut pinned = vec![None; self.tables.len()];
        for (field, value) in evidence {
            let slot = self
                .tables
                .iter()
                .position(|t| &t.field == field)
                .ok_or_else(|| SynthError::UnsupportedEvidence {
                    field: field.clone(),
                    value: value.clone(),
                    reason: "field is not modelled by this network".to_string(),
                })?;
            let value_idx = self.tables[slot]
                .domain
                .iter()
                .position(|v| v == value)
                .ok_or_else(|| SynthError::UnsupportedEvidence {
                    field: field.clone(),
                    value: value.clone(),
                    reason: format!("allowed values are {}", self.tables[slot].domain.join(", ")),
                })?;
            pinned[slot] = Some(value_idx);
        }
        Ok(pinned)
    }

    /// Ancestral sampling: parents are always drawn or pinned before children
    fn draw<R: Rng + ?Sized>(&self, rng: &mut R, pinned: &[Option<usize>]) -> Vec<usize> {
        let mut values = Vec::with_capacity(self.tables.len());
        for (slot, table) in self.tables.iter().enumerate() {
            let value = match pinned[slot] {
                Some(value) => value,
                None => {
                    let parent_indices: ParentIndices =
                        self.parent_slots[slot].iter().map(|&p| values[p]).collect();
                    self.samplers[slot][table.row_index(&parent_indices)].sample(rng)
                }
            };
            values.push(value);
        }
        values
    }

    fn to_record(&self, values: &[usize]) -> SyntheticRecord {
        self.tables
            .iter()
            .zip(values)
            .map(|(table, &idx)| (table.field.clone(), table.domain[idx].clone()))
            .collect()
    }
}

/// Lazy, seeded sequence of sampled records
#[derive(Debug)]
pub struct Samples<'a> {
    network: &'a BayesianNetwork,
    pinned: Vec<Option<usize>>,
    rng: StdRng,
    remaining: usize,
}

impl Iterator for Samples<'_> {
    type Item = SyntheticRecord;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let values = self.network.draw(&mut self.rng, &self.pinned);
        Some(self.network.to_record(&values))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Samples<'_> {}
