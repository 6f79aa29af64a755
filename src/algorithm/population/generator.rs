//! Replication of allocated households into synthetic records

use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::algorithm::allocation::{AllocationResult, SampleAllocation};
use crate::algorithm::bayesnet::{Evidence, SegmentedModel, SyntheticRecord};
use crate::algorithm::segmentation::SegmentationStrategy;
use crate::config::GenerationConfig;
use crate::data::{HouseholdKey, MicrodataRecord, MicrodataTable};
use crate::error::{Result, SynthError};
use crate::registry::{FieldRegistry, FieldRole};

/// Join key of generated households and persons
///
/// `tract` and `serial_number` are carried over from the source sample;
/// `geography_id` keeps replicas of one sample allocated to several
/// geographies apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReplicaKey {
    pub geography_id: String,
    pub tract: String,
    pub serial_number: String,
    pub repeat_index: u64,
}

impl ReplicaKey {
    fn new(geography_id: &str, source: &HouseholdKey, repeat_index: u64) -> Self {
        Self {
            geography_id: geography_id.to_string(),
            tract: source.tract.clone(),
            serial_number: source.serial_number.clone(),
            repeat_index,
        }
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}#{}",
            self.geography_id, self.tract, self.serial_number, self.repeat_index
        )
    }
}

/// A synthesized household replica
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedHousehold {
    pub key: ReplicaKey,
    pub attributes: SyntheticRecord,
}

/// A synthesized member of a household replica
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedPerson {
    pub key: ReplicaKey,
    pub person_index: u32,
    pub attributes: SyntheticRecord,
}

/// A person row with its household's attributes merged in
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedRecord {
    pub key: ReplicaKey,
    pub person_index: u32,
    pub attributes: SyntheticRecord,
}

/// Parse a household size bin such as `"3"` or the open-ended `"4+"`
pub fn parse_count(value: &str) -> Result<usize> {
    value
        .trim()
        .trim_end_matches('+')
        .parse()
        .map_err(|_| SynthError::validation(format!("{value:?} is not a household size")))
}

/// Generator of one role pair of trained models
#[derive(Debug)]
pub struct PopulationGenerator<'a> {
    config: &'a GenerationConfig,
    household_model: &'a SegmentedModel,
    person_model: &'a SegmentedModel,
    household_strategy: SegmentationStrategy,
    person_strategy: SegmentationStrategy,
}

impl<'a> PopulationGenerator<'a> {
    /// Use the segmentations recorded in the models themselves
    pub fn new(
        registry: &FieldRegistry,
        config: &'a GenerationConfig,
        household_model: &'a SegmentedModel,
        person_model: &'a SegmentedModel,
    ) -> Result<Self> {
        let household_strategy = household_model.segmentation().to_strategy(registry)?;
        let person_strategy = person_model.segmentation().to_strategy(registry)?;
        Self::with_strategies(
            config,
            household_model,
            person_model,
            household_strategy,
            person_strategy,
        )
    }

    /// Use caller supplied segmentations, e.g. custom predicates
    pub fn with_strategies(
        config: &'a GenerationConfig,
        household_model: &'a SegmentedModel,
        person_model: &'a SegmentedModel,
        household_strategy: SegmentationStrategy,
        person_strategy: SegmentationStrategy,
    ) -> Result<Self> {
        if household_model.role() != FieldRole::Household
            || person_model.role() != FieldRole::Person
        {
            return Err(SynthError::validation(
                "generation needs a household model and a person model",
            ));
        }
        if household_strategy.spec() != *household_model.segmentation()
            || person_strategy.spec() != *person_model.segmentation()
        {
            return Err(SynthError::validation(
                "segmentation does not match the one the models were trained with",
            ));
        }
        if !household_model
            .fields()
            .iter()
            .any(|f| *f == config.num_people_field)
        {
            return Err(SynthError::UnknownField(config.num_people_field.clone()));
        }
        Ok(Self {
            config,
            household_model,
            person_model,
            household_strategy,
            person_strategy,
        })
    }

    /// Replicate every allocated sample `count` times
    ///
    /// Each sample draws from its own generator seeded by the base seed and
    /// the sample's position, so the output does not depend on scheduling.
    pub fn generate(
        &self,
        allocation: &AllocationResult,
        households: &MicrodataTable,
        persons: &MicrodataTable,
    ) -> Result<Population> {
        let sources: FxHashMap<&HouseholdKey, &MicrodataRecord> =
            households.records.iter().map(|h| (&h.key, h)).collect();
        let members = persons.by_household();

        let parts = allocation
            .allocations
            .par_iter()
            .enumerate()
            .filter(|(_, a)| a.count > 0)
            .map(|(idx, allocated)| {
                let source = sources.get(&allocated.key).ok_or_else(|| {
                    SynthError::validation(format!(
                        "allocated household {} is missing from the microdata",
                        allocated.key
                    ))
                })?;
                let source_members = members
                    .get(&allocated.key)
                    .map_or(&[][..], Vec::as_slice);
                self.replicate(idx, &allocation.geography_id, allocated, source, source_members)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut population = Population::default();
        for (households, persons) in parts {
            population.households.extend(households);
            population.persons.extend(persons);
        }
        info!(
            "Generated {} households and {} persons for {}",
            population.households.len(),
            population.persons.len(),
            allocation.geography_id
        );
        Ok(population)
    }

    fn replicate(
        &self,
        sample_idx: usize,
        geography_id: &str,
        allocated: &SampleAllocation,
        source: &MicrodataRecord,
        source_members: &[&MicrodataRecord],
    ) -> Result<(Vec<GeneratedHousehold>, Vec<GeneratedPerson>)> {
        let household_segment = self.household_strategy.segment_of(source)?;
        let (_, household_network) = self.household_model.network_for(&household_segment)?;
        let mut household_evidence: Evidence = self.config.household_evidence.clone();
        if self.config.pin_household_segment {
            if let Some((field, value)) = self.household_strategy.evidence_for(&household_segment) {
                if household_network.table(&field).is_some() {
                    household_evidence.entry(field).or_insert(value);
                }
            }
        }

        let mut member_segments = source_members
            .iter()
            .map(|m| self.person_strategy.segment_of(m))
            .collect::<Result<Vec<_>>>()?;
        if member_segments.is_empty() {
            let fallback = self.person_model.heaviest_segment().ok_or_else(|| {
                SynthError::validation("person model has no trained segments")
            })?;
            member_segments.push(fallback.to_string());
        }

        let mut rng = StdRng::seed_from_u64(replica_seed(self.config.seed, sample_idx));
        let mut households = Vec::new();
        let mut persons = Vec::new();
        for repeat_index in 0..allocated.count {
            let key = ReplicaKey::new(geography_id, &allocated.key, repeat_index);
            let attributes = household_network.sample_with(&mut rng, &household_evidence)?;
            let size = attributes
                .get(&self.config.num_people_field)
                .ok_or_else(|| SynthError::UnknownField(self.config.num_people_field.clone()))
                .and_then(|v| parse_count(v))?;

            for person_index in 0..size {
                let wanted = &member_segments[person_index % member_segments.len()];
                let (segment, network) = self.person_model.network_for(wanted)?;
                let mut evidence = Evidence::new();
                if self.config.pin_person_segment {
                    if let Some((field, value)) = self.person_strategy.evidence_for(segment) {
                        if network.table(&field).is_some() {
                            evidence.insert(field, value);
                        }
                    }
                }
                persons.push(GeneratedPerson {
                    key: key.clone(),
                    person_index: u32::try_from(person_index).map_err(|_| {
                        SynthError::validation(format!("household {key} is too large"))
                    })?,
                    attributes: network.sample_with(&mut rng, &evidence)?,
                });
            }
            households.push(GeneratedHousehold { key, attributes });
        }
        Ok((households, persons))
    }
}

fn replica_seed(seed: u64, sample_idx: usize) -> u64 {
    seed.wrapping_add((sample_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Generated household and person tables of one geography
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Population {
    pub households: Vec<GeneratedHousehold>,
    pub persons: Vec<GeneratedPerson>,
}

impl Population {
    /// Generate with the segmentations recorded in the models
    pub fn generate(
        allocation: &AllocationResult,
        households: &MicrodataTable,
        persons: &MicrodataTable,
        person_model: &SegmentedModel,
        household_model: &SegmentedModel,
        registry: &FieldRegistry,
        config: &GenerationConfig,
    ) -> Result<Self> {
        PopulationGenerator::new(registry, config, household_model, person_model)?
            .generate(allocation, households, persons)
    }

    /// Check that persons and households join exactly
    ///
    /// Every household key is unique, every person belongs to a generated
    /// household, and each household has exactly as many persons as its
    /// `num_people_field` says.
    pub fn validate_join(&self, num_people_field: &str) -> Result<()> {
        let mut sizes: FxHashMap<&ReplicaKey, usize> = FxHashMap::default();
        for household in &self.households {
            let size = household
                .attributes
                .get(num_people_field)
                .ok_or_else(|| SynthError::UnknownField(num_people_field.to_string()))
                .and_then(|v| parse_count(v))?;
            if sizes.insert(&household.key, size).is_some() {
                return Err(SynthError::validation(format!(
                    "household {} generated twice",
                    household.key
                )));
            }
        }

        let mut seen: FxHashMap<&ReplicaKey, usize> = FxHashMap::default();
        let mut indices: FxHashSet<(&ReplicaKey, u32)> = FxHashSet::default();
        for person in &self.persons {
            if !sizes.contains_key(&person.key) {
                return Err(SynthError::validation(format!(
                    "person {} of {} has no household",
                    person.person_index, person.key
                )));
            }
            if !indices.insert((&person.key, person.person_index)) {
                return Err(SynthError::validation(format!(
                    "person {} of {} generated twice",
                    person.person_index, person.key
                )));
            }
            *seen.entry(&person.key).or_default() += 1;
        }

        for (key, size) in sizes {
            let found = seen.get(key).copied().unwrap_or(0);
            if found != size {
                return Err(SynthError::validation(format!(
                    "household {key} declares {size} people but has {found}"
                )));
            }
        }
        Ok(())
    }

    /// Persons with their household's attributes, joined on the replica key
    #[must_use]
    pub fn joined(&self) -> Vec<JoinedRecord> {
        let households: FxHashMap<&ReplicaKey, &GeneratedHousehold> =
            self.households.iter().map(|h| (&h.key, h)).collect();
        self.persons
            .iter()
            .filter_map(|person| {
                households.get(&person.key).map(|household| {
                    let mut attributes = household.attributes.clone();
                    attributes.extend(person.attributes.clone());
                    JoinedRecord {
                        key: person.key.clone(),
                        person_index: person.person_index,
                        attributes,
                    }
                })
            })
            .collect()
    }

    /// Append another geography's tables
    pub fn extend(&mut self, other: Self) {
        self.households.extend(other.households);
        self.persons.extend(other.persons);
    }
}
