//! Field registry for discretized demographic fields
//!
//! The registry is an explicit, immutable catalogue: every component that
//! needs field metadata receives a `&FieldRegistry` and validates names and
//! values against it at its boundary. Values are always already discretized
//! (binned) by the time they reach this crate.

pub mod field_definitions;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Result, SynthError};

pub use field_definitions::PumsFields;

/// Which table a field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldRole {
    Person,
    Household,
}

impl fmt::Display for FieldRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Person => write!(f, "person"),
            Self::Household => write!(f, "household"),
        }
    }
}

/// A declared field with its discrete domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Column name as it appears in microdata
    pub name: String,
    /// Human readable description
    #[serde(default)]
    pub description: String,
    /// Person or household field
    pub role: FieldRole,
    /// Ordered discrete values the field may take
    pub domain: Vec<String>,
}

impl FieldDefinition {
    /// Create a new field definition
    pub fn new(name: &str, description: &str, role: FieldRole, domain: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            role,
            domain: domain.iter().map(|v| (*v).to_string()).collect(),
        }
    }

    /// Position of `value` within the domain
    #[must_use]
    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.domain.iter().position(|v| v == value)
    }

    /// Number of values in the domain
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.domain.len()
    }
}

/// Immutable catalogue of declared fields
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldDefinition>", into = "Vec<FieldDefinition>")]
pub struct FieldRegistry {
    fields: Vec<FieldDefinition>,
    by_name: FxHashMap<String, usize>,
}

impl FieldRegistry {
    /// Build a registry, rejecting duplicate names and empty domains
    pub fn new(fields: Vec<FieldDefinition>) -> Result<Self> {
        let mut by_name = FxHashMap::default();
        for (idx, field) in fields.iter().enumerate() {
            if field.domain.is_empty() {
                return Err(SynthError::validation(format!(
                    "field {} declares an empty domain",
                    field.name
                )));
            }
            if by_name.insert(field.name.clone(), idx).is_some() {
                return Err(SynthError::validation(format!(
                    "field {} declared twice",
                    field.name
                )));
            }
            let mut seen = field.domain.clone();
            seen.sort_unstable();
            seen.dedup();
            if seen.len() != field.domain.len() {
                return Err(SynthError::validation(format!(
                    "field {} repeats a domain value",
                    field.name
                )));
            }
        }
        Ok(Self { fields, by_name })
    }

    /// The standard PUMS catalogue
    #[must_use]
    pub fn standard() -> Self {
        Self::new(PumsFields::all()).expect("standard field catalogue is well formed")
    }

    /// Look up a field by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldDefinition> {
        self.by_name.get(name).map(|&idx| &self.fields[idx])
    }

    /// Look up a field by name, failing with `UnknownField`
    pub fn require(&self, name: &str) -> Result<&FieldDefinition> {
        self.get(name)
            .ok_or_else(|| SynthError::UnknownField(name.to_string()))
    }

    /// Check that `value` belongs to the domain of `name` and return its index
    pub fn validate_value(&self, name: &str, value: &str) -> Result<usize> {
        let field = self.require(name)?;
        field.index_of(value).ok_or_else(|| {
            SynthError::validation(format!(
                "value {value:?} is outside the domain of {name} ({})",
                field.domain.join(", ")
            ))
        })
    }

    /// Whether the registry declares `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Fields declared for one role, in declaration order
    pub fn fields_for_role(&self, role: FieldRole) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(move |f| f.role == role)
    }

    /// All fields in declaration order
    #[must_use]
    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }
}

impl Default for FieldRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<Vec<FieldDefinition>> for FieldRegistry {
    type Error = SynthError;

    fn try_from(fields: Vec<FieldDefinition>) -> Result<Self> {
        Self::new(fields)
    }
}

impl From<FieldRegistry> for Vec<FieldDefinition> {
    fn from(registry: FieldRegistry) -> Self {
        registry.fields
    }
}
