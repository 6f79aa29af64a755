//! In-memory data model consumed by the synthesis core
//!
//! Loaders (see [`crate::io`]) produce these tables; the core only reads them.

pub mod marginals;
pub mod microdata;

pub use marginals::{
    CategoryMatcher, ControlCategory, GeographyMarginals, MarginalControl, Marginals,
};
pub use microdata::{HouseholdKey, MicrodataRecord, MicrodataTable};
