//! Synthetic population generation
//!
//! Allocation counts decide how many replicas of each microdata household a
//! geography receives; trained networks resynthesize the attributes of every
//! replica and of each of its members.

pub mod generator;
pub mod statistics;

pub use generator::{
    GeneratedHousehold, GeneratedPerson, JoinedRecord, Population, PopulationGenerator,
    ReplicaKey, parse_count,
};
pub use statistics::PopulationStats;
