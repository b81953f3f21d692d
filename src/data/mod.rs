// mod.rs - Profile databases, frequency tables and their loaders

pub mod frequencies;
pub mod loaders;
pub mod profile;

pub use frequencies::{AlleleFrequencyTable, LocusFrequencies};
pub use profile::{Database, Profile};
