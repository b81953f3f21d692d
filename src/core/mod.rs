// mod.rs - Core logic module

pub mod distribution;
pub mod genotype;
pub mod kinship;
pub mod progress;
pub mod rmp;
pub mod scan;
pub mod shard;
pub mod table;

// Re-export main types for convenience
pub use distribution::{
    ApproxMethod, CumulativeDistribution, Distribution, ExactOptions, Truncation,
};
pub use genotype::{Allele, Genotype};
pub use kinship::{KinshipParams, Relationship};
pub use progress::ScanOptions;
pub use rmp::{random_match_probability, MatchProbabilities, RmpModel};
pub use scan::{
    CrossMatrix, CrossResult, CrossSelection, Hit, MatchHit, MatchTally, PairValues, ScanEngine,
    ScanOutcome,
};
pub use shard::ShardPlan;
pub use table::{Aggregate, LocusTable, LocusTables, TableKind};
