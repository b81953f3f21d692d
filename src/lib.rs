// lib.rs - strkin library root

//! # strkin - STR kinship-index database scanning and score distributions
//!
//! This library compares short tandem repeat (STR) profiles pairwise through
//! per-locus lookup tables and computes the distribution of the aggregated
//! score under a relationship hypothesis.
//!
//! ## Features
//!
//! - **Lookup tables**: kinship index (Balding–Nichols θ correction), identity and shared-allele tables
//! - **Scans**: full database, threshold hits with early abandonment, target-vs-database, match tallies
//! - **Sharding**: deterministic split of the pair space over independent jobs
//! - **Distributions**: exact convolution with truncation, normal, saddlepoint and binned approximations
//! - **Match probability**: NRC II 4.1 (θ-corrected) and Balding–Nichols conditional models
//! - **Caching**: LZ4-compressed table cache with parameter and frequency checks
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use strkin::prelude::*;
//! use strkin::data::loaders::{align_frequencies, load_database, load_frequencies};
//!
//! let db = load_database(std::path::Path::new("database.tsv"))?;
//! let freqs = load_frequencies(std::path::Path::new("frequencies.tsv"))?;
//! let freqs = align_frequencies(&freqs, db.locus_names())?;
//!
//! // Full-sibling kinship index tables with theta = 0.01
//! let params = KinshipParams::from_relationship(Relationship::FullSiblings, 0.01)
//!     .map_err(|e| e.to_string())?;
//! let tables = LocusTables::kinship(&freqs, &params, false).map_err(|e| e.to_string())?;
//!
//! // Pairs with a kinship index of at least 1000
//! let engine = ScanEngine::new(ScanOptions::sequential().with_progress(true));
//! let hits = engine.hits(&tables, &db, 1000.0).map_err(|e| e.to_string())?;
//! println!("{} candidate pairs", hits.result.len());
//! # Ok::<(), String>(())
//! ```

// Re-export all main modules
pub mod cache;
pub mod cli;
pub mod core;
pub mod data;
pub mod error;
pub mod output;

// Convenience prelude for common imports
pub mod prelude {
    pub use crate::cache::TableCache;
    pub use crate::cli::{validate_args, Args, ValidationResult};
    pub use crate::core::{random_match_probability, MatchProbabilities, RmpModel};
    pub use crate::core::{Aggregate, LocusTable, LocusTables};
    pub use crate::core::{
        ApproxMethod, CumulativeDistribution, Distribution, ExactOptions, Truncation,
    };
    pub use crate::core::{Genotype, KinshipParams, Relationship};
    pub use crate::core::{Hit, MatchTally, PairValues, ScanEngine, ScanOptions, ShardPlan};
    pub use crate::data::{AlleleFrequencyTable, Database, LocusFrequencies};
    pub use crate::error::KinError;
}

// Re-export main types at the root level for convenience
pub use cli::{Args, ValidationResult};
pub use core::{KinshipParams, LocusTables, ScanEngine};
pub use data::{AlleleFrequencyTable, Database};
pub use error::KinError;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn get_info() -> String {
    format!(
        "strkin v{} - STR kinship-index database scanner",
        VERSION
    )
}
