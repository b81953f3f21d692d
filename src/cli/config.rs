// config.rs - Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    // Input/Output
    pub task: Option<String>,
    pub database: Option<String>,
    pub targets: Option<String>,
    pub frequencies: Option<String>,
    pub output: Option<String>,
    pub format: Option<String>,

    // Statistic
    pub statistic: Option<String>,
    pub relationship: Option<String>,
    pub k0: Option<f64>,
    pub k1: Option<f64>,
    pub k2: Option<f64>,
    pub theta: Option<f64>,

    // Scans
    pub threshold: Option<f64>,
    pub min_matches: Option<usize>,
    pub njobs: Option<i64>,
    pub job: Option<i64>,
    pub pairs: Option<String>,
    pub aligned: Option<bool>,
    pub by_locus: Option<bool>,

    // Match probability
    pub model: Option<String>,
    pub per_locus: Option<bool>,

    // Distribution
    pub hypothesis: Option<String>,
    pub method: Option<String>,
    pub quantiles: Option<String>,
    pub tail_at: Option<String>,
    pub alphas: Option<String>,
    pub pr0: Option<f64>,
    pub prinf: Option<f64>,
    pub support_limit: Option<usize>,
    pub copies: Option<u64>,
    pub save_distribution: Option<String>,

    // Sample filtering
    pub include_samples: Option<String>,
    pub exclude_samples: Option<String>,
    pub include_samples_list: Option<String>,
    pub exclude_samples_list: Option<String>,

    // Performance
    pub threads: Option<usize>,
    pub parallel: Option<bool>,
    pub progress: Option<bool>,
    pub cache_file: Option<String>,
    pub cache_note: Option<String>,

    // Flags
    pub force_recompute: Option<bool>,
    pub dry_run: Option<bool>,
}

impl Config {
    /// Create a new empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| format!("Failed to parse config file '{}': {}", path.display(), e))?;

        println!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .map_err(|e| format!("Failed to write config file '{}': {}", path.display(), e))?;

        println!("📄 Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Generate a sample configuration file with comments
    pub fn generate_sample() -> String {
        r#"# strkin.toml - Configuration file for strkin
# Command line arguments will override these settings

# =============================================================================
# INPUT/OUTPUT
# =============================================================================

# Task: scan, hits, shard, targets, tally, rmp, dist, merge
task = "hits"

# Profile database (.tsv or .csv): id column, then two allele columns per locus
database = "/path/to/database.tsv"

# Target profiles compared against the database (targets task)
# targets = "/path/to/targets.tsv"

# Allele frequency table with locus, allele and frequency columns
frequencies = "/path/to/frequencies.tsv"

# Output file
output = "hits.tsv"

# Output format: tsv, csv, json
format = "tsv"

# =============================================================================
# STATISTIC
# =============================================================================

# Pair statistic: kinship, identity, shared-alleles
statistic = "kinship"

# Relationship tested by the kinship index: po, fs, hs, fc, unrelated
relationship = "fs"

# Explicit IBD probabilities (override relationship when all three are set)
# k0 = 0.25
# k1 = 0.5
# k2 = 0.25

# Population substructure correction
theta = 0.01

# =============================================================================
# SCANS
# =============================================================================

# Report pairs whose value is at least this threshold (hits task)
threshold = 1000.0

# Report pairs with at least this many identical loci (tally task, 0 = full tally)
min_matches = 0

# Sharding of the pair space: this run processes shard `job` of `njobs`
njobs = 1
job = 1

# Target/member id pairs to compare (targets task)
# pairs = "pairs.tsv"

# Compare target k with database profile k only (targets task)
aligned = false

# Write per-locus contributions (targets task with pairs or aligned)
by_locus = false

# =============================================================================
# MATCH PROBABILITY
# =============================================================================

# Model: nrc, bn
model = "nrc"

# Write per-locus match probabilities
per_locus = false

# =============================================================================
# DISTRIBUTION
# =============================================================================

# Relationship under which the statistic is distributed
hypothesis = "unrelated"

# Method: exact, normal, saddlepoint, binned[:BINS]
method = "exact"

# Comma-separated quantile levels
quantiles = "0.5,0.99,0.999"

# Comma-separated values t reported as P(X >= t)
# tail_at = "1,100,10000"

# Comma-separated tail probabilities whose critical values are reported
# alphas = "0.01,0.001"

# Exact convolution truncation
pr0 = 0.0
prinf = 0.0
support_limit = 20000000

# Copies of the locus set aggregated together
copies = 1

# Write the exact distribution support to this file
# save_distribution = "distribution.tsv"

# =============================================================================
# SAMPLE FILTERING
# =============================================================================

# Include only samples matching regex pattern
# include_samples = "case.*"

# Exclude samples matching regex pattern
# exclude_samples = "control.*"

# Include only samples listed in a file (one sample per line)
# include_samples_list = "samples.txt"

# Exclude samples listed in a file (one sample per line)
# exclude_samples_list = "exclude.txt"

# =============================================================================
# PERFORMANCE
# =============================================================================

# Number of threads (omit for auto-detection)
threads = 8

# Split scan rows over the thread pool
parallel = true

# Show a progress bar
progress = true

# Table cache file path for fast reuse (.lz4 extension)
cache_file = "tables.lz4"

# User note to save with the cache for future reference
cache_note = "My analysis run"

# =============================================================================
# FLAGS
# =============================================================================

# Force recomputation ignoring an existing cache
force_recompute = false

# Validate inputs without computation (dry run)
dry_run = false
"#
        .to_string()
    }
}
