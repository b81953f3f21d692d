// args.rs - Command line arguments definition

use argh::FromArgs;

#[derive(FromArgs)]
/// strkin - STR kinship-index database scanner
pub struct Args {
    /// task: scan, hits, shard, targets, tally, rmp, dist, merge (default: scan)
    #[argh(option, default = "String::from(\"scan\")")]
    pub task: String,

    /// path to the profile database (.tsv or .csv: id column, then two allele columns per locus)
    #[argh(option)]
    pub database: Option<String>,

    /// path to the target profiles compared against the database (targets task)
    #[argh(option)]
    pub targets: Option<String>,

    /// path to the allele frequency table (locus, allele, frequency)
    #[argh(option)]
    pub frequencies: Option<String>,

    /// output file
    #[argh(option)]
    pub output: Option<String>,

    /// output format: tsv, csv, json (default: tsv)
    #[argh(option, default = "String::from(\"tsv\")")]
    pub format: String,

    /// pair statistic: kinship, identity, shared-alleles (default: kinship)
    #[argh(option, default = "String::from(\"kinship\")")]
    pub statistic: String,

    /// relationship tested by the kinship index: po, fs, hs, fc, unrelated (default: fs)
    #[argh(option, default = "String::from(\"fs\")")]
    pub relationship: String,

    /// explicit IBD probability k0 (requires --k1 and --k2, overrides --relationship)
    #[argh(option)]
    pub k0: Option<f64>,

    /// explicit IBD probability k1
    #[argh(option)]
    pub k1: Option<f64>,

    /// explicit IBD probability k2
    #[argh(option)]
    pub k2: Option<f64>,

    /// population substructure correction theta (default: 0.0)
    #[argh(option, default = "0.0")]
    pub theta: f64,

    /// report pairs whose value is at least this threshold (hits task)
    #[argh(option)]
    pub threshold: Option<f64>,

    /// report pairs with at least this many identical loci instead of the full tally (tally task, default: 0)
    #[argh(option, default = "0")]
    pub min_matches: usize,

    /// total number of shards the pair space is split into (default: 1)
    #[argh(option, default = "1")]
    pub njobs: i64,

    /// one-based shard processed by this run (default: 1)
    #[argh(option, default = "1")]
    pub job: i64,

    /// file of (target, member) id pairs to compare, one tab-separated pair per line (targets task)
    #[argh(option)]
    pub pairs: Option<String>,

    /// compare target k with database profile k only (targets task)
    #[argh(switch)]
    pub aligned: bool,

    /// write per-locus contributions instead of aggregated values (targets task with --pairs or --aligned)
    #[argh(switch)]
    pub by_locus: bool,

    /// match probability model: nrc, bn (default: nrc)
    #[argh(option, default = "String::from(\"nrc\")")]
    pub model: String,

    /// write per-locus match probabilities (rmp task)
    #[argh(switch)]
    pub per_locus: bool,

    /// relationship under which the statistic distribution is computed (dist task, default: unrelated)
    #[argh(option, default = "String::from(\"unrelated\")")]
    pub hypothesis: String,

    /// distribution method: exact, normal, saddlepoint, binned[:BINS] (default: exact)
    #[argh(option, default = "String::from(\"exact\")")]
    pub method: String,

    /// comma-separated quantile levels to report (dist task, default: 0.5,0.99,0.999)
    #[argh(option, default = "String::from(\"0.5,0.99,0.999\")")]
    pub quantiles: String,

    /// comma-separated values at which to report P(X >= t) (dist task)
    #[argh(option)]
    pub tail_at: Option<String>,

    /// comma-separated tail probabilities whose critical values are reported (dist task)
    #[argh(option)]
    pub alphas: Option<String>,

    /// drop support points with probability below this during exact convolution (default: 0.0)
    #[argh(option, default = "0.0")]
    pub pr0: f64,

    /// collapse the upper tail of total mass below this during exact convolution (default: 0.0)
    #[argh(option, default = "0.0")]
    pub prinf: f64,

    /// largest number of states one exact convolution step may create (default: 20000000)
    #[argh(option, default = "20_000_000")]
    pub support_limit: usize,

    /// number of copies of the locus set aggregated by the dist task (default: 1)
    #[argh(option, default = "1")]
    pub copies: u64,

    /// write the exact distribution support to this file (dist task)
    #[argh(option)]
    pub save_distribution: Option<String>,

    /// include only samples matching regex pattern
    #[argh(option)]
    pub include_samples: Option<String>,

    /// exclude samples matching regex pattern
    #[argh(option)]
    pub exclude_samples: Option<String>,

    /// include only samples listed in a file (one sample per line)
    #[argh(option)]
    pub include_samples_list: Option<String>,

    /// exclude samples listed in a file (one sample per line)
    #[argh(option)]
    pub exclude_samples_list: Option<String>,

    /// number of threads (default: auto-detect)
    #[argh(option)]
    pub threads: Option<usize>,

    /// split scan rows over the thread pool
    #[argh(switch)]
    pub parallel: bool,

    /// show a progress bar
    #[argh(switch)]
    pub progress: bool,

    /// table cache file path for fast reuse (.lz4 extension)
    #[argh(option)]
    pub cache_file: Option<String>,

    /// user note to save with the cache for future reference
    #[argh(option)]
    pub cache_note: Option<String>,

    /// force recomputation ignoring an existing cache
    #[argh(switch)]
    pub force_recompute: bool,

    /// shard JSON files to combine (merge task, repeatable)
    #[argh(option)]
    pub shard_file: Vec<String>,

    /// validate inputs without computation (dry run)
    #[argh(switch)]
    pub dry_run: bool,

    /// path to TOML configuration file
    #[argh(option)]
    pub config: Option<String>,

    /// generate sample configuration file and exit
    #[argh(switch)]
    pub generate_config: bool,
}
