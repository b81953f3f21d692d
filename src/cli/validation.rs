// validation.rs - Input validation utilities

use crate::cli::args::Args;
use crate::core::distribution::{ApproxMethod, ExactOptions, Truncation};
use crate::core::kinship::{KinshipParams, Relationship};
use crate::core::rmp::RmpModel;
use crate::output::OutputFormat;
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::str::FromStr;

/// What a run computes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Every database pair, written as a square matrix
    Scan,
    /// Pairs at or above a threshold
    Hits,
    /// Pair values of one shard, written as shard JSON
    Shard,
    /// Target profiles against the database
    Targets,
    /// Counts of pairs by matching loci
    Tally,
    /// Random match probability per profile
    Rmp,
    /// Distribution of the statistic under a relationship hypothesis
    Dist,
    /// Combine shard JSON files
    Merge,
}

impl FromStr for Task {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scan" => Ok(Task::Scan),
            "hits" => Ok(Task::Hits),
            "shard" => Ok(Task::Shard),
            "targets" => Ok(Task::Targets),
            "tally" => Ok(Task::Tally),
            "rmp" => Ok(Task::Rmp),
            "dist" => Ok(Task::Dist),
            "merge" => Ok(Task::Merge),
            _ => Err(format!(
                "Unknown task '{}'. Use: scan, hits, shard, targets, tally, rmp, dist, merge",
                s
            )),
        }
    }
}

/// Per-locus statistic tabulated for pair scans
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Statistic {
    /// Kinship index, multiplied over loci
    Kinship,
    /// 1 for identical genotypes, summed over loci
    Identity,
    /// Number of shared alleles (IBS), summed over loci
    SharedAlleles,
}

impl FromStr for Statistic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kinship" | "ki" => Ok(Statistic::Kinship),
            "identity" | "match" => Ok(Statistic::Identity),
            "shared-alleles" | "ibs" => Ok(Statistic::SharedAlleles),
            _ => Err(format!(
                "Unknown statistic '{}'. Use: kinship, identity, shared-alleles",
                s
            )),
        }
    }
}

/// Exact convolution or one of the approximations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DistMethod {
    Exact(ExactOptions),
    Approx(ApproxMethod),
}

#[derive(Debug)]
pub struct ValidationResult {
    pub task: Task,
    pub format: OutputFormat,
    pub statistic: Statistic,
    pub kinship_params: KinshipParams,
    pub hypothesis: KinshipParams,
    pub method: DistMethod,
    pub model: RmpModel,
    pub quantiles: Vec<f64>,
    pub tail_at: Vec<f64>,
    pub alphas: Vec<f64>,
    pub sample_include_regex: Option<Regex>,
    pub sample_exclude_regex: Option<Regex>,
    pub samples_include_set: Option<HashSet<String>>,
    pub samples_exclude_set: Option<HashSet<String>>,
}

/// Validate all command line arguments
pub fn validate_args(args: &Args) -> Result<ValidationResult, String> {
    let task = Task::from_str(&args.task)?;
    let format = OutputFormat::from_str(&args.format)?;
    let statistic = Statistic::from_str(&args.statistic)?;
    let model = RmpModel::from_str(&args.model)?;

    // Required inputs per task
    match task {
        Task::Merge => {
            if args.shard_file.is_empty() {
                return Err("The merge task needs at least one --shard-file".to_string());
            }
        }
        Task::Dist => {
            if args.frequencies.is_none() {
                return Err("The dist task needs --frequencies".to_string());
            }
        }
        _ => {
            if args.database.is_none() {
                return Err(format!("The {} task needs --database", args.task));
            }
        }
    }
    if task == Task::Targets && args.targets.is_none() {
        return Err("The targets task needs --targets".to_string());
    }
    if task == Task::Rmp && args.frequencies.is_none() {
        return Err("The rmp task needs --frequencies".to_string());
    }
    let uses_tables = matches!(
        task,
        Task::Scan | Task::Hits | Task::Shard | Task::Targets | Task::Dist
    );
    if uses_tables && statistic == Statistic::Kinship && args.frequencies.is_none() {
        return Err("The kinship statistic needs --frequencies".to_string());
    }
    if args.output.is_none() && !args.dry_run {
        return Err("Missing --output".to_string());
    }

    // Validate scan options
    if task == Task::Hits {
        match args.threshold {
            None => return Err("The hits task needs --threshold".to_string()),
            Some(t) if t.is_nan() => return Err("Threshold must be a number".to_string()),
            Some(_) => {}
        }
    }
    if args.njobs < 1 || args.job < 1 || args.job > args.njobs {
        return Err(format!(
            "Invalid shard {}/{}: need 1 <= job <= njobs",
            args.job, args.njobs
        ));
    }
    if args.njobs > 1 && matches!(task, Task::Scan | Task::Targets | Task::Rmp | Task::Dist) {
        return Err(format!("The {} task cannot be sharded; use shard, hits or tally", args.task));
    }
    if args.aligned && args.pairs.is_some() {
        return Err("--aligned and --pairs are mutually exclusive".to_string());
    }
    if args.by_locus && !args.aligned && args.pairs.is_none() {
        return Err("--by-locus needs --aligned or --pairs".to_string());
    }
    if args.cache_file.is_some() && statistic != Statistic::Kinship {
        return Err("--cache-file only applies to the kinship statistic".to_string());
    }

    // Kinship parameters
    let kinship_params = match (args.k0, args.k1, args.k2) {
        (Some(k0), Some(k1), Some(k2)) => KinshipParams::new(k0, k1, k2, args.theta),
        (None, None, None) => {
            let relationship = Relationship::from_str(&args.relationship)?;
            KinshipParams::from_relationship(relationship, args.theta)
        }
        _ => return Err("--k0, --k1 and --k2 must be given together".to_string()),
    }
    .map_err(|e| e.to_string())?;
    let hypothesis =
        KinshipParams::from_relationship(Relationship::from_str(&args.hypothesis)?, args.theta)
        .map_err(|e| e.to_string())?;

    // Distribution options
    let method = if args.method.eq_ignore_ascii_case("exact") {
        let truncation = Truncation::new(args.pr0, args.prinf).map_err(|e| e.to_string())?;
        if args.support_limit == 0 {
            return Err("Support limit must be positive".to_string());
        }
        DistMethod::Exact(ExactOptions {
            truncation,
            support_limit: args.support_limit,
        })
    } else {
        let method = ApproxMethod::from_str(&args.method)?;
        if let ApproxMethod::Binned { bins } = method {
            if bins < 2 {
                return Err("Binned approximation needs at least 2 bins".to_string());
            }
        }
        DistMethod::Approx(method)
    };
    if args.copies == 0 {
        return Err("--copies must be at least 1".to_string());
    }
    let quantiles = parse_probabilities(&args.quantiles, "quantile level")?;
    let alphas = match &args.alphas {
        Some(list) => parse_probabilities(list, "tail probability")?,
        None => Vec::new(),
    };
    let tail_at = match &args.tail_at {
        Some(list) => parse_list(list, "tail value")?,
        None => Vec::new(),
    };

    // Compile regex patterns
    let sample_include_regex = if let Some(pattern) = &args.include_samples {
        Some(Regex::new(pattern).map_err(|e| format!("Invalid include_samples regex: {}", e))?)
    } else {
        None
    };

    let sample_exclude_regex = if let Some(pattern) = &args.exclude_samples {
        Some(Regex::new(pattern).map_err(|e| format!("Invalid exclude_samples regex: {}", e))?)
    } else {
        None
    };

    // Load filter sets from files
    let samples_include_set = if let Some(file_path) = &args.include_samples_list {
        Some(load_set_from_file(file_path)?)
    } else {
        None
    };

    let samples_exclude_set = if let Some(file_path) = &args.exclude_samples_list {
        Some(load_set_from_file(file_path)?)
    } else {
        None
    };

    Ok(ValidationResult {
        task,
        format,
        statistic,
        kinship_params,
        hypothesis,
        method,
        model,
        quantiles,
        tail_at,
        alphas,
        sample_include_regex,
        sample_exclude_regex,
        samples_include_set,
        samples_exclude_set,
    })
}

/// Comma-separated numbers
fn parse_list(list: &str, what: &str) -> Result<Vec<f64>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|v| !v.is_nan())
                .ok_or_else(|| format!("Invalid {} '{}'", what, s))
        })
        .collect()
}

fn parse_probabilities(list: &str, what: &str) -> Result<Vec<f64>, String> {
    let values = parse_list(list, what)?;
    if let Some(bad) = values.iter().find(|p| !(0.0..=1.0).contains(*p)) {
        return Err(format!("Invalid {} {}: must be between 0.0 and 1.0", what, bad));
    }
    Ok(values)
}

/// Load a set of strings from a file (one per line)
fn load_set_from_file(file_path: &str) -> Result<HashSet<String>, String> {
    let file = File::open(file_path)
        .map_err(|e| format!("Failed to open filter file '{}': {}", file_path, e))?;

    let reader = BufReader::new(file);
    let mut set = HashSet::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| format!("Failed to read line {} from '{}': {}",
                                           line_num + 1, file_path, e))?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            set.insert(trimmed.to_string());
        }
    }

    println!("📋 Loaded {} items from filter file '{}'", set.len(), file_path);
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argh::FromArgs;

    fn parse(args: &[&str]) -> Args {
        Args::from_args(&["strkin"], args).unwrap()
    }

    #[test]
    fn test_defaults_need_inputs() {
        assert!(validate_args(&parse(&[])).unwrap_err().contains("--database"));
        let err = validate_args(&parse(&["--database", "db.tsv", "--output", "out.tsv"]))
            .unwrap_err();
        assert!(err.contains("--frequencies"));
    }

    #[test]
    fn test_identity_scan_without_frequencies() {
        let result = validate_args(&parse(&[
            "--database", "db.tsv", "--output", "out.tsv", "--statistic", "identity",
        ]))
        .unwrap();
        assert_eq!(result.task, Task::Scan);
        assert_eq!(result.statistic, Statistic::Identity);
        assert_eq!(result.quantiles, vec![0.5, 0.99, 0.999]);
    }

    #[test]
    fn test_kinship_parameters() {
        let result = validate_args(&parse(&[
            "--task", "dist", "--frequencies", "f.tsv", "--output", "o.tsv",
            "--k0", "0.5", "--k1", "0.5", "--k2", "0", "--theta", "0.01", "--method", "spa",
        ]))
        .unwrap();
        assert_eq!(result.kinship_params.k1, 0.5);
        assert_eq!(result.hypothesis.k0, 1.0);
        assert_eq!(result.method, DistMethod::Approx(ApproxMethod::Saddlepoint));

        let partial = parse(&[
            "--task", "dist", "--frequencies", "f.tsv", "--output", "o.tsv", "--k0", "0.5",
        ]);
        assert!(validate_args(&partial).unwrap_err().contains("together"));
    }

    #[test]
    fn test_sharded_hits_arguments() {
        let args = parse(&[
            "--task", "hits", "--database", "db.tsv", "--output", "o.json",
            "--statistic", "identity", "--threshold", "3", "--njobs", "4", "--job", "2",
        ]);
        assert_eq!((args.njobs, args.job), (4, 2));
        let result = validate_args(&args).unwrap();
        assert_eq!(result.task, Task::Hits);
        assert!(format!("{:?}", result).contains("Hits"));
    }

    #[test]
    fn test_rejects_bad_options() {
        let base = ["--database", "db.tsv", "--output", "o.tsv", "--statistic", "identity"];
        let with = |extra: &[&str]| {
            let mut all = base.to_vec();
            all.extend_from_slice(extra);
            validate_args(&parse(&all)).err().unwrap_or_default()
        };
        assert!(with(&["--task", "hits"]).contains("--threshold"));
        assert!(with(&["--task", "shard", "--njobs", "2", "--job", "3"]).contains("Invalid shard"));
        assert!(with(&["--njobs", "2"]).contains("cannot be sharded"));
        assert!(with(&["--quantiles", "0.5,1.5"]).contains("quantile level"));
        assert!(with(&["--method", "binned:1"]).contains("2 bins"));
        assert!(with(&["--include-samples", "("]).contains("regex"));
        assert!(with(&["--cache-file", "t.lz4"]).contains("kinship"));
    }

    #[test]
    fn test_list_parsing() {
        assert_eq!(parse_list("1, 10,100", "value").unwrap(), vec![1.0, 10.0, 100.0]);
        assert!(parse_list("1,x", "value").is_err());
        assert!(parse_probabilities("0.1,-0.1", "alpha").is_err());
    }
}
