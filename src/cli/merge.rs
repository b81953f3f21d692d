// merge.rs - Merge configuration file with CLI arguments

use crate::cli::{Args, Config};

impl Args {
    /// Merge with configuration from file
    /// CLI arguments take precedence over config file values
    pub fn merge_with_config(mut self, config: Config) -> Self {
        // Input/Output
        if self.task == "scan" && config.task.is_some() {
            self.task = config.task.unwrap_or_default();
        }
        if self.database.is_none() {
            self.database = config.database;
        }
        if self.targets.is_none() {
            self.targets = config.targets;
        }
        if self.frequencies.is_none() {
            self.frequencies = config.frequencies;
        }
        if self.output.is_none() {
            self.output = config.output;
        }
        if self.format == "tsv" {
            if let Some(format) = config.format {
                self.format = format;
            }
        }

        // Statistic (only override defaults, not explicit CLI values)
        if self.statistic == "kinship" {
            if let Some(statistic) = config.statistic {
                self.statistic = statistic;
            }
        }
        if self.relationship == "fs" {
            if let Some(relationship) = config.relationship {
                self.relationship = relationship;
            }
        }
        if self.k0.is_none() && self.k1.is_none() && self.k2.is_none() {
            self.k0 = config.k0;
            self.k1 = config.k1;
            self.k2 = config.k2;
        }
        if self.theta == 0.0 {
            if let Some(theta) = config.theta {
                self.theta = theta;
            }
        }

        // Scans
        if self.threshold.is_none() {
            self.threshold = config.threshold;
        }
        if self.min_matches == 0 {
            if let Some(min_matches) = config.min_matches {
                self.min_matches = min_matches;
            }
        }
        if self.njobs == 1 && self.job == 1 {
            self.njobs = config.njobs.unwrap_or(1);
            self.job = config.job.unwrap_or(1);
        }
        if self.pairs.is_none() {
            self.pairs = config.pairs;
        }

        // Match probability
        if self.model == "nrc" {
            if let Some(model) = config.model {
                self.model = model;
            }
        }

        // Distribution
        if self.hypothesis == "unrelated" {
            if let Some(hypothesis) = config.hypothesis {
                self.hypothesis = hypothesis;
            }
        }
        if self.method == "exact" {
            if let Some(method) = config.method {
                self.method = method;
            }
        }
        if self.quantiles == "0.5,0.99,0.999" {
            if let Some(quantiles) = config.quantiles {
                self.quantiles = quantiles;
            }
        }
        if self.tail_at.is_none() {
            self.tail_at = config.tail_at;
        }
        if self.alphas.is_none() {
            self.alphas = config.alphas;
        }
        if self.pr0 == 0.0 {
            if let Some(pr0) = config.pr0 {
                self.pr0 = pr0;
            }
        }
        if self.prinf == 0.0 {
            if let Some(prinf) = config.prinf {
                self.prinf = prinf;
            }
        }
        if self.support_limit == 20_000_000 {
            if let Some(limit) = config.support_limit {
                self.support_limit = limit;
            }
        }
        if self.copies == 1 {
            if let Some(copies) = config.copies {
                self.copies = copies;
            }
        }
        if self.save_distribution.is_none() {
            self.save_distribution = config.save_distribution;
        }

        // Sample filtering
        if self.include_samples.is_none() {
            self.include_samples = config.include_samples;
        }
        if self.exclude_samples.is_none() {
            self.exclude_samples = config.exclude_samples;
        }
        if self.include_samples_list.is_none() {
            self.include_samples_list = config.include_samples_list;
        }
        if self.exclude_samples_list.is_none() {
            self.exclude_samples_list = config.exclude_samples_list;
        }

        // Performance
        if self.threads.is_none() {
            self.threads = config.threads;
        }
        if self.cache_file.is_none() {
            self.cache_file = config.cache_file;
        }
        if self.cache_note.is_none() {
            self.cache_note = config.cache_note;
        }

        // Flags (CLI flags take precedence, config only sets if not explicitly set)
        self.aligned |= config.aligned.unwrap_or(false);
        self.by_locus |= config.by_locus.unwrap_or(false);
        self.per_locus |= config.per_locus.unwrap_or(false);
        self.parallel |= config.parallel.unwrap_or(false);
        self.progress |= config.progress.unwrap_or(false);
        self.force_recompute |= config.force_recompute.unwrap_or(false);
        self.dry_run |= config.dry_run.unwrap_or(false);

        self
    }

    /// Load configuration and merge with CLI args
    pub fn with_config_file(self, config_path: &str) -> Result<Self, String> {
        let config = Config::from_file(config_path)?;
        Ok(self.merge_with_config(config))
    }
}
