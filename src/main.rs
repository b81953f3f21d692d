// main.rs - CLI entry point

use std::path::Path;
use std::time::Instant;

use strkin::cache::TableCache;
use strkin::cli::{Config, DistMethod, Statistic, Task};
use strkin::core::distribution::{approximate_multiset, convolve_multiset, locus_distributions};
use strkin::core::scan::{CrossResult, CrossSelection};
use strkin::data::loaders::{align_frequencies, load_database, load_frequencies, load_pairs};
use strkin::output::shard::{merge_shard_files, MergedShards, ShardFile, ShardPayload};
use strkin::output::{self, OutputFormat};
use strkin::prelude::*;

fn main() {
    if let Err(e) = run_main() {
        eprintln!("❌ ERROR: {}", e);
        std::process::exit(1);
    }
}

fn run_main() -> Result<(), String> {
    let mut args: Args = argh::from_env();
    let command_line = std::env::args().collect::<Vec<String>>().join(" ");

    // Handle generate config first
    if args.generate_config {
        let sample_config = Config::generate_sample();
        println!("{}", sample_config);
        println!("\n💡 Save this content to a .toml file and use --config /path/to/config.toml");
        return Ok(());
    }

    // Load configuration file if specified
    if let Some(config_path) = args.config.clone() {
        args = args.with_config_file(&config_path)?;
    }

    println!("🚀 strkin v{}", strkin::VERSION);

    // Validate all arguments before touching any data
    let validation = validate_args(&args)?;

    // Configure thread pool
    if let Some(n) = args.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .map_err(|e| format!("Failed to configure thread pool: {}", e))?;
        println!("🧵 Threads: {}", n);
    } else {
        println!("🧵 Threads: {} (auto-detected)", rayon::current_num_threads());
    }

    let total_start = Instant::now();
    let run = Run {
        args: &args,
        validation: &validation,
        command_line: &command_line,
        engine: ScanEngine::new(
            ScanOptions::sequential()
                .with_parallel(args.parallel)
                .with_progress(args.progress)
                .with_verbose(true),
        ),
    };

    match validation.task {
        Task::Merge => run.merge()?,
        Task::Dist => run.dist()?,
        Task::Rmp => run.rmp()?,
        Task::Tally => run.tally()?,
        Task::Targets => run.targets()?,
        Task::Scan | Task::Hits | Task::Shard => run.pairs()?,
    }

    println!(
        "\n⏱️  Total execution time: {:.2}s",
        total_start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Everything a task needs from the command line
struct Run<'a> {
    args: &'a Args,
    validation: &'a ValidationResult,
    command_line: &'a str,
    engine: ScanEngine,
}

impl Run<'_> {
    fn output(&self) -> Result<&str, String> {
        self.args.output.as_deref().ok_or_else(|| "Missing --output".to_string())
    }

    fn format(&self) -> OutputFormat {
        self.validation.format
    }

    fn shards(&self) -> Option<(i64, i64)> {
        (self.args.njobs > 1).then_some((self.args.njobs, self.args.job))
    }

    /// Load and filter a database
    fn database(&self, path: &str, label: &str, filter: bool) -> Result<Database, String> {
        let start = Instant::now();
        let db = load_database(Path::new(path))?;
        let db = if filter {
            let v = self.validation;
            db.filter_profiles(
                v.sample_include_regex.as_ref(),
                v.sample_exclude_regex.as_ref(),
                v.samples_include_set.as_ref(),
                v.samples_exclude_set.as_ref(),
            )
        } else {
            db
        };
        db.print_summary(label);
        println!("   ⏱️  Loaded in {:.2}s", start.elapsed().as_secs_f64());
        if db.is_empty() {
            return Err(format!("No profiles left in {} after filtering", path));
        }
        Ok(db)
    }

    fn members(&self) -> Result<Database, String> {
        let path = self.args.database.as_deref().ok_or("--database is required")?;
        self.database(path, "Database", true)
    }

    /// Frequencies in the locus order of `db`, or in file order without a database
    fn frequencies(&self, db: Option<&Database>) -> Result<Option<AlleleFrequencyTable>, String> {
        let Some(path) = self.args.frequencies.as_deref() else {
            return Ok(None);
        };
        let table = load_frequencies(Path::new(path))?;
        let table = match db {
            Some(db) => align_frequencies(&table, db.locus_names())?,
            None => table,
        };
        println!("📊 Frequencies: {} loci", table.nloci());
        for (name, total) in table.unnormalized_loci(1e-3) {
            println!("⚠️  Frequencies of locus {} sum to {:.4}", name, total);
        }
        Ok(Some(table))
    }

    /// Locus tables for the chosen statistic
    ///
    /// Kinship tables are read from and written to the table cache when one is
    /// configured. Count-style tables are sized to the observed alleles, or to
    /// the frequency ladders when no database is involved.
    fn tables(
        &self,
        freqs: Option<&AlleleFrequencyTable>,
        dbs: &[&Database],
    ) -> Result<LocusTables, String> {
        let v = self.validation;
        let start = Instant::now();
        let tables = match v.statistic {
            Statistic::Kinship => {
                let freqs = freqs.ok_or("The kinship statistic needs --frequencies")?;
                let p = &v.kinship_params;
                println!(
                    "🧬 Kinship index ({}): k0={}, k1={}, k2={}, θ={}",
                    p.label(),
                    p.k0,
                    p.k1,
                    p.k2,
                    p.theta
                );
                self.kinship_tables(freqs)?
            }
            Statistic::Identity | Statistic::SharedAlleles if dbs.is_empty() => {
                let freqs = freqs.ok_or("Count tables without a database need --frequencies")?;
                let tables = freqs
                    .loci()
                    .iter()
                    .enumerate()
                    .map(|(m, locus)| match v.statistic {
                        Statistic::Identity => LocusTable::identity(m, locus.ladder()),
                        _ => LocusTable::shared_alleles(m, locus.ladder()),
                    })
                    .collect();
                LocusTables::from_tables(tables, Aggregate::Sum).map_err(|e| e.to_string())?
            }
            Statistic::Identity => LocusTables::identity(dbs).map_err(|e| e.to_string())?,
            Statistic::SharedAlleles => {
                LocusTables::shared_alleles(dbs).map_err(|e| e.to_string())?
            }
        };
        println!(
            "✅ {} locus tables ready in {:.2}s",
            tables.nloci(),
            start.elapsed().as_secs_f64()
        );
        Ok(tables)
    }

    fn kinship_tables(&self, freqs: &AlleleFrequencyTable) -> Result<LocusTables, String> {
        let params = &self.validation.kinship_params;
        if let Some(cache_path) = &self.args.cache_file {
            let path = Path::new(cache_path);
            if path.exists() && !self.args.force_recompute {
                let cache = TableCache::load(path)?;
                if let Err(e) = cache.check_compatible(Some(params), Some(freqs)) {
                    eprintln!("❌ FATAL ERROR: Cache incompatible: {}", e);
                    eprintln!("💡 Solutions:");
                    eprintln!("   - Use --force-recompute to rebuild the tables");
                    eprintln!("   - Delete the incompatible cache file");
                    eprintln!("   - Use the kinship parameters and frequencies the cache was built with");
                    return Err("Incompatible table cache".to_string());
                }
                println!("🎯 Tables loaded from cache: {}", cache_path);
                return Ok(cache.tables);
            }
        }

        let tables = LocusTables::kinship(freqs, params, false).map_err(|e| e.to_string())?;
        if let Some(cache_path) = &self.args.cache_file {
            let cache = TableCache::new(tables.clone(), Some(freqs), self.args.cache_note.clone())?;
            if let Err(e) = cache.save(Path::new(cache_path)) {
                eprintln!("⚠️  Warning: Failed to save cache: {}", e);
            }
        }
        Ok(tables)
    }

    fn dry_run_done(&self) -> bool {
        if self.args.dry_run {
            println!("✅ Dry run completed successfully");
        }
        self.args.dry_run
    }

    fn save_shard(
        &self,
        ids: &[String],
        complete: bool,
        evaluated: u64,
        payload: ShardPayload,
    ) -> Result<(), String> {
        if !complete {
            println!("⚠️  Shard stopped early after {} pairs", evaluated);
        }
        let shard = ShardFile::new(
            self.command_line,
            self.args.njobs as u64,
            self.args.job as u64,
            complete,
            evaluated,
            ids,
            payload,
        );
        shard.save(Path::new(self.output()?))
    }

    /// scan, hits and shard tasks over one database
    fn pairs(&self) -> Result<(), String> {
        let db = self.members()?;
        let freqs = self.frequencies(Some(&db))?;
        let tables = self.tables(freqs.as_ref(), &[&db])?;
        if self.dry_run_done() {
            return Ok(());
        }
        let ids = db.ids();

        match self.validation.task {
            Task::Scan => {
                println!(
                    "\n🔄 Computing all {} pairs...",
                    strkin::core::shard::pair_count(db.len())
                );
                let outcome = self.engine.full(&tables, &db).map_err(|e| e.to_string())?;
                output::write_pair_matrix(
                    self.output()?,
                    self.format(),
                    ids,
                    &outcome.result,
                    self.command_line,
                )
            }
            Task::Hits => {
                let threshold = self.args.threshold.ok_or("The hits task needs --threshold")?;
                println!("\n🔎 Searching pairs with value >= {}", threshold);
                match self.shards() {
                    None => {
                        let outcome = self
                            .engine
                            .hits(&tables, &db, threshold)
                            .map_err(|e| e.to_string())?;
                        output::write_hits(
                            self.output()?,
                            self.format(),
                            ids,
                            &outcome.result,
                            self.command_line,
                        )
                    }
                    Some((njobs, job)) => {
                        let outcome = self
                            .engine
                            .shard_hits(&tables, &db, threshold, njobs, job)
                            .map_err(|e| e.to_string())?;
                        self.save_shard(
                            ids,
                            outcome.complete,
                            outcome.evaluated,
                            ShardPayload::Hits { hits: outcome.result },
                        )
                    }
                }
            }
            _ => {
                let outcome = self
                    .engine
                    .shard(&tables, &db, self.args.njobs, self.args.job)
                    .map_err(|e| e.to_string())?;
                let payload = ShardPayload::from_pair_values(&outcome.result);
                self.save_shard(ids, outcome.complete, outcome.evaluated, payload)
            }
        }
    }

    /// Target profiles against the database
    fn targets(&self) -> Result<(), String> {
        let db = self.members()?;
        let target_path = self.args.targets.as_deref().ok_or("The targets task needs --targets")?;
        let targets = self.database(target_path, "Targets", false)?;
        targets.check_layout(&db).map_err(|e| e.to_string())?;
        let freqs = self.frequencies(Some(&db))?;
        let tables = self.tables(freqs.as_ref(), &[&targets, &db])?;

        let listed = match &self.args.pairs {
            Some(path) => Some(load_pairs(Path::new(path), &targets, &db)?),
            None if self.args.aligned => {
                if targets.len() != db.len() {
                    return Err(format!(
                        "--aligned needs as many targets as database profiles ({} vs {})",
                        targets.len(),
                        db.len()
                    ));
                }
                Some((0..targets.len()).map(|k| (k, k)).collect::<Vec<_>>())
            }
            None => None,
        };
        if self.dry_run_done() {
            return Ok(());
        }

        let output_path = self.output()?;
        if self.args.by_locus {
            let pairs = listed.as_deref().ok_or("--by-locus needs --aligned or --pairs")?;
            println!("\n🔬 Per-locus breakdown of {} comparisons", pairs.len());
            let contributions = self
                .engine
                .pairs_by_locus(&tables, &targets, &db, Some(pairs))
                .map_err(|e| e.to_string())?;
            return output::write_locus_breakdown(
                output_path,
                self.format(),
                targets.ids(),
                db.ids(),
                db.locus_names(),
                pairs,
                &contributions,
                self.command_line,
            );
        }

        let selection = match (&listed, self.args.aligned) {
            (Some(_), true) => CrossSelection::Aligned,
            (Some(pairs), false) => CrossSelection::Pairs(pairs),
            (None, _) => CrossSelection::ManyToMany,
        };
        println!("\n🎯 Comparing {} targets with {} profiles", targets.len(), db.len());
        let outcome = self
            .engine
            .cross_with(&tables, &targets, &db, selection)
            .map_err(|e| e.to_string())?;
        match (outcome.result, listed) {
            (CrossResult::Matrix(matrix), _) => {
                output::write_cross_matrix(
                    output_path,
                    self.format(),
                    targets.ids(),
                    db.ids(),
                    &matrix,
                    self.command_line,
                )
            }
            (CrossResult::Pairs(values), Some(pairs)) => output::write_cross_pairs(
                output_path,
                self.format(),
                targets.ids(),
                db.ids(),
                &pairs,
                &values,
                self.command_line,
            ),
            (CrossResult::Pairs(_), None) => Err("Pair results without a pair list".to_string()),
        }
    }

    /// Pairs by fully and partially matching loci
    fn tally(&self) -> Result<(), String> {
        let db = self.members()?;
        if self.dry_run_done() {
            return Ok(());
        }
        let ids = db.ids();
        let min = self.args.min_matches;

        if min > 0 {
            println!("\n🔎 Searching pairs matching at {} or more loci", min);
            let outcome = self
                .engine
                .match_hits(&db, min, self.shards())
                .map_err(|e| e.to_string())?;
            return match self.shards() {
                None => output::write_match_hits(
                    self.output()?,
                    self.format(),
                    ids,
                    &outcome.result,
                    self.command_line,
                ),
                Some(_) => self.save_shard(
                    ids,
                    outcome.complete,
                    outcome.evaluated,
                    ShardPayload::MatchHits { hits: outcome.result },
                ),
            };
        }

        println!("\n🔄 Tallying matching loci over all pairs...");
        match self.shards() {
            None => {
                let outcome = self.engine.match_tally(&db).map_err(|e| e.to_string())?;
                print_tally_summary(&outcome.result);
                output::write_tally(
                    self.output()?,
                    self.format(),
                    &outcome.result,
                    self.command_line,
                )
            }
            Some((njobs, job)) => {
                let outcome = self
                    .engine
                    .match_tally_shard(&db, njobs, job)
                    .map_err(|e| e.to_string())?;
                self.save_shard(
                    ids,
                    outcome.complete,
                    outcome.evaluated,
                    ShardPayload::Tally { tally: outcome.result },
                )
            }
        }
    }

    /// Random match probability of every profile
    fn rmp(&self) -> Result<(), String> {
        let db = self.members()?;
        let freqs = self.frequencies(Some(&db))?.ok_or("The rmp task needs --frequencies")?;
        if self.dry_run_done() {
            return Ok(());
        }
        println!(
            "\n🎲 Random match probability ({:?}, θ={})",
            self.validation.model, self.args.theta
        );
        let probs = random_match_probability(
            &db,
            &freqs,
            self.args.theta,
            self.validation.model,
            self.args.per_locus,
        )
            .map_err(|e| e.to_string())?;
        let rarest = probs.totals().iter().copied().filter(|p| !p.is_nan()).reduce(f64::min);
        if let Some(rarest) = rarest {
            println!("📊 Smallest match probability: {:.3e}", rarest);
        }
        output::write_rmp(
            self.output()?,
            self.format(),
            db.ids(),
            db.locus_names(),
            &probs,
            self.command_line,
        )
    }

    /// Distribution of the aggregated statistic under the hypothesis
    fn dist(&self) -> Result<(), String> {
        let db = match self.args.database.as_deref() {
            Some(path) => Some(self.database(path, "Database", true)?),
            None => None,
        };
        let freqs = self.frequencies(db.as_ref())?.ok_or("The dist task needs --frequencies")?;
        // Count tables follow the frequency ladders so every tabulated allele has a cell
        let tables = self.tables(Some(&freqs), &[])?;
        if self.dry_run_done() {
            return Ok(());
        }

        let v = self.validation;
        let h = &v.hypothesis;
        println!(
            "\n📈 Distribution under {} (k0={}, k1={}, k2={}; {} loci × {} copies)",
            h.label(),
            h.k0,
            h.k1,
            h.k2,
            tables.nloci(),
            self.args.copies
        );
        let start = Instant::now();
        let items: Vec<(Distribution, u64)> = locus_distributions(&tables, &freqs, h)
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|d| (d, self.args.copies))
            .collect();

        let rows = match v.method {
            DistMethod::Exact(options) => {
                let dist = convolve_multiset(&items, tables.aggregate(), &options)
                    .map_err(|e| e.to_string())?;
                println!(
                    "✅ Exact distribution: {} support points in {:.2}s",
                    dist.len(),
                    start.elapsed().as_secs_f64()
                );
                if let Some(path) = &self.args.save_distribution {
                    output::write_distribution(path, self.format(), &dist, self.command_line)?;
                }
                let mut rows = summarize(&dist, v)?;
                rows.push(("support_points".to_string(), dist.len() as f64));
                rows.push(("truncated_mass".to_string(), dist.truncated_mass()));
                rows
            }
            DistMethod::Approx(method) => {
                if self.args.save_distribution.is_some() {
                    println!("⚠️  --save-distribution only applies to the exact method");
                }
                let approx = approximate_multiset(&items, tables.aggregate(), method)
                    .map_err(|e| e.to_string())?;
                println!("✅ {:?} approximation in {:.2}s", method, start.elapsed().as_secs_f64());
                summarize(&approx, v)?
            }
        };
        for (name, value) in &rows {
            println!("   • {}: {}", name, value);
        }
        output::write_summary(self.output()?, self.format(), &rows, self.command_line)
    }

    /// Combine shard JSON files into the final output
    fn merge(&self) -> Result<(), String> {
        println!("🔗 Merging {} shard files", self.args.shard_file.len());
        let files = self
            .args
            .shard_file
            .iter()
            .map(|p| ShardFile::load(Path::new(p)))
            .collect::<Result<Vec<_>, String>>()?;
        let (ids, merged) = merge_shard_files(files)?;
        if self.dry_run_done() {
            return Ok(());
        }
        let output_path = self.output()?;
        match merged {
            MergedShards::Values(values) => {
                output::write_pair_matrix(
                    output_path,
                    self.format(),
                    &ids,
                    &values,
                    self.command_line,
                )
            }
            MergedShards::Hits(hits) => {
                output::write_hits(output_path, self.format(), &ids, &hits, self.command_line)
            }
            MergedShards::Tally(tally) => {
                print_tally_summary(&tally);
                output::write_tally(output_path, self.format(), &tally, self.command_line)
            }
            MergedShards::MatchHits(hits) => {
                output::write_match_hits(output_path, self.format(), &ids, &hits, self.command_line)
            }
        }
    }
}

/// Mean, quantiles, tails and critical values requested on the command line
fn summarize<D: CumulativeDistribution>(
    dist: &D,
    v: &ValidationResult,
) -> Result<Vec<(String, f64)>, String> {
    let mut rows = vec![("mean".to_string(), dist.mean())];
    for &p in &v.quantiles {
        rows.push((format!("quantile_{}", p), dist.quantile(p).map_err(|e| e.to_string())?));
    }
    for &t in &v.tail_at {
        rows.push((format!("tail_at_{}", t), dist.tail(t)));
    }
    for &alpha in &v.alphas {
        let critical = dist.tail_quantile(alpha).map_err(|e| e.to_string())?;
        rows.push((format!("critical_{}", alpha), critical));
    }
    Ok(rows)
}

fn print_tally_summary(tally: &MatchTally) {
    let most = (0..=tally.nloci).rev().find(|&f| (0..=tally.nloci).any(|p| tally.get(f, p) > 0));
    println!("📊 {} pairs tallied", tally.total());
    if let Some(full) = most {
        println!("   • Most identical loci in any pair: {}", full);
    }
}
