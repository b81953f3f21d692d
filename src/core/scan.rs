// scan.rs - Pairwise database scans driven by per-locus tables

use crate::core::progress::{Progress, ScanOptions};
use crate::core::shard::{pair_count, pair_index, pair_range, ShardPlan};
use crate::core::table::{IndexedDatabase, LocusTables};
use crate::data::Database;
use crate::error::{KinError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Relative tolerance when comparing a best-case bound with the hit threshold
const BOUND_SLACK: f64 = 1e-9;

/// Result of a scan plus how far it got
///
/// `complete` is false when the scan was cancelled; the result then holds
/// every pair evaluated before the flag was seen (NaN elsewhere).
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome<T> {
    pub result: T,
    pub complete: bool,
    pub evaluated: u64,
}

/// Pair whose statistic reached the threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub i: usize,
    pub j: usize,
    pub value: f64,
}

/// Statistics for a contiguous run of unordered pairs (i < j), in pair order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairValues {
    /// Database size the pair indices refer to
    pub n: usize,
    /// Pair index of `values[0]`
    pub start: u64,
    pub values: Vec<f64>,
}

impl PairValues {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// One past the last pair index held
    pub fn end(&self) -> u64 {
        self.start + self.values.len() as u64
    }

    /// Value of pair (i, j) in either order, if this run holds it
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        let (i, j) = if i < j { (i, j) } else { (j, i) };
        if i == j || j >= self.n {
            return None;
        }
        let k = pair_index(i, j, self.n);
        if k < self.start || k >= self.end() {
            return None;
        }
        Some(self.values[(k - self.start) as usize])
    }

    /// (i, j, value) for every pair held
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        pair_range(self.n, self.start, self.values.len() as u64)
            .zip(self.values.iter())
            .map(|((i, j), &v)| (i, j, v))
    }

    /// Symmetric n x n matrix; pairs not held are NaN
    pub fn to_square(&self, diagonal: f64) -> Vec<Vec<f64>> {
        let mut matrix = vec![vec![f64::NAN; self.n]; self.n];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = diagonal;
        }
        for (i, j, v) in self.iter() {
            matrix[i][j] = v;
            matrix[j][i] = v;
        }
        matrix
    }
}

/// Target-vs-database result: one row per database member, one column per target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossMatrix {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
}

impl CrossMatrix {
    /// Statistic for database member `member` against target `target`
    pub fn get(&self, member: usize, target: usize) -> f64 {
        self.values[member * self.cols + target]
    }

    pub fn row(&self, member: usize) -> &[f64] {
        &self.values[member * self.cols..(member + 1) * self.cols]
    }
}

/// Which target/member comparisons a cross scan makes
#[derive(Debug, Clone, Copy)]
pub enum CrossSelection<'a> {
    /// Every target against every member
    ManyToMany,
    /// Target k against member k
    Aligned,
    /// Listed (target, member) pairs
    Pairs(&'a [(usize, usize)]),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CrossResult {
    Matrix(CrossMatrix),
    Pairs(Vec<f64>),
}

/// (nloci + 1) x (nloci + 1) counts of pairs by fully and partially matching loci
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchTally {
    pub nloci: usize,
    pub counts: Vec<u64>,
}

impl MatchTally {
    pub fn new(nloci: usize) -> Self {
        Self {
            nloci,
            counts: vec![0; (nloci + 1) * (nloci + 1)],
        }
    }

    /// Pairs with `full` identical loci and `partial` loci sharing one allele
    pub fn get(&self, full: usize, partial: usize) -> u64 {
        self.counts[full * (self.nloci + 1) + partial]
    }

    fn record(&mut self, full: usize, partial: usize) {
        self.counts[full * (self.nloci + 1) + partial] += 1;
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Add another tally of the same locus count (shard merging)
    pub fn merge(&mut self, other: &MatchTally) -> Result<()> {
        if other.nloci != self.nloci {
            return Err(KinError::dimension_mismatch("match tally loci", self.nloci, other.nloci));
        }
        for (a, b) in self.counts.iter_mut().zip(&other.counts) {
            *a += b;
        }
        Ok(())
    }
}

/// Pair with at least the requested number of fully matching loci
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchHit {
    pub i: usize,
    pub j: usize,
    pub full: usize,
    pub partial: usize,
}

/// Pairwise scan driver; tables and databases are borrowed per call
#[derive(Debug, Clone, Default)]
pub struct ScanEngine {
    options: ScanOptions,
}

impl ScanEngine {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    fn announce(&self, what: &str, pairs: u64) {
        if self.options.verbose {
            println!("🔄 {} ({} comparisons)...", what, pairs);
        }
    }

    fn report<T>(&self, what: &str, start: Instant, outcome: &ScanOutcome<T>) {
        if !self.options.verbose {
            return;
        }
        if outcome.complete {
            println!("✅ {} done in {:.2}s", what, start.elapsed().as_secs_f64());
        } else {
            println!(
                "⚠️  {} cancelled after {} comparisons ({:.2}s)",
                what,
                outcome.evaluated,
                start.elapsed().as_secs_f64()
            );
        }
    }

    /// Every unordered pair of `db`, packed in pair order
    pub fn full(&self, tables: &LocusTables, db: &Database) -> Result<ScanOutcome<PairValues>> {
        let indexed = tables.index_database(db)?;
        let plan = ShardPlan::new(pair_count(db.len()), 1, 1)?;
        let start = Instant::now();
        self.announce("Full scan", plan.total);
        let outcome = if self.options.parallel {
            self.values_parallel(tables, &indexed)
        } else {
            self.values_range(tables, &indexed, &plan)
        };
        self.report("Full scan", start, &outcome);
        Ok(outcome)
    }

    /// Pairs whose statistic is at or above `threshold`
    pub fn hits(
        &self,
        tables: &LocusTables,
        db: &Database,
        threshold: f64,
    ) -> Result<ScanOutcome<Vec<Hit>>> {
        self.shard_hits(tables, db, threshold, 1, 1)
    }

    /// Job `job` (1-based) of `njobs` contiguous shards of the pair space
    pub fn shard(
        &self,
        tables: &LocusTables,
        db: &Database,
        njobs: i64,
        job: i64,
    ) -> Result<ScanOutcome<PairValues>> {
        let plan = ShardPlan::new(pair_count(db.len()), njobs, job)?;
        let indexed = tables.index_database(db)?;
        let start = Instant::now();
        self.announce(&format!("Shard {}/{}", job, njobs), plan.len() as u64);
        let outcome = self.values_range(tables, &indexed, &plan);
        self.report("Shard scan", start, &outcome);
        Ok(outcome)
    }

    /// Hits within one shard of the pair space
    pub fn shard_hits(
        &self,
        tables: &LocusTables,
        db: &Database,
        threshold: f64,
        njobs: i64,
        job: i64,
    ) -> Result<ScanOutcome<Vec<Hit>>> {
        if threshold.is_nan() {
            return Err(KinError::invalid_parameter("hit threshold must not be NaN"));
        }
        let plan = ShardPlan::new(pair_count(db.len()), njobs, job)?;
        let indexed = tables.index_database(db)?;
        let start = Instant::now();
        self.announce(&format!("Hit scan, threshold {}", threshold), plan.len() as u64);

        let bounds = tables.supports_bounds().then(|| tables.suffix_bounds());
        let cutoff = threshold - BOUND_SLACK * threshold.abs().max(1.0);
        let progress = Progress::new(plan.len() as u64, &self.options);
        let mut hits = Vec::new();
        let mut complete = true;
        for (i, j) in plan.pairs(indexed.len()) {
            if self.options.cancelled() {
                complete = false;
                break;
            }
            let (row, col) = (indexed.row(i), indexed.row(j));
            if let Some(value) = evaluate_bounded(tables, row, col, bounds.as_deref(), cutoff) {
                if value >= threshold {
                    hits.push(Hit { i, j, value });
                }
            }
            progress.tick();
        }
        progress.finish(complete);

        let outcome = ScanOutcome {
            result: hits,
            complete,
            evaluated: progress.done(),
        };
        if self.options.verbose {
            println!("📊 {} hits", outcome.result.len());
        }
        self.report("Hit scan", start, &outcome);
        Ok(outcome)
    }

    /// Every target against every database member
    ///
    /// Tables are read with the target's genotype as row and the member's as
    /// column. The matrix has one row per member and one column per target.
    pub fn cross(
        &self,
        tables: &LocusTables,
        targets: &Database,
        members: &Database,
    ) -> Result<ScanOutcome<CrossMatrix>> {
        targets.check_layout(members)?;
        let t = tables.index_database(targets)?;
        let m = tables.index_database(members)?;
        let (rows, cols) = (m.len(), t.len());
        let start = Instant::now();
        self.announce("Cross scan", (rows * cols) as u64);

        let mut values = vec![f64::NAN; rows * cols];
        let progress = Progress::new((rows * cols) as u64, &self.options);
        let fill_row = |k: usize, row: &mut [f64]| -> bool {
            let member = m.row(k);
            for (j, slot) in row.iter_mut().enumerate() {
                if self.options.cancelled() {
                    return false;
                }
                *slot = tables.evaluate(t.row(j), member);
                progress.tick();
            }
            true
        };

        let mut complete = true;
        if cols > 0 {
            if self.options.parallel {
                let stopped = AtomicBool::new(false);
                values.par_chunks_mut(cols).enumerate().for_each(|(k, row)| {
                    if !fill_row(k, row) {
                        stopped.store(true, Ordering::Relaxed);
                    }
                });
                complete = !stopped.load(Ordering::Relaxed);
            } else {
                for (k, row) in values.chunks_mut(cols).enumerate() {
                    if !fill_row(k, row) {
                        complete = false;
                        break;
                    }
                }
            }
        }
        progress.finish(complete);

        let outcome = ScanOutcome {
            result: CrossMatrix { rows, cols, values },
            complete,
            evaluated: progress.done(),
        };
        self.report("Cross scan", start, &outcome);
        Ok(outcome)
    }

    /// Selected (target, member) comparisons, or target k against member k when `pairs` is None
    pub fn cross_pairs(
        &self,
        tables: &LocusTables,
        targets: &Database,
        members: &Database,
        pairs: Option<&[(usize, usize)]>,
    ) -> Result<ScanOutcome<Vec<f64>>> {
        targets.check_layout(members)?;
        let pairs = resolve_pairs(targets, members, pairs)?;
        let t = tables.index_database(targets)?;
        let m = tables.index_database(members)?;
        let start = Instant::now();
        self.announce("Pair scan", pairs.len() as u64);

        let progress = Progress::new(pairs.len() as u64, &self.options);
        let mut values = vec![f64::NAN; pairs.len()];
        let mut complete = true;
        for (slot, &(a, b)) in values.iter_mut().zip(&pairs) {
            if self.options.cancelled() {
                complete = false;
                break;
            }
            *slot = tables.evaluate(t.row(a), m.row(b));
            progress.tick();
        }
        progress.finish(complete);

        let outcome = ScanOutcome {
            result: values,
            complete,
            evaluated: progress.done(),
        };
        self.report("Pair scan", start, &outcome);
        Ok(outcome)
    }

    /// Cross scan with the comparison set chosen by `selection`
    pub fn cross_with(
        &self,
        tables: &LocusTables,
        targets: &Database,
        members: &Database,
        selection: CrossSelection<'_>,
    ) -> Result<ScanOutcome<CrossResult>> {
        let wrap = |o: ScanOutcome<Vec<f64>>| ScanOutcome {
            result: CrossResult::Pairs(o.result),
            complete: o.complete,
            evaluated: o.evaluated,
        };
        match selection {
            CrossSelection::ManyToMany => self.cross(tables, targets, members).map(|o| ScanOutcome {
                result: CrossResult::Matrix(o.result),
                complete: o.complete,
                evaluated: o.evaluated,
            }),
            CrossSelection::Aligned => self.cross_pairs(tables, targets, members, None).map(wrap),
            CrossSelection::Pairs(pairs) => {
                self.cross_pairs(tables, targets, members, Some(pairs)).map(wrap)
            }
        }
    }

    /// Per-locus contributions for target `t` against member `m`
    pub fn pair_by_locus(
        &self,
        tables: &LocusTables,
        targets: &Database,
        t: usize,
        members: &Database,
        m: usize,
    ) -> Result<Vec<f64>> {
        targets.check_layout(members)?;
        if targets.nloci() != tables.nloci() {
            return Err(KinError::dimension_mismatch(
                "database loci vs locus tables",
                tables.nloci(),
                targets.nloci(),
            ));
        }
        check_row(t, targets.len())?;
        check_row(m, members.len())?;
        tables
            .tables()
            .iter()
            .enumerate()
            .map(|(locus, table)| {
                table.lookup(targets.genotype(t, locus), members.genotype(m, locus))
            })
            .collect()
    }

    /// Per-locus contributions for each listed (target, member) pair
    pub fn pairs_by_locus(
        &self,
        tables: &LocusTables,
        targets: &Database,
        members: &Database,
        pairs: Option<&[(usize, usize)]>,
    ) -> Result<Vec<Vec<f64>>> {
        targets.check_layout(members)?;
        let pairs = resolve_pairs(targets, members, pairs)?;
        let t = tables.index_database(targets)?;
        let m = tables.index_database(members)?;
        Ok(pairs
            .iter()
            .map(|&(a, b)| tables.contributions(t.row(a), m.row(b)))
            .collect())
    }

    /// Counts of all pairs by fully and partially matching loci
    pub fn match_tally(&self, db: &Database) -> Result<ScanOutcome<MatchTally>> {
        if self.options.parallel {
            return Ok(self.match_tally_parallel(db));
        }
        self.match_tally_shard(db, 1, 1)
    }

    /// Match tally over one shard of the pair space
    pub fn match_tally_shard(
        &self,
        db: &Database,
        njobs: i64,
        job: i64,
    ) -> Result<ScanOutcome<MatchTally>> {
        let plan = ShardPlan::new(pair_count(db.len()), njobs, job)?;
        let start = Instant::now();
        self.announce("Match tally", plan.len() as u64);
        let progress = Progress::new(plan.len() as u64, &self.options);
        let mut tally = MatchTally::new(db.nloci());
        let mut complete = true;
        for (i, j) in plan.pairs(db.len()) {
            if self.options.cancelled() {
                complete = false;
                break;
            }
            let (full, partial) = compare_profiles(db, i, j);
            tally.record(full, partial);
            progress.tick();
        }
        progress.finish(complete);
        let outcome = ScanOutcome {
            result: tally,
            complete,
            evaluated: progress.done(),
        };
        self.report("Match tally", start, &outcome);
        Ok(outcome)
    }

    fn match_tally_parallel(&self, db: &Database) -> ScanOutcome<MatchTally> {
        let n = db.len();
        let nloci = db.nloci();
        let start = Instant::now();
        self.announce("Match tally", pair_count(n));
        let progress = Progress::new(pair_count(n), &self.options);
        let stopped = AtomicBool::new(false);
        let tally = (0..n)
            .into_par_iter()
            .fold(
                || MatchTally::new(nloci),
                |mut acc, i| {
                    for j in (i + 1)..n {
                        if self.options.cancelled() {
                            stopped.store(true, Ordering::Relaxed);
                            break;
                        }
                        let (full, partial) = compare_profiles(db, i, j);
                        acc.record(full, partial);
                        progress.tick();
                    }
                    acc
                },
            )
            .reduce(
                || MatchTally::new(nloci),
                |mut a, b| {
                    for (x, y) in a.counts.iter_mut().zip(&b.counts) {
                        *x += y;
                    }
                    a
                },
            );
        let complete = !stopped.load(Ordering::Relaxed);
        progress.finish(complete);
        let outcome = ScanOutcome {
            result: tally,
            complete,
            evaluated: progress.done(),
        };
        self.report("Match tally", start, &outcome);
        outcome
    }

    /// Pairs with at least `min_full` identical loci, optionally within one shard
    pub fn match_hits(
        &self,
        db: &Database,
        min_full: usize,
        shard: Option<(i64, i64)>,
    ) -> Result<ScanOutcome<Vec<MatchHit>>> {
        let (njobs, job) = shard.unwrap_or((1, 1));
        let plan = ShardPlan::new(pair_count(db.len()), njobs, job)?;
        let start = Instant::now();
        self.announce(&format!("Match hits, at least {} loci", min_full), plan.len() as u64);
        let progress = Progress::new(plan.len() as u64, &self.options);
        let nloci = db.nloci();
        let mut hits = Vec::new();
        let mut complete = true;
        'pairs: for (i, j) in plan.pairs(db.len()) {
            if self.options.cancelled() {
                complete = false;
                break;
            }
            progress.tick();
            let (mut full, mut partial) = (0, 0);
            for locus in 0..nloci {
                match db.genotype(i, locus).shared_alleles(&db.genotype(j, locus)) {
                    2 => full += 1,
                    1 => partial += 1,
                    _ => {}
                }
                if full + (nloci - locus - 1) < min_full {
                    continue 'pairs;
                }
            }
            hits.push(MatchHit { i, j, full, partial });
        }
        progress.finish(complete);
        let outcome = ScanOutcome {
            result: hits,
            complete,
            evaluated: progress.done(),
        };
        self.report("Match hits", start, &outcome);
        Ok(outcome)
    }

    fn values_range(
        &self,
        tables: &LocusTables,
        indexed: &IndexedDatabase,
        plan: &ShardPlan,
    ) -> ScanOutcome<PairValues> {
        let n = indexed.len();
        let mut values = vec![f64::NAN; plan.len()];
        let progress = Progress::new(plan.len() as u64, &self.options);
        let mut complete = true;
        for (slot, (i, j)) in values.iter_mut().zip(plan.pairs(n)) {
            if self.options.cancelled() {
                complete = false;
                break;
            }
            *slot = tables.evaluate(indexed.row(i), indexed.row(j));
            progress.tick();
        }
        progress.finish(complete);
        ScanOutcome {
            result: PairValues {
                n,
                start: plan.start,
                values,
            },
            complete,
            evaluated: progress.done(),
        }
    }

    fn values_parallel(
        &self,
        tables: &LocusTables,
        indexed: &IndexedDatabase,
    ) -> ScanOutcome<PairValues> {
        let n = indexed.len();
        let total = pair_count(n);
        let mut values = vec![f64::NAN; total as usize];
        let progress = Progress::new(total, &self.options);
        let stopped = AtomicBool::new(false);

        // Row i of the packed triangle holds pairs (i, i+1..n)
        let mut rows: Vec<(usize, &mut [f64])> = Vec::with_capacity(n);
        let mut rest: &mut [f64] = &mut values;
        for i in 0..n.saturating_sub(1) {
            let (row, tail) = std::mem::take(&mut rest).split_at_mut(n - i - 1);
            rows.push((i, row));
            rest = tail;
        }
        rows.into_par_iter().for_each(|(i, row)| {
            let a = indexed.row(i);
            for (offset, slot) in row.iter_mut().enumerate() {
                if self.options.cancelled() {
                    stopped.store(true, Ordering::Relaxed);
                    return;
                }
                *slot = tables.evaluate(a, indexed.row(i + 1 + offset));
                progress.tick();
            }
        });

        let complete = !stopped.load(Ordering::Relaxed);
        progress.finish(complete);
        ScanOutcome {
            result: PairValues { n, start: 0, values },
            complete,
            evaluated: progress.done(),
        }
    }
}

/// Left-to-right aggregate, abandoned once even the best remaining loci cannot reach `cutoff`
#[inline]
fn evaluate_bounded(
    tables: &LocusTables,
    row: &[u32],
    col: &[u32],
    bounds: Option<&[f64]>,
    cutoff: f64,
) -> Option<f64> {
    let aggregate = tables.aggregate();
    let mut acc = aggregate.identity();
    for (m, table) in tables.tables().iter().enumerate() {
        acc = aggregate.combine(acc, table.value_at(row[m] as usize, col[m] as usize));
        if let Some(bounds) = bounds {
            if aggregate.combine(acc, bounds[m + 1]) < cutoff {
                return None;
            }
        }
    }
    Some(acc)
}

fn compare_profiles(db: &Database, i: usize, j: usize) -> (usize, usize) {
    let mut full = 0;
    let mut partial = 0;
    for locus in 0..db.nloci() {
        match db.genotype(i, locus).shared_alleles(&db.genotype(j, locus)) {
            2 => full += 1,
            1 => partial += 1,
            _ => {}
        }
    }
    (full, partial)
}

fn check_row(row: usize, len: usize) -> Result<()> {
    if row >= len {
        return Err(KinError::IndexOutOfRange { index: row, len });
    }
    Ok(())
}

fn resolve_pairs(
    targets: &Database,
    members: &Database,
    pairs: Option<&[(usize, usize)]>,
) -> Result<Vec<(usize, usize)>> {
    match pairs {
        Some(pairs) => {
            for &(a, b) in pairs {
                check_row(a, targets.len())?;
                check_row(b, members.len())?;
            }
            Ok(pairs.to_vec())
        }
        None => {
            if targets.len() != members.len() {
                return Err(KinError::dimension_mismatch(
                    "aligned comparison (profiles)",
                    targets.len(),
                    members.len(),
                ));
            }
            Ok((0..targets.len()).map(|k| (k, k)).collect())
        }
    }
}

/// Concatenate shard hit lists in pair order
pub fn merge_hits(shards: Vec<Vec<Hit>>) -> Vec<Hit> {
    let mut hits: Vec<Hit> = shards.into_iter().flatten().collect();
    hits.sort_by(|a, b| (a.i, a.j).cmp(&(b.i, b.j)));
    hits
}

/// Stitch shard value blocks back into the full packed triangle
///
/// Fails unless the blocks share a database size and tile the pair space
/// exactly.
pub fn merge_pair_values(mut shards: Vec<PairValues>) -> Result<PairValues> {
    let n = shards
        .first()
        .map(|s| s.n)
        .ok_or_else(|| KinError::invalid_parameter("no shard results to merge"))?;
    shards.sort_by_key(|s| s.start);
    let total = pair_count(n);
    let mut values = Vec::with_capacity(total as usize);
    let mut next = 0;
    for shard in shards {
        if shard.n != n {
            return Err(KinError::dimension_mismatch("shard database size", n, shard.n));
        }
        if shard.start != next {
            return Err(KinError::invalid_parameter(format!(
                "shards do not tile the pair space: expected a block starting at pair {}, found {}",
                next, shard.start
            )));
        }
        next = shard.end();
        values.extend(shard.values);
    }
    if next != total {
        return Err(KinError::invalid_parameter(format!(
            "shards cover {} of {} pairs",
            next, total
        )));
    }
    Ok(PairValues { n, start: 0, values })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kinship::{KinshipParams, Relationship};
    use crate::core::table::{Aggregate, LocusTable};
    use crate::data::{AlleleFrequencyTable, LocusFrequencies};
    use std::sync::Arc;

    fn frequencies(nloci: usize, ladder: usize) -> AlleleFrequencyTable {
        let raw: Vec<f64> = (1..=ladder).map(|a| a as f64).collect();
        let total: f64 = raw.iter().sum();
        let dense: Vec<f64> = raw.iter().map(|x| x / total).collect();
        AlleleFrequencyTable::new(
            (0..nloci)
                .map(|m| LocusFrequencies::from_dense(format!("L{}", m), &dense).unwrap())
                .collect(),
        )
    }

    fn sibling_tables(nloci: usize, ladder: usize) -> LocusTables {
        let params = KinshipParams::from_relationship(Relationship::FullSiblings, 0.01).unwrap();
        LocusTables::kinship(&frequencies(nloci, ladder), &params, false).unwrap()
    }

    /// Deterministic pseudo-random database
    fn random_db(n: usize, nloci: usize, ladder: usize, seed: u64) -> Database {
        let mut state = seed;
        let mut next = || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 33) % ladder as u64) as i64 + 1
        };
        let rows: Vec<Vec<i64>> = (0..n)
            .map(|_| (0..2 * nloci).map(|_| next()).collect())
            .collect();
        Database::from_rows(nloci, &rows).unwrap()
    }

    #[test]
    fn test_three_profile_modes_agree() {
        let tables = sibling_tables(2, 4);
        let db = Database::from_rows(2, &[vec![1, 2, 3, 3], vec![1, 2, 3, 4], vec![4, 4, 1, 2]])
            .unwrap();
        let engine = ScanEngine::default();

        let full = engine.full(&tables, &db).unwrap();
        assert!(full.complete);
        assert_eq!(full.result.len(), 3);

        for job in 1..=3 {
            let shard = engine.shard(&tables, &db, 3, job).unwrap().result;
            assert_eq!(shard.len(), 1);
            let (i, j, v) = shard.iter().next().unwrap();
            assert_eq!(full.result.get(i, j), Some(v));
        }

        let hits = engine.hits(&tables, &db, 0.0).unwrap().result;
        assert_eq!(hits.len(), 3);
        for hit in hits {
            assert_eq!(full.result.get(hit.i, hit.j), Some(hit.value));
        }
    }

    #[test]
    fn test_full_scan_matches_direct_lookup() {
        let tables = sibling_tables(3, 6);
        let db = random_db(12, 3, 6, 7);
        let engine = ScanEngine::default();
        let full = engine.full(&tables, &db).unwrap().result;
        for (i, j, v) in full.iter() {
            let by_locus = engine.pair_by_locus(&tables, &db, i, &db, j).unwrap();
            let product: f64 = by_locus.iter().product();
            assert!((v - product).abs() <= 1e-12 * product.abs());
        }
        assert_eq!(full.get(3, 3), None);
        assert_eq!(full.get(5, 2), full.get(2, 5));
    }

    #[test]
    fn test_shards_reproduce_full_scan() {
        let tables = sibling_tables(4, 5);
        let db = random_db(17, 4, 5, 11);
        let engine = ScanEngine::default();
        let full = engine.full(&tables, &db).unwrap().result;
        for njobs in [1, 2, 5, 9, 200] {
            let shards: Vec<PairValues> = (1..=njobs)
                .map(|job| engine.shard(&tables, &db, njobs, job).unwrap().result)
                .collect();
            let merged = merge_pair_values(shards).unwrap();
            assert_eq!(merged, full);
        }
    }

    #[test]
    fn test_hits_agree_with_full_scan() {
        let tables = sibling_tables(5, 4);
        let db = random_db(25, 5, 4, 3);
        let engine = ScanEngine::default();
        let full = engine.full(&tables, &db).unwrap().result;
        for threshold in [0.5, 1.0, 10.0, 100.0] {
            let expected: Vec<Hit> = full
                .iter()
                .filter(|&(_, _, v)| v >= threshold)
                .map(|(i, j, value)| Hit { i, j, value })
                .collect();
            let hits = engine.hits(&tables, &db, threshold).unwrap().result;
            assert_eq!(hits, expected, "threshold {}", threshold);

            let sharded: Vec<Vec<Hit>> = (1..=4)
                .map(|job| engine.shard_hits(&tables, &db, threshold, 4, job).unwrap().result)
                .collect();
            assert_eq!(merge_hits(sharded), expected);
        }
        assert!(engine.hits(&tables, &db, f64::NAN).is_err());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let tables = sibling_tables(3, 5);
        let db = random_db(30, 3, 5, 5);
        let sequential = ScanEngine::default().full(&tables, &db).unwrap().result;
        let parallel = ScanEngine::new(ScanOptions::sequential().with_parallel(true))
            .full(&tables, &db)
            .unwrap();
        assert!(parallel.complete);
        assert_eq!(parallel.evaluated, pair_count(30));
        assert_eq!(parallel.result, sequential);
    }

    #[test]
    fn test_invalid_shard_fails_before_scanning() {
        let tables = sibling_tables(2, 4);
        let db = random_db(5, 2, 4, 1);
        let engine = ScanEngine::default();
        assert!(matches!(
            engine.shard(&tables, &db, 3, 4),
            Err(KinError::InvalidJobIndex { job: 4, njobs: 3 })
        ));
        assert!(matches!(engine.shard(&tables, &db, 0, 1), Err(KinError::InvalidJobIndex { .. })));
    }

    #[test]
    fn test_cancelled_scan_returns_partial_result() {
        let tables = sibling_tables(2, 4);
        let db = random_db(10, 2, 4, 9);
        let flag = Arc::new(AtomicBool::new(true));
        let engine = ScanEngine::new(ScanOptions::sequential().with_cancel(flag.clone()));
        let outcome = engine.full(&tables, &db).unwrap();
        assert!(!outcome.complete);
        assert_eq!(outcome.evaluated, 0);
        assert!(outcome.result.values.iter().all(|v| v.is_nan()));

        flag.store(false, Ordering::Relaxed);
        let outcome = engine.full(&tables, &db).unwrap();
        assert!(outcome.complete);
        assert_eq!(outcome.evaluated, pair_count(10));
    }

    #[test]
    fn test_cancel_mid_scan_keeps_a_valid_prefix() {
        let tables = sibling_tables(2, 4);
        let db = random_db(10, 2, 4, 9);
        let full = ScanEngine::default().full(&tables, &db).unwrap().result;
        let all_hits = ScanEngine::default().hits(&tables, &db, 1.0).unwrap().result;

        let flag = Arc::new(AtomicBool::new(false));
        let mut options = ScanOptions::sequential().with_cancel(flag.clone());
        options.cancel_after = Some(17);
        let engine = ScanEngine::new(options);

        let partial = engine.full(&tables, &db).unwrap();
        assert!(!partial.complete);
        assert_eq!(partial.evaluated, 17);
        for (k, (got, want)) in partial.result.values.iter().zip(&full.values).enumerate() {
            if k < 17 {
                assert_eq!(got, want, "pair {}", k);
            } else {
                assert!(got.is_nan(), "pair {}", k);
            }
        }

        flag.store(false, Ordering::Relaxed);
        let partial = engine.hits(&tables, &db, 1.0).unwrap();
        assert!(!partial.complete);
        assert_eq!(partial.evaluated, 17);
        let prefix: Vec<Hit> = all_hits
            .into_iter()
            .filter(|h| pair_index(h.i, h.j, db.len()) < 17)
            .collect();
        assert_eq!(partial.result, prefix);
    }

    #[test]
    fn test_cross_orientation_with_asymmetric_table() {
        // ladder 2: genotypes 1/1 (0), 2/1 (1), 2/2 (2)
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let table = LocusTable::from_values(0, values, false).unwrap();
        let tables = LocusTables::from_tables(vec![table], Aggregate::Product).unwrap();
        let targets = Database::from_rows(1, &[vec![1, 1]]).unwrap();
        let members = Database::from_rows(1, &[vec![2, 1], vec![2, 2]]).unwrap();
        let engine = ScanEngine::default();

        let cross = engine.cross(&tables, &targets, &members).unwrap().result;
        assert_eq!((cross.rows, cross.cols), (2, 1));
        assert_eq!(cross.get(0, 0), 2.0);
        assert_eq!(cross.get(1, 0), 3.0);

        let swapped = engine.cross(&tables, &members, &targets).unwrap().result;
        assert_eq!((swapped.rows, swapped.cols), (1, 2));
        assert_eq!(swapped.row(0), &[4.0, 7.0]);
    }

    #[test]
    fn test_cross_selection_modes() {
        let tables = sibling_tables(2, 5);
        let targets = random_db(4, 2, 5, 21);
        let members = random_db(6, 2, 5, 22);
        let engine = ScanEngine::new(ScanOptions::sequential().with_parallel(true));
        let matrix = engine.cross(&tables, &targets, &members).unwrap().result;

        let pairs = [(0, 5), (3, 1), (2, 2)];
        let selected = engine
            .cross_pairs(&tables, &targets, &members, Some(&pairs))
            .unwrap()
            .result;
        for (&(t, m), v) in pairs.iter().zip(&selected) {
            assert_eq!(matrix.get(m, t), *v);
        }
        let by_locus = engine.pairs_by_locus(&tables, &targets, &members, Some(&pairs)).unwrap();
        assert_eq!(by_locus.len(), 3);
        assert!((by_locus[1].iter().product::<f64>() - selected[1]).abs() <= 1e-12 * selected[1]);

        assert!(matches!(
            engine.cross_with(&tables, &targets, &members, CrossSelection::Aligned),
            Err(KinError::DimensionMismatch { .. })
        ));
        let bad = [(4, 0)];
        assert!(matches!(
            engine.cross_pairs(&tables, &targets, &members, Some(&bad)),
            Err(KinError::IndexOutOfRange { index: 4, len: 4 })
        ));
        match engine
            .cross_with(&tables, &targets, &targets, CrossSelection::Aligned)
            .unwrap()
            .result
        {
            CrossResult::Pairs(values) => assert_eq!(values.len(), 4),
            CrossResult::Matrix(_) => panic!("aligned selection returned a matrix"),
        }
    }

    #[test]
    fn test_identity_tables_count_matching_loci() {
        let rows = [
            vec![1, 2, 3, 3, 5, 1],
            vec![2, 1, 3, 3, 5, 2],
            vec![4, 4, 1, 1, 2, 2],
        ];
        let db = Database::from_rows(3, &rows).unwrap();
        let tables = LocusTables::identity(&[&db]).unwrap();
        let full = ScanEngine::default().full(&tables, &db).unwrap().result;
        assert_eq!(full.get(0, 1), Some(2.0));
        assert_eq!(full.get(0, 2), Some(0.0));
        let hits = ScanEngine::default().hits(&tables, &db, 2.0).unwrap().result;
        assert_eq!(hits, vec![Hit { i: 0, j: 1, value: 2.0 }]);
    }

    #[test]
    fn test_match_tally() {
        let db = random_db(40, 4, 3, 17);
        let engine = ScanEngine::default();
        let tally = engine.match_tally(&db).unwrap().result;
        assert_eq!(tally.total(), pair_count(40));

        let mut merged = MatchTally::new(4);
        for job in 1..=3 {
            merged.merge(&engine.match_tally_shard(&db, 3, job).unwrap().result).unwrap();
        }
        assert_eq!(merged, tally);

        let parallel = ScanEngine::new(ScanOptions::sequential().with_parallel(true))
            .match_tally(&db)
            .unwrap()
            .result;
        assert_eq!(parallel, tally);

        let hits = engine.match_hits(&db, 3, None).unwrap().result;
        let expected: u64 = (3..=4)
            .map(|f| (0..=4 - f).map(|p| tally.get(f, p)).sum::<u64>())
            .sum();
        assert_eq!(hits.len() as u64, expected);
        assert!(hits.iter().all(|h| h.full >= 3 && h.full + h.partial <= 4));
    }

    #[test]
    fn test_merge_rejects_gaps() {
        let tables = sibling_tables(2, 4);
        let db = random_db(8, 2, 4, 2);
        let engine = ScanEngine::default();
        let shards = vec![
            engine.shard(&tables, &db, 3, 1).unwrap().result,
            engine.shard(&tables, &db, 3, 3).unwrap().result,
        ];
        assert!(merge_pair_values(shards).is_err());
        assert!(merge_pair_values(Vec::new()).is_err());
    }
}
