// shard.rs - Job sharding of the unordered pair index space

use crate::error::{KinError, Result};
use serde::{Deserialize, Serialize};

/// Number of unordered pairs i < j among `n` profiles
pub fn pair_count(n: usize) -> u64 {
    let n = n as u64;
    n * n.saturating_sub(1) / 2
}

/// Linear index of the first pair of row `i`
fn row_offset(i: u64, n: u64) -> u128 {
    let i = i as u128;
    let n = n as u128;
    i * (2 * n - i - 1) / 2
}

/// Linear index of pair (i, j), i < j < n, in row-major order
pub fn pair_index(i: usize, j: usize, n: usize) -> u64 {
    debug_assert!(i < j && j < n);
    (row_offset(i as u64, n as u64) + (j - i - 1) as u128) as u64
}

/// Inverse of [`pair_index`]
pub fn pair_from_index(k: u64, n: usize) -> (usize, usize) {
    let n64 = n as u64;
    let k128 = k as u128;
    // Closed-form estimate, corrected for floating-point error
    let b = (2 * n64 - 1) as f64;
    let disc = (b * b - 8.0 * k as f64).max(0.0);
    let mut i = ((b - disc.sqrt()) / 2.0).floor().max(0.0) as u64;
    i = i.min(n64.saturating_sub(2));
    while i > 0 && row_offset(i, n64) > k128 {
        i -= 1;
    }
    while i + 1 < n64 && row_offset(i + 1, n64) <= k128 {
        i += 1;
    }
    let j = (k128 - row_offset(i, n64)) as u64 + i + 1;
    (i as usize, j as usize)
}

/// Contiguous slice `[start, end)` of a pair index space assigned to one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPlan {
    pub job: u64,
    pub njobs: u64,
    pub total: u64,
    pub start: u64,
    pub end: u64,
}

impl ShardPlan {
    /// Shard `job` (1-based) of `njobs` over `total` pairs
    ///
    /// Shard sizes differ by at most one.
    pub fn new(total: u64, njobs: i64, job: i64) -> Result<Self> {
        if njobs <= 0 || job < 1 || job > njobs {
            return Err(KinError::InvalidJobIndex { job, njobs });
        }
        let njobs = njobs as u64;
        let job = job as u64;
        let bound = |k: u64| ((k as u128 * total as u128) / njobs as u128) as u64;
        Ok(Self {
            job,
            njobs,
            total,
            start: bound(job - 1),
            end: bound(job),
        })
    }

    /// Every shard of the plan, in job order
    pub fn all(total: u64, njobs: i64) -> Result<Vec<Self>> {
        if njobs <= 0 {
            return Err(KinError::InvalidJobIndex { job: 1, njobs });
        }
        (1..=njobs).map(|job| Self::new(total, njobs, job)).collect()
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    /// Unordered pairs (i, j) of an `n`-profile database covered by this shard
    pub fn pairs(&self, n: usize) -> PairRange {
        pair_range(n, self.start, self.end - self.start)
    }
}

/// `len` consecutive pairs of an `n`-profile database starting at pair index `start`
pub fn pair_range(n: usize, start: u64, len: u64) -> PairRange {
    let (i, j) = if len == 0 { (0, 1) } else { pair_from_index(start, n) };
    PairRange {
        n,
        i,
        j,
        remaining: len,
    }
}

/// Iterator over a contiguous run of unordered pairs
#[derive(Debug, Clone)]
pub struct PairRange {
    n: usize,
    i: usize,
    j: usize,
    remaining: u64,
}

impl Iterator for PairRange {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let pair = (self.i, self.j);
        self.remaining -= 1;
        self.j += 1;
        if self.j == self.n {
            self.i += 1;
            self.j = self.i + 1;
        }
        Some(pair)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let r = self.remaining as usize;
        (r, Some(r))
    }
}

impl ExactSizeIterator for PairRange {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_index_round_trip() {
        for n in 2..=40 {
            let mut k = 0;
            for i in 0..n {
                for j in (i + 1)..n {
                    assert_eq!(pair_index(i, j, n), k);
                    assert_eq!(pair_from_index(k, n), (i, j));
                    k += 1;
                }
            }
            assert_eq!(k, pair_count(n));
        }
    }

    #[test]
    fn test_pair_from_index_large_database() {
        let n = 3_000_000;
        let last = pair_count(n) - 1;
        assert_eq!(pair_from_index(last, n), (n - 2, n - 1));
        assert_eq!(pair_from_index(0, n), (0, 1));
        let k = pair_index(1_234_567, 2_345_678, n);
        assert_eq!(pair_from_index(k, n), (1_234_567, 2_345_678));
    }

    #[test]
    fn test_shards_cover_every_pair_once() {
        for n in [0, 1, 2, 3, 7, 20] {
            for njobs in 1..=12 {
                let plans = ShardPlan::all(pair_count(n), njobs).unwrap();
                let mut pairs = Vec::new();
                for plan in &plans {
                    pairs.extend(plan.pairs(n));
                }
                let expected: Vec<_> = (0..n)
                    .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
                    .collect();
                assert_eq!(pairs, expected, "n={} njobs={}", n, njobs);

                let sizes: Vec<usize> = plans.iter().map(|p| p.len()).collect();
                let min = sizes.iter().min().copied().unwrap_or(0);
                let max = sizes.iter().max().copied().unwrap_or(0);
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn test_one_pair_per_job() {
        let plans = ShardPlan::all(3, 3).unwrap();
        let pairs: Vec<Vec<_>> = plans.iter().map(|p| p.pairs(3).collect()).collect();
        assert_eq!(pairs, vec![vec![(0, 1)], vec![(0, 2)], vec![(1, 2)]]);
    }

    #[test]
    fn test_invalid_job_index() {
        assert!(matches!(
            ShardPlan::new(10, 0, 1),
            Err(KinError::InvalidJobIndex { job: 1, njobs: 0 })
        ));
        assert!(matches!(ShardPlan::new(10, 3, 0), Err(KinError::InvalidJobIndex { .. })));
        assert!(matches!(ShardPlan::new(10, 3, 4), Err(KinError::InvalidJobIndex { .. })));
        assert!(ShardPlan::all(10, -2).is_err());
    }

    #[test]
    fn test_no_overflow_for_huge_spaces() {
        let total = pair_count(5_000_000);
        let plan = ShardPlan::new(total, 1000, 1000).unwrap();
        assert_eq!(plan.end, total);
        assert!(plan.len() as u64 >= total / 1000);
    }
}
