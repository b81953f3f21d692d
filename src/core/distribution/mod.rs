// mod.rs - Distributions of aggregate statistics

pub mod approx;
pub mod exact;
pub mod locus;

pub use approx::{approximate, approximate_multiset, ApproxMethod, Approximation};
pub use exact::{
    convolve, convolve_all, convolve_multiset, convolve_power, ExactOptions, Truncation,
};
pub use locus::{locus_distribution, locus_distributions};

use crate::error::{KinError, Result};
use serde::{Deserialize, Serialize};

/// Mass tolerance for supplied and exactly convolved distributions
pub const EXACT_TOLERANCE: f64 = 1e-9;

/// Mass tolerance for binned approximations and frequency-derived distributions
pub const APPROX_TOLERANCE: f64 = 1e-6;

/// Largest support an exact convolution step may produce
pub const DEFAULT_SUPPORT_LIMIT: usize = 20_000_000;

/// Support points closer than this (relative) are merged
pub(crate) const MERGE_TOLERANCE: f64 = 1e-12;

/// Renormalize once kept plus truncated mass drifts this far from 1
pub(crate) const DRIFT_TOLERANCE: f64 = 1e-12;

/// Tail and quantile queries shared by exact and approximate distributions
pub trait CumulativeDistribution {
    /// P(X <= t)
    fn cdf(&self, t: f64) -> f64;

    /// P(X >= t)
    fn tail(&self, t: f64) -> f64;

    /// Smallest x with P(X <= x) >= p
    fn quantile(&self, p: f64) -> Result<f64>;

    /// Smallest x with P(X >= x) <= alpha
    fn tail_quantile(&self, alpha: f64) -> Result<f64>;

    fn mean(&self) -> f64;
}

pub(crate) fn check_probability(p: f64, what: &str) -> Result<()> {
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(KinError::invalid_parameter(format!(
            "{} must be a probability in [0, 1], got {}",
            what, p
        )));
    }
    Ok(())
}

/// Sort atoms by value and merge (near-)equal values
pub(crate) fn merge_atoms(mut atoms: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    atoms.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut merged: Vec<(f64, f64)> = Vec::with_capacity(atoms.len());
    for (x, p) in atoms {
        match merged.last_mut() {
            Some(last) if (x - last.0).abs() <= MERGE_TOLERANCE * x.abs().max(last.0.abs()) => {
                last.1 += p
            }
            _ => merged.push((x, p)),
        }
    }
    merged
}

/// Discrete distribution over ascending, distinct support points
///
/// `truncated` records mass removed on purpose (probability floor); the kept
/// probabilities sum to `1 - truncated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    values: Vec<f64>,
    probs: Vec<f64>,
    truncated: f64,
}

impl Distribution {
    /// Validate and build; probabilities must sum to 1 within [`EXACT_TOLERANCE`]
    pub fn new(values: Vec<f64>, probs: Vec<f64>) -> Result<Self> {
        Self::with_tolerance(values, probs, EXACT_TOLERANCE)
    }

    pub fn with_tolerance(values: Vec<f64>, probs: Vec<f64>, tolerance: f64) -> Result<Self> {
        if values.len() != probs.len() {
            return Err(KinError::dimension_mismatch(
                "distribution probabilities",
                values.len(),
                probs.len(),
            ));
        }
        if values.is_empty() {
            return Err(KinError::invalid_parameter(
                "distribution needs at least one support point",
            ));
        }
        if let Some(x) = values.iter().find(|x| !x.is_finite()) {
            return Err(KinError::invalid_parameter(format!("non-finite support point {}", x)));
        }
        if let Some(p) = probs
            .iter()
            .find(|p| !p.is_finite() || **p < -tolerance || **p > 1.0 + tolerance)
        {
            return Err(KinError::invalid_parameter(format!("probability {} outside [0, 1]", p)));
        }
        let total: f64 = probs.iter().sum();
        if (total - 1.0).abs() > tolerance {
            return Err(KinError::NormalizationError { total, tolerance });
        }
        let atoms = values.into_iter().zip(probs.into_iter().map(|p| p.max(0.0))).collect();
        Ok(Self::from_atoms(atoms, 0.0))
    }

    /// All mass on one value
    pub fn point(value: f64) -> Self {
        Self {
            values: vec![value],
            probs: vec![1.0],
            truncated: 0.0,
        }
    }

    /// Build from unchecked atoms (engine-internal)
    pub(crate) fn from_atoms(atoms: Vec<(f64, f64)>, truncated: f64) -> Self {
        let (values, probs) = merge_atoms(atoms).into_iter().unzip();
        Self {
            values,
            probs,
            truncated,
        }
    }

    /// Scale kept and truncated mass back to 1 when rounding has drifted
    pub(crate) fn renormalized(mut self) -> Self {
        let total = self.kept_mass() + self.truncated;
        if total > 0.0 && (total - 1.0).abs() > DRIFT_TOLERANCE {
            self.probs.iter_mut().for_each(|p| *p /= total);
            self.truncated /= total;
        }
        self
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// (value, probability) pairs in ascending value order
    pub fn atoms(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.values.iter().copied().zip(self.probs.iter().copied())
    }

    /// Mass removed by truncation
    pub fn truncated_mass(&self) -> f64 {
        self.truncated
    }

    pub fn kept_mass(&self) -> f64 {
        self.probs.iter().sum()
    }

    pub fn min(&self) -> f64 {
        self.values.first().copied().unwrap_or(f64::NAN)
    }

    pub fn max(&self) -> f64 {
        self.values.last().copied().unwrap_or(f64::NAN)
    }

    pub fn variance(&self) -> f64 {
        let mean = CumulativeDistribution::mean(self);
        self.atoms().map(|(x, p)| p * (x - mean) * (x - mean)).sum::<f64>() / self.kept_mass()
    }

    fn cumulative(&self) -> Vec<f64> {
        let mut acc = 0.0;
        self.probs
            .iter()
            .map(|p| {
                acc += p;
                acc
            })
            .collect()
    }

    fn upper_cumulative(&self) -> Vec<f64> {
        let mut acc = 0.0;
        let mut upper: Vec<f64> = self
            .probs
            .iter()
            .rev()
            .map(|p| {
                acc += p;
                acc
            })
            .collect();
        upper.reverse();
        upper
    }
}

impl CumulativeDistribution for Distribution {
    fn cdf(&self, t: f64) -> f64 {
        let k = self.values.partition_point(|&x| x <= t);
        if k == 0 {
            0.0
        } else {
            self.cumulative()[k - 1]
        }
    }

    fn tail(&self, t: f64) -> f64 {
        let k = self.values.partition_point(|&x| x < t);
        if k == self.values.len() {
            0.0
        } else {
            self.upper_cumulative()[k]
        }
    }

    /// Ties resolve to the lowest support point; when truncation keeps the
    /// cumulative mass below `p`, the largest support point is returned.
    fn quantile(&self, p: f64) -> Result<f64> {
        check_probability(p, "quantile level")?;
        let cumulative = self.cumulative();
        let k = cumulative.partition_point(|&c| c < p);
        Ok(self.values[k.min(self.values.len() - 1)])
    }

    /// Infinite when even the largest support point has tail mass above `alpha`.
    fn tail_quantile(&self, alpha: f64) -> Result<f64> {
        check_probability(alpha, "tail probability")?;
        let upper = self.upper_cumulative();
        let k = upper.partition_point(|&u| u > alpha);
        Ok(self.values.get(k).copied().unwrap_or(f64::INFINITY))
    }

    fn mean(&self) -> f64 {
        self.atoms().map(|(x, p)| x * p).sum::<f64>() / self.kept_mass()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_point() -> Distribution {
        Distribution::new(vec![3.0, 1.0, 2.0], vec![0.5, 0.25, 0.25]).unwrap()
    }

    #[test]
    fn test_new_sorts_and_validates() {
        let d = three_point();
        assert_eq!(d.values(), &[1.0, 2.0, 3.0]);
        assert_eq!(d.probs(), &[0.25, 0.25, 0.5]);
        assert!((d.mean() - 2.25).abs() < 1e-12);

        assert!(matches!(
            Distribution::new(vec![1.0, 2.0], vec![0.5, 0.4]),
            Err(KinError::NormalizationError { .. })
        ));
        assert!(matches!(
            Distribution::new(vec![1.0], vec![0.5, 0.5]),
            Err(KinError::DimensionMismatch { .. })
        ));
        assert!(Distribution::new(vec![f64::INFINITY], vec![1.0]).is_err());
        assert!(Distribution::new(vec![1.0, 2.0], vec![1.5, -0.5]).is_err());
    }

    #[test]
    fn test_duplicate_values_merge() {
        let d = Distribution::new(vec![1.0, 2.0, 1.0], vec![0.25, 0.5, 0.25]).unwrap();
        assert_eq!(d.len(), 2);
        assert_eq!(d.probs(), &[0.5, 0.5]);
    }

    #[test]
    fn test_cdf_and_tail() {
        let d = three_point();
        assert_eq!(d.cdf(0.5), 0.0);
        assert_eq!(d.cdf(2.0), 0.5);
        assert_eq!(d.cdf(2.5), 0.5);
        assert_eq!(d.tail(2.0), 0.75);
        assert_eq!(d.tail(2.5), 0.5);
        assert_eq!(d.tail(3.5), 0.0);
        assert!((d.tail(-1.0) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_quantile_tie_break() {
        let d = three_point();
        assert_eq!(d.quantile(0.0).unwrap(), 1.0);
        assert_eq!(d.quantile(0.25).unwrap(), 1.0);
        assert_eq!(d.quantile(0.26).unwrap(), 2.0);
        assert_eq!(d.quantile(1.0).unwrap(), 3.0);
        assert!(d.quantile(1.5).is_err());

        assert_eq!(d.tail_quantile(0.5).unwrap(), 3.0);
        assert_eq!(d.tail_quantile(0.75).unwrap(), 2.0);
        assert_eq!(d.tail_quantile(1.0).unwrap(), 1.0);
        assert_eq!(d.tail_quantile(0.1).unwrap(), f64::INFINITY);
    }

    #[test]
    fn test_quantile_round_trip() {
        let d = Distribution::new(vec![0.5, 1.5, 4.0, 7.25, 9.0], vec![0.1, 0.2, 0.3, 0.15, 0.25])
            .unwrap();
        for t in [0.0, 0.5, 1.0, 1.5, 3.0, 4.0, 7.25, 8.0, 9.0] {
            let q = d.quantile(d.cdf(t)).unwrap();
            assert!(q <= t || d.cdf(t) == 0.0, "t={} q={}", t, q);
        }
        for &t in d.values() {
            assert_eq!(d.quantile(d.cdf(t)).unwrap(), t);
        }
    }
}
