// exact.rs - Exact convolution of independent item distributions

use super::{check_probability, merge_atoms, Distribution, DEFAULT_SUPPORT_LIMIT};
use crate::core::table::Aggregate;
use crate::error::{KinError, Result};
use serde::{Deserialize, Serialize};

/// Bounds on negligible mass applied after every convolution step
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Truncation {
    /// Support points with probability below this are dropped (mass recorded)
    pub pr0: f64,
    /// Upper tail of total mass below this collapses onto its largest value
    pub prinf: f64,
}

impl Truncation {
    pub fn new(pr0: f64, prinf: f64) -> Result<Self> {
        check_probability(pr0, "pr0")?;
        check_probability(prinf, "prinf")?;
        if pr0 >= 1.0 || prinf >= 1.0 {
            return Err(KinError::invalid_parameter("truncation bounds must be below 1"));
        }
        Ok(Self { pr0, prinf })
    }

    pub fn is_none(&self) -> bool {
        self.pr0 == 0.0 && self.prinf == 0.0
    }

    /// Apply to sorted, merged atoms; returns kept atoms and dropped mass
    fn apply(&self, mut atoms: Vec<(f64, f64)>) -> Result<(Vec<(f64, f64)>, f64)> {
        if self.is_none() {
            return Ok((atoms, 0.0));
        }
        let mut collapsed = None;
        if self.prinf > 0.0 && atoms.len() > 1 {
            let mut upper = 0.0;
            let mut k = atoms.len();
            while k > 0 && upper + atoms[k - 1].1 < self.prinf {
                upper += atoms[k - 1].1;
                k -= 1;
            }
            if atoms.len() - k > 1 {
                let top = atoms[atoms.len() - 1].0;
                atoms.truncate(k);
                atoms.push((top, upper));
                collapsed = Some(atoms.len() - 1);
            }
        }

        let mut dropped = 0.0;
        if self.pr0 > 0.0 {
            let mut kept = Vec::with_capacity(atoms.len());
            for (idx, (x, p)) in atoms.into_iter().enumerate() {
                if p < self.pr0 && collapsed != Some(idx) {
                    dropped += p;
                } else {
                    kept.push((x, p));
                }
            }
            atoms = kept;
        }
        if atoms.is_empty() {
            return Err(KinError::invalid_parameter(format!(
                "pr0 = {} removes every support point",
                self.pr0
            )));
        }
        Ok((atoms, dropped))
    }
}

/// Limits for exact convolution
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExactOptions {
    pub truncation: Truncation,
    /// Largest number of (pre-merge) states one step may create
    pub support_limit: usize,
}

impl Default for ExactOptions {
    fn default() -> Self {
        Self {
            truncation: Truncation::default(),
            support_limit: DEFAULT_SUPPORT_LIMIT,
        }
    }
}

/// Distribution of `combine(X, Y)` for independent X ~ `a`, Y ~ `b`
pub fn convolve(
    a: &Distribution,
    b: &Distribution,
    combine: Aggregate,
    options: &ExactOptions,
) -> Result<Distribution> {
    let states = a.len() as u128 * b.len() as u128;
    if states > options.support_limit as u128 {
        return Err(KinError::SupportTooLarge {
            states,
            limit: options.support_limit,
        });
    }
    let mut atoms = Vec::with_capacity(states as usize);
    for (x, p) in a.atoms() {
        for (y, q) in b.atoms() {
            atoms.push((combine.combine(x, y), p * q));
        }
    }
    let (atoms, dropped) = options.truncation.apply(merge_atoms(atoms))?;
    let truncated = 1.0 - (1.0 - a.truncated_mass()) * (1.0 - b.truncated_mass()) + dropped;
    Ok(Distribution::from_atoms(atoms, truncated).renormalized())
}

/// Distribution of the aggregate of `n` independent copies of `item`
///
/// Convolves iteratively, so the support is checked against the limit at
/// every step. `n = 0` gives the aggregate's identity.
pub fn convolve_power(
    item: &Distribution,
    n: u64,
    combine: Aggregate,
    options: &ExactOptions,
) -> Result<Distribution> {
    if n == 0 {
        return Ok(Distribution::point(combine.identity()));
    }
    let mut acc = item.clone();
    for _ in 1..n {
        acc = convolve(&acc, item, combine, options)?;
    }
    Ok(acc)
}

/// Distribution of the aggregate of independent, non-identical items
pub fn convolve_all(
    items: &[Distribution],
    combine: Aggregate,
    options: &ExactOptions,
) -> Result<Distribution> {
    let (first, rest) = items
        .split_first()
        .ok_or_else(|| KinError::invalid_parameter("no item distributions to convolve"))?;
    rest.iter()
        .try_fold(first.clone(), |acc, item| convolve(&acc, item, combine, options))
}

/// Aggregate over `count` copies of each listed item
pub fn convolve_multiset(
    items: &[(Distribution, u64)],
    combine: Aggregate,
    options: &ExactOptions,
) -> Result<Distribution> {
    let mut acc: Option<Distribution> = None;
    for (item, count) in items {
        for _ in 0..*count {
            acc = Some(match acc {
                None => item.clone(),
                Some(d) => convolve(&d, item, combine, options)?,
            });
        }
    }
    Ok(acc.unwrap_or_else(|| Distribution::point(combine.identity())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::distribution::{CumulativeDistribution, EXACT_TOLERANCE};

    fn two_point() -> Distribution {
        Distribution::new(vec![1.0, 2.0], vec![0.3, 0.7]).unwrap()
    }

    #[test]
    fn test_three_identical_loci() {
        let d = convolve_power(&two_point(), 3, Aggregate::Sum, &ExactOptions::default()).unwrap();
        assert_eq!(d.values(), &[3.0, 4.0, 5.0, 6.0]);
        let expected = [0.027, 0.189, 0.441, 0.343];
        for (p, e) in d.probs().iter().zip(expected) {
            assert!((p - e).abs() < 1e-15, "{} vs {}", p, e);
        }
        assert!((d.kept_mass() - 1.0).abs() < EXACT_TOLERANCE);
    }

    #[test]
    fn test_product_convolution() {
        let item = Distribution::new(vec![0.5, 4.0], vec![0.5, 0.5]).unwrap();
        let d = convolve_power(&item, 2, Aggregate::Product, &ExactOptions::default()).unwrap();
        assert_eq!(d.values(), &[0.25, 2.0, 16.0]);
        assert_eq!(d.probs(), &[0.25, 0.5, 0.25]);
        assert!((d.mean() - (2.25_f64).powi(2)).abs() < 1e-12);
    }

    #[test]
    fn test_normalization_over_many_items() {
        let item = Distribution::new(vec![0.0, 1.0, 3.0], vec![0.2, 0.5, 0.3]).unwrap();
        let d = convolve_power(&item, 1000, Aggregate::Sum, &ExactOptions::default()).unwrap();
        assert!((d.kept_mass() - 1.0).abs() < EXACT_TOLERANCE);
        assert!((d.mean() - 1000.0 * 1.4).abs() < 1e-6);
    }

    #[test]
    fn test_power_zero_and_one() {
        let item = two_point();
        assert_eq!(
            convolve_power(&item, 0, Aggregate::Product, &ExactOptions::default()).unwrap(),
            Distribution::point(1.0)
        );
        let once = convolve_power(&item, 1, Aggregate::Sum, &ExactOptions::default()).unwrap();
        assert_eq!(once, item);
    }

    #[test]
    fn test_all_and_multiset_agree() {
        let a = two_point();
        let b = Distribution::new(vec![0.0, 10.0], vec![0.5, 0.5]).unwrap();
        let options = ExactOptions::default();
        let all = convolve_all(&[a.clone(), b.clone(), a.clone()], Aggregate::Sum, &options)
            .unwrap();
        let multiset = convolve_multiset(&[(a, 2), (b, 1)], Aggregate::Sum, &options).unwrap();
        assert_eq!(all.values(), multiset.values());
        for (p, q) in all.probs().iter().zip(multiset.probs()) {
            assert!((p - q).abs() < 1e-15);
        }
        assert!(convolve_all(&[], Aggregate::Sum, &options).is_err());
    }

    #[test]
    fn test_support_limit() {
        // products 3^a 7^b: support after k items is (k+1)(k+2)/2
        let item = Distribution::new(vec![1.0, 3.0, 7.0], vec![0.2, 0.3, 0.5]).unwrap();
        let options = ExactOptions {
            support_limit: 50,
            ..ExactOptions::default()
        };
        assert_eq!(convolve_power(&item, 5, Aggregate::Product, &options).unwrap().len(), 21);
        let err = convolve_power(&item, 6, Aggregate::Product, &options).unwrap_err();
        assert!(matches!(err, KinError::SupportTooLarge { limit: 50, .. }));
    }

    #[test]
    fn test_pr0_records_dropped_mass() {
        let item = Distribution::new(vec![1.0, 2.0], vec![0.01, 0.99]).unwrap();
        let options = ExactOptions {
            truncation: Truncation::new(1e-3, 0.0).unwrap(),
            ..ExactOptions::default()
        };
        let d = convolve_power(&item, 2, Aggregate::Sum, &options).unwrap();
        // 2 has mass 1e-4 and is dropped
        assert_eq!(d.values(), &[3.0, 4.0]);
        assert!((d.truncated_mass() - 1e-4).abs() < 1e-15);
        assert!((d.kept_mass() + d.truncated_mass() - 1.0).abs() < EXACT_TOLERANCE);
    }

    #[test]
    fn test_prinf_collapses_upper_tail_conservatively() {
        let item = Distribution::new(vec![0.0, 1.0, 2.0], vec![0.98, 0.015, 0.005]).unwrap();
        let options = ExactOptions {
            truncation: Truncation::new(0.0, 1e-3).unwrap(),
            ..ExactOptions::default()
        };
        let exact = convolve_power(&item, 2, Aggregate::Sum, &ExactOptions::default()).unwrap();
        let d = convolve_power(&item, 2, Aggregate::Sum, &options).unwrap();
        // P(3) + P(4) = 1.5e-4 + 2.5e-5 collapses onto 4
        assert_eq!(d.max(), 4.0);
        assert_eq!(d.len(), exact.len() - 1);
        assert!((d.kept_mass() - 1.0).abs() < EXACT_TOLERANCE);
        for t in [0.5, 1.5, 2.5, 3.5, 4.0] {
            assert!(d.tail(t) >= exact.tail(t) - 1e-15);
        }
        assert_eq!(d.truncated_mass(), 0.0);
    }

    #[test]
    fn test_truncation_validation() {
        assert!(Truncation::new(-0.1, 0.0).is_err());
        assert!(Truncation::new(0.0, 1.0).is_err());
        let item = Distribution::new(vec![1.0, 2.0], vec![0.5, 0.5]).unwrap();
        let options = ExactOptions {
            truncation: Truncation::new(0.9, 0.0).unwrap(),
            ..ExactOptions::default()
        };
        assert!(convolve_power(&item, 2, Aggregate::Sum, &options).is_err());
    }
}
