// kinship.rs - Kinship parameters and the per-locus kinship index

use crate::core::genotype::{Allele, Genotype};
use crate::error::{KinError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// IBD sharing probabilities of a relationship plus the theta correction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinshipParams {
    pub k0: f64,
    pub k1: f64,
    pub k2: f64,
    pub theta: f64,
}

/// Named relationships with textbook IBD probabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relationship {
    ParentChild,
    FullSiblings,
    HalfSiblings,
    FirstCousins,
    Unrelated,
}

impl Relationship {
    /// (k0, k1, k2)
    pub fn ibd(&self) -> (f64, f64, f64) {
        match self {
            Relationship::ParentChild => (0.0, 1.0, 0.0),
            Relationship::FullSiblings => (0.25, 0.5, 0.25),
            Relationship::HalfSiblings => (0.5, 0.5, 0.0),
            Relationship::FirstCousins => (0.75, 0.25, 0.0),
            Relationship::Unrelated => (1.0, 0.0, 0.0),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Relationship::ParentChild => "parent/child",
            Relationship::FullSiblings => "full siblings",
            Relationship::HalfSiblings => "half siblings, grandparent/grandchild, avuncular",
            Relationship::FirstCousins => "first cousins",
            Relationship::Unrelated => "unrelated",
        }
    }
}

impl FromStr for Relationship {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "po" | "pc" | "parent-child" => Ok(Relationship::ParentChild),
            "fs" | "sib" | "full-siblings" => Ok(Relationship::FullSiblings),
            "hs" | "gp" | "av" | "half-siblings" => Ok(Relationship::HalfSiblings),
            "fc" | "first-cousins" => Ok(Relationship::FirstCousins),
            "un" | "unrelated" => Ok(Relationship::Unrelated),
            _ => Err(format!(
                "Unknown relationship '{}'. Use: po, fs, hs, fc, unrelated",
                s
            )),
        }
    }
}

impl KinshipParams {
    /// Validated parameter set
    pub fn new(k0: f64, k1: f64, k2: f64, theta: f64) -> Result<Self> {
        for (name, k) in [("k0", k0), ("k1", k1), ("k2", k2)] {
            if !k.is_finite() || !(0.0..=1.0).contains(&k) {
                return Err(KinError::invalid_parameter(format!(
                    "{} = {} is not a probability",
                    name, k
                )));
            }
        }
        if ((k0 + k1 + k2) - 1.0).abs() > 1e-9 {
            return Err(KinError::invalid_parameter(format!(
                "k0 + k1 + k2 = {} (must be 1)",
                k0 + k1 + k2
            )));
        }
        check_theta(theta)?;
        Ok(Self { k0, k1, k2, theta })
    }

    pub fn from_relationship(relationship: Relationship, theta: f64) -> Result<Self> {
        let (k0, k1, k2) = relationship.ibd();
        Self::new(k0, k1, k2, theta)
    }

    /// The named relationship whose IBD probabilities these are, if any
    pub fn relationship(&self) -> Option<Relationship> {
        [
            Relationship::ParentChild,
            Relationship::FullSiblings,
            Relationship::HalfSiblings,
            Relationship::FirstCousins,
            Relationship::Unrelated,
        ]
        .into_iter()
        .find(|r| {
            let (k0, k1, k2) = r.ibd();
            (self.k0 - k0).abs() < 1e-9
                && (self.k1 - k1).abs() < 1e-9
                && (self.k2 - k2).abs() < 1e-9
        })
    }

    /// Short label for logs: the relationship name or "custom"
    pub fn label(&self) -> &'static str {
        self.relationship().map_or("custom", |r| r.description())
    }
}

/// Theta must lie in [0, 1)
pub fn check_theta(theta: f64) -> Result<()> {
    if !theta.is_finite() || !(0.0..1.0).contains(&theta) {
        return Err(KinError::invalid_parameter(format!(
            "theta = {} must be in [0, 1)",
            theta
        )));
    }
    Ok(())
}

/// Balding-Nichols probability that the next sampled allele is `allele`,
/// given the alleles already seen in the subpopulation
fn pr_next(allele: Allele, p: f64, seen: &[Allele], theta: f64) -> f64 {
    let n_x = seen.iter().filter(|&&s| s == allele).count() as f64;
    let n = seen.len() as f64;
    (n_x * theta + (1.0 - theta) * p) / (1.0 + (n - 1.0) * theta)
}

/// The three terms of the kinship index for one genotype pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinshipTerms {
    /// k0
    pub ibd0: f64,
    /// k1 * P(g2 | g1, 1 IBD) / P(g2 | g1)
    pub ibd1: f64,
    /// k2 * P(g2 | g1, 2 IBD) / P(g2 | g1)
    pub ibd2: f64,
}

impl KinshipTerms {
    pub fn total(&self) -> f64 {
        self.ibd0 + self.ibd1 + self.ibd2
    }
}

/// Kinship index of `g2` given `g1` at one locus
///
/// `freq` returns the population frequency of an allele; both genotypes'
/// alleles must have one.
pub fn kinship_terms<F>(
    g1: Genotype,
    g2: Genotype,
    freq: F,
    params: &KinshipParams,
) -> Result<KinshipTerms>
where
    F: Fn(Allele) -> Result<f64>,
{
    let theta = params.theta;
    let seen = g1.alleles();
    let [c, d] = g2.alleles();
    let pc = freq(c)?;
    let pd = freq(d)?;
    // also surfaces MissingFrequency for g1's alleles
    freq(seen[0])?;
    freq(seen[1])?;

    let (p0, p1) = if g2.is_homozygous() {
        let first = pr_next(c, pc, &seen, theta);
        let p0 = first * pr_next(c, pc, &[seen[0], seen[1], c], theta);
        let shared = seen.iter().filter(|&&x| x == c).count() as f64;
        (p0, 0.5 * shared * first)
    } else {
        let p0 = 2.0 * pr_next(c, pc, &seen, theta) * pr_next(d, pd, &[seen[0], seen[1], c], theta);
        let mut p1 = 0.0;
        for &x in &seen {
            if x == c {
                p1 += pr_next(d, pd, &seen, theta);
            }
            if x == d {
                p1 += pr_next(c, pc, &seen, theta);
            }
        }
        (p0, 0.5 * p1)
    };
    let p2 = if g1 == g2 { 1.0 } else { 0.0 };

    if p0 <= 0.0 {
        return Err(KinError::invalid_parameter(format!(
            "genotype {} has zero probability under unrelatedness",
            g2
        )));
    }
    Ok(KinshipTerms {
        ibd0: params.k0,
        ibd1: params.k1 * p1 / p0,
        ibd2: params.k2 * p2 / p0,
    })
}

/// Kinship index (likelihood ratio relatedness vs unrelatedness) at one locus
pub fn kinship_index<F>(g1: Genotype, g2: Genotype, freq: F, params: &KinshipParams) -> Result<f64>
where
    F: Fn(Allele) -> Result<f64>,
{
    kinship_terms(g1, g2, freq, params).map(|t| t.total())
}

/// P(g2 | g1) for an unrelated pair under the theta model
pub fn conditional_genotype_probability<F>(
    g1: Genotype,
    g2: Genotype,
    freq: F,
    theta: f64,
) -> Result<f64>
where
    F: Fn(Allele) -> Result<f64>,
{
    let seen = g1.alleles();
    let [c, d] = g2.alleles();
    let pc = freq(c)?;
    let first = pr_next(c, pc, &seen, theta);
    if g2.is_homozygous() {
        Ok(first * pr_next(c, pc, &[seen[0], seen[1], c], theta))
    } else {
        let pd = freq(d)?;
        Ok(2.0 * first * pr_next(d, pd, &[seen[0], seen[1], c], theta))
    }
}

/// P(g) for a single genotype under the theta model (first draw from the population)
pub fn genotype_probability<F>(g: Genotype, freq: F, theta: f64) -> Result<f64>
where
    F: Fn(Allele) -> Result<f64>,
{
    let [a, b] = g.alleles();
    let pa = freq(a)?;
    let first = pr_next(a, pa, &[], theta);
    if g.is_homozygous() {
        Ok(first * pr_next(a, pa, &[a], theta))
    } else {
        let pb = freq(b)?;
        Ok(2.0 * first * pr_next(b, pb, &[a], theta))
    }
}

/// P(g2 | g1) for a pair related through `params`
pub fn related_conditional_probability<F>(
    g1: Genotype,
    g2: Genotype,
    freq: F,
    params: &KinshipParams,
) -> Result<f64>
where
    F: Fn(Allele) -> Result<f64> + Copy,
{
    let p0 = conditional_genotype_probability(g1, g2, freq, params.theta)?;
    let terms = kinship_terms(g1, g2, freq, params)?;
    Ok(terms.total() * p0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn freqs(dense: &'static [f64]) -> impl Fn(Allele) -> Result<f64> + Copy {
        move |a: Allele| {
            dense
                .get(a as usize - 1)
                .copied()
                .ok_or(KinError::MissingFrequency { locus: 0, allele: a })
        }
    }

    const FR: &[f64] = &[0.1, 0.2, 0.3, 0.4];

    fn g(a: i64, b: i64) -> Genotype {
        Genotype::new(a, b).unwrap()
    }

    #[test]
    fn test_unrelated_index_is_one() {
        let params = KinshipParams::from_relationship(Relationship::Unrelated, 0.03).unwrap();
        for g1 in Genotype::enumerate(4) {
            for g2 in Genotype::enumerate(4) {
                let ki = kinship_index(g1, g2, freqs(FR), &params).unwrap();
                assert!((ki - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_full_sibling_closed_forms() {
        let params = KinshipParams::from_relationship(Relationship::FullSiblings, 0.0).unwrap();
        // homozygous match: (1 + 1/p)^2 / 4
        let p: f64 = 0.2;
        let ki = kinship_index(g(2, 2), g(2, 2), freqs(FR), &params).unwrap();
        assert!((ki - (1.0 + 1.0 / p).powi(2) / 4.0).abs() < 1e-9);

        // heterozygous match (a,b): 1/4 + (pa + pb)/(8 pa pb) + 1/(8 pa pb)
        let (pa, pb) = (0.1, 0.3);
        let ki = kinship_index(g(1, 3), g(3, 1), freqs(FR), &params).unwrap();
        let expected = 0.25 + (pa + pb) / (8.0 * pa * pb) + 1.0 / (8.0 * pa * pb);
        assert!((ki - expected).abs() < 1e-9);

        // no shared alleles: only the k0 term survives
        let ki = kinship_index(g(1, 2), g(3, 4), freqs(FR), &params).unwrap();
        assert!((ki - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_parent_child_one_shared() {
        let params = KinshipParams::from_relationship(Relationship::ParentChild, 0.0).unwrap();
        // (1,2) vs (1,4): 1 / (4 p1)
        let ki = kinship_index(g(1, 2), g(1, 4), freqs(FR), &params).unwrap();
        assert!((ki - 1.0 / (4.0 * 0.1)).abs() < 1e-9);
        // and symmetric
        let back = kinship_index(g(1, 4), g(1, 2), freqs(FR), &params).unwrap();
        assert!((ki - back).abs() < 1e-12);
    }

    #[test]
    fn test_theta_symmetry() {
        let params = KinshipParams::new(0.25, 0.5, 0.25, 0.05).unwrap();
        for g1 in Genotype::enumerate(4) {
            for g2 in Genotype::enumerate(4) {
                let a = kinship_index(g1, g2, freqs(FR), &params).unwrap();
                let b = kinship_index(g2, g1, freqs(FR), &params).unwrap();
                assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0), "{} {} {} {}", g1, g2, a, b);
            }
        }
    }

    #[test]
    fn test_conditional_probabilities_sum_to_one() {
        for theta in [0.0, 0.01, 0.1] {
            for g1 in Genotype::enumerate(4) {
                let total: f64 = Genotype::enumerate(4)
                    .map(|g2| conditional_genotype_probability(g1, g2, freqs(FR), theta).unwrap())
                    .sum();
                assert!((total - 1.0).abs() < 1e-12);
            }
            let total: f64 = Genotype::enumerate(4)
                .map(|g1| genotype_probability(g1, freqs(FR), theta).unwrap())
                .sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
        let params = KinshipParams::from_relationship(Relationship::FullSiblings, 0.02).unwrap();
        for g1 in Genotype::enumerate(4) {
            let total: f64 = Genotype::enumerate(4)
                .map(|g2| related_conditional_probability(g1, g2, freqs(FR), &params).unwrap())
                .sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_parameter_validation() {
        assert!(KinshipParams::new(0.5, 0.5, 0.5, 0.0).is_err());
        assert!(KinshipParams::new(-0.1, 1.1, 0.0, 0.0).is_err());
        assert!(KinshipParams::new(0.25, 0.5, 0.25, 1.0).is_err());
        assert!(KinshipParams::new(0.25, 0.5, 0.25, 0.99).is_ok());
        assert_eq!("fs".parse::<Relationship>().unwrap(), Relationship::FullSiblings);
        assert!("cousin-twice-removed".parse::<Relationship>().is_err());
    }

    #[test]
    fn test_params_name_their_relationship() {
        let hs = KinshipParams::from_relationship(Relationship::HalfSiblings, 0.01).unwrap();
        assert_eq!(hs.relationship(), Some(Relationship::HalfSiblings));
        assert!(hs.label().starts_with("half siblings"));
        let custom = KinshipParams::new(0.6, 0.4, 0.0, 0.0).unwrap();
        assert_eq!(custom.relationship(), None);
        assert_eq!(custom.label(), "custom");
        assert_eq!(KinshipParams::new(1.0, 0.0, 0.0, 0.0).unwrap().label(), "unrelated");
    }

    #[test]
    fn test_missing_frequency_surfaces() {
        let params = KinshipParams::from_relationship(Relationship::FullSiblings, 0.0).unwrap();
        let err = kinship_index(g(5, 1), g(1, 1), freqs(FR), &params).unwrap_err();
        assert_eq!(err, KinError::MissingFrequency { locus: 0, allele: 5 });
    }
}
