// rmp.rs - Random match probability of database profiles

use crate::core::genotype::{genotype_count, Allele, Genotype};
use crate::core::kinship::check_theta;
use crate::data::{AlleleFrequencyTable, Database, LocusFrequencies};
use crate::error::{KinError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Match probability model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RmpModel {
    /// NRC II 4.1: hom p^2 + p(1-p)theta, het 2pq(1-theta)
    #[default]
    NrcTheta,
    /// Balding-Nichols conditional match probability (NRC II 4.10)
    BaldingNichols,
}

impl FromStr for RmpModel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nrc" | "nrc-theta" | "hw" => Ok(RmpModel::NrcTheta),
            "bn" | "balding-nichols" => Ok(RmpModel::BaldingNichols),
            _ => Err(format!("Unknown match model '{}'. Use: nrc, balding-nichols", s)),
        }
    }
}

/// Match probability of one genotype given its allele frequencies
pub fn genotype_match_probability(g: Genotype, p: f64, q: f64, theta: f64, model: RmpModel) -> f64 {
    match (model, g.is_homozygous()) {
        (RmpModel::NrcTheta, true) => p * p + p * (1.0 - p) * theta,
        (RmpModel::NrcTheta, false) => 2.0 * p * q * (1.0 - theta),
        (RmpModel::BaldingNichols, true) => {
            (2.0 * theta + (1.0 - theta) * p) * (3.0 * theta + (1.0 - theta) * p)
                / ((1.0 + theta) * (1.0 + 2.0 * theta))
        }
        (RmpModel::BaldingNichols, false) => {
            2.0 * (theta + (1.0 - theta) * p) * (theta + (1.0 - theta) * q)
                / ((1.0 + theta) * (1.0 + 2.0 * theta))
        }
    }
}

/// Match probabilities of every genotype of one locus, by genotype index
struct LocusMatchTable {
    ladder: usize,
    probs: Vec<f64>,
}

impl LocusMatchTable {
    fn new(freqs: &LocusFrequencies, theta: f64, model: RmpModel) -> Self {
        let ladder = freqs.ladder();
        let dense = freqs.dense(ladder);
        let mut probs = vec![f64::NAN; genotype_count(ladder)];
        for g in Genotype::enumerate(ladder) {
            let [a, b] = g.alleles();
            if let (Some(p), Some(q)) = (dense[a as usize - 1], dense[b as usize - 1]) {
                probs[g.index_unchecked(ladder)] =
                    genotype_match_probability(g, p, q, theta, model);
            }
        }
        Self { ladder, probs }
    }

    fn get(&self, g: Genotype, locus: usize) -> Result<f64> {
        let missing = |allele: Allele| KinError::MissingFrequency { locus, allele };
        if g.hi() as usize > self.ladder {
            return Err(missing(g.hi()));
        }
        let p = self.probs[g.index_unchecked(self.ladder)];
        if p.is_nan() {
            // report the allele lacking an entry
            let allele = g
                .alleles()
                .into_iter()
                .find(|&a| {
                    let hom = Genotype::from_alleles(a, a).index_unchecked(self.ladder);
                    !self.probs[hom].is_finite()
                })
                .unwrap_or(g.hi());
            return Err(missing(allele));
        }
        Ok(p)
    }
}

/// Match probabilities of a database, one per profile and optionally per locus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchProbabilities {
    nloci: usize,
    total: Vec<f64>,
    per_locus: Option<Vec<f64>>,
}

impl MatchProbabilities {
    pub fn len(&self) -> usize {
        self.total.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total.is_empty()
    }

    pub fn nloci(&self) -> usize {
        self.nloci
    }

    /// Product over loci for each profile
    pub fn totals(&self) -> &[f64] {
        &self.total
    }

    /// Per-locus probabilities of one profile, when requested
    pub fn locus_values(&self, row: usize) -> Option<&[f64]> {
        self.per_locus
            .as_ref()
            .map(|v| &v[row * self.nloci..(row + 1) * self.nloci])
    }
}

/// Random match probability of every profile in `db`
///
/// Every allele observed in `db` must have a frequency entry.
pub fn random_match_probability(
    db: &Database,
    freqs: &AlleleFrequencyTable,
    theta: f64,
    model: RmpModel,
    per_locus: bool,
) -> Result<MatchProbabilities> {
    check_theta(theta)?;
    freqs.check_loci(db.nloci())?;
    let tables: Vec<LocusMatchTable> = freqs
        .loci()
        .iter()
        .map(|locus| LocusMatchTable::new(locus, theta, model))
        .collect();

    let nloci = db.nloci();
    let mut total = Vec::with_capacity(db.len());
    let mut breakdown = per_locus.then(|| Vec::with_capacity(db.len() * nloci));
    for row in 0..db.len() {
        let mut acc = 1.0;
        for (m, table) in tables.iter().enumerate() {
            let p = table.get(db.genotype(row, m), m)?;
            acc *= p;
            if let Some(values) = breakdown.as_mut() {
                values.push(p);
            }
        }
        total.push(acc);
    }
    Ok(MatchProbabilities {
        nloci,
        total,
        per_locus: breakdown,
    })
}
