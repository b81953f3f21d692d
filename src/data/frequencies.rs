// frequencies.rs - Per-locus allele frequency tables

use crate::core::genotype::{ladder_length, Allele};
use crate::error::{KinError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Allele frequencies for one locus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocusFrequencies {
    pub name: String,
    freqs: BTreeMap<Allele, f64>,
}

impl LocusFrequencies {
    pub fn new(name: impl Into<String>, freqs: BTreeMap<Allele, f64>) -> Result<Self> {
        let name = name.into();
        for (&allele, &p) in &freqs {
            if allele == 0 {
                return Err(KinError::InvalidAllele {
                    allele: 0,
                    reason: format!("frequency table for {} uses allele code 0", name),
                });
            }
            if !p.is_finite() || !(0.0..=1.0).contains(&p) {
                return Err(KinError::invalid_parameter(format!(
                    "frequency {} of allele {} at {} is outside [0, 1]",
                    p, allele, name
                )));
            }
        }
        Ok(Self { name, freqs })
    }

    /// Frequencies for alleles 1..=L given as a dense vector
    pub fn from_dense(name: impl Into<String>, dense: &[f64]) -> Result<Self> {
        let freqs = dense
            .iter()
            .enumerate()
            .map(|(i, &p)| ((i + 1) as Allele, p))
            .collect();
        Self::new(name, freqs)
    }

    pub fn get(&self, allele: Allele) -> Option<f64> {
        self.freqs.get(&allele).copied()
    }

    pub fn contains(&self, allele: Allele) -> bool {
        self.freqs.contains_key(&allele)
    }

    /// Ladder length: the largest allele code with a frequency entry
    pub fn ladder(&self) -> usize {
        ladder_length(self.freqs.keys().copied())
    }

    /// Frequencies over 1..=ladder, `None` where the table has no entry
    pub fn dense(&self, ladder: usize) -> Vec<Option<f64>> {
        (1..=ladder).map(|a| self.get(a as Allele)).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Allele, f64)> + '_ {
        self.freqs.iter().map(|(&a, &p)| (a, p))
    }

    pub fn total(&self) -> f64 {
        self.freqs.values().sum()
    }
}

/// Allele frequencies for every locus of a database layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlleleFrequencyTable {
    loci: Vec<LocusFrequencies>,
}

impl AlleleFrequencyTable {
    pub fn new(loci: Vec<LocusFrequencies>) -> Self {
        Self { loci }
    }

    pub fn nloci(&self) -> usize {
        self.loci.len()
    }

    pub fn locus(&self, locus: usize) -> &LocusFrequencies {
        &self.loci[locus]
    }

    pub fn loci(&self) -> &[LocusFrequencies] {
        &self.loci
    }

    /// Frequency of `allele` at `locus`, failing when the table has no entry
    pub fn require(&self, locus: usize, allele: Allele) -> Result<f64> {
        self.loci
            .get(locus)
            .ok_or_else(|| {
                KinError::dimension_mismatch("frequency table loci", locus + 1, self.loci.len())
            })?
            .get(allele)
            .ok_or(KinError::MissingFrequency { locus, allele })
    }

    /// Fail unless the table covers exactly `nloci` loci
    pub fn check_loci(&self, nloci: usize) -> Result<()> {
        if self.loci.len() != nloci {
            return Err(KinError::dimension_mismatch(
                "frequency table loci",
                nloci,
                self.loci.len(),
            ));
        }
        Ok(())
    }

    /// Loci whose frequencies do not sum to one within `tolerance`
    pub fn unnormalized_loci(&self, tolerance: f64) -> Vec<(&str, f64)> {
        self.loci
            .iter()
            .map(|l| (l.name.as_str(), l.total()))
            .filter(|(_, total)| (total - 1.0).abs() > tolerance)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_round_trip() {
        let locus = LocusFrequencies::from_dense("D3", &[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(locus.ladder(), 4);
        assert_eq!(locus.get(3), Some(0.3));
        assert_eq!(locus.get(5), None);
        assert!((locus.total() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gaps_are_missing_not_zero() {
        let freqs: BTreeMap<Allele, f64> = [(1, 0.5), (4, 0.5)].into_iter().collect();
        let locus = LocusFrequencies::new("vWA", freqs).unwrap();
        assert_eq!(locus.dense(4), vec![Some(0.5), None, None, Some(0.5)]);

        let table = AlleleFrequencyTable::new(vec![locus]);
        assert_eq!(table.require(0, 4).unwrap(), 0.5);
        assert_eq!(
            table.require(0, 2).unwrap_err(),
            KinError::MissingFrequency { locus: 0, allele: 2 }
        );
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(LocusFrequencies::from_dense("TH01", &[0.5, 1.5]).is_err());
        assert!(LocusFrequencies::from_dense("TH01", &[f64::NAN]).is_err());
    }

    #[test]
    fn test_unnormalized_loci() {
        let table = AlleleFrequencyTable::new(vec![
            LocusFrequencies::from_dense("A", &[0.5, 0.5]).unwrap(),
            LocusFrequencies::from_dense("B", &[0.5, 0.2]).unwrap(),
        ]);
        let off = table.unnormalized_loci(1e-6);
        assert_eq!(off.len(), 1);
        assert_eq!(off[0].0, "B");
        assert!(table.check_loci(2).is_ok());
        assert!(table.check_loci(3).is_err());
    }
}
