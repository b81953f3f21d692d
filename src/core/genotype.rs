// genotype.rs - Canonical genotypes and dense genotype indexing

use crate::error::{KinError, Result};
use serde::{Deserialize, Serialize};

/// Allele code, 1-based position on the locus ladder
pub type Allele = u32;

/// Unordered allele pair stored in canonical order (`hi >= lo`)
///
/// The constructor is the only way in, so an un-canonicalized pair can never
/// reach [`Genotype::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Genotype {
    hi: Allele,
    lo: Allele,
}

/// Order an allele pair so the larger (or equal) allele comes first
#[inline]
pub fn canonicalize(a: Allele, b: Allele) -> (Allele, Allele) {
    if b > a {
        (b, a)
    } else {
        (a, b)
    }
}

/// Number of unordered genotypes (homozygotes included) on a ladder of length `ladder`
#[inline]
pub fn genotype_count(ladder: usize) -> usize {
    ladder * (ladder + 1) / 2
}

/// Ladder length implied by a set of observed or declared allele codes
pub fn ladder_length<I: IntoIterator<Item = Allele>>(alleles: I) -> usize {
    alleles.into_iter().max().unwrap_or(0) as usize
}

/// Ladder length recovered from the length of a flat N0 x N0 table
///
/// Returns `None` when `cells` is not the square of a triangular number.
pub fn ladder_from_table_len(cells: usize) -> Option<usize> {
    let n0 = (cells as f64).sqrt().round() as usize;
    if n0 * n0 != cells {
        return None;
    }
    let ladder = ((((1 + 8 * n0) as f64).sqrt() - 1.0) / 2.0).round() as usize;
    (genotype_count(ladder) == n0).then_some(ladder)
}

/// Validate a raw allele code read from a database or caller input
pub fn check_allele(raw: i64) -> Result<Allele> {
    if raw <= 0 {
        return Err(KinError::InvalidAllele {
            allele: raw,
            reason: "allele codes must be positive".to_string(),
        });
    }
    Allele::try_from(raw).map_err(|_| KinError::InvalidAllele {
        allele: raw,
        reason: "allele code exceeds the 32-bit range".to_string(),
    })
}

impl Genotype {
    /// Build a canonical genotype from raw allele codes
    pub fn new(a: i64, b: i64) -> Result<Self> {
        let a = check_allele(a)?;
        let b = check_allele(b)?;
        Ok(Self::from_alleles(a, b))
    }

    /// Build from already validated (positive) alleles
    #[inline]
    pub fn from_alleles(a: Allele, b: Allele) -> Self {
        debug_assert!(a > 0 && b > 0);
        let (hi, lo) = canonicalize(a, b);
        Self { hi, lo }
    }

    /// Larger allele
    pub fn hi(&self) -> Allele {
        self.hi
    }

    /// Smaller allele
    pub fn lo(&self) -> Allele {
        self.lo
    }

    pub fn is_homozygous(&self) -> bool {
        self.hi == self.lo
    }

    /// Both alleles, larger first
    pub fn alleles(&self) -> [Allele; 2] {
        [self.hi, self.lo]
    }

    /// Number of alleles shared by state with `other` (0, 1 or 2)
    pub fn shared_alleles(&self, other: &Genotype) -> u8 {
        if self == other {
            return 2;
        }
        let shares = self.hi == other.hi
            || self.hi == other.lo
            || self.lo == other.hi
            || self.lo == other.lo;
        u8::from(shares)
    }

    /// Dense index in `[0, genotype_count(ladder))`
    pub fn index(&self, ladder: usize) -> Result<usize> {
        if self.hi as usize > ladder {
            return Err(KinError::InvalidAllele {
                allele: i64::from(self.hi),
                reason: format!("outside ladder of length {}", ladder),
            });
        }
        Ok(self.index_unchecked(ladder))
    }

    /// Dense index without the ladder check; callers validate first
    #[inline]
    pub fn index_unchecked(&self, ladder: usize) -> usize {
        let a = self.hi as usize;
        let b = self.lo as usize;
        ladder * (b - 1) - b * (b - 1) / 2 + (a - 1)
    }

    /// Inverse of [`Genotype::index`]
    pub fn from_index(index: usize, ladder: usize) -> Result<Self> {
        let n0 = genotype_count(ladder);
        if index >= n0 {
            return Err(KinError::IndexOutOfRange { index, len: n0 });
        }
        // Block b (1-based lower allele) starts at ladder*(b-1) - b*(b-1)/2 and holds ladder-b+1 genotypes
        let mut start = 0;
        for b in 1..=ladder {
            let width = ladder - b + 1;
            if index < start + width {
                let a = b + (index - start);
                return Ok(Self {
                    hi: a as Allele,
                    lo: b as Allele,
                });
            }
            start += width;
        }
        Err(KinError::IndexOutOfRange { index, len: n0 })
    }

    /// Every canonical genotype on the ladder, in index order
    pub fn enumerate(ladder: usize) -> impl Iterator<Item = Genotype> {
        (1..=ladder).flat_map(move |b| {
            (b..=ladder).map(move |a| Genotype {
                hi: a as Allele,
                lo: b as Allele,
            })
        })
    }
}

impl std::fmt::Display for Genotype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.hi, self.lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_canonicalize_orders_pair() {
        assert_eq!(canonicalize(3, 7), (7, 3));
        assert_eq!(canonicalize(7, 3), (7, 3));
        assert_eq!(canonicalize(5, 5), (5, 5));
    }

    #[test]
    fn test_index_is_bijection() {
        for ladder in 1..=30 {
            let n0 = genotype_count(ladder);
            let mut seen = HashSet::new();
            for a in 1..=ladder as i64 {
                for b in 1..=a {
                    let index = Genotype::new(a, b).unwrap().index(ladder).unwrap();
                    assert!(index < n0);
                    assert!(seen.insert(index), "duplicate index {} for L={}", index, ladder);
                }
            }
            assert_eq!(seen.len(), n0);
        }
    }

    #[test]
    fn test_enumerate_matches_index_order() {
        for ladder in 1..=12 {
            for (expected, genotype) in Genotype::enumerate(ladder).enumerate() {
                assert_eq!(genotype.index(ladder).unwrap(), expected);
                assert_eq!(Genotype::from_index(expected, ladder).unwrap(), genotype);
            }
        }
    }

    #[test]
    fn test_homozygous_scenario() {
        // L = 10, (5,5) needs no swap and has a fixed index
        let g = Genotype::new(5, 5).unwrap();
        assert!(g.is_homozygous());
        assert_eq!(g.alleles(), [5, 5]);
        assert_eq!(g.index(10).unwrap(), 10 * 4 - 5 * 4 / 2 + 4);
        assert_eq!(g.index(10).unwrap(), Genotype::new(5, 5).unwrap().index(10).unwrap());
    }

    #[test]
    fn test_order_does_not_leak_into_index() {
        let g1 = Genotype::new(2, 9).unwrap();
        let g2 = Genotype::new(9, 2).unwrap();
        assert_eq!(g1, g2);
        assert_eq!(g1.index(12).unwrap(), g2.index(12).unwrap());
    }

    #[test]
    fn test_rejects_invalid_alleles() {
        assert!(matches!(Genotype::new(0, 3), Err(KinError::InvalidAllele { allele: 0, .. })));
        assert!(matches!(Genotype::new(3, -1), Err(KinError::InvalidAllele { allele: -1, .. })));
        let g = Genotype::new(11, 1).unwrap();
        assert!(matches!(g.index(10), Err(KinError::InvalidAllele { allele: 11, .. })));
        assert!(matches!(
            Genotype::from_index(55, 10),
            Err(KinError::IndexOutOfRange { index: 55, len: 55 })
        ));
    }

    #[test]
    fn test_ladder_helpers() {
        assert_eq!(ladder_length(vec![3, 9, 4]), 9);
        assert_eq!(ladder_length(Vec::new()), 0);
        assert_eq!(ladder_from_table_len(55 * 55), Some(10));
        assert_eq!(ladder_from_table_len(1), Some(1));
        assert_eq!(ladder_from_table_len(50), None);
        assert_eq!(ladder_from_table_len(16), None);
    }

    #[test]
    fn test_shared_alleles() {
        let g = Genotype::new(4, 7).unwrap();
        assert_eq!(g.shared_alleles(&Genotype::new(7, 4).unwrap()), 2);
        assert_eq!(g.shared_alleles(&Genotype::new(7, 7).unwrap()), 1);
        assert_eq!(g.shared_alleles(&Genotype::new(1, 2).unwrap()), 0);
    }
}
