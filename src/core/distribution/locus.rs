// locus.rs - Per-locus distribution of a table value under a relationship hypothesis

use super::{Distribution, APPROX_TOLERANCE};
use crate::core::genotype::{Allele, Genotype};
use crate::core::kinship::{genotype_probability, related_conditional_probability, KinshipParams};
use crate::core::table::{LocusTable, LocusTables};
use crate::data::{AlleleFrequencyTable, LocusFrequencies};
use crate::error::{KinError, Result};

/// Distribution of `table[g1, g2]` when g1 is drawn from the population and
/// g2 from a relative of g1 under `hypothesis`
///
/// Alleles with zero frequency never occur and are skipped. The result is
/// conditional on the tabulated alleles: when the frequencies of a locus do not
/// sum to one, the genotype-pair masses are rescaled.
pub fn locus_distribution(
    table: &LocusTable,
    freqs: &LocusFrequencies,
    hypothesis: &KinshipParams,
) -> Result<Distribution> {
    let locus = table.locus();
    let alleles: Vec<Allele> = freqs.iter().filter(|(_, p)| *p > 0.0).map(|(a, _)| a).collect();
    if let Some(&beyond) = alleles.iter().find(|&&a| a as usize > table.ladder()) {
        return Err(KinError::InvalidAllele {
            allele: beyond as i64,
            reason: format!(
                "locus {} has a frequency for allele {} beyond the table ladder {}",
                freqs.name,
                beyond,
                table.ladder()
            ),
        });
    }
    if alleles.is_empty() {
        return Err(KinError::invalid_parameter(format!(
            "locus {} has no allele with positive frequency",
            freqs.name
        )));
    }

    let freq = |a: Allele| freqs.get(a).ok_or(KinError::MissingFrequency { locus, allele: a });
    let genotypes: Vec<Genotype> = alleles
        .iter()
        .enumerate()
        .flat_map(|(k, &a)| alleles[..=k].iter().map(move |&b| Genotype::from_alleles(a, b)))
        .collect();

    let mut atoms = Vec::with_capacity(genotypes.len() * genotypes.len());
    for &g1 in &genotypes {
        let p1 = genotype_probability(g1, freq, hypothesis.theta)?;
        for &g2 in &genotypes {
            let p2 = related_conditional_probability(g1, g2, freq, hypothesis)?;
            let mass = p1 * p2;
            if mass > 0.0 {
                atoms.push((table.lookup(g1, g2)?, mass));
            }
        }
    }

    let total: f64 = atoms.iter().map(|(_, p)| p).sum();
    if !(total > 0.0) {
        return Err(KinError::NormalizationError {
            total,
            tolerance: APPROX_TOLERANCE,
        });
    }
    let (values, probs): (Vec<f64>, Vec<f64>) = atoms
        .into_iter()
        .map(|(x, p)| (x, p / total))
        .unzip();
    Distribution::with_tolerance(values, probs, APPROX_TOLERANCE)
}

/// [`locus_distribution`] for every locus of a table set
pub fn locus_distributions(
    tables: &LocusTables,
    freqs: &AlleleFrequencyTable,
    hypothesis: &KinshipParams,
) -> Result<Vec<Distribution>> {
    freqs.check_loci(tables.nloci())?;
    tables
        .tables()
        .iter()
        .zip(freqs.loci())
        .map(|(table, locus)| locus_distribution(table, locus, hypothesis))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::distribution::{convolve_all, CumulativeDistribution, ExactOptions};
    use crate::core::kinship::Relationship;
    use crate::core::table::Aggregate;

    fn freqs() -> LocusFrequencies {
        LocusFrequencies::from_dense("D1", &[0.1, 0.2, 0.3, 0.4]).unwrap()
    }

    fn params(relationship: Relationship, theta: f64) -> KinshipParams {
        KinshipParams::from_relationship(relationship, theta).unwrap()
    }

    #[test]
    fn test_kinship_index_has_unit_mean_for_unrelated_pairs() {
        for theta in [0.0, 0.03] {
            let sibs = params(Relationship::FullSiblings, theta);
            let table = LocusTable::kinship(0, &freqs(), &sibs, false).unwrap();
            let d = locus_distribution(&table, &freqs(), &params(Relationship::Unrelated, theta))
                .unwrap();
            assert!((d.mean() - 1.0).abs() < 1e-9, "theta {}: {}", theta, d.mean());
        }
    }

    #[test]
    fn test_inverse_index_has_unit_mean_for_relatives() {
        let sibs = params(Relationship::FullSiblings, 0.01);
        let table = LocusTable::kinship(0, &freqs(), &sibs, false).unwrap();
        let d = locus_distribution(&table, &freqs(), &sibs).unwrap();
        let inverse_mean: f64 = d.atoms().map(|(x, p)| p / x).sum();
        assert!((inverse_mean - 1.0).abs() < 1e-9);
        // relatives score higher on average
        assert!(d.mean() > 1.0);
    }

    #[test]
    fn test_identity_match_probability() {
        let table = LocusTable::identity(0, 4);
        let d = locus_distribution(&table, &freqs(), &params(Relationship::Unrelated, 0.0))
            .unwrap();
        // sum over genotypes of P(g)^2
        assert!((d.tail(1.0) - 0.1446).abs() < 1e-12);
        assert_eq!(d.values(), &[0.0, 1.0]);
    }

    #[test]
    fn test_allele_beyond_ladder_is_rejected() {
        let table = LocusTable::identity(0, 3);
        let err = locus_distribution(&table, &freqs(), &params(Relationship::Unrelated, 0.0))
            .unwrap_err();
        assert!(matches!(err, KinError::InvalidAllele { allele: 4, .. }));
    }

    #[test]
    fn test_zero_frequency_alleles_are_skipped() {
        let sparse = LocusFrequencies::from_dense("D2", &[0.5, 0.0, 0.5]).unwrap();
        let table = LocusTable::shared_alleles(0, 3);
        let d = locus_distribution(&table, &sparse, &params(Relationship::Unrelated, 0.0)).unwrap();
        assert!((d.kept_mass() - 1.0).abs() < 1e-12);
        // genotypes 1/1, 1/3, 3/3 at 1/4, 1/2, 1/4
        assert!((d.mean() - 1.25).abs() < 1e-12);
        assert!((d.tail(2.0) - 0.375).abs() < 1e-12);
    }

    #[test]
    fn test_profile_statistic_from_loci() {
        let freq_table = AlleleFrequencyTable::new(vec![freqs(), freqs()]);
        let unrelated = params(Relationship::Unrelated, 0.0);
        let tables = LocusTables::from_tables(
            vec![LocusTable::identity(0, 4), LocusTable::identity(1, 4)],
            Aggregate::Sum,
        )
        .unwrap();
        let per_locus = locus_distributions(&tables, &freq_table, &unrelated).unwrap();
        let total = convolve_all(&per_locus, Aggregate::Sum, &ExactOptions::default()).unwrap();
        assert_eq!(total.values(), &[0.0, 1.0, 2.0]);
        assert!((total.tail(2.0) - 0.1446 * 0.1446).abs() < 1e-12);
    }
}
