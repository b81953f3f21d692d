// table.rs - Per-locus genotype-pair lookup tables

use crate::core::genotype::{genotype_count, ladder_from_table_len, Allele, Genotype};
use crate::core::kinship::{kinship_terms, KinshipParams, KinshipTerms};
use crate::data::{AlleleFrequencyTable, Database, LocusFrequencies};
use crate::error::{KinError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How per-locus values combine into the pair statistic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Aggregate {
    /// Likelihood-ratio style (kinship index)
    Product,
    /// Count style (matching loci, shared alleles)
    Sum,
}

impl Aggregate {
    #[inline]
    pub fn identity(&self) -> f64 {
        match self {
            Aggregate::Product => 1.0,
            Aggregate::Sum => 0.0,
        }
    }

    #[inline]
    pub fn combine(&self, acc: f64, value: f64) -> f64 {
        match self {
            Aggregate::Product => acc * value,
            Aggregate::Sum => acc + value,
        }
    }
}

impl FromStr for Aggregate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "product" | "prod" => Ok(Aggregate::Product),
            "sum" => Ok(Aggregate::Sum),
            _ => Err(format!("Unknown aggregate '{}'. Use: product, sum", s)),
        }
    }
}

/// What a table's cells hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Kinship,
    Identity,
    SharedAlleles,
    Custom,
}

/// N0 x N0 table of genotype-pair values for one locus
///
/// Cell `index(row) * N0 + index(col)`. For cross-database scans the row is
/// the target's genotype and the column the database member's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocusTable {
    kind: TableKind,
    locus: usize,
    ladder: usize,
    n0: usize,
    values: Vec<f64>,
    symmetric: bool,
    /// known[a - 1]: allele a may appear in a looked-up genotype
    known: Vec<bool>,
    min_value: f64,
    max_value: f64,
    terms: Option<Vec<KinshipTerms>>,
}

impl LocusTable {
    /// Kinship-index table for one locus
    ///
    /// Cells whose genotypes use an allele without a frequency entry hold NaN
    /// and are rejected when a database is indexed against the table.
    /// `retain_terms` keeps the k0/k1/k2 breakdown of every cell.
    pub fn kinship(
        locus: usize,
        freqs: &LocusFrequencies,
        params: &KinshipParams,
        retain_terms: bool,
    ) -> Result<Self> {
        let ladder = freqs.ladder();
        if ladder == 0 {
            return Err(KinError::invalid_parameter(format!(
                "no allele frequencies for locus {}",
                freqs.name
            )));
        }
        let n0 = genotype_count(ladder);
        // Zero-frequency alleles have no defined kinship index
        let known: Vec<bool> = (1..=ladder)
            .map(|a| freqs.get(a as Allele).is_some_and(|p| p > 0.0))
            .collect();
        let genotypes: Vec<Genotype> = Genotype::enumerate(ladder).collect();
        let freq = |a: Allele| freqs.get(a).ok_or(KinError::MissingFrequency { locus, allele: a });

        let mut values = vec![f64::NAN; n0 * n0];
        let mut terms = retain_terms.then(|| {
            vec![
                KinshipTerms {
                    ibd0: f64::NAN,
                    ibd1: f64::NAN,
                    ibd2: f64::NAN,
                };
                n0 * n0
            ]
        });

        for (i, &gi) in genotypes.iter().enumerate() {
            if !genotype_known(&known, gi) {
                continue;
            }
            for (j, &gj) in genotypes.iter().enumerate().skip(i) {
                if !genotype_known(&known, gj) {
                    continue;
                }
                let cell_terms = kinship_terms(gi, gj, freq, params)?;
                let value = cell_terms.total();
                values[i * n0 + j] = value;
                values[j * n0 + i] = value;
                if let Some(t) = terms.as_mut() {
                    t[i * n0 + j] = cell_terms;
                    t[j * n0 + i] = cell_terms;
                }
            }
        }

        Ok(Self::assemble(TableKind::Kinship, locus, ladder, values, true, known, terms))
    }

    /// 1 when the genotypes are identical, 0 otherwise
    pub fn identity(locus: usize, ladder: usize) -> Self {
        Self::by_genotypes(TableKind::Identity, locus, ladder, |gi, gj| {
            if gi == gj {
                1.0
            } else {
                0.0
            }
        })
    }

    /// Number of alleles shared by state (0, 1 or 2)
    pub fn shared_alleles(locus: usize, ladder: usize) -> Self {
        Self::by_genotypes(TableKind::SharedAlleles, locus, ladder, |gi, gj| {
            f64::from(gi.shared_alleles(&gj))
        })
    }

    /// Caller-supplied flat table of `N0 * N0` values
    ///
    /// `symmetric` is verified, not assumed.
    pub fn from_values(locus: usize, values: Vec<f64>, symmetric: bool) -> Result<Self> {
        let ladder = ladder_from_table_len(values.len()).ok_or_else(|| {
            KinError::invalid_parameter(format!(
                "table of {} cells is not N0 x N0 for any ladder",
                values.len()
            ))
        })?;
        if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(KinError::invalid_parameter(format!(
                "table for locus {} holds non-finite value {}",
                locus, bad
            )));
        }
        let n0 = genotype_count(ladder);
        if symmetric {
            for i in 0..n0 {
                for j in (i + 1)..n0 {
                    if values[i * n0 + j] != values[j * n0 + i] {
                        return Err(KinError::invalid_parameter(format!(
                            "table for locus {} is not symmetric at ({}, {})",
                            locus, i, j
                        )));
                    }
                }
            }
        }
        Ok(Self::assemble(
            TableKind::Custom,
            locus,
            ladder,
            values,
            symmetric,
            vec![true; ladder],
            None,
        ))
    }

    fn by_genotypes<F: Fn(Genotype, Genotype) -> f64>(
        kind: TableKind,
        locus: usize,
        ladder: usize,
        f: F,
    ) -> Self {
        let n0 = genotype_count(ladder);
        let genotypes: Vec<Genotype> = Genotype::enumerate(ladder).collect();
        let mut values = vec![0.0; n0 * n0];
        for (i, &gi) in genotypes.iter().enumerate() {
            for (j, &gj) in genotypes.iter().enumerate() {
                values[i * n0 + j] = f(gi, gj);
            }
        }
        Self::assemble(kind, locus, ladder, values, true, vec![true; ladder], None)
    }

    fn assemble(
        kind: TableKind,
        locus: usize,
        ladder: usize,
        values: Vec<f64>,
        symmetric: bool,
        known: Vec<bool>,
        terms: Option<Vec<KinshipTerms>>,
    ) -> Self {
        let finite = values.iter().copied().filter(|v| v.is_finite());
        let (min_value, max_value) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        Self {
            kind,
            locus,
            ladder,
            n0: genotype_count(ladder),
            values,
            symmetric,
            known,
            min_value,
            max_value,
            terms,
        }
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn locus(&self) -> usize {
        self.locus
    }

    pub fn ladder(&self) -> usize {
        self.ladder
    }

    /// Number of canonical genotypes (table side length)
    pub fn n0(&self) -> usize {
        self.n0
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    pub fn min_value(&self) -> f64 {
        self.min_value
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    pub fn has_terms(&self) -> bool {
        self.terms.is_some()
    }

    /// Whether `allele` can be looked up in this table
    pub fn knows(&self, allele: Allele) -> bool {
        allele >= 1 && (allele as usize) <= self.ladder && self.known[allele as usize - 1]
    }

    fn genotype_index(&self, g: Genotype) -> Result<usize> {
        if g.hi() as usize > self.ladder {
            return Err(KinError::IndexOutOfRange {
                index: g.hi() as usize,
                len: self.ladder,
            });
        }
        Ok(g.index_unchecked(self.ladder))
    }

    fn checked_cell(&self, row: Genotype, col: Genotype) -> Result<usize> {
        let i = self.genotype_index(row)?;
        let j = self.genotype_index(col)?;
        for g in [row, col] {
            for a in g.alleles() {
                if !self.known[a as usize - 1] {
                    return Err(KinError::MissingFrequency {
                        locus: self.locus,
                        allele: a,
                    });
                }
            }
        }
        Ok(i * self.n0 + j)
    }

    /// Value for the (row, col) genotype pair
    pub fn lookup(&self, row: Genotype, col: Genotype) -> Result<f64> {
        self.checked_cell(row, col).map(|cell| self.values[cell])
    }

    /// Value at raw genotype indices
    pub fn lookup_index(&self, i: usize, j: usize) -> Result<f64> {
        if i >= self.n0 || j >= self.n0 {
            return Err(KinError::IndexOutOfRange {
                index: i.max(j),
                len: self.n0,
            });
        }
        Ok(self.values[i * self.n0 + j])
    }

    /// k0/k1/k2 breakdown of a kinship cell, when retained
    pub fn lookup_terms(&self, row: Genotype, col: Genotype) -> Result<Option<KinshipTerms>> {
        let cell = self.checked_cell(row, col)?;
        Ok(self.terms.as_ref().map(|t| t[cell]))
    }

    /// Value at validated indices; the scan engine's inner loop
    #[inline]
    pub(crate) fn value_at(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n0 + j]
    }

    /// Every cell, row-major
    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

fn genotype_known(known: &[bool], g: Genotype) -> bool {
    g.alleles().iter().all(|&a| known[a as usize - 1])
}

/// Genotype indices of a database validated against a table set, row-major
#[derive(Debug, Clone)]
pub struct IndexedDatabase {
    nloci: usize,
    indices: Vec<u32>,
}

impl IndexedDatabase {
    pub fn len(&self) -> usize {
        if self.nloci == 0 {
            0
        } else {
            self.indices.len() / self.nloci
        }
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline]
    pub fn row(&self, row: usize) -> &[u32] {
        &self.indices[row * self.nloci..(row + 1) * self.nloci]
    }
}

/// One table per locus plus the rule combining them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocusTables {
    tables: Vec<LocusTable>,
    aggregate: Aggregate,
    params: Option<KinshipParams>,
}

impl LocusTables {
    pub fn from_tables(tables: Vec<LocusTable>, aggregate: Aggregate) -> Result<Self> {
        if tables.is_empty() {
            return Err(KinError::invalid_parameter("at least one locus table is required"));
        }
        Ok(Self {
            tables,
            aggregate,
            params: None,
        })
    }

    /// Kinship-index tables for every locus of a frequency table (product aggregate)
    pub fn kinship(
        freqs: &AlleleFrequencyTable,
        params: &KinshipParams,
        retain_terms: bool,
    ) -> Result<Self> {
        let tables = freqs
            .loci()
            .iter()
            .enumerate()
            .map(|(m, locus)| LocusTable::kinship(m, locus, params, retain_terms))
            .collect::<Result<Vec<_>>>()?;
        let mut set = Self::from_tables(tables, Aggregate::Product)?;
        set.params = Some(*params);
        Ok(set)
    }

    /// Identity tables sized to the alleles observed in `databases` (sum = matching loci)
    pub fn identity(databases: &[&Database]) -> Result<Self> {
        let ladders = observed_ladders(databases)?;
        let tables = ladders
            .iter()
            .enumerate()
            .map(|(m, &ladder)| LocusTable::identity(m, ladder))
            .collect();
        Self::from_tables(tables, Aggregate::Sum)
    }

    /// Shared-allele tables sized to the alleles observed in `databases`
    pub fn shared_alleles(databases: &[&Database]) -> Result<Self> {
        let ladders = observed_ladders(databases)?;
        let tables = ladders
            .iter()
            .enumerate()
            .map(|(m, &ladder)| LocusTable::shared_alleles(m, ladder))
            .collect();
        Self::from_tables(tables, Aggregate::Sum)
    }

    pub fn nloci(&self) -> usize {
        self.tables.len()
    }

    pub fn table(&self, locus: usize) -> &LocusTable {
        &self.tables[locus]
    }

    pub fn tables(&self) -> &[LocusTable] {
        &self.tables
    }

    pub fn aggregate(&self) -> Aggregate {
        self.aggregate
    }

    pub fn params(&self) -> Option<&KinshipParams> {
        self.params.as_ref()
    }

    pub fn is_symmetric(&self) -> bool {
        self.tables.iter().all(|t| t.is_symmetric())
    }

    /// Validate a database against the tables and resolve its genotype indices
    pub fn index_database(&self, db: &Database) -> Result<IndexedDatabase> {
        if db.nloci() != self.nloci() {
            return Err(KinError::dimension_mismatch(
                "database loci vs locus tables",
                self.nloci(),
                db.nloci(),
            ));
        }
        let mut indices = Vec::with_capacity(db.len() * db.nloci());
        for row in 0..db.len() {
            for (m, table) in self.tables.iter().enumerate() {
                let g = db.genotype(row, m);
                for a in g.alleles() {
                    if a as usize > table.ladder() {
                        return Err(KinError::InvalidAllele {
                            allele: i64::from(a),
                            reason: format!(
                                "profile '{}' locus {} is outside the ladder of length {}",
                                db.ids()[row],
                                m + 1,
                                table.ladder()
                            ),
                        });
                    }
                    if !table.knows(a) {
                        return Err(KinError::MissingFrequency { locus: m, allele: a });
                    }
                }
                indices.push(g.index_unchecked(table.ladder()) as u32);
            }
        }
        Ok(IndexedDatabase {
            nloci: db.nloci(),
            indices,
        })
    }

    /// Whether early abandonment bounds are valid (all values non-negative)
    pub fn supports_bounds(&self) -> bool {
        self.tables.iter().all(|t| t.min_value() >= 0.0)
    }

    /// `bounds[m]`: the largest value loci `m..` can still contribute
    pub fn suffix_bounds(&self) -> Vec<f64> {
        let n = self.tables.len();
        let mut bounds = vec![self.aggregate.identity(); n + 1];
        for m in (0..n).rev() {
            bounds[m] = self.aggregate.combine(bounds[m + 1], self.tables[m].max_value());
        }
        bounds
    }

    /// Aggregate over loci for two index rows, accumulated left to right
    #[inline]
    pub(crate) fn evaluate(&self, row: &[u32], col: &[u32]) -> f64 {
        let mut acc = self.aggregate.identity();
        for (m, table) in self.tables.iter().enumerate() {
            acc = self.aggregate.combine(acc, table.value_at(row[m] as usize, col[m] as usize));
        }
        acc
    }

    /// Per-locus contributions for two index rows
    pub(crate) fn contributions(&self, row: &[u32], col: &[u32]) -> Vec<f64> {
        self.tables
            .iter()
            .enumerate()
            .map(|(m, table)| table.value_at(row[m] as usize, col[m] as usize))
            .collect()
    }
}

fn observed_ladders(databases: &[&Database]) -> Result<Vec<usize>> {
    let first = databases
        .first()
        .ok_or_else(|| KinError::invalid_parameter("at least one database is required"))?;
    for db in &databases[1..] {
        first.check_layout(db)?;
    }
    Ok((0..first.nloci())
        .map(|m| {
            databases
                .iter()
                .flat_map(|db| db.locus_alleles(m))
                .max()
                .unwrap_or(1) as usize
        })
        .collect())
}
