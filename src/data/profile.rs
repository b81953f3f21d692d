// profile.rs - STR profile and database data structures

use crate::core::genotype::{Allele, Genotype};
use crate::error::{KinError, Result};
use regex::Regex;
use std::collections::HashSet;

/// Borrowed view of one individual's profile
#[derive(Debug, Clone, Copy)]
pub struct Profile<'a> {
    pub id: &'a str,
    pub genotypes: &'a [Genotype],
}

impl Profile<'_> {
    pub fn nloci(&self) -> usize {
        self.genotypes.len()
    }
}

/// Collection of profiles sharing one locus layout
///
/// Genotypes are canonicalized on the way in and stored row-major,
/// `nloci` per profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Database {
    nloci: usize,
    ids: Vec<String>,
    locus_names: Vec<String>,
    genotypes: Vec<Genotype>,
}

impl Database {
    /// Create an empty database with a fixed number of loci
    pub fn new(nloci: usize) -> Self {
        Self {
            nloci,
            ids: Vec::new(),
            locus_names: default_locus_names(nloci),
            genotypes: Vec::new(),
        }
    }

    /// Build from allele rows of `2 * nloci` columns (locus m in columns 2m, 2m+1)
    pub fn from_rows(nloci: usize, rows: &[Vec<i64>]) -> Result<Self> {
        let mut db = Self::new(nloci);
        for (row_idx, row) in rows.iter().enumerate() {
            db.push(format!("{}", row_idx + 1), row)?;
        }
        Ok(db)
    }

    /// Build from a flat row-major allele vector of `n * 2 * nloci` codes
    pub fn from_flat(nloci: usize, alleles: &[i64]) -> Result<Self> {
        let width = 2 * nloci;
        if width == 0 {
            return Err(KinError::invalid_parameter("database needs at least one locus"));
        }
        if alleles.len() % width != 0 {
            return Err(KinError::dimension_mismatch(
                "flat allele vector length modulo 2*nloci",
                0,
                alleles.len() % width,
            ));
        }
        let mut db = Self::new(nloci);
        for (row_idx, row) in alleles.chunks(width).enumerate() {
            db.push(format!("{}", row_idx + 1), row)?;
        }
        Ok(db)
    }

    /// Append one profile given as `2 * nloci` raw allele codes
    pub fn push(&mut self, id: impl Into<String>, row: &[i64]) -> Result<()> {
        if row.len() != 2 * self.nloci {
            return Err(KinError::dimension_mismatch(
                "profile columns",
                2 * self.nloci,
                row.len(),
            ));
        }
        let mut genotypes = Vec::with_capacity(self.nloci);
        for pair in row.chunks(2) {
            genotypes.push(Genotype::new(pair[0], pair[1])?);
        }
        self.genotypes.extend(genotypes);
        self.ids.push(id.into());
        Ok(())
    }

    /// Replace the default locus names ("locus1", ...)
    pub fn with_locus_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.nloci {
            return Err(KinError::dimension_mismatch("locus names", self.nloci, names.len()));
        }
        self.locus_names = names;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn nloci(&self) -> usize {
        self.nloci
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn locus_names(&self) -> &[String] {
        &self.locus_names
    }

    /// Canonical genotype of profile `row` at `locus`
    #[inline]
    pub fn genotype(&self, row: usize, locus: usize) -> Genotype {
        self.genotypes[row * self.nloci + locus]
    }

    pub fn profile(&self, row: usize) -> Profile<'_> {
        let start = row * self.nloci;
        Profile {
            id: &self.ids[row],
            genotypes: &self.genotypes[start..start + self.nloci],
        }
    }

    pub fn profiles(&self) -> impl Iterator<Item = Profile<'_>> {
        (0..self.len()).map(move |row| self.profile(row))
    }

    /// Every allele observed at `locus`
    pub fn locus_alleles(&self, locus: usize) -> impl Iterator<Item = Allele> + '_ {
        (0..self.len()).flat_map(move |row| self.genotype(row, locus).alleles())
    }

    /// Fail unless `other` shares this database's locus layout
    pub fn check_layout(&self, other: &Database) -> Result<()> {
        if self.nloci != other.nloci {
            return Err(KinError::dimension_mismatch(
                "compared databases (loci)",
                self.nloci,
                other.nloci,
            ));
        }
        Ok(())
    }

    /// Keep only the profiles passing the include/exclude filters
    pub fn filter_profiles(
        &self,
        include: Option<&Regex>,
        exclude: Option<&Regex>,
        include_set: Option<&HashSet<String>>,
        exclude_set: Option<&HashSet<String>>,
    ) -> Self {
        let mut filtered = Self {
            nloci: self.nloci,
            ids: Vec::new(),
            locus_names: self.locus_names.clone(),
            genotypes: Vec::new(),
        };
        for profile in self.profiles() {
            if let Some(regex) = include {
                if !regex.is_match(profile.id) {
                    continue;
                }
            }
            if let Some(regex) = exclude {
                if regex.is_match(profile.id) {
                    continue;
                }
            }
            if let Some(set) = include_set {
                if !set.contains(profile.id) {
                    continue;
                }
            }
            if let Some(set) = exclude_set {
                if set.contains(profile.id) {
                    continue;
                }
            }
            filtered.ids.push(profile.id.to_string());
            filtered.genotypes.extend_from_slice(profile.genotypes);
        }
        filtered
    }

    /// Print a short summary in the console style of the CLI
    pub fn print_summary(&self, label: &str) {
        println!(
            "📊 {}: {} profiles × {} loci",
            label,
            self.len(),
            self.nloci
        );
    }
}

fn default_locus_names(nloci: usize) -> Vec<String> {
    (1..=nloci).map(|m| format!("locus{}", m)).collect()
}
