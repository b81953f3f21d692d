// frequencies.rs - Long-format allele frequency loader (locus, allele, frequency)

use super::open_reader;
use crate::core::genotype::{check_allele, Allele};
use crate::data::frequencies::{AlleleFrequencyTable, LocusFrequencies};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

fn column(header: &csv::StringRecord, name: &str, path: &Path) -> Result<usize, String> {
    header
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| format!("{}: missing '{}' column", path.display(), name))
}

/// Load a frequency table; loci keep their order of first appearance
pub fn load_frequencies(path: &Path) -> Result<AlleleFrequencyTable, String> {
    let mut reader = open_reader(path)?;
    let header = reader
        .headers()
        .map_err(|e| format!("Failed to read header of {}: {}", path.display(), e))?
        .clone();
    let locus_col = column(&header, "locus", path)?;
    let allele_col = column(&header, "allele", path)?;
    let freq_col = column(&header, "frequency", path)?;

    let mut order: Vec<String> = Vec::new();
    let mut loci: HashMap<String, BTreeMap<Allele, f64>> = HashMap::new();
    for (line, record) in reader.records().enumerate() {
        let row = line + 2;
        let record = record
            .map_err(|e| format!("{}: failed to read row {}: {}", path.display(), row, e))?;
        let field = |col: usize| {
            record
                .get(col)
                .ok_or_else(|| {
                    format!("{}: row {} is missing column {}", path.display(), row, col + 1)
                })
        };
        let locus = field(locus_col)?.to_string();
        let allele = field(allele_col)?
            .parse::<i64>()
            .map_err(|_| format!("{}: invalid allele at row {}", path.display(), row))
            .and_then(|a| {
                check_allele(a).map_err(|e| format!("{}: row {}: {}", path.display(), row, e))
            })?;
        let freq = field(freq_col)?
            .parse::<f64>()
            .map_err(|_| format!("{}: invalid frequency at row {}", path.display(), row))?;

        let entry = loci.entry(locus.clone()).or_insert_with(|| {
            order.push(locus.clone());
            BTreeMap::new()
        });
        if entry.insert(allele, freq).is_some() {
            return Err(format!(
                "{}: allele {} of locus {} listed twice",
                path.display(),
                allele,
                locus
            ));
        }
    }
    if order.is_empty() {
        return Err(format!("{}: no frequencies found", path.display()));
    }

    order
        .into_iter()
        .map(|name| {
            let freqs = loci.remove(&name).unwrap_or_default();
            LocusFrequencies::new(name, freqs).map_err(|e| format!("{}: {}", path.display(), e))
        })
        .collect::<Result<Vec<_>, String>>()
        .map(AlleleFrequencyTable::new)
}

/// Reorder a frequency table to follow a database's locus names
pub fn align_frequencies(
    table: &AlleleFrequencyTable,
    names: &[String],
) -> Result<AlleleFrequencyTable, String> {
    let missing: Vec<&str> = names
        .iter()
        .filter(|n| !table.loci().iter().any(|l| &l.name == *n))
        .map(|n| n.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(format!("No frequencies for loci: {}", missing.join(", ")));
    }
    let loci = names
        .iter()
        .filter_map(|n| table.loci().iter().find(|l| &l.name == n).cloned())
        .collect();
    Ok(AlleleFrequencyTable::new(loci))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_long_format() {
        let file = write_file("Locus\tAllele\tFrequency\nvWA\t1\t0.25\nvWA\t3\t0.75\nD3\t2\t1.0\n");
        let table = load_frequencies(file.path()).unwrap();
        assert_eq!(table.nloci(), 2);
        assert_eq!(table.locus(0).name, "vWA");
        assert_eq!(table.locus(0).get(3), Some(0.75));
        assert!(!table.locus(0).contains(2));
        assert_eq!(table.locus(0).ladder(), 3);

        let aligned = align_frequencies(&table, &["D3".to_string(), "vWA".to_string()]).unwrap();
        assert_eq!(aligned.locus(0).name, "D3");
        assert!(align_frequencies(&table, &["TH01".to_string()])
            .unwrap_err()
            .contains("TH01"));
    }

    #[test]
    fn test_rejects_bad_entries() {
        let dup = write_file("locus\tallele\tfrequency\nA\t1\t0.5\nA\t1\t0.5\n");
        assert!(load_frequencies(dup.path()).unwrap_err().contains("listed twice"));

        let negative = write_file("locus\tallele\tfrequency\nA\t1\t-0.5\n");
        assert!(load_frequencies(negative.path()).is_err());

        let no_column = write_file("locus\tallele\tp\nA\t1\t0.5\n");
        assert!(load_frequencies(no_column.path()).unwrap_err().contains("frequency"));
    }
}
