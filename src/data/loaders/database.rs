// database.rs - Profile database loader (id column, then two allele columns per locus)

use super::open_reader;
use crate::data::profile::Database;
use regex::Regex;
use std::path::Path;

/// Locus name of an allele column pair, dropping a `.1` / `_1` / `.a` style suffix
fn locus_name(suffix: &Regex, column: &str) -> String {
    suffix
        .captures(column)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| column.to_string())
}

/// Load a database from a TSV/CSV file with a header row
///
/// Every row holds a profile id followed by 2·nloci positive allele codes.
pub fn load_database(path: &Path) -> Result<Database, String> {
    let mut reader = open_reader(path)?;
    let header = reader
        .headers()
        .map_err(|e| format!("Failed to read header of {}: {}", path.display(), e))?
        .clone();

    let allele_columns = header.len().saturating_sub(1);
    if allele_columns == 0 || allele_columns % 2 != 0 {
        return Err(format!(
            "{}: expected an id column followed by an even number of allele columns, found {} columns",
            path.display(),
            header.len()
        ));
    }
    let nloci = allele_columns / 2;
    let suffix = Regex::new(r"^(.+?)[._\-](?:1|a|A)$").map_err(|e| e.to_string())?;
    let names: Vec<String> = (0..nloci).map(|m| locus_name(&suffix, &header[1 + 2 * m])).collect();

    let mut db = Database::new(nloci)
        .with_locus_names(names)
        .map_err(|e| e.to_string())?;
    let mut alleles = Vec::with_capacity(allele_columns);
    for (line, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| format!("{}: failed to read row {}: {}", path.display(), line + 2, e))?;
        if record.len() != header.len() {
            return Err(format!(
                "{}: row {} has {} columns, expected {}",
                path.display(),
                line + 2,
                record.len(),
                header.len()
            ));
        }
        alleles.clear();
        for (k, field) in record.iter().skip(1).enumerate() {
            let allele = field.parse::<i64>().map_err(|_| {
                format!(
                    "{}: invalid allele '{}' at row {} column {}",
                    path.display(),
                    field,
                    line + 2,
                    &header[k + 1]
                )
            })?;
            alleles.push(allele);
        }
        db.push(&record[0], &alleles)
            .map_err(|e| format!("{}: row {}: {}", path.display(), line + 2, e))?;
    }
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_tsv_database() {
        let file = write_file(
            ".tsv",
            "id\tD3.1\tD3.2\tvWA_1\tvWA_2\n# comment\ns1\t3\t5\t2\t2\ns2\t1\t4\t6\t3\n",
        );
        let db = load_database(file.path()).unwrap();
        assert_eq!(db.len(), 2);
        assert_eq!(db.nloci(), 2);
        assert_eq!(db.locus_names(), &["D3".to_string(), "vWA".to_string()]);
        assert_eq!(db.ids(), &["s1".to_string(), "s2".to_string()]);
        assert_eq!(db.genotype(1, 1).alleles(), [6, 3]);
    }

    #[test]
    fn test_load_csv_database() {
        let file = write_file(".csv", "id,D21S11,D21S11,TH01,TH01\nx,1,2,3,4\n");
        let db = load_database(file.path()).unwrap();
        assert_eq!(db.locus_names(), &["D21S11".to_string(), "TH01".to_string()]);
        assert_eq!(db.genotype(0, 0).alleles(), [2, 1]);
    }

    #[test]
    fn test_rejects_malformed_rows() {
        let odd = write_file(".tsv", "id\tA.1\tA.2\tB.1\nx\t1\t2\t3\n");
        assert!(load_database(odd.path()).unwrap_err().contains("even number"));

        let bad = write_file(".tsv", "id\tA.1\tA.2\nx\t1\tNA\n");
        assert!(load_database(bad.path()).unwrap_err().contains("invalid allele 'NA'"));

        let zero = write_file(".tsv", "id\tA.1\tA.2\nx\t0\t2\n");
        assert!(load_database(zero.path()).is_err());
    }
}
