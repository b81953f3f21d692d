// pairs.rs - (target, member) comparison list loader

use super::open_reader;
use crate::data::profile::Database;
use std::collections::HashMap;
use std::path::Path;

fn positions(db: &Database) -> HashMap<&str, usize> {
    db.ids().iter().enumerate().map(|(k, id)| (id.as_str(), k)).collect()
}

/// Load `target`/`member` id pairs and resolve them to row indices
///
/// The file has a header row; the first two columns are read.
pub fn load_pairs(
    path: &Path,
    targets: &Database,
    members: &Database,
) -> Result<Vec<(usize, usize)>, String> {
    let mut reader = open_reader(path)?;
    let target_rows = positions(targets);
    let member_rows = positions(members);
    let mut pairs = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let row = line + 2;
        let record = record
            .map_err(|e| format!("{}: failed to read row {}: {}", path.display(), row, e))?;
        if record.len() < 2 {
            return Err(format!("{}: row {} needs a target and a member id", path.display(), row));
        }
        let t = target_rows
            .get(&record[0])
            .ok_or_else(|| {
                format!("{}: unknown target '{}' at row {}", path.display(), &record[0], row)
            })?;
        let m = member_rows
            .get(&record[1])
            .ok_or_else(|| {
                format!("{}: unknown member '{}' at row {}", path.display(), &record[1], row)
            })?;
        pairs.push((*t, *m));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn db(ids: &[&str]) -> Database {
        let mut db = Database::new(1);
        for id in ids {
            db.push(*id, &[1, 2]).unwrap();
        }
        db
    }

    #[test]
    fn test_resolves_ids() {
        let mut file = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        file.write_all(b"target\tmember\nt2\tm1\nt1\tm3\n").unwrap();
        let pairs = load_pairs(file.path(), &db(&["t1", "t2"]), &db(&["m1", "m2", "m3"])).unwrap();
        assert_eq!(pairs, vec![(1, 0), (0, 2)]);

        let mut bad = tempfile::Builder::new().suffix(".tsv").tempfile().unwrap();
        bad.write_all(b"target\tmember\nt1\tm9\n").unwrap();
        let err = load_pairs(bad.path(), &db(&["t1"]), &db(&["m1"])).unwrap_err();
        assert!(err.contains("unknown member 'm9'"));
    }
}
