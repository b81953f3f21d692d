// cache.rs - LZ4-compressed cache of built locus tables

use crate::core::kinship::KinshipParams;
use crate::core::table::{Aggregate, LocusTables};
use crate::data::AlleleFrequencyTable;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;

/// Bumped whenever the serialized layout changes
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// What the cached tables were built from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: String,
    pub created: String,
    pub kinship_params: Option<KinshipParams>,
    pub aggregate: Aggregate,
    /// CRC32 of the serialized frequency table, empty for non-kinship tables
    pub frequency_fingerprint: String,
    pub loci: Vec<String>,
    pub user_note: Option<String>,
    pub total_cells: usize,
    pub format_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCache {
    pub metadata: CacheMetadata,
    pub tables: LocusTables,
}

/// Stable fingerprint of a frequency table
pub fn frequency_fingerprint(freqs: &AlleleFrequencyTable) -> Result<String, String> {
    let bytes = bincode::serialize(freqs)
        .map_err(|e| format!("Failed to fingerprint frequencies: {}", e))?;
    Ok(format!("{:08x}-{}", crc32fast::hash(&bytes), freqs.nloci()))
}

impl TableCache {
    pub fn new(
        tables: LocusTables,
        freqs: Option<&AlleleFrequencyTable>,
        note: Option<String>,
    ) -> Result<Self, String> {
        let frequency_fingerprint = match freqs {
            Some(f) => frequency_fingerprint(f)?,
            None => String::new(),
        };
        let loci = match freqs {
            Some(f) => f.loci().iter().map(|l| l.name.clone()).collect(),
            None => (1..=tables.nloci()).map(|m| format!("locus{}", m)).collect(),
        };
        let metadata = CacheMetadata {
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            kinship_params: tables.params().copied(),
            aggregate: tables.aggregate(),
            frequency_fingerprint,
            loci,
            user_note: note,
            total_cells: tables.tables().iter().map(|t| t.values().len()).sum(),
            format_version: CACHE_FORMAT_VERSION,
        };
        Ok(Self { metadata, tables })
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        println!("💾 Saving table cache to {}...", path.display());
        let start = Instant::now();
        let data = bincode::serialize(self)
            .map_err(|e| format!("Failed to serialize cache: {}", e))?;
        let compressed = lz4_flex::compress_prepend_size(&data);
        std::fs::write(path, &compressed)
            .map_err(|e| format!("Failed to write cache file: {}", e))?;
        println!(
            "✅ Cache saved in {:.2}s ({} loci, {} KB)",
            start.elapsed().as_secs_f64(),
            self.tables.nloci(),
            compressed.len() / 1024
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let compressed = std::fs::read(path)
            .map_err(|e| format!("Failed to read cache file: {}", e))?;
        let data = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| format!("Failed to decompress cache: {}", e))?;
        let cache: TableCache =
            bincode::deserialize(&data).map_err(|e| format!("Failed to deserialize cache: {}", e))?;
        if cache.metadata.format_version != CACHE_FORMAT_VERSION {
            return Err(format!(
                "Cache format version {} is not supported (expected {})",
                cache.metadata.format_version, CACHE_FORMAT_VERSION
            ));
        }
        Ok(cache)
    }

    /// Refuse tables built from other parameters or frequencies
    pub fn check_compatible(
        &self,
        params: Option<&KinshipParams>,
        freqs: Option<&AlleleFrequencyTable>,
    ) -> Result<(), String> {
        if self.metadata.kinship_params.as_ref() != params {
            return Err(format!(
                "Cache kinship parameters mismatch:\n  Cache: {:?}\n  Current: {:?}",
                self.metadata.kinship_params, params
            ));
        }
        if let Some(f) = freqs {
            let current = frequency_fingerprint(f)?;
            if current != self.metadata.frequency_fingerprint {
                return Err(format!(
                    "Cache frequency table mismatch:\n  Cache: {}\n  Current: {}",
                    self.metadata.frequency_fingerprint, current
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kinship::Relationship;
    use crate::data::LocusFrequencies;

    fn freqs(p: f64) -> AlleleFrequencyTable {
        AlleleFrequencyTable::new(vec![
            LocusFrequencies::from_dense("D1", &[p, 1.0 - p]).unwrap(),
            LocusFrequencies::from_dense("D2", &[0.2, 0.0, 0.8]).unwrap(),
        ])
    }

    fn sibs(theta: f64) -> KinshipParams {
        KinshipParams::from_relationship(Relationship::FullSiblings, theta).unwrap()
    }

    #[test]
    fn test_round_trip_keeps_missing_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tables.lz4");
        let f = freqs(0.3);
        let tables = LocusTables::kinship(&f, &sibs(0.01), true).unwrap();
        let cache = TableCache::new(tables.clone(), Some(&f), Some("test".to_string())).unwrap();
        cache.save(&path).unwrap();

        let loaded = TableCache::load(&path).unwrap();
        assert_eq!(loaded.metadata, cache.metadata);
        assert_eq!(loaded.metadata.loci, vec!["D1".to_string(), "D2".to_string()]);
        // NaN cells (allele 2 at D2) survive, compared bitwise
        let before = tables.table(1).values();
        let after = loaded.tables.table(1).values();
        assert_eq!(before.len(), after.len());
        assert!(before.iter().zip(after).all(|(a, b)| a.to_bits() == b.to_bits()));
        assert!(loaded.check_compatible(Some(&sibs(0.01)), Some(&f)).is_ok());
    }

    #[test]
    fn test_rejects_other_parameters() {
        let f = freqs(0.3);
        let tables = LocusTables::kinship(&f, &sibs(0.01), false).unwrap();
        let cache = TableCache::new(tables, Some(&f), None).unwrap();
        let err = cache.check_compatible(Some(&sibs(0.02)), Some(&f)).unwrap_err();
        assert!(err.contains("kinship parameters"));
        let err = cache.check_compatible(Some(&sibs(0.01)), Some(&freqs(0.4))).unwrap_err();
        assert!(err.contains("frequency table"));
        assert!(cache.check_compatible(None, None).is_err());
    }

    #[test]
    fn test_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.lz4");
        std::fs::write(&path, b"not a cache").unwrap();
        assert!(TableCache::load(&path).is_err());
    }
}
