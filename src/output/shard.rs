// shard.rs - Shard result files for distributed scans and their merging

use crate::core::scan::{merge_hits, merge_pair_values, Hit, MatchHit, MatchTally, PairValues};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// What one shard computed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardPayload {
    /// Pair statistics from `start`; `None` marks pairs not evaluated
    Values { n: usize, start: u64, values: Vec<Option<f64>> },
    Hits { hits: Vec<Hit> },
    Tally { tally: MatchTally },
    MatchHits { hits: Vec<MatchHit> },
}

impl ShardPayload {
    pub fn from_pair_values(values: &PairValues) -> Self {
        ShardPayload::Values {
            n: values.n,
            start: values.start,
            values: values.values.iter().map(|v| (!v.is_nan()).then_some(*v)).collect(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ShardPayload::Values { .. } => "values",
            ShardPayload::Hits { .. } => "hits",
            ShardPayload::Tally { .. } => "tally",
            ShardPayload::MatchHits { .. } => "match_hits",
        }
    }
}

/// JSON document written by one `shard` job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardFile {
    pub version: String,
    pub command: String,
    pub generated: String,
    pub njobs: u64,
    pub job: u64,
    pub complete: bool,
    pub evaluated: u64,
    pub ids: Vec<String>,
    pub payload: ShardPayload,
}

impl ShardFile {
    pub fn new(
        command: &str,
        njobs: u64,
        job: u64,
        complete: bool,
        evaluated: u64,
        ids: &[String],
        payload: ShardPayload,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            command: command.to_string(),
            generated: chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            njobs,
            job,
            complete,
            evaluated,
            ids: ids.to_vec(),
            payload,
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize shard: {}", e))?;
        std::fs::write(path, json)
            .map_err(|e| format!("Failed to write shard file '{}': {}", path.display(), e))?;
        println!("💾 Shard {}/{} written to: {}", self.job, self.njobs, path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read shard file '{}': {}", path.display(), e))?;
        serde_json::from_str(&text)
            .map_err(|e| format!("Invalid shard file '{}': {}", path.display(), e))
    }
}

/// Combined result of every shard of a run
#[derive(Debug, Clone, PartialEq)]
pub enum MergedShards {
    Values(PairValues),
    Hits(Vec<Hit>),
    Tally(MatchTally),
    MatchHits(Vec<MatchHit>),
}

/// Merge the shard files of one run
///
/// Every job of the run must be present exactly once, complete, and of the
/// same kind; the profile ids must agree.
pub fn merge_shard_files(files: Vec<ShardFile>) -> Result<(Vec<String>, MergedShards), String> {
    let first = files.first().ok_or("No shard files to merge")?;
    let njobs = first.njobs;
    let kind = first.payload.kind();
    let ids = first.ids.clone();

    let mut seen = BTreeSet::new();
    for file in &files {
        if file.njobs != njobs {
            return Err(format!(
                "Shard {} was produced with njobs={}, expected {}",
                file.job, file.njobs, njobs
            ));
        }
        if file.payload.kind() != kind {
            return Err(format!(
                "Shard {} holds {}, expected {}",
                file.job,
                file.payload.kind(),
                kind
            ));
        }
        if file.ids != ids {
            return Err(format!("Shard {} was computed over a different database", file.job));
        }
        if !file.complete {
            return Err(format!(
                "Shard {} is incomplete ({} pairs evaluated); rerun it before merging",
                file.job, file.evaluated
            ));
        }
        if !seen.insert(file.job) {
            return Err(format!("Shard {} appears more than once", file.job));
        }
    }
    let missing: Vec<String> = (1..=njobs)
        .filter(|j| !seen.contains(j))
        .map(|j| j.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(format!("Missing shards: {}", missing.join(", ")));
    }

    let merged = match kind {
        "values" => {
            let blocks = files
                .into_iter()
                .filter_map(|f| match f.payload {
                    ShardPayload::Values { n, start, values } => Some(PairValues {
                        n,
                        start,
                        values: values.into_iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
                    }),
                    _ => None,
                })
                .collect();
            MergedShards::Values(merge_pair_values(blocks).map_err(|e| e.to_string())?)
        }
        "hits" => MergedShards::Hits(merge_hits(
            files
                .into_iter()
                .filter_map(|f| match f.payload {
                    ShardPayload::Hits { hits } => Some(hits),
                    _ => None,
                })
                .collect(),
        )),
        "tally" => {
            let mut total: Option<MatchTally> = None;
            for file in files {
                if let ShardPayload::Tally { tally } = file.payload {
                    match total.as_mut() {
                        None => total = Some(tally),
                        Some(t) => t.merge(&tally).map_err(|e| e.to_string())?,
                    }
                }
            }
            MergedShards::Tally(total.ok_or("No tally shards found")?)
        }
        _ => {
            let mut hits: Vec<MatchHit> = files
                .into_iter()
                .filter_map(|f| match f.payload {
                    ShardPayload::MatchHits { hits } => Some(hits),
                    _ => None,
                })
                .flatten()
                .collect();
            hits.sort_by_key(|h| (h.i, h.j));
            MergedShards::MatchHits(hits)
        }
    };
    Ok((ids, merged))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<String> {
        ["a", "b", "c"].iter().map(|s| s.to_string()).collect()
    }

    fn value_shard(job: u64, start: u64, values: Vec<f64>) -> ShardFile {
        let payload = ShardPayload::from_pair_values(&PairValues { n: 3, start, values });
        ShardFile::new("strkin shard", 2, job, true, 0, &ids(), payload)
    }

    #[test]
    fn test_json_round_trip_keeps_missing_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard1.json");
        let mut shard = value_shard(1, 0, vec![1.0, f64::NAN]);
        shard.complete = false;
        shard.save(&path).unwrap();
        let loaded = ShardFile::load(&path).unwrap();
        assert_eq!(loaded, shard);
        match loaded.payload {
            ShardPayload::Values { values, .. } => assert_eq!(values, vec![Some(1.0), None]),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_merge_values_in_any_order() {
        let files = vec![value_shard(2, 1, vec![2.0, 3.0]), value_shard(1, 0, vec![1.0])];
        let (merged_ids, merged) = merge_shard_files(files).unwrap();
        assert_eq!(merged_ids, ids());
        assert_eq!(
            merged,
            MergedShards::Values(PairValues {
                n: 3,
                start: 0,
                values: vec![1.0, 2.0, 3.0]
            })
        );
    }

    #[test]
    fn test_merge_rejects_bad_sets() {
        assert!(merge_shard_files(vec![value_shard(1, 0, vec![1.0])])
            .unwrap_err()
            .contains("Missing shards: 2"));
        assert!(merge_shard_files(vec![value_shard(1, 0, vec![1.0]), value_shard(1, 0, vec![1.0])])
            .unwrap_err()
            .contains("more than once"));
        let mut partial = value_shard(2, 1, vec![2.0, 3.0]);
        partial.complete = false;
        assert!(merge_shard_files(vec![value_shard(1, 0, vec![1.0]), partial])
            .unwrap_err()
            .contains("incomplete"));
        assert!(merge_shard_files(Vec::new()).is_err());
    }

    #[test]
    fn test_merge_tallies() {
        let mut a = MatchTally::new(1);
        a.counts[0] = 2;
        let mut b = MatchTally::new(1);
        b.counts[0] = 1;
        b.counts[3] = 1;
        let files = vec![
            ShardFile::new("x", 2, 1, true, 2, &ids(), ShardPayload::Tally { tally: a }),
            ShardFile::new("x", 2, 2, true, 2, &ids(), ShardPayload::Tally { tally: b }),
        ];
        match merge_shard_files(files).unwrap().1 {
            MergedShards::Tally(t) => {
                assert_eq!(t.total(), 4);
                assert_eq!(t.get(1, 1), 1);
            }
            other => panic!("unexpected merge {:?}", other),
        }
    }
}
