// mod.rs - Output formatters module

pub mod shard;

use crate::core::distribution::Distribution;
use crate::core::rmp::MatchProbabilities;
use crate::core::scan::{CrossMatrix, Hit, MatchHit, MatchTally, PairValues};
use serde::Serialize;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

/// Output file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Tsv,
    Csv,
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tsv" => Ok(OutputFormat::Tsv),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unsupported output format: {}. Use: tsv, csv, json", s)),
        }
    }
}

/// Ensure parent directory exists before creating file
fn ensure_parent_dir(file_path: &str) -> Result<(), String> {
    if let Some(parent) = Path::new(file_path).parent() {
        create_dir_all(parent)
            .map_err(|e| {
                format!("Failed to create parent directory '{}': {}", parent.display(), e)
            })?;
    }
    Ok(())
}

fn create(file_path: &str) -> Result<BufWriter<File>, String> {
    ensure_parent_dir(file_path)?;
    let file = File::create(file_path)
        .map_err(|e| format!("Failed to create output file '{}': {}", file_path, e))?;
    Ok(BufWriter::new(file))
}

fn write_err(e: impl std::fmt::Display) -> String {
    format!("Write error: {}", e)
}

fn generated() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Numbers as written in tables; NaN marks a value that was not computed
fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        format!("{}", v)
    }
}

/// Header and rows of a delimited table
struct Table {
    columns: Vec<String>,
    /// Leading columns holding labels rather than numbers
    labels: usize,
    rows: Vec<Vec<String>>,
}

/// JSON document written for `--format json`
#[derive(Serialize)]
struct JsonReport<'a, T: Serialize> {
    command: &'a str,
    generated: String,
    version: &'static str,
    data: T,
}

fn write_table(
    file_path: &str,
    format: OutputFormat,
    table: Table,
    command_line: &str,
) -> Result<(), String> {
    let mut writer = create(file_path)?;
    if format == OutputFormat::Json {
        let rows: Vec<serde_json::Map<String, serde_json::Value>> = table
            .rows
            .iter()
            .map(|row| {
                table
                    .columns
                    .iter()
                    .zip(row)
                    .enumerate()
                    .map(|(k, (c, v))| {
                        if k < table.labels {
                            return (c.clone(), serde_json::Value::String(v.clone()));
                        }
                        let value = v
                            .parse::<f64>()
                            .ok()
                            .and_then(serde_json::Number::from_f64)
                            .map(serde_json::Value::Number)
                            .unwrap_or_else(|| {
                                if v == "NA" {
                                    serde_json::Value::Null
                                } else {
                                    serde_json::Value::String(v.clone())
                                }
                            });
                        (c.clone(), value)
                    })
                    .collect()
            })
            .collect();
        let report = JsonReport {
            command: command_line,
            generated: generated(),
            version: env!("CARGO_PKG_VERSION"),
            data: rows,
        };
        serde_json::to_writer_pretty(&mut writer, &report).map_err(write_err)?;
        writeln!(writer).map_err(write_err)?;
    } else {
        // Write command header
        writeln!(writer, "# Command: {}", command_line).map_err(write_err)?;
        writeln!(writer, "# Generated: {}", generated()).map_err(write_err)?;
        writeln!(writer, "# strkin v{}", env!("CARGO_PKG_VERSION")).map_err(write_err)?;

        let delimiter = if format == OutputFormat::Csv { b',' } else { b'\t' };
        let mut csv_writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(&mut writer);
        csv_writer.write_record(&table.columns).map_err(write_err)?;
        for row in &table.rows {
            csv_writer.write_record(row).map_err(write_err)?;
        }
        csv_writer.flush().map_err(write_err)?;
    }
    writer.flush().map_err(|e| format!("Flush error: {}", e))?;
    Ok(())
}

/// Square matrix of a full single-database scan
pub fn write_pair_matrix(
    file_path: &str,
    format: OutputFormat,
    ids: &[String],
    values: &PairValues,
    command_line: &str,
) -> Result<(), String> {
    let square = values.to_square(f64::NAN);
    let mut columns = vec!["Profile".to_string()];
    columns.extend(ids.iter().cloned());
    let rows = ids
        .iter()
        .zip(square)
        .map(|(id, row)| {
            let mut out = vec![id.clone()];
            out.extend(row.into_iter().map(fmt_value));
            out
        })
        .collect();
    write_table(file_path, format, Table { columns, labels: 1, rows }, command_line)?;
    println!("✅ Pair matrix written to: {}", file_path);
    Ok(())
}

/// Long-format pair values (sharded or partial scans)
pub fn write_pair_values(
    file_path: &str,
    format: OutputFormat,
    ids: &[String],
    values: &PairValues,
    command_line: &str,
) -> Result<(), String> {
    let columns = ["profile1", "profile2", "value"].map(String::from).to_vec();
    let rows = values
        .iter()
        .map(|(i, j, v)| vec![ids[i].clone(), ids[j].clone(), fmt_value(v)])
        .collect();
    write_table(file_path, format, Table { columns, labels: 2, rows }, command_line)?;
    println!("✅ {} pair values written to: {}", values.len(), file_path);
    Ok(())
}

pub fn write_hits(
    file_path: &str,
    format: OutputFormat,
    ids: &[String],
    hits: &[Hit],
    command_line: &str,
) -> Result<(), String> {
    let columns = ["profile1", "profile2", "value"].map(String::from).to_vec();
    let rows = hits
        .iter()
        .map(|h| vec![ids[h.i].clone(), ids[h.j].clone(), fmt_value(h.value)])
        .collect();
    write_table(file_path, format, Table { columns, labels: 2, rows }, command_line)?;
    println!("✅ {} hits written to: {}", hits.len(), file_path);
    Ok(())
}

/// Target-vs-database matrix: one row per member, one column per target
pub fn write_cross_matrix(
    file_path: &str,
    format: OutputFormat,
    target_ids: &[String],
    member_ids: &[String],
    matrix: &CrossMatrix,
    command_line: &str,
) -> Result<(), String> {
    let mut columns = vec!["Member".to_string()];
    columns.extend(target_ids.iter().cloned());
    let rows = member_ids
        .iter()
        .enumerate()
        .map(|(m, id)| {
            let mut out = vec![id.clone()];
            out.extend(matrix.row(m).iter().map(|&v| fmt_value(v)));
            out
        })
        .collect();
    write_table(file_path, format, Table { columns, labels: 1, rows }, command_line)?;
    println!("✅ Cross matrix ({} × {}) written to: {}", matrix.rows, matrix.cols, file_path);
    Ok(())
}

/// Values for listed (target, member) pairs
pub fn write_cross_pairs(
    file_path: &str,
    format: OutputFormat,
    target_ids: &[String],
    member_ids: &[String],
    pairs: &[(usize, usize)],
    values: &[f64],
    command_line: &str,
) -> Result<(), String> {
    let columns = ["target", "member", "value"].map(String::from).to_vec();
    let rows = pairs
        .iter()
        .zip(values)
        .map(|(&(t, m), &v)| vec![target_ids[t].clone(), member_ids[m].clone(), fmt_value(v)])
        .collect();
    write_table(file_path, format, Table { columns, labels: 2, rows }, command_line)?;
    println!("✅ {} target comparisons written to: {}", values.len(), file_path);
    Ok(())
}

/// Match tally; rows are fully matching loci, columns partially matching loci
pub fn write_tally(
    file_path: &str,
    format: OutputFormat,
    tally: &MatchTally,
    command_line: &str,
) -> Result<(), String> {
    let mut columns = vec!["full\\partial".to_string()];
    columns.extend((0..=tally.nloci).map(|p| p.to_string()));
    let rows = (0..=tally.nloci)
        .map(|f| {
            let mut out = vec![f.to_string()];
            out.extend((0..=tally.nloci).map(|p| tally.get(f, p).to_string()));
            out
        })
        .collect();
    write_table(file_path, format, Table { columns, labels: 0, rows }, command_line)?;
    println!("✅ Match tally ({} pairs) written to: {}", tally.total(), file_path);
    Ok(())
}

pub fn write_match_hits(
    file_path: &str,
    format: OutputFormat,
    ids: &[String],
    hits: &[MatchHit],
    command_line: &str,
) -> Result<(), String> {
    let columns = ["profile1", "profile2", "full", "partial"].map(String::from).to_vec();
    let rows = hits
        .iter()
        .map(|h| {
            vec![
                ids[h.i].clone(),
                ids[h.j].clone(),
                h.full.to_string(),
                h.partial.to_string(),
            ]
        })
        .collect();
    write_table(file_path, format, Table { columns, labels: 2, rows }, command_line)?;
    println!("✅ {} matching pairs written to: {}", hits.len(), file_path);
    Ok(())
}

/// Match probability per profile, plus one column per locus when available
pub fn write_rmp(
    file_path: &str,
    format: OutputFormat,
    ids: &[String],
    locus_names: &[String],
    probs: &MatchProbabilities,
    command_line: &str,
) -> Result<(), String> {
    let with_loci = probs.locus_values(0).is_some();
    let mut columns = vec!["profile".to_string(), "rmp".to_string()];
    if with_loci {
        columns.extend(locus_names.iter().cloned());
    }
    let rows = ids
        .iter()
        .enumerate()
        .map(|(r, id)| {
            let mut out = vec![id.clone(), fmt_value(probs.totals()[r])];
            if let Some(loci) = probs.locus_values(r) {
                out.extend(loci.iter().map(|&v| fmt_value(v)));
            }
            out
        })
        .collect();
    write_table(file_path, format, Table { columns, labels: 1, rows }, command_line)?;
    println!("✅ Match probabilities for {} profiles written to: {}", probs.len(), file_path);
    Ok(())
}

/// Per-locus contributions of listed (target, member) pairs
pub fn write_locus_breakdown(
    file_path: &str,
    format: OutputFormat,
    target_ids: &[String],
    member_ids: &[String],
    locus_names: &[String],
    pairs: &[(usize, usize)],
    contributions: &[Vec<f64>],
    command_line: &str,
) -> Result<(), String> {
    let mut columns = vec!["target".to_string(), "member".to_string()];
    columns.extend(locus_names.iter().cloned());
    let rows = pairs
        .iter()
        .zip(contributions)
        .map(|(&(t, m), values)| {
            let mut out = vec![target_ids[t].clone(), member_ids[m].clone()];
            out.extend(values.iter().map(|&v| fmt_value(v)));
            out
        })
        .collect();
    write_table(file_path, format, Table { columns, labels: 2, rows }, command_line)?;
    println!("✅ Per-locus breakdown of {} comparisons written to: {}", pairs.len(), file_path);
    Ok(())
}

/// Support points with probability, cdf and upper tail
pub fn write_distribution(
    file_path: &str,
    format: OutputFormat,
    dist: &Distribution,
    command_line: &str,
) -> Result<(), String> {
    let columns = ["value", "probability", "cdf", "tail"].map(String::from).to_vec();
    let kept = dist.kept_mass();
    let mut below = 0.0;
    let rows = dist
        .atoms()
        .map(|(x, p)| {
            let tail = kept - below;
            below += p;
            vec![fmt_value(x), fmt_value(p), fmt_value(below), fmt_value(tail)]
        })
        .collect();
    write_table(file_path, format, Table { columns, labels: 0, rows }, command_line)?;
    println!("✅ Distribution ({} support points) written to: {}", dist.len(), file_path);
    Ok(())
}

/// Named scalar results (quantiles, tails, moments)
pub fn write_summary(
    file_path: &str,
    format: OutputFormat,
    rows: &[(String, f64)],
    command_line: &str,
) -> Result<(), String> {
    let columns = ["statistic", "value"].map(String::from).to_vec();
    let rows = rows.iter().map(|(k, v)| vec![k.clone(), fmt_value(*v)]).collect();
    write_table(file_path, format, Table { columns, labels: 1, rows }, command_line)?;
    println!("✅ Summary written to: {}", file_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsv_pair_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/matrix.tsv");
        let path = path.to_str().unwrap();
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let values = PairValues {
            n: 3,
            start: 0,
            values: vec![1.5, f64::NAN, 2.0],
        };
        write_pair_matrix(path, OutputFormat::Tsv, &ids, &values, "strkin scan").unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# Command: strkin scan");
        assert!(lines[1].starts_with("# Generated: "));
        assert_eq!(lines[3], "Profile\ta\tb\tc");
        assert_eq!(lines[4], "a\tNA\t1.5\tNA");
        assert_eq!(lines[6], "c\tNA\t2\tNA");
    }

    #[test]
    fn test_json_hits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hits.json");
        let path = path.to_str().unwrap();
        let ids = vec!["a".to_string(), "b".to_string()];
        let hits = [Hit { i: 0, j: 1, value: 12.5 }];
        write_hits(path, OutputFormat::Json, &ids, &hits, "strkin hits").unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap())
            .unwrap();
        assert_eq!(json["command"], "strkin hits");
        assert_eq!(json["data"][0]["profile2"], "b");
        assert_eq!(json["data"][0]["value"], 12.5);
    }

    #[test]
    fn test_distribution_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dist.csv");
        let path = path.to_str().unwrap();
        let dist = Distribution::new(vec![0.0, 1.0, 2.0], vec![0.25, 0.5, 0.25]).unwrap();
        write_distribution(path, OutputFormat::Csv, &dist, "strkin dist").unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = text.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(lines[0], "value,probability,cdf,tail");
        assert_eq!(lines[2], "1,0.5,0.75,0.75");
        assert_eq!(lines[3], "2,0.25,1,0.25");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("CSV".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert!("phylip".parse::<OutputFormat>().is_err());
    }
}
