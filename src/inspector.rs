// inspector.rs - Table cache inspector with parameter and frequency checks
// Features: LZ4 cache inspection, per-locus table statistics, compatibility checks

use std::fs::File;
use std::io::Write;
use std::path::Path;

use argh::FromArgs;
use strkin::cache::TableCache;
use strkin::core::genotype::Genotype;
use strkin::core::kinship::KinshipParams;
use strkin::core::table::LocusTable;
use strkin::data::loaders::{align_frequencies, load_frequencies};

// ============================================================================
// CLI ARGUMENTS
// ============================================================================

#[derive(FromArgs)]
/// Inspect strkin table cache files
struct Args {
    /// path to the cache file (.lz4)
    #[argh(option)]
    cache: String,

    /// show statistics for every locus
    #[argh(switch)]
    detailed: bool,

    /// dump the table of one locus (by name)
    #[argh(option)]
    show_locus: Option<String>,

    /// check compatibility with kinship parameters (format: k0,k1,k2,theta)
    #[argh(option)]
    check_compatibility: Option<String>,

    /// check compatibility with a frequency table
    #[argh(option)]
    frequencies: Option<String>,

    /// export per-locus summary to TSV file
    #[argh(option)]
    export_summary: Option<String>,

    /// validate cache integrity
    #[argh(switch)]
    validate: bool,

    /// show the first N loci (default: 10)
    #[argh(option, default = "10")]
    top_loci: usize,

    /// quiet mode - minimal output
    #[argh(switch)]
    quiet: bool,
}

// ============================================================================
// TABLE STATISTICS
// ============================================================================

/// Summary of one locus table
struct LocusStats {
    name: String,
    ladder: usize,
    genotypes: usize,
    missing: usize,
    min: f64,
    max: f64,
    mean: f64,
}

fn locus_stats(name: &str, table: &LocusTable) -> LocusStats {
    let finite: Vec<f64> = table.values().iter().copied().filter(|v| !v.is_nan()).collect();
    let mean = if finite.is_empty() {
        f64::NAN
    } else {
        finite.iter().sum::<f64>() / finite.len() as f64
    };
    LocusStats {
        name: name.to_string(),
        ladder: table.ladder(),
        genotypes: table.n0(),
        missing: table.values().len() - finite.len(),
        min: table.min_value(),
        max: table.max_value(),
        mean,
    }
}

fn all_stats(cache: &TableCache) -> Vec<LocusStats> {
    cache
        .tables
        .tables()
        .iter()
        .enumerate()
        .map(|(m, table)| {
            let name = cache
                .metadata
                .loci
                .get(m)
                .cloned()
                .unwrap_or_else(|| format!("locus{}", m + 1));
            locus_stats(&name, table)
        })
        .collect()
}

// ============================================================================
// ANALYSIS FUNCTIONS
// ============================================================================

fn analyze_cache_overview(cache: &TableCache, compressed_size: u64, args: &Args) {
    if args.quiet {
        return;
    }
    let meta = &cache.metadata;

    println!("\n=== CACHE SUMMARY ===");
    println!("Version: {}", meta.version);
    println!("Created: {}", meta.created);
    println!("Format version: {}", meta.format_version);
    if let Some(note) = &meta.user_note {
        println!("Note: {}", note);
    }
    println!("Loci: {}", cache.tables.nloci());
    println!("Aggregate: {:?}", meta.aggregate);
    println!("Total cells: {}", meta.total_cells);
    println!("File size: {} KB", compressed_size / 1024);

    println!("\n=== TABLE PARAMETERS ===");
    match &meta.kinship_params {
        Some(p) => {
            println!("k0: {}", p.k0);
            println!("k1: {}", p.k1);
            println!("k2: {}", p.k2);
            println!("theta: {}", p.theta);
            println!("Frequency fingerprint: {}", meta.frequency_fingerprint);
        }
        None => println!("No kinship parameters (count tables)"),
    }
}

fn analyze_loci_overview(stats: &[LocusStats], args: &Args) {
    if args.quiet && !args.detailed {
        return;
    }

    println!("\n=== LOCI OVERVIEW ===");
    println!(
        "{:<16} {:>7} {:>10} {:>8} {:>12} {:>12} {:>12}",
        "Locus", "Ladder", "Genotypes", "Missing", "Min", "Max", "Mean"
    );
    println!("{}", "=".repeat(83));

    let show_count = if args.detailed {
        stats.len()
    } else {
        args.top_loci.min(stats.len())
    };
    for s in stats.iter().take(show_count) {
        println!(
            "{:<16} {:>7} {:>10} {:>8} {:>12.4e} {:>12.4e} {:>12.4e}",
            s.name, s.ladder, s.genotypes, s.missing, s.min, s.max, s.mean
        );
    }

    if !args.detailed && stats.len() > args.top_loci {
        println!(
            "... and {} more loci (use --detailed to show all)",
            stats.len() - args.top_loci
        );
    }
}

fn analyze_specific_locus(cache: &TableCache, locus_name: &str) {
    println!("\n=== LOCUS DETAILS: {} ===", locus_name);

    let Some(m) = cache.metadata.loci.iter().position(|l| l == locus_name) else {
        println!("❌ Locus '{}' not found in cache", locus_name);
        println!("Available loci: {:?}", cache.metadata.loci);
        return;
    };
    let table = cache.tables.table(m);
    println!("Kind: {:?}", table.kind());
    println!("Ladder: {} alleles, {} genotypes", table.ladder(), table.n0());
    println!("Symmetric: {}", table.is_symmetric());
    println!("Kinship terms retained: {}", table.has_terms());

    // Show the first cells row by row
    let genotypes: Vec<Genotype> = Genotype::enumerate(table.ladder()).collect();
    println!("\nCells (showing up to 20):");
    println!("{:<10} {:<10} {:>14}", "Row", "Column", "Value");
    println!("{}", "-".repeat(36));
    let mut shown = 0;
    'rows: for (i, row) in genotypes.iter().enumerate() {
        for (j, col) in genotypes.iter().enumerate() {
            if table.is_symmetric() && j < i {
                continue;
            }
            let value = table.values()[i * table.n0() + j];
            if value.is_nan() {
                continue;
            }
            println!("{:<10} {:<10} {:>14.6e}", row.to_string(), col.to_string(), value);
            shown += 1;
            if shown >= 20 {
                break 'rows;
            }
        }
    }
    let cells = table.values().iter().filter(|v| !v.is_nan()).count();
    if cells > shown {
        println!("... and {} more cells", cells - shown);
    }
}

fn parse_params(params_str: &str) -> Result<KinshipParams, String> {
    let parts: Vec<f64> = params_str
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| "All values must be numbers".to_string())?;
    if parts.len() != 4 {
        return Err("Invalid parameter format. Use: k0,k1,k2,theta".to_string());
    }
    KinshipParams::new(parts[0], parts[1], parts[2], parts[3]).map_err(|e| e.to_string())
}

fn check_compatibility(cache: &TableCache, params_str: &str) -> bool {
    println!("\n=== COMPATIBILITY CHECK ===");

    let target = match parse_params(params_str) {
        Ok(p) => p,
        Err(e) => {
            println!("❌ ERROR: {}", e);
            println!("   Example: 0.25,0.5,0.25,0.01");
            return false;
        }
    };
    println!("Cache parameters: {:?}", cache.metadata.kinship_params);
    println!("Target parameters: {:?}", target);

    match cache.check_compatible(Some(&target), None) {
        Ok(()) => {
            println!("\n✅ COMPATIBLE: Cache and target parameters match");
            true
        }
        Err(_) => {
            println!("\n❌ INCOMPATIBLE: Cache and target parameters differ!");
            println!("   Recommendation: rerun strkin with --force-recompute or another cache file.");
            if let Some(cached) = &cache.metadata.kinship_params {
                println!("\nDifferences:");
                for (name, a, b) in [
                    ("k0", cached.k0, target.k0),
                    ("k1", cached.k1, target.k1),
                    ("k2", cached.k2, target.k2),
                    ("theta", cached.theta, target.theta),
                ] {
                    if a != b {
                        println!("  • {}: {} → {}", name, a, b);
                    }
                }
            }
            false
        }
    }
}

fn check_frequencies(cache: &TableCache, path: &str) -> bool {
    println!("\n=== FREQUENCY CHECK ===");
    // The cache was built from frequencies in its own locus order
    let loaded = load_frequencies(Path::new(path))
        .and_then(|f| align_frequencies(&f, &cache.metadata.loci));
    let freqs = match loaded {
        Ok(f) => f,
        Err(e) => {
            println!("❌ ERROR: {}", e);
            return false;
        }
    };
    match cache.check_compatible(cache.metadata.kinship_params.as_ref(), Some(&freqs)) {
        Ok(()) => {
            println!("✅ Frequencies match the cache fingerprint");
            true
        }
        Err(e) => {
            println!("❌ {}", e);
            false
        }
    }
}

/// Structural checks on every table
fn validate_cache_integrity(cache: &TableCache, stats: &[LocusStats]) -> bool {
    println!("\n=== CACHE VALIDATION ===");
    let mut issues = Vec::new();

    if cache.metadata.loci.len() != cache.tables.nloci() {
        issues.push(format!(
            "Metadata lists {} loci but the cache holds {} tables",
            cache.metadata.loci.len(),
            cache.tables.nloci()
        ));
    }
    let cells: usize = cache.tables.tables().iter().map(|t| t.values().len()).sum();
    if cells != cache.metadata.total_cells {
        issues.push(format!(
            "Metadata counts {} cells but the tables hold {}",
            cache.metadata.total_cells, cells
        ));
    }
    for (m, table) in cache.tables.tables().iter().enumerate() {
        let name = stats.get(m).map(|s| s.name.as_str()).unwrap_or("?");
        if table.locus() != m {
            issues.push(format!("Table {} is labelled as locus {}", name, table.locus()));
        }
        if table.values().len() != table.n0() * table.n0() {
            issues.push(format!("Table {} is not square", name));
        }
        if table.values().iter().any(|v| v.is_infinite() || *v < 0.0) {
            issues.push(format!("Table {} holds negative or infinite values", name));
        }
        if table.is_symmetric() {
            let n = table.n0();
            let values = table.values();
            let asymmetric = (0..n).any(|i| {
                (i + 1..n).any(|j| {
                    let (a, b) = (values[i * n + j], values[j * n + i]);
                    !(a.is_nan() && b.is_nan()) && a != b
                })
            });
            if asymmetric {
                issues.push(format!("Table {} is flagged symmetric but is not", name));
            }
        }
    }

    if issues.is_empty() {
        println!("✅ Cache integrity check passed");
        true
    } else {
        println!("❌ Cache integrity issues found:");
        for issue in &issues {
            println!("  • {}", issue);
        }
        false
    }
}

fn export_summary_to_tsv(
    stats: &[LocusStats],
    export_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut file = File::create(export_path)?;
    writeln!(file, "locus\tladder\tgenotypes\tmissing\tmin\tmax\tmean")?;
    for s in stats {
        writeln!(
            file,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            s.name, s.ladder, s.genotypes, s.missing, s.min, s.max, s.mean
        )?;
    }
    println!("📄 Summary exported to: {}", export_path);
    Ok(())
}

fn main() {
    let args: Args = argh::from_env();

    if !args.quiet {
        println!("🔍 strkin Table Cache Inspector");
        println!("===============================");
    }

    // Load cache
    let cache_path = Path::new(&args.cache);
    if !cache_path.exists() {
        eprintln!("❌ ERROR: Cache file does not exist: {}", cache_path.display());
        std::process::exit(1);
    }
    let compressed_size = std::fs::metadata(cache_path).map(|m| m.len()).unwrap_or(0);
    let cache = match TableCache::load(cache_path) {
        Ok(cache) => cache,
        Err(e) => {
            eprintln!("❌ ERROR loading cache: {}", e);
            std::process::exit(1);
        }
    };
    let stats = all_stats(&cache);

    // Main analysis
    analyze_cache_overview(&cache, compressed_size, &args);
    analyze_loci_overview(&stats, &args);

    if let Some(locus_name) = &args.show_locus {
        analyze_specific_locus(&cache, locus_name);
    }

    let mut ok = true;
    if let Some(params) = &args.check_compatibility {
        ok &= check_compatibility(&cache, params);
    }
    if let Some(path) = &args.frequencies {
        ok &= check_frequencies(&cache, path);
    }
    if args.validate {
        ok &= validate_cache_integrity(&cache, &stats);
    }

    if let Some(export_path) = &args.export_summary {
        if let Err(e) = export_summary_to_tsv(&stats, export_path) {
            eprintln!("❌ ERROR exporting summary: {}", e);
            std::process::exit(1);
        }
    }

    if !ok {
        std::process::exit(1);
    }

    if !args.quiet {
        println!("\n✅ Cache inspection completed successfully");
        println!("\nUsage examples:");
        println!("  --check-compatibility 0.25,0.5,0.25,0.01   Check kinship parameters");
        println!("  --frequencies freqs.tsv                     Check the frequency fingerprint");
        println!("  --detailed                                  Show all loci");
        println!("  --show-locus D3S1358                        Dump one locus table");
        println!("  --validate                                  Validate cache integrity");
        println!("  --export-summary out.tsv                    Export summary to TSV");
        println!("  --quiet                                     Minimal output mode");
    }
}
