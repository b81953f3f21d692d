// mod.rs - Delimited file loaders for databases, frequency tables and pair lists

pub mod database;
pub mod frequencies;
pub mod pairs;

pub use database::load_database;
pub use frequencies::{align_frequencies, load_frequencies};
pub use pairs::load_pairs;

use std::fs::File;
use std::path::Path;

/// Field delimiter inferred from the file extension (`.csv` is comma, anything else tab)
pub fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => b',',
        _ => b'\t',
    }
}

/// Open a delimited file with a header row; `#` lines are comments
pub(crate) fn open_reader(path: &Path) -> Result<csv::Reader<File>, String> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .has_headers(true)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| format!("Failed to open {}: {}", path.display(), e))
}
