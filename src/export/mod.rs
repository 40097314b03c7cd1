//! Writers for validated forms. Every entry point takes a `CompletedForm`,
//! so an incomplete form cannot be exported.

pub mod csv;
pub mod plaintext;
pub mod xlsx;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use self::csv::{render_csv, write_csv, CsvMapping};
pub use self::plaintext::format_form_as_text;
pub use self::xlsx::{fill_xlsx_template, CellFormat, XlsxMapping};

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("CSV mapping defines no headers")]
    EmptyHeaders,

    #[error("Field {field} maps to undeclared header {header}")]
    UnknownHeader { field: String, header: String },

    #[error("Invalid mapping file {}: {source}", path.display())]
    Mapping {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    #[error("Spreadsheet error ({}): {message}", path.display())]
    Spreadsheet { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// `out_dir/contract_YYYYMMDD_HHMMSS.<ext>`, with `_1`, `_2`… appended when
/// that name is taken. Creates `out_dir` if needed.
pub(crate) fn timestamped_path(out_dir: &Path, ext: &str) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(out_dir)?;

    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let mut path = out_dir.join(format!("contract_{stamp}.{ext}"));
    let mut n = 1;
    while path.exists() {
        path = out_dir.join(format!("contract_{stamp}_{n}.{ext}"));
        n += 1;
    }
    Ok(path)
}
