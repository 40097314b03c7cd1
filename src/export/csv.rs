//! Single-row CSV export driven by a declarative mapping.
//!
//! The mapping is TOML:
//!
//! ```toml
//! headers = ["案件名", "相手先", "依頼日"]
//!
//! [fields]
//! project_name = "案件名"
//! counterparty_name = "相手先"
//! request_date = "依頼日"
//! ```
//!
//! Output is UTF-8 with a BOM (spreadsheet friendly), CRLF line ends and
//! minimal quoting. Multi-line values (e.g. a list the model returned) are
//! joined with `、` so that each form stays on one row.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{timestamped_path, ExportError};
use crate::pipeline::CompletedForm;

const BOM: &str = "\u{feff}";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CsvMapping {
    /// Column order of the output.
    pub headers: Vec<String>,
    /// Field name → header.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl CsvMapping {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load(path: &Path) -> Result<Self, ExportError> {
        let content = std::fs::read_to_string(path)?;
        let mapping = Self::from_toml_str(&content).map_err(|source| ExportError::Mapping {
            path: path.to_path_buf(),
            source,
        })?;
        mapping.check()?;
        Ok(mapping)
    }

    /// Headers must be present and every mapped header declared.
    pub fn check(&self) -> Result<(), ExportError> {
        if self.headers.is_empty() {
            return Err(ExportError::EmptyHeaders);
        }
        for (field, header) in &self.fields {
            if !self.headers.contains(header) {
                return Err(ExportError::UnknownHeader {
                    field: field.clone(),
                    header: header.clone(),
                });
            }
        }
        Ok(())
    }

    /// Column layout for the built-in contract-request form.
    pub fn contract_request() -> Self {
        let columns = [
            ("project_name", "案件名"),
            ("counterparty_name", "相手先"),
            ("counterparty_type", "相手先区分"),
            ("affiliation", "所属(部署名まで)"),
            ("target_product", "対象商材"),
            ("activity_background", "活動背景・目的"),
            ("counterparty_relationship", "相手方との関係・既締結の関連契約など"),
            ("activity_details", "活動内容"),
            ("request_date", "依頼日"),
            ("amount_jpy", "金額(円)"),
            ("confidentiality", "機密区分"),
        ];
        Self {
            headers: columns.iter().map(|(_, h)| h.to_string()).collect(),
            fields: columns
                .iter()
                .map(|(f, h)| (f.to_string(), h.to_string()))
                .collect(),
        }
    }
}

/// Non-blank lines of a display value joined with `、`.
fn cell_value(display: &str) -> String {
    display
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("、")
}

/// Header row plus one data row. Unmapped columns stay empty.
pub fn render_csv(form: &CompletedForm, mapping: &CsvMapping) -> Result<String, ExportError> {
    mapping.check()?;

    let mut by_header: BTreeMap<&str, String> = BTreeMap::new();
    for (field, header) in &mapping.fields {
        by_header.insert(header.as_str(), cell_value(&form.display_value(field)));
    }
    let row: Vec<&str> = mapping
        .headers
        .iter()
        .map(|h| by_header.get(h.as_str()).map_or("", String::as_str))
        .collect();

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(BOM.as_bytes().to_vec());
    writer.write_record(&mapping.headers)?;
    writer.write_record(&row)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Io(e.into_error()))?;
    String::from_utf8(bytes)
        .map_err(|e| ExportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
}

/// Write `contract_YYYYMMDD_HHMMSS.csv` into `out_dir` (created if needed).
pub fn write_csv(
    form: &CompletedForm,
    mapping: &CsvMapping,
    out_dir: &Path,
) -> Result<PathBuf, ExportError> {
    let content = render_csv(form, mapping)?;
    let path = timestamped_path(out_dir, "csv")?;
    std::fs::write(&path, content)?;
    tracing::info!(path = %path.display(), "CSV written");
    Ok(path)
}
