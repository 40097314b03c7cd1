//! Fill an Excel template by named range.
//!
//! The template declares one defined name per target cell; the mapping says
//! which field goes where and how the cell is written:
//!
//! ```toml
//! [fields.project_name]
//! named_range = "ProjectName"
//!
//! [fields.amount_jpy]
//! named_range = "Amount"
//! format = "currency_jpy"
//! ```
//!
//! The template itself is never modified; the filled copy is written as
//! `contract_YYYYMMDD_HHMMSS.xlsx`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use umya_spreadsheet::Spreadsheet;

use super::{timestamped_path, ExportError};
use crate::form::{FieldSchema, FieldType, Value};
use crate::pipeline::CompletedForm;

const YEN_FORMAT: &str = "\"¥\"#,##0";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellFormat {
    #[default]
    Text,
    /// `YYYY-MM-DD` string.
    Date,
    /// Whole yen as a number cell with a `¥#,##0` format.
    CurrencyJpy,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NamedRangeTarget {
    pub named_range: String,
    #[serde(default)]
    pub format: CellFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct XlsxMapping {
    /// Field name → target cell.
    #[serde(default)]
    pub fields: BTreeMap<String, NamedRangeTarget>,
}

impl XlsxMapping {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load(path: &Path) -> Result<Self, ExportError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map_err(|source| ExportError::Mapping {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every contract-request field, named after itself.
    pub fn contract_request() -> Self {
        let fields = FieldSchema::contract_request()
            .fields()
            .iter()
            .map(|d| {
                let format = match d.field_type {
                    FieldType::Date => CellFormat::Date,
                    FieldType::Number => CellFormat::CurrencyJpy,
                    _ => CellFormat::Text,
                };
                (
                    d.name.clone(),
                    NamedRangeTarget {
                        named_range: d.name.clone(),
                        format,
                    },
                )
            })
            .collect();
        Self { fields }
    }
}

/// Top-left cell of a defined name.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CellRef {
    sheet: String,
    cell: String,
}

/// `'My Sheet'!$B$2:$C$3` → sheet `My Sheet`, cell `B2`. Addresses without a
/// sheet part belong to `owner`.
fn parse_address(address: &str, owner: Option<&str>) -> Option<CellRef> {
    let (sheet, range) = match address.rsplit_once('!') {
        Some((sheet, range)) => (sheet.trim_matches('\'').to_string(), range),
        None => (owner?.to_string(), address),
    };
    let first = range.split(':').next().unwrap_or(range);
    let cell: String = first.chars().filter(|c| *c != '$').collect();
    if sheet.is_empty() || cell.is_empty() {
        return None;
    }
    Some(CellRef { sheet, cell })
}

/// Defined names of the workbook, then of each sheet. Workbook-level names
/// win on a clash.
fn named_cells(book: &Spreadsheet) -> HashMap<String, CellRef> {
    let mut cells = HashMap::new();
    for name in book.get_defined_names() {
        if let Some(cell) = parse_address(&name.get_address(), None) {
            cells.insert(name.get_name().to_string(), cell);
        }
    }
    for sheet in book.get_sheet_collection() {
        for name in sheet.get_defined_names() {
            if let Some(cell) = parse_address(&name.get_address(), Some(sheet.get_name())) {
                cells.entry(name.get_name().to_string()).or_insert(cell);
            }
        }
    }
    cells
}

fn spreadsheet_error(path: &Path, e: impl std::fmt::Display) -> ExportError {
    ExportError::Spreadsheet {
        path: path.to_path_buf(),
        message: e.to_string(),
    }
}

fn write_cell(book: &mut Spreadsheet, target: &CellRef, value: &Value, format: CellFormat) -> bool {
    let Some(sheet) = book
        .get_sheet_collection_mut()
        .iter_mut()
        .find(|s| s.get_name() == target.sheet)
    else {
        return false;
    };

    match (format, value) {
        (CellFormat::CurrencyJpy, Value::Number(n)) => {
            sheet.get_cell_mut(target.cell.as_str()).set_value_number(n.round());
            sheet
                .get_style_mut(target.cell.as_str())
                .get_number_format_mut()
                .set_format_code(YEN_FORMAT);
        }
        (CellFormat::Date, Value::Date(d)) => {
            sheet
                .get_cell_mut(target.cell.as_str())
                .set_value(d.format("%Y-%m-%d").to_string());
        }
        _ => {
            sheet.get_cell_mut(target.cell.as_str()).set_value(value.to_string());
        }
    }
    true
}

/// Copy `template`, write each mapped field into its named cell, and save
/// the result under `out_dir`. Unset fields and names missing from the
/// template are skipped with a warning.
pub fn fill_xlsx_template(
    form: &CompletedForm,
    mapping: &XlsxMapping,
    template: &Path,
    out_dir: &Path,
) -> Result<PathBuf, ExportError> {
    if !template.is_file() {
        return Err(ExportError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("template not found: {}", template.display()),
        )));
    }
    let mut book =
        umya_spreadsheet::reader::xlsx::read(template).map_err(|e| spreadsheet_error(template, e))?;
    let cells = named_cells(&book);

    let mut written = 0usize;
    for (field, target) in &mapping.fields {
        let Some(value) = form.get(field).map(|v| &v.value) else {
            continue;
        };
        let Some(cell) = cells.get(&target.named_range) else {
            tracing::warn!(field = %field, named_range = %target.named_range, "Named range not in template");
            continue;
        };
        if write_cell(&mut book, cell, value, target.format) {
            written += 1;
        } else {
            tracing::warn!(field = %field, sheet = %cell.sheet, "Named range points at a missing sheet");
        }
    }

    let path = timestamped_path(out_dir, "xlsx")?;
    umya_spreadsheet::writer::xlsx::write(&book, &path).map_err(|e| spreadsheet_error(&path, e))?;
    tracing::info!(path = %path.display(), cells = written, "XLSX written");
    Ok(path)
}
