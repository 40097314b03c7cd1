//! Command-line front end: load notes, extract, ask for what is missing,
//! then print or write the finished form.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use thiserror::Error;

use crate::config::{AppConfig, ConfigError, CONFIG_PATH_ENV};
use crate::export::{
    fill_xlsx_template, format_form_as_text, write_csv, CsvMapping, ExportError, XlsxMapping,
};
use crate::form::FieldSchema;
use crate::pipeline::{ClarificationError, ExtractionSource, ModelFailure, ValidationResult};
use crate::session::FormSession;
use crate::summary::summarize_desired_contract;
use crate::text_loader::{load_text_from_bytes, TextLoadError};

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    TextLoad(#[from] TextLoadError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Clarification(#[from] ClarificationError),

    #[error("Model check failed: {0}")]
    ModelCheck(ModelFailure),

    #[error("{0}")]
    Usage(&'static str),

    #[error("Form is incomplete, missing: {}", .0.join(", "))]
    Incomplete(Vec<String>),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Csv,
    Xlsx,
}

/// Contract intake assistant
#[derive(Parser, Debug)]
#[command(name = "contract-intake")]
#[command(about = "Turn meeting notes into a validated contract-request form")]
#[command(version)]
pub struct Args {
    /// Notes to extract from (.txt, .md, .pdf or .pptx)
    #[arg(required_unless_present = "check_model")]
    pub input: Option<PathBuf>,

    /// Configuration file path
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// CSV column or XLSX named-range mapping (TOML); defaults to the
    /// built-in layout
    #[arg(long)]
    pub mapping: Option<PathBuf>,

    /// Excel template to fill (required with `--format xlsx`)
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Directory for CSV and XLSX output
    #[arg(short, long, default_value = "outputs")]
    pub out: PathBuf,

    /// Also summarise a desired-contract note (four IP viewpoints)
    #[arg(long)]
    pub desired: Option<PathBuf>,

    /// Skip the clarification questions
    #[arg(long)]
    pub no_questions: bool,

    /// Check that the configured model answers, then exit
    #[arg(long)]
    pub check_model: bool,
}

/// Run the full flow against the given reader and writer.
pub fn execute<R: BufRead, W: Write>(args: &Args, input: &mut R, out: &mut W) -> Result<(), CliError> {
    let config = AppConfig::load(args.config.as_deref())?;
    if args.check_model {
        config.model_extractor()?.check_health().map_err(CliError::ModelCheck)?;
        writeln!(out, "Model OK")?;
        return Ok(());
    }
    let Some(input_path) = &args.input else {
        return Err(CliError::Usage("No input file given"));
    };
    if args.format == OutputFormat::Xlsx && args.template.is_none() {
        return Err(CliError::Usage("--format xlsx needs --template"));
    }
    let text = read_notes(input_path)?;

    let mut session = FormSession::new(
        Arc::new(FieldSchema::contract_request()),
        config.model_extractor()?,
        &config.pipeline(),
    );

    let outcome = session.ingest(&text);
    if let Some(warning) = &outcome.warning {
        writeln!(out, "! {}", warning.message())?;
    }
    if outcome.source == ExtractionSource::Model && !outcome.follow_up_questions.is_empty() {
        writeln!(out, "Points worth confirming:")?;
        for question in &outcome.follow_up_questions {
            writeln!(out, "  - {question}")?;
        }
    }

    if !args.no_questions {
        ask_until_done(&mut session, input, out)?;
    }

    if let Some(path) = &args.desired {
        let summary = summarize_desired_contract(&read_notes(path)?);
        writeln!(out, "\n{}\n", summary.to_text())?;
        for question in &summary.follow_up_questions {
            writeln!(out, "? {question}")?;
        }
    }

    let form = match session.validate() {
        ValidationResult::Complete(form) => form,
        ValidationResult::Incomplete { violations } => {
            let labels = violations
                .iter()
                .map(|v| format!("{} ({:?})", session.schema().label_for(&v.field_name), v.reason))
                .collect();
            return Err(CliError::Incomplete(labels));
        }
    };

    match args.format {
        OutputFormat::Text => write!(out, "{}", format_form_as_text(&form, session.schema()))?,
        OutputFormat::Csv => {
            let mapping = match &args.mapping {
                Some(path) => CsvMapping::load(path)?,
                None => CsvMapping::contract_request(),
            };
            let path = write_csv(&form, &mapping, &args.out)?;
            writeln!(out, "Saved {}", path.display())?;
        }
        OutputFormat::Xlsx => {
            let Some(template) = &args.template else {
                return Err(CliError::Usage("--format xlsx needs --template"));
            };
            let mapping = match &args.mapping {
                Some(path) => XlsxMapping::load(path)?,
                None => XlsxMapping::contract_request(),
            };
            let path = fill_xlsx_template(&form, &mapping, template, &args.out)?;
            writeln!(out, "Saved {}", path.display())?;
        }
    }
    Ok(())
}

fn read_notes(path: &Path) -> Result<String, CliError> {
    let data = std::fs::read(path)?;
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    Ok(load_text_from_bytes(&data, filename)?)
}

/// Clarification rounds on the terminal: one line per question, a blank
/// line leaves the field unanswered. End of input before the first answer
/// of a round cancels that round; later it submits what was given.
fn ask_until_done<R: BufRead, W: Write>(
    session: &mut FormSession,
    input: &mut R,
    out: &mut W,
) -> Result<(), CliError> {
    loop {
        let mut round = match session.start_round() {
            Ok(round) => round,
            Err(ClarificationError::NothingToClarify) => return Ok(()),
            Err(ClarificationError::RoundLimitExceeded { max }) => {
                writeln!(out, "No more questions ({max} rounds used).")?;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        writeln!(
            out,
            "\nRound {} ({} left):",
            round.round_index + 1,
            session.engine().rounds_remaining()
        )?;
        let mut lines_read = 0;
        let mut exhausted = false;
        for question in round.questions.clone() {
            write!(out, "{} > ", question.question_text)?;
            out.flush()?;
            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                exhausted = true;
                break;
            }
            lines_read += 1;
            round.answer(&question.field_name, line.trim());
        }
        if exhausted && lines_read == 0 {
            writeln!(out)?;
            session.cancel_round();
            return Ok(());
        }

        let summary = session.submit_answers(round)?;
        for warning in &summary.warnings {
            writeln!(out, "! {}", warning.message())?;
        }
        if !summary.incidental.is_empty() {
            writeln!(out, "Also picked up: {}", summary.incidental.join(", "))?;
        }
        if exhausted || summary.remaining_gaps.is_empty() || summary.limit_reached {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ModelFailureKind;
    use std::io::Cursor;

    fn args_for(input: PathBuf, config: PathBuf, out: PathBuf) -> Args {
        Args {
            input: Some(input),
            config: Some(config),
            format: OutputFormat::Text,
            mapping: None,
            template: None,
            out,
            desired: None,
            no_questions: false,
            check_model: false,
        }
    }

    fn offline_config(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, "[model]\nprovider = \"none\"\n").unwrap();
        path
    }

    const NOTES: &str = "案件名: センサー共同研究\n\
        相手先: テスト株式会社\n\
        所属: 知財部\n\
        対象商材: 温度センサー\n\
        背景: 新製品の共同開発\n\
        活動内容: 試作品の評価\n";

    #[test]
    fn args_parse_with_defaults() {
        let args = Args::try_parse_from(["contract-intake", "notes.txt"]).unwrap();
        assert_eq!(args.format, OutputFormat::Text);
        assert_eq!(args.out, PathBuf::from("outputs"));
        assert!(!args.no_questions);

        let args =
            Args::try_parse_from(["contract-intake", "notes.md", "--format", "csv", "-o", "x"])
                .unwrap();
        assert_eq!(args.format, OutputFormat::Csv);

        let args = Args::try_parse_from(["contract-intake", "--check-model"]).unwrap();
        assert!(args.check_model);
        assert_eq!(args.input, None);
        assert!(Args::try_parse_from(["contract-intake"]).is_err());
    }

    #[test]
    fn answers_from_input_complete_the_form() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, NOTES).unwrap();
        let args = args_for(notes, offline_config(dir.path()), dir.path().join("out"));

        let mut input = Cursor::new("大学\n");
        let mut out = Vec::new();
        execute(&args, &mut input, &mut out).unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("Round 1 (1 left):"));
        assert!(printed.contains("【Counterparty type】\nacademic"));
    }

    #[test]
    fn unanswered_questions_leave_form_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, NOTES).unwrap();
        let args = args_for(notes, offline_config(dir.path()), dir.path().join("out"));

        let mut input = Cursor::new("\n\n");
        let mut out = Vec::new();
        let err = execute(&args, &mut input, &mut out).unwrap_err();
        assert!(matches!(err, CliError::Incomplete(ref missing) if missing.len() == 1));
    }

    #[test]
    fn csv_output_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, format!("{NOTES}相手先区分: 企業\n")).unwrap();
        let mut args = args_for(notes, offline_config(dir.path()), dir.path().join("out"));
        args.format = OutputFormat::Csv;

        let mut out = Vec::new();
        execute(&args, &mut Cursor::new(""), &mut out).unwrap();
        let written: Vec<_> = std::fs::read_dir(dir.path().join("out")).unwrap().collect();
        assert_eq!(written.len(), 1);
    }

    #[test]
    fn unsupported_input_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.xlsx");
        std::fs::write(&notes, "x").unwrap();
        let args = args_for(notes, offline_config(dir.path()), dir.path().join("out"));
        let err = execute(&args, &mut Cursor::new(""), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CliError::TextLoad(TextLoadError::UnsupportedFormat(_))));
    }

    #[test]
    fn end_of_input_cancels_the_round() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, NOTES).unwrap();
        let args = args_for(notes, offline_config(dir.path()), dir.path().join("out"));

        let mut out = Vec::new();
        let err = execute(&args, &mut Cursor::new(""), &mut out).unwrap_err();
        assert!(matches!(err, CliError::Incomplete(_)));
        let printed = String::from_utf8(out).unwrap();
        assert_eq!(printed.matches("Round ").count(), 1);
    }

    #[test]
    fn check_model_without_service_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut args = args_for(
            dir.path().join("unused.txt"),
            offline_config(dir.path()),
            dir.path().join("out"),
        );
        args.input = None;
        args.check_model = true;

        let mut out = Vec::new();
        let err = execute(&args, &mut Cursor::new(""), &mut out).unwrap_err();
        assert!(matches!(
            err,
            CliError::ModelCheck(ref f) if f.kind == ModelFailureKind::Unavailable
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn xlsx_needs_a_template() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, NOTES).unwrap();
        let mut args = args_for(notes, offline_config(dir.path()), dir.path().join("out"));
        args.format = OutputFormat::Xlsx;

        let err = execute(&args, &mut Cursor::new(""), &mut Vec::new()).unwrap_err();
        assert!(matches!(err, CliError::Usage(_)));
    }

    #[test]
    fn xlsx_output_fills_the_template() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        std::fs::write(&notes, format!("{NOTES}相手先区分: 企業\n")).unwrap();

        let mut book = umya_spreadsheet::new_file();
        let sheet = book.get_sheet_collection_mut().iter_mut().next().unwrap();
        sheet.add_defined_name("project_name", "Sheet1!$B$2").unwrap();
        let template = dir.path().join("template.xlsx");
        umya_spreadsheet::writer::xlsx::write(&book, &template).unwrap();

        let mut args = args_for(notes, offline_config(dir.path()), dir.path().join("out"));
        args.format = OutputFormat::Xlsx;
        args.template = Some(template);

        let mut out = Vec::new();
        execute(&args, &mut Cursor::new(""), &mut out).unwrap();
        let written: Vec<_> = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(written.len(), 1);
        let filled = umya_spreadsheet::reader::xlsx::read(&written[0]).unwrap();
        assert_eq!(filled.get_sheet_collection()[0].get_value("B2"), "センサー共同研究");
    }
}
