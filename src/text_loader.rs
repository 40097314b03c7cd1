//! Plain text from uploaded files.
//!
//! Text and Markdown are decoded as UTF-8 (invalid sequences replaced);
//! PDF text is read page by page with `lopdf`; PPTX slides are read from
//! their `ppt/slides/slideN.xml` parts. A successful load never returns
//! blank text.

use std::collections::HashSet;
use std::io::{Cursor, Read};
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum TextLoadError {
    #[error("File is empty")]
    Empty,

    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error("No text could be extracted from the {0} file")]
    NoText(TextKind),

    #[error("PDF could not be read: {0}")]
    CorruptPdf(String),

    #[error("PPTX could not be read: {0}")]
    CorruptPptx(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextKind {
    Txt,
    Md,
    Pdf,
    Pptx,
}

impl TextKind {
    /// Kind from a file name's extension (case-insensitive).
    pub fn from_filename(filename: &str) -> Option<Self> {
        let ext = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "txt" => Some(Self::Txt),
            "md" | "markdown" => Some(Self::Md),
            "pdf" => Some(Self::Pdf),
            "pptx" => Some(Self::Pptx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Txt => "txt",
            Self::Md => "md",
            Self::Pdf => "pdf",
            Self::Pptx => "pptx",
        }
    }
}

impl std::fmt::Display for TextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extract text from raw file bytes of a known kind.
pub fn extract_text(data: &[u8], kind: TextKind) -> Result<String, TextLoadError> {
    if data.is_empty() {
        return Err(TextLoadError::Empty);
    }

    let text = match kind {
        TextKind::Txt | TextKind::Md => String::from_utf8_lossy(data)
            .trim()
            .trim_start_matches('\u{feff}')
            .trim()
            .to_string(),
        TextKind::Pdf => extract_pdf_text(data)?,
        TextKind::Pptx => extract_pptx_text(data)?,
    };

    if text.is_empty() {
        return Err(TextLoadError::NoText(kind));
    }
    tracing::debug!(kind = %kind, chars = text.chars().count(), "Text extracted");
    Ok(text)
}

/// Extract text, detecting the kind from `filename`.
pub fn load_text_from_bytes(data: &[u8], filename: &str) -> Result<String, TextLoadError> {
    if data.is_empty() {
        return Err(TextLoadError::Empty);
    }
    let kind = TextKind::from_filename(filename).ok_or_else(|| {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("unknown");
        TextLoadError::UnsupportedFormat(ext.to_string())
    })?;
    extract_text(data, kind)
}

fn extract_pdf_text(data: &[u8]) -> Result<String, TextLoadError> {
    let document =
        lopdf::Document::load_mem(data).map_err(|e| TextLoadError::CorruptPdf(e.to_string()))?;

    let mut parts = Vec::new();
    for page_number in document.get_pages().keys() {
        match document.extract_text(&[*page_number]) {
            Ok(page_text) => {
                let page_text = page_text.trim();
                if !page_text.is_empty() {
                    parts.push(page_text.to_string());
                }
            }
            Err(e) => {
                tracing::warn!(page = *page_number, error = %e, "Skipping unreadable PDF page");
            }
        }
    }
    Ok(parts.join("\n\n"))
}

// ═══════════════════════════════════════════
// PPTX
// ═══════════════════════════════════════════

/// `[Slide N]` blocks of `- line` bullets. Slides without text are skipped;
/// repeated lines within a slide are kept once, first occurrence wins.
fn extract_pptx_text(data: &[u8]) -> Result<String, TextLoadError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(corrupt_pptx)?;

    let mut slides: Vec<(usize, String)> = archive
        .file_names()
        .filter_map(|name| slide_number(name).map(|n| (n, name.to_string())))
        .collect();
    slides.sort();

    let mut blocks = Vec::new();
    for (number, name) in slides {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(corrupt_pptx)?
            .read_to_string(&mut xml)
            .map_err(corrupt_pptx)?;

        let lines = dedup_lines(slide_lines(&xml)?);
        if lines.is_empty() {
            continue;
        }
        let bullets = lines
            .iter()
            .map(|line| format!("- {line}"))
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(format!("[Slide {number}]\n{bullets}"));
    }
    tracing::debug!(slides = blocks.len(), "PPTX slides with text");
    Ok(blocks.join("\n\n"))
}

fn corrupt_pptx(e: impl std::fmt::Display) -> TextLoadError {
    TextLoadError::CorruptPptx(e.to_string())
}

/// `ppt/slides/slide12.xml` → 12.
fn slide_number(name: &str) -> Option<usize> {
    name.strip_prefix("ppt/slides/slide")?
        .strip_suffix(".xml")?
        .parse()
        .ok()
}

/// Text lines of one slide: runs (`<a:t>`) joined per paragraph (`<a:p>`),
/// split on line breaks (`<a:br/>`), trimmed, blanks dropped. Table cells
/// hold paragraphs too, so they come out the same way.
fn slide_lines(xml: &str) -> Result<Vec<String>, TextLoadError> {
    let mut reader = Reader::from_str(xml);
    let mut lines = Vec::new();
    let mut paragraph = String::new();
    let mut in_run_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"a:t" => in_run_text = true,
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"a:t" => in_run_text = false,
                b"a:p" => {
                    lines.extend(
                        paragraph
                            .lines()
                            .map(str::trim)
                            .filter(|l| !l.is_empty())
                            .map(str::to_string),
                    );
                    paragraph.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if e.name().as_ref() == b"a:br" => paragraph.push('\n'),
            Ok(Event::Text(t)) if in_run_text => {
                let text = t.unescape().map_err(corrupt_pptx)?;
                paragraph.push_str(&text);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(corrupt_pptx(e)),
            _ => {}
        }
    }
    Ok(lines)
}

/// Collapse inner whitespace, then drop repeats keeping first occurrence.
fn dedup_lines(lines: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty() && seen.insert(line.clone()))
        .collect()
}
