//! Deterministic fallback extractor.
//!
//! Keyword anchors (`案件名:`, `Counterparty:` …) and a heading cue for the
//! built-in fields, plus label anchors generated from the schema so that any
//! field gets a baseline rule. No clocks, randomness or I/O: identical input
//! always yields an identical `FormState`.

use std::sync::LazyLock;

use regex::Regex;

use crate::form::{coerce_text, FieldDescriptor, FieldSchema, FieldValue, FormState, Source};

/// A compiled rule: capture group 1 is the candidate value.
struct FieldRule {
    field: &'static str,
    regex: Regex,
}

/// Whitespace allowed between an anchor's colon and its value (incl. ideographic space).
const GAP: &str = r"[\t 　]*";

/// Start of a line, optionally behind a bullet.
const LINE_START: &str = r"^[\t 　]*(?:[-*・•][\t ]*)?";

fn anchor(keywords: &str) -> String {
    format!(r"(?im){LINE_START}(?:{keywords})\s*[:：]{GAP}([^\n]+)")
}

/// Anchors for the contract-request form, tried in order per field.
static BUILTIN_RULES: LazyLock<Vec<FieldRule>> = LazyLock::new(|| {
    let rules: &[(&'static str, String)] = &[
        ("project_name", anchor("案件名|件名|契約名|プロジェクト名|project\\s*name|project|title")),
        ("project_name", r"(?m)^#{1,2}[\t ]+([^\n#]+)$".to_string()),
        ("counterparty_name", anchor("相手先|相手方名|取引先名?|契約相手|counterparty(?:\\s*name)?")),
        ("counterparty_type", anchor("相手先区分|相手方区分|相手区分|counterparty\\s*type")),
        ("affiliation", anchor("所属部署|所属|部署名?|department|affiliation")),
        ("affiliation", format!(r"(?m)部署は{GAP}([^\n]+)")),
        ("target_product", anchor("対象商材|商材|対象プロダクト|プロダクト|製品|target\\s*product|product")),
        ("target_product", format!(r"(?m)対象は{GAP}([^\n]+)")),
        ("activity_background", anchor("活動背景|背景|目的|狙い|background|purpose")),
        ("activity_background", format!(r"(?m)(?:活動の背景|背景と目的){GAP}[:：]?{GAP}([^\n]+)")),
        (
            "counterparty_relationship",
            anchor("相手方との関係|相手との関係|取引先との関係|関係性|既締結の?(?:関連)?契約|既存の?契約|relationship"),
        ),
        ("activity_details", anchor("活動内容|予定している活動|実施内容|対応内容|activity\\s*details|activities")),
        ("activity_details", anchor("実施予定|進め方")),
        ("request_date", anchor("依頼日|申請日|request\\s*date")),
        ("amount_jpy", anchor("契約金額|金額|予算|amount")),
        ("confidentiality", anchor("機密区分|秘密区分|confidentiality")),
    ];

    rules
        .iter()
        .filter_map(|(field, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some(FieldRule { field: *field, regex }),
            Err(e) => {
                tracing::warn!(field = *field, error = %e, "Skipping invalid built-in pattern");
                None
            }
        })
        .collect()
});

/// Extracts field values from raw text with fixed heuristics.
pub struct PatternExtractor {
    /// Per schema field (declaration order): label anchors generated from the schema.
    label_rules: Vec<(String, Vec<Regex>)>,
}

impl PatternExtractor {
    pub fn new(schema: &FieldSchema) -> Self {
        let label_rules = schema
            .fields()
            .iter()
            .map(|field| (field.name.clone(), label_anchors(field)))
            .collect();
        Self { label_rules }
    }

    /// Extract every field the heuristics match, tagged `source=pattern`.
    /// Never fails: unmatched fields are simply absent.
    pub fn extract(&self, schema: &FieldSchema, text: &str) -> FormState {
        let mut state = FormState::new();
        if text.trim().is_empty() {
            return state;
        }

        for field in schema.fields() {
            if let Some(value) = self.match_field(field, text) {
                state.merge(schema, value);
            }
        }

        tracing::debug!(matched = state.len(), "Pattern extraction finished");
        state
    }

    /// Scoped extraction for an answer to a question about `field`.
    ///
    /// Tries the field's rules on the answer first; if none match, the
    /// answer minus any anchored lines (those belong to other fields) is
    /// coerced to the field's type. The result may still fail the schema
    /// check (e.g. an unparseable date) and be rejected at merge time.
    pub fn extract_field(&self, field: &FieldDescriptor, answer: &str) -> Option<FieldValue> {
        if let Some(found) = self.match_field(field, answer) {
            return Some(found);
        }
        let remainder = self.without_anchored_lines(answer);
        coerce_text(field, &remainder)
            .map(|value| FieldValue::new(&field.name, value, Source::Pattern))
    }

    fn all_rules(&self) -> impl Iterator<Item = &Regex> + '_ {
        BUILTIN_RULES
            .iter()
            .map(|rule| &rule.regex)
            .chain(self.label_rules.iter().flat_map(|(_, rules)| rules.iter()))
    }

    fn without_anchored_lines(&self, text: &str) -> String {
        text.lines()
            .filter(|line| !self.all_rules().any(|regex| regex.is_match(line)))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// First rule for `field` whose capture coerces to a valid value.
    fn match_field(&self, field: &FieldDescriptor, text: &str) -> Option<FieldValue> {
        let builtin = BUILTIN_RULES
            .iter()
            .filter(|rule| rule.field == field.name)
            .map(|rule| &rule.regex);
        let generated = self
            .label_rules
            .iter()
            .filter(|(name, _)| *name == field.name)
            .flat_map(|(_, rules)| rules.iter());

        for regex in builtin.chain(generated) {
            for caps in regex.captures_iter(text) {
                let Some(raw) = caps.get(1) else { continue };
                let Some(value) = coerce_text(field, clean_capture(raw.as_str())) else {
                    continue;
                };
                if field.check(&value).is_ok() {
                    return Some(FieldValue::new(&field.name, value, Source::Pattern));
                }
            }
        }
        None
    }
}

/// `<label>:` and `<name with spaces>:` anchors at line start, optionally
/// behind a bullet.
fn label_anchors(field: &FieldDescriptor) -> Vec<Regex> {
    let mut keywords = vec![regex::escape(&field.label)];
    let spaced = field.name.replace('_', " ");
    if !spaced.eq_ignore_ascii_case(&field.label) {
        keywords.push(regex::escape(&spaced));
    }

    keywords
        .iter()
        .filter_map(|keyword| {
            let pattern = format!(r"(?im){LINE_START}{keyword}\s*[:：]{GAP}([^\n]+)");
            Regex::new(&pattern)
                .map_err(|e| tracing::warn!(field = %field.name, error = %e, "Skipping label anchor"))
                .ok()
        })
        .collect()
}

/// Trim whitespace and trailing sentence punctuation from a capture.
fn clean_capture(raw: &str) -> &str {
    raw.trim().trim_end_matches(['。', '、', ',']).trim()
}
