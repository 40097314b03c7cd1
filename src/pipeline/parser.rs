//! Parsing of the model's `{"form": {...}, "follow_up_questions": [...]}`
//! answer into schema-checked candidate values.

use thiserror::Error;

use crate::form::{coerce_json, FieldSchema, FieldValue, Source};

use super::prompt::MAX_MODEL_FOLLOW_UPS;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("No JSON block found in model response")]
    NoJson,

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Response has no \"form\" object")]
    MissingForm,
}

/// Candidate values read from one model answer.
#[derive(Debug, Default)]
pub struct ParsedForm {
    /// Coerced values, `source=model`, in schema order. Not yet type-checked.
    pub values: Vec<FieldValue>,
    pub follow_up_questions: Vec<String>,
    /// Keys the schema does not declare.
    pub unknown_keys: Vec<String>,
}

/// Locate the JSON object in a response that may carry Markdown fences or
/// surrounding prose.
pub(crate) fn extract_json_block(response: &str) -> Result<&str, ParseError> {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Ok(after_fence[..end].trim());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            let block = after_fence[..end].trim();
            if block.starts_with('{') {
                return Ok(block);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return Ok(&trimmed[start..=end]);
        }
    }

    Err(ParseError::NoJson)
}

/// Parse a model answer. Structural problems are errors; individual field
/// values that are null, blank or of the wrong shape are skipped.
pub fn parse_model_response(schema: &FieldSchema, response: &str) -> Result<ParsedForm, ParseError> {
    let json_str = extract_json_block(response)?;
    let root: serde_json::Value =
        serde_json::from_str(json_str).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let form = root
        .get("form")
        .and_then(|f| f.as_object())
        .ok_or(ParseError::MissingForm)?;

    let values = schema
        .fields()
        .iter()
        .filter_map(|field| {
            let raw = form.get(&field.name)?;
            coerce_json(field, raw).map(|value| FieldValue::new(&field.name, value, Source::Model))
        })
        .collect();

    let unknown_keys = form
        .keys()
        .filter(|key| !schema.contains(key))
        .cloned()
        .collect();

    let follow_up_questions = root
        .get("follow_up_questions")
        .and_then(|q| q.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|q| q.as_str())
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .take(MAX_MODEL_FOLLOW_UPS)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Ok(ParsedForm {
        values,
        follow_up_questions,
        unknown_keys,
    })
}
