//! Model extractor: one structured-output request per invocation, every
//! failure folded into a `ModelFailure` kind.

use std::fmt;

use serde::Serialize;

use crate::form::{FieldSchema, FormState, MergeOutcome, RejectReason};
use crate::llm::{LlmClient, LlmError};

use super::parser::{parse_model_response, ParseError};
use super::prompt::{build_extraction_prompt, EXTRACTION_SYSTEM_PROMPT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFailureKind {
    /// No client configured, service unreachable, or HTTP failure.
    Unavailable,
    /// The service refused on content-policy grounds.
    SafetyBlocked,
    /// The answer was empty or not the expected JSON.
    Malformed,
    Timeout,
}

impl ModelFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::SafetyBlocked => "safety_blocked",
            Self::Malformed => "malformed",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ModelFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelFailure {
    pub kind: ModelFailureKind,
    pub detail: String,
}

impl ModelFailure {
    pub(crate) fn new(kind: ModelFailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ModelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl From<LlmError> for ModelFailure {
    fn from(e: LlmError) -> Self {
        let kind = match &e {
            LlmError::NotConfigured(_)
            | LlmError::Connection(_)
            | LlmError::Http { .. }
            | LlmError::HttpClient(_) => ModelFailureKind::Unavailable,
            LlmError::Timeout(_) => ModelFailureKind::Timeout,
            LlmError::SafetyBlocked(_) => ModelFailureKind::SafetyBlocked,
            LlmError::EmptyResponse | LlmError::ResponseParsing(_) => ModelFailureKind::Malformed,
        };
        Self::new(kind, e.to_string())
    }
}

impl From<ParseError> for ModelFailure {
    fn from(e: ParseError) -> Self {
        Self::new(ModelFailureKind::Malformed, e.to_string())
    }
}

/// A successful model extraction.
#[derive(Debug, Default)]
pub struct ModelExtraction {
    /// Accepted values, `source=model`.
    pub state: FormState,
    pub follow_up_questions: Vec<String>,
    /// Values the model proposed that failed the schema check.
    pub rejected: Vec<(String, RejectReason)>,
}

const HEALTH_CHECK_SYSTEM: &str = "Answer with JSON only.";
const HEALTH_CHECK_PROMPT: &str = r#"Reply with {"ok": true}."#;

pub struct ModelExtractor {
    client: Option<Box<dyn LlmClient>>,
    model_name: String,
}

impl ModelExtractor {
    pub fn new(client: Box<dyn LlmClient>, model_name: &str) -> Self {
        Self {
            client: Some(client),
            model_name: model_name.to_string(),
        }
    }

    /// An extractor with no service behind it; every call is `Unavailable`.
    pub fn unconfigured() -> Self {
        Self {
            client: None,
            model_name: String::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Connectivity check: the configured model must be offered by the
    /// service and answer a trivial JSON request.
    pub fn check_health(&self) -> Result<(), ModelFailure> {
        let Some(client) = &self.client else {
            return Err(ModelFailure::new(
                ModelFailureKind::Unavailable,
                "No model service configured",
            ));
        };

        if !client.is_model_available(&self.model_name)? {
            return Err(ModelFailure::new(
                ModelFailureKind::Unavailable,
                format!("Model {} is not offered by the service", self.model_name),
            ));
        }
        client.generate(&self.model_name, HEALTH_CHECK_PROMPT, HEALTH_CHECK_SYSTEM)?;

        tracing::info!(model = %self.model_name, "Model health check passed");
        Ok(())
    }

    /// Run one extraction request.
    ///
    /// `prior` is sent as a hint only; the returned state holds just what
    /// the model answered. `focus` limits the request to those fields.
    pub fn extract(
        &self,
        schema: &FieldSchema,
        text: &str,
        prior: Option<&FormState>,
        focus: &[String],
    ) -> Result<ModelExtraction, ModelFailure> {
        let Some(client) = &self.client else {
            return Err(ModelFailure::new(
                ModelFailureKind::Unavailable,
                "No model service configured",
            ));
        };

        let prompt = build_extraction_prompt(schema, text, prior, focus);
        let response = client.generate(&self.model_name, &prompt, EXTRACTION_SYSTEM_PROMPT)?;
        let parsed = parse_model_response(schema, &response)?;

        if !parsed.unknown_keys.is_empty() {
            tracing::debug!(keys = ?parsed.unknown_keys, "Model returned undeclared fields");
        }

        let mut extraction = ModelExtraction {
            follow_up_questions: parsed.follow_up_questions,
            ..Default::default()
        };
        for candidate in parsed.values {
            let name = candidate.name.clone();
            if let MergeOutcome::Rejected(reason) = extraction.state.merge(schema, candidate) {
                extraction.rejected.push((name, reason));
            }
        }

        tracing::debug!(
            model = %self.model_name,
            accepted = extraction.state.len(),
            rejected = extraction.rejected.len(),
            "Model extraction parsed"
        );
        Ok(extraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{Source, Value};
    use crate::llm::{MockLlmClient, ScriptedLlmClient};
    use std::sync::Arc;

    fn schema() -> FieldSchema {
        FieldSchema::contract_request()
    }

    fn kind_for(error: LlmError) -> ModelFailureKind {
        let extractor = ModelExtractor::new(Box::new(ScriptedLlmClient::always(Err(error))), "m");
        extractor.extract(&schema(), "notes", None, &[]).unwrap_err().kind
    }

    #[test]
    fn client_errors_are_classified() {
        assert_eq!(kind_for(LlmError::NotConfigured("x".into())), ModelFailureKind::Unavailable);
        assert_eq!(kind_for(LlmError::Connection("h".into())), ModelFailureKind::Unavailable);
        assert_eq!(
            kind_for(LlmError::Http { status: 500, body: String::new() }),
            ModelFailureKind::Unavailable
        );
        assert_eq!(kind_for(LlmError::Timeout(60)), ModelFailureKind::Timeout);
        assert_eq!(kind_for(LlmError::SafetyBlocked("SAFETY".into())), ModelFailureKind::SafetyBlocked);
        assert_eq!(kind_for(LlmError::EmptyResponse), ModelFailureKind::Malformed);
        assert_eq!(kind_for(LlmError::ResponseParsing("eof".into())), ModelFailureKind::Malformed);
    }

    #[test]
    fn non_json_answer_is_malformed() {
        let extractor = ModelExtractor::new(Box::new(MockLlmClient::new("I cannot help.")), "m");
        let failure = extractor.extract(&schema(), "notes", None, &[]).unwrap_err();
        assert_eq!(failure.kind, ModelFailureKind::Malformed);
    }

    #[test]
    fn unconfigured_makes_no_call() {
        let extractor = ModelExtractor::unconfigured();
        let failure = extractor.extract(&schema(), "notes", None, &[]).unwrap_err();
        assert_eq!(failure.kind, ModelFailureKind::Unavailable);
        assert!(!extractor.is_configured());
    }

    #[test]
    fn exactly_one_call_per_invocation() {
        let client = Arc::new(ScriptedLlmClient::always(Err(LlmError::EmptyResponse)));
        let extractor = ModelExtractor::new(Box::new(client.clone()), "m");
        let _ = extractor.extract(&schema(), "notes", None, &[]);
        assert_eq!(client.call_count(), 1);
    }

    #[test]
    fn health_check_reports_each_outcome() {
        let healthy = ModelExtractor::new(Box::new(MockLlmClient::new("{\"ok\": true}")), "gemini-2.5-pro");
        assert_eq!(healthy.check_health(), Ok(()));

        let missing = ModelExtractor::new(
            Box::new(MockLlmClient::new("{}").with_models(vec!["llama3:8b".into()])),
            "gemini-2.5-pro",
        );
        let failure = missing.check_health().unwrap_err();
        assert_eq!(failure.kind, ModelFailureKind::Unavailable);
        assert!(failure.detail.contains("gemini-2.5-pro"));

        let blocked = ModelExtractor::new(
            Box::new(ScriptedLlmClient::always(Err(LlmError::SafetyBlocked("SAFETY".into())))),
            "scripted",
        );
        assert_eq!(blocked.check_health().unwrap_err().kind, ModelFailureKind::SafetyBlocked);

        let failure = ModelExtractor::unconfigured().check_health().unwrap_err();
        assert_eq!(failure.to_string(), "unavailable: No model service configured");
    }

    #[test]
    fn valid_values_accepted_invalid_reported() {
        let response = r#"{"form": {
            "project_name": "Sensor licensing",
            "counterparty_type": "alien",
            "request_date": "someday",
            "confidentiality": "internal"
        }, "follow_up_questions": ["Who is the counterparty?"]}"#;
        let extractor = ModelExtractor::new(Box::new(MockLlmClient::new(response)), "m");
        let result = extractor.extract(&schema(), "notes", None, &[]).unwrap();

        assert_eq!(
            result.state.get("project_name").unwrap().value,
            Value::text("Sensor licensing")
        );
        assert_eq!(result.state.get("confidentiality").unwrap().source, Source::Model);
        assert!(result.state.get("counterparty_type").is_none());
        assert!(result
            .rejected
            .contains(&("counterparty_type".to_string(), RejectReason::NotAllowedValue)));
        assert!(result
            .rejected
            .contains(&("request_date".to_string(), RejectReason::InvalidType)));
        assert_eq!(result.follow_up_questions, vec!["Who is the counterparty?"]);
    }

    #[test]
    fn focus_and_prior_reach_the_prompt() {
        let client = Arc::new(ScriptedLlmClient::new(vec![Ok(r#"{"form": {}}"#.into())]));
        let extractor = ModelExtractor::new(Box::new(client.clone()), "m");
        let schema = schema();
        let mut prior = FormState::new();
        prior.merge(
            &schema,
            crate::form::FieldValue::new("counterparty_name", Value::text("Acme"), Source::Pattern),
        );

        extractor
            .extract(&schema, "answer", Some(&prior), &["counterparty_name".to_string()])
            .unwrap();
        let prompt = &client.prompts()[0];
        assert!(prompt.contains("- counterparty_name: Acme"));
        assert!(!prompt.contains("\"project_name\": null"));
    }
}
