//! Model-first extraction with pattern fallback.
//!
//! One call, one source: a successful model answer is merged as is; any
//! model failure switches that call entirely to the pattern extractor and
//! leaves a warning behind. The coordinator itself never fails.

use std::sync::Arc;

use serde::Serialize;

use crate::form::{FieldSchema, FormState, MergeOutcome};
use crate::pipeline_config::PipelineConfig;

use super::model::{ModelExtraction, ModelExtractor, ModelFailure, ModelFailureKind};
use super::pattern::PatternExtractor;

/// Which extractor produced the values of one `extract` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Model,
    Pattern,
}

/// User-visible notice that the model result was replaced by the fallback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackWarning {
    pub kind: ModelFailureKind,
    pub detail: String,
}

impl FallbackWarning {
    pub fn message(&self) -> &'static str {
        match self.kind {
            ModelFailureKind::Unavailable => {
                "The language model is not available. Values were extracted with keyword rules only; please review them."
            }
            ModelFailureKind::SafetyBlocked => {
                "The language model withheld its answer under its content policy. Sensitive content may require manual entry."
            }
            ModelFailureKind::Malformed => {
                "The language model returned an answer that could not be read. Values were extracted with keyword rules instead."
            }
            ModelFailureKind::Timeout => {
                "The language model did not answer in time. Values were extracted with keyword rules instead."
            }
        }
    }
}

impl From<ModelFailure> for FallbackWarning {
    fn from(failure: ModelFailure) -> Self {
        Self {
            kind: failure.kind,
            detail: failure.detail,
        }
    }
}

#[derive(Debug)]
pub struct ExtractionOutcome {
    /// Prior state with this call's values merged in.
    pub state: FormState,
    pub source: ExtractionSource,
    pub warning: Option<FallbackWarning>,
    /// Questions the model proposed (empty on fallback).
    pub follow_up_questions: Vec<String>,
    /// What the merge did per extracted field.
    pub merge_report: Vec<(String, MergeOutcome)>,
}

pub struct ExtractionCoordinator {
    schema: Arc<FieldSchema>,
    model: ModelExtractor,
    pattern: PatternExtractor,
    model_retries: usize,
    last_failure: Option<ModelFailureKind>,
}

impl ExtractionCoordinator {
    pub fn new(schema: Arc<FieldSchema>, model: ModelExtractor, config: &PipelineConfig) -> Self {
        let pattern = PatternExtractor::new(&schema);
        Self {
            schema,
            model,
            pattern,
            model_retries: config.model_retries,
            last_failure: None,
        }
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn pattern(&self) -> &PatternExtractor {
        &self.pattern
    }

    pub fn last_failure(&self) -> Option<ModelFailureKind> {
        self.last_failure
    }

    /// Whether a model call is worth making right now: a client is
    /// configured and the last call did not find the service unavailable
    /// or slow.
    pub fn model_usable(&self) -> bool {
        self.model.is_configured()
            && !matches!(
                self.last_failure,
                Some(ModelFailureKind::Unavailable | ModelFailureKind::Timeout)
            )
    }

    /// Extract from `text` and merge into `prior` (or an empty state).
    pub fn extract(&mut self, text: &str, prior: Option<&FormState>) -> ExtractionOutcome {
        let span = tracing::info_span!("extract", chars = text.chars().count());
        let _enter = span.enter();

        let mut state = prior.cloned().unwrap_or_default();

        if text.trim().is_empty() {
            tracing::info!("Empty source text, nothing to extract");
            return ExtractionOutcome {
                state,
                source: ExtractionSource::Pattern,
                warning: None,
                follow_up_questions: Vec::new(),
                merge_report: Vec::new(),
            };
        }

        match self.call_model(text, prior, &[]) {
            Ok(extraction) => {
                let merge_report = state.merge_state(&self.schema, extraction.state);
                tracing::info!(fields = merge_report.len(), "Model extraction merged");
                ExtractionOutcome {
                    state,
                    source: ExtractionSource::Model,
                    warning: None,
                    follow_up_questions: extraction.follow_up_questions,
                    merge_report,
                }
            }
            Err(failure) => {
                let found = self.pattern.extract(&self.schema, text);
                let merge_report = state.merge_state(&self.schema, found);
                tracing::warn!(
                    kind = %failure.kind,
                    detail = %failure.detail,
                    fields = merge_report.len(),
                    "Model extraction failed, used pattern fallback"
                );
                ExtractionOutcome {
                    state,
                    source: ExtractionSource::Pattern,
                    warning: Some(failure.into()),
                    follow_up_questions: Vec::new(),
                    merge_report,
                }
            }
        }
    }

    /// Model-only extraction limited to `focus`, for clarification answers.
    ///
    /// Makes no call when the model is not usable. Returns just the model's
    /// values; merging is left to the caller.
    pub fn extract_scoped(
        &mut self,
        text: &str,
        prior: &FormState,
        focus: &[String],
    ) -> Result<FormState, ModelFailure> {
        if !self.model_usable() {
            let kind = self.last_failure.unwrap_or(ModelFailureKind::Unavailable);
            return Err(ModelFailure::new(kind, "Model skipped after earlier failure"));
        }
        self.call_model(text, Some(prior), focus)
            .map(|extraction| extraction.state)
    }

    /// One model attempt plus retries for malformed answers only.
    fn call_model(
        &mut self,
        text: &str,
        prior: Option<&FormState>,
        focus: &[String],
    ) -> Result<ModelExtraction, ModelFailure> {
        let mut attempt = 0;
        loop {
            match self.model.extract(&self.schema, text, prior, focus) {
                Ok(extraction) => {
                    self.last_failure = None;
                    return Ok(extraction);
                }
                Err(failure)
                    if failure.kind == ModelFailureKind::Malformed && attempt < self.model_retries =>
                {
                    attempt += 1;
                    tracing::warn!(attempt, detail = %failure.detail, "Malformed model answer, retrying");
                }
                Err(failure) => {
                    self.last_failure = Some(failure.kind);
                    return Err(failure);
                }
            }
        }
    }
}
