//! One form-filling session.
//!
//! Owns the form state, the extraction coordinator and the clarification
//! engine for a single user flow. Sessions share nothing but the schema, so
//! any number can run side by side; dropping one between rounds leaves no
//! trace.

use std::sync::Arc;

use uuid::Uuid;

use crate::form::{coerce_text, FieldSchema, FieldValue, FormState, MergeOutcome, RejectReason, Source};
use crate::pipeline::{
    find_gaps, validate, ClarificationEngine, ClarificationError, ClarificationRound,
    ExtractionCoordinator, ExtractionOutcome, FallbackWarning, ModelExtractor, RoundSummary,
    ValidationResult,
};
use crate::pipeline_config::PipelineConfig;

pub struct FormSession {
    id: Uuid,
    schema: Arc<FieldSchema>,
    state: FormState,
    coordinator: ExtractionCoordinator,
    engine: ClarificationEngine,
    warnings: Vec<FallbackWarning>,
}

impl FormSession {
    /// A fresh session whose form starts with the schema defaults.
    pub fn new(schema: Arc<FieldSchema>, model: ModelExtractor, config: &PipelineConfig) -> Self {
        let config = config.clone().normalized();
        let id = Uuid::new_v4();
        tracing::debug!(session_id = %id, fields = schema.len(), "Form session created");
        Self {
            id,
            state: FormState::with_defaults(&schema),
            coordinator: ExtractionCoordinator::new(schema.clone(), model, &config),
            engine: ClarificationEngine::new(&config),
            schema,
            warnings: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }

    pub fn engine(&self) -> &ClarificationEngine {
        &self.engine
    }

    /// Every fallback warning raised so far, oldest first.
    pub fn warnings(&self) -> &[FallbackWarning] {
        &self.warnings
    }

    /// Extract from source text and merge into the current form.
    pub fn ingest(&mut self, text: &str) -> ExtractionOutcome {
        let outcome = self.coordinator.extract(text, Some(&self.state));
        self.state = outcome.state.clone();
        if let Some(warning) = &outcome.warning {
            self.warnings.push(warning.clone());
        }
        tracing::info!(
            session_id = %self.id,
            source = ?outcome.source,
            gaps = find_gaps(&self.state, &self.schema).len(),
            "Source text ingested"
        );
        outcome
    }

    pub fn gaps(&self) -> Vec<String> {
        find_gaps(&self.state, &self.schema)
    }

    pub fn start_round(&mut self) -> Result<ClarificationRound, ClarificationError> {
        self.engine.start_round(&self.schema, &self.state)
    }

    pub fn submit_answers(
        &mut self,
        round: ClarificationRound,
    ) -> Result<RoundSummary, ClarificationError> {
        let summary = self
            .engine
            .submit_answers(round, &mut self.state, &mut self.coordinator)?;
        self.warnings.extend(summary.warnings.iter().cloned());
        Ok(summary)
    }

    /// Drop the open round unanswered, e.g. when the user walks away from
    /// the questions. The round still counts against the budget.
    pub fn cancel_round(&mut self) -> Option<usize> {
        self.engine.cancel_round()
    }

    /// Direct user edit of one field, outside any round. Always wins over
    /// the current value when valid. Blank input leaves the field as is.
    pub fn edit_field(&mut self, name: &str, raw: &str) -> MergeOutcome {
        let Some(descriptor) = self.schema.get(name) else {
            return MergeOutcome::Rejected(RejectReason::UnknownField);
        };
        match coerce_text(descriptor, raw) {
            Some(value) => self
                .state
                .merge_override(&self.schema, FieldValue::new(name, value, Source::User)),
            None => MergeOutcome::KeptExisting,
        }
    }

    pub fn validate(&self) -> ValidationResult {
        validate(&self.state, &self.schema)
    }
}
