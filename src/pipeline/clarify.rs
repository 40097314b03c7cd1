//! Bounded clarification rounds.
//!
//! Two-call protocol: `start_round` turns the current gaps into questions,
//! `submit_answers` folds the user's answers back into the form. Between the
//! two calls the engine just waits; there is no deadline, only a round
//! budget.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::form::{FieldSchema, FormState, MergeOutcome, RejectReason, Source};
use crate::pipeline_config::PipelineConfig;

use super::coordinator::{ExtractionCoordinator, FallbackWarning};
use super::gaps::find_gaps;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClarificationError {
    #[error("Clarification limit reached ({max} rounds)")]
    RoundLimitExceeded { max: usize },

    #[error("Round {0} is still waiting for answers")]
    RoundAlreadyActive(usize),

    #[error("No required fields are missing")]
    NothingToClarify,

    #[error("Answers for round {0} do not match the active round")]
    RoundMismatch(usize),
}

/// Question text per built-in field.
const QUESTION_TEMPLATES: &[(&str, &str)] = &[
    ("project_name", "What is the name of this project or contract request?"),
    ("counterparty_name", "Who is the counterparty (company or organisation name)?"),
    (
        "counterparty_type",
        "Is the counterparty a company, a government body, a university or research institute, or an individual?",
    ),
    ("affiliation", "Which department is making this request?"),
    ("target_product", "Which product or technology does the contract cover?"),
    ("activity_background", "What is the background and purpose of this activity?"),
    (
        "counterparty_relationship",
        "What is your relationship with the counterparty, and are related contracts already in place?",
    ),
    ("activity_details", "What activities are planned with the counterparty?"),
    ("request_date", "What is the request date (YYYY-MM-DD)?"),
    ("amount_jpy", "What is the expected contract amount in yen?"),
    (
        "confidentiality",
        "Which confidentiality level applies: internal, confidential or strictly_confidential?",
    ),
];

fn question_for(schema: &FieldSchema, field_name: &str) -> String {
    QUESTION_TEMPLATES
        .iter()
        .find(|(name, _)| *name == field_name)
        .map(|(_, text)| text.to_string())
        .unwrap_or_else(|| format!("Please provide {}.", schema.label_for(field_name)))
}

// ═══════════════════════════════════════════
// Round data
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    pub field_name: String,
    pub question_text: String,
}

/// One open round. Fill `answers` (field name → raw text) and hand it back
/// to `submit_answers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClarificationRound {
    pub round_index: usize,
    pub questions: Vec<Question>,
    pub answers: BTreeMap<String, String>,
}

impl ClarificationRound {
    /// Record the answer to a question. Answers for fields that were not
    /// asked are ignored at submission.
    pub fn answer(&mut self, field_name: &str, text: impl Into<String>) {
        self.answers.insert(field_name.to_string(), text.into());
    }

    fn answer_for(&self, field_name: &str) -> Option<&str> {
        self.answers
            .get(field_name)
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "reason", rename_all = "snake_case")]
pub enum UpdateAction {
    Updated,
    Unanswered,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldUpdate {
    pub field: String,
    pub action: UpdateAction,
}

/// What a submitted round did to the form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSummary {
    pub round_index: usize,
    /// One entry per question, in question order.
    pub updates: Vec<FieldUpdate>,
    /// Other fields picked up from the answer text.
    pub incidental: Vec<String>,
    pub remaining_gaps: Vec<String>,
    pub warnings: Vec<FallbackWarning>,
    /// No further round may be started.
    pub limit_reached: bool,
}

// ═══════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    RoundActive { round_index: usize },
    Finished,
}

pub struct ClarificationEngine {
    max_rounds: usize,
    batch_size: usize,
    rounds_started: usize,
    state: EngineState,
}

impl ClarificationEngine {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            max_rounds: config.max_rounds,
            batch_size: config.batch_size.max(1),
            rounds_started: 0,
            state: if config.max_rounds == 0 {
                EngineState::Finished
            } else {
                EngineState::Idle
            },
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn rounds_started(&self) -> usize {
        self.rounds_started
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    pub fn rounds_remaining(&self) -> usize {
        self.max_rounds.saturating_sub(self.rounds_started)
    }

    /// Open the next round with one question per gap, up to the batch size.
    pub fn start_round(
        &mut self,
        schema: &FieldSchema,
        form: &FormState,
    ) -> Result<ClarificationRound, ClarificationError> {
        if let EngineState::RoundActive { round_index } = self.state {
            return Err(ClarificationError::RoundAlreadyActive(round_index));
        }
        if self.rounds_started >= self.max_rounds {
            return Err(ClarificationError::RoundLimitExceeded {
                max: self.max_rounds,
            });
        }

        let gaps = find_gaps(form, schema);
        if gaps.is_empty() {
            return Err(ClarificationError::NothingToClarify);
        }

        let round_index = self.rounds_started;
        let questions: Vec<Question> = gaps
            .iter()
            .take(self.batch_size)
            .map(|name| Question {
                field_name: name.clone(),
                question_text: question_for(schema, name),
            })
            .collect();

        self.rounds_started += 1;
        self.state = EngineState::RoundActive { round_index };
        tracing::info!(
            round = round_index,
            questions = questions.len(),
            gaps = gaps.len(),
            "Clarification round started"
        );

        Ok(ClarificationRound {
            round_index,
            questions,
            answers: BTreeMap::new(),
        })
    }

    /// Abandon the active round without touching the form. The round still
    /// counts against the budget. Returns the cancelled round's index.
    pub fn cancel_round(&mut self) -> Option<usize> {
        let EngineState::RoundActive { round_index } = self.state else {
            return None;
        };
        let limit_reached = self.close_round();
        tracing::info!(round = round_index, limit_reached, "Clarification round cancelled");
        Some(round_index)
    }

    /// Leave `RoundActive`; true when no further round may start.
    fn close_round(&mut self) -> bool {
        let limit_reached = self.rounds_started >= self.max_rounds;
        self.state = if limit_reached {
            EngineState::Finished
        } else {
            EngineState::Idle
        };
        limit_reached
    }

    /// Merge the answers of `round` into `form`.
    ///
    /// Answered fields get one scoped model call (all answers together, only
    /// if the model is usable), and the pattern extractor for whatever the
    /// model did not resolve. Resolved values are attributed to the user and
    /// override anything already there. Other fields mentioned in the
    /// answers merge under normal precedence.
    pub fn submit_answers(
        &mut self,
        round: ClarificationRound,
        form: &mut FormState,
        coordinator: &mut ExtractionCoordinator,
    ) -> Result<RoundSummary, ClarificationError> {
        match self.state {
            EngineState::RoundActive { round_index } if round_index == round.round_index => {}
            _ => return Err(ClarificationError::RoundMismatch(round.round_index)),
        }

        let span = tracing::info_span!("clarification_round", round = round.round_index);
        let _enter = span.enter();

        let answered: Vec<(&str, &str)> = round
            .questions
            .iter()
            .filter_map(|q| round.answer_for(&q.field_name).map(|a| (q.field_name.as_str(), a)))
            .collect();

        let mut warnings = Vec::new();
        let mut model_values = FormState::new();
        if !answered.is_empty() && coordinator.model_usable() {
            let focus: Vec<String> = answered.iter().map(|(name, _)| name.to_string()).collect();
            let combined = answered
                .iter()
                .map(|(name, answer)| format!("{}: {}", coordinator.schema().label_for(name), answer))
                .collect::<Vec<_>>()
                .join("\n");
            match coordinator.extract_scoped(&combined, form, &focus) {
                Ok(values) => model_values = values,
                Err(failure) => {
                    tracing::warn!(kind = %failure.kind, "Scoped model call failed, using patterns");
                    warnings.push(FallbackWarning::from(failure));
                }
            }
        }

        let schema = coordinator.schema();
        let mut updates = Vec::with_capacity(round.questions.len());
        for question in &round.questions {
            let name = question.field_name.as_str();
            let Some(answer) = round.answer_for(name) else {
                updates.push(FieldUpdate {
                    field: name.to_string(),
                    action: UpdateAction::Unanswered,
                });
                continue;
            };
            let Some(descriptor) = schema.get(name) else {
                continue;
            };

            let candidate = model_values
                .get(name)
                .filter(|v| !v.value.is_empty())
                .cloned()
                .or_else(|| coordinator.pattern().extract_field(descriptor, answer));

            let action = match candidate {
                None => UpdateAction::Unanswered,
                Some(value) => match form.merge_override(schema, value.with_source(Source::User)) {
                    MergeOutcome::Rejected(reason) => {
                        tracing::info!(field = name, reason = ?reason, "Answer rejected");
                        UpdateAction::Rejected(reason)
                    }
                    _ => UpdateAction::Updated,
                },
            };
            updates.push(FieldUpdate {
                field: name.to_string(),
                action,
            });
        }

        let asked = |name: &str| round.questions.iter().any(|q| q.field_name == name);
        let raw_answers = round
            .answers
            .values()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let mut incidental = Vec::new();
        let others = model_values
            .iter()
            .cloned()
            .chain(coordinator.pattern().extract(schema, &raw_answers).iter().cloned())
            .filter(|v| !asked(&v.name))
            .collect::<Vec<_>>();
        for value in others {
            let name = value.name.clone();
            if form.merge(schema, value).changed() && !incidental.contains(&name) {
                incidental.push(name);
            }
        }

        let remaining_gaps = find_gaps(form, schema);
        let limit_reached = self.close_round();

        tracing::info!(
            answered = answered.len(),
            remaining = remaining_gaps.len(),
            limit_reached,
            "Clarification round merged"
        );

        Ok(RoundSummary {
            round_index: round.round_index,
            updates,
            incidental,
            remaining_gaps,
            warnings,
            limit_reached,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{FieldDescriptor, FieldValue, Value};
    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::pipeline::model::ModelExtractor;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn small_schema() -> Arc<FieldSchema> {
        Arc::new(
            FieldSchema::new(vec![
                FieldDescriptor::string("title", "Title").required(),
                FieldDescriptor::date("start_date", "Start date").required(),
                FieldDescriptor::string("counterparty", "Counterparty").required(),
                FieldDescriptor::enumeration("kind", "Kind", &["nda", "license"]).required(),
            ])
            .unwrap(),
        )
    }

    fn offline(schema: Arc<FieldSchema>) -> ExtractionCoordinator {
        ExtractionCoordinator::new(schema, ModelExtractor::unconfigured(), &PipelineConfig::default())
    }

    #[test]
    fn round_asks_gaps_in_schema_order_with_fallback_text() {
        let schema = small_schema();
        let mut engine = ClarificationEngine::new(&PipelineConfig::default());
        let round = engine.start_round(&schema, &FormState::new()).unwrap();

        assert_eq!(round.round_index, 0);
        let names: Vec<_> = round.questions.iter().map(|q| q.field_name.as_str()).collect();
        assert_eq!(names, vec!["title", "start_date", "counterparty", "kind"]);
        assert_eq!(round.questions[2].question_text, "Please provide Counterparty.");
    }

    #[test]
    fn builtin_fields_use_templates_and_batch_size() {
        let schema = FieldSchema::contract_request();
        let config = PipelineConfig {
            batch_size: 3,
            ..Default::default()
        };
        let mut engine = ClarificationEngine::new(&config);
        let round = engine.start_round(&schema, &FormState::new()).unwrap();
        assert_eq!(round.questions.len(), 3);
        assert_eq!(
            round.questions[1].question_text,
            "Who is the counterparty (company or organisation name)?"
        );
    }

    #[test]
    fn round_bound_enforced() {
        let schema = small_schema();
        let mut coordinator = offline(schema.clone());
        let mut engine = ClarificationEngine::new(&PipelineConfig::default());
        let mut form = FormState::new();

        for expected_index in 0..2 {
            let round = engine.start_round(&schema, &form).unwrap();
            assert_eq!(round.round_index, expected_index);
            let summary = engine.submit_answers(round, &mut form, &mut coordinator).unwrap();
            assert_eq!(summary.limit_reached, expected_index == 1);
        }

        assert_eq!(engine.state(), EngineState::Finished);
        assert_eq!(
            engine.start_round(&schema, &form),
            Err(ClarificationError::RoundLimitExceeded { max: 2 })
        );
    }

    #[test]
    fn second_start_while_active_is_rejected() {
        let schema = small_schema();
        let mut engine = ClarificationEngine::new(&PipelineConfig::default());
        engine.start_round(&schema, &FormState::new()).unwrap();
        assert_eq!(
            engine.start_round(&schema, &FormState::new()),
            Err(ClarificationError::RoundAlreadyActive(0))
        );
    }

    #[test]
    fn nothing_to_clarify_does_not_use_a_round() {
        let schema = Arc::new(
            FieldSchema::new(vec![FieldDescriptor::string("title", "Title").required()]).unwrap(),
        );
        let mut form = FormState::new();
        form.merge(&schema, FieldValue::new("title", Value::text("T"), Source::Pattern));
        let mut engine = ClarificationEngine::new(&PipelineConfig::default());
        assert_eq!(
            engine.start_round(&schema, &form),
            Err(ClarificationError::NothingToClarify)
        );
        assert_eq!(engine.rounds_started(), 0);
    }

    #[test]
    fn stale_round_is_a_mismatch() {
        let schema = small_schema();
        let mut coordinator = offline(schema.clone());
        let mut engine = ClarificationEngine::new(&PipelineConfig::default());
        let mut form = FormState::new();

        let round = engine.start_round(&schema, &form).unwrap();
        let copy = round.clone();
        engine.submit_answers(round, &mut form, &mut coordinator).unwrap();
        assert_eq!(
            engine.submit_answers(copy, &mut form, &mut coordinator),
            Err(ClarificationError::RoundMismatch(0))
        );
    }

    #[test]
    fn answers_override_and_report_each_field() {
        let schema = small_schema();
        let mut coordinator = offline(schema.clone());
        let mut engine = ClarificationEngine::new(&PipelineConfig::default());
        let mut form = FormState::new();
        form.merge(&schema, FieldValue::new("title", Value::text(" "), Source::Model));

        let mut round = engine.start_round(&schema, &form).unwrap();
        round.answer("title", "Supply agreement");
        round.answer("start_date", "from 2025/04/01");
        round.answer("kind", "lease");
        let summary = engine.submit_answers(round, &mut form, &mut coordinator).unwrap();

        let action = |f: &str| summary.updates.iter().find(|u| u.field == f).unwrap().action;
        assert_eq!(action("title"), UpdateAction::Updated);
        assert_eq!(action("start_date"), UpdateAction::Updated);
        assert_eq!(action("counterparty"), UpdateAction::Unanswered);
        assert_eq!(action("kind"), UpdateAction::Rejected(RejectReason::NotAllowedValue));

        assert_eq!(form.get("title").unwrap().source, Source::User);
        assert_eq!(
            form.get("start_date").unwrap().value,
            Value::Date(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap())
        );
        assert!(form.get("kind").is_none());
        assert_eq!(summary.remaining_gaps, vec!["counterparty", "kind"]);
        assert!(summary.warnings.is_empty(), "no model configured, nothing attempted");
    }

    #[test]
    fn scoped_model_answer_wins_over_pattern() {
        let schema = small_schema();
        let client = Arc::new(ScriptedLlmClient::new(vec![Ok(
            r#"{"form": {"counterparty": "Acme Corporation"}}"#.into(),
        )]));
        let mut coordinator = ExtractionCoordinator::new(
            schema.clone(),
            ModelExtractor::new(Box::new(client.clone()), "m"),
            &PipelineConfig::default(),
        );
        let mut engine = ClarificationEngine::new(&PipelineConfig::default());
        let mut form = FormState::new();

        let mut round = engine.start_round(&schema, &form).unwrap();
        round.answer("counterparty", "it's acme");
        round.answer("title", "NDA for sensors");
        engine.submit_answers(round, &mut form, &mut coordinator).unwrap();

        assert_eq!(client.call_count(), 1, "one scoped call for all answers");
        let prompt = &client.prompts()[0];
        assert!(prompt.contains("Counterparty: it's acme"));
        assert!(prompt.contains("Title: NDA for sensors"));

        let counterparty = form.get("counterparty").unwrap();
        assert_eq!(counterparty.value, Value::text("Acme Corporation"));
        assert_eq!(counterparty.source, Source::User);
        // Model said nothing about the title: pattern answer used.
        assert_eq!(form.get("title").unwrap().value, Value::text("NDA for sensors"));
    }

    #[test]
    fn failed_scoped_call_warns_and_falls_back() {
        let schema = small_schema();
        let client = Arc::new(ScriptedLlmClient::always(Err(LlmError::SafetyBlocked(
            "SAFETY".into(),
        ))));
        let mut coordinator = ExtractionCoordinator::new(
            schema.clone(),
            ModelExtractor::new(Box::new(client), "m"),
            &PipelineConfig::default(),
        );
        let mut engine = ClarificationEngine::new(&PipelineConfig::default());
        let mut form = FormState::new();

        let mut round = engine.start_round(&schema, &form).unwrap();
        round.answer("counterparty", "Acme Corp");
        let summary = engine.submit_answers(round, &mut form, &mut coordinator).unwrap();

        assert_eq!(summary.warnings.len(), 1);
        assert_eq!(form.get("counterparty").unwrap().value, Value::text("Acme Corp"));
    }

    #[test]
    fn incidental_fields_merge_with_normal_precedence() {
        let schema = small_schema();
        let mut coordinator = offline(schema.clone());
        let config = PipelineConfig {
            batch_size: 1,
            ..Default::default()
        };
        let mut engine = ClarificationEngine::new(&config);
        let mut form = FormState::new();

        let mut round = engine.start_round(&schema, &form).unwrap();
        assert_eq!(round.questions.len(), 1);
        round.answer("title", "Supply deal\nCounterparty: Beta LLC");
        let summary = engine.submit_answers(round, &mut form, &mut coordinator).unwrap();

        assert_eq!(form.get("counterparty").unwrap().source, Source::Pattern);
        assert_eq!(form.get("counterparty").unwrap().value, Value::text("Beta LLC"));
        let title = form.get("title").unwrap();
        assert_eq!(title.value, Value::text("Supply deal"));
        assert_eq!(title.source, Source::User);
        assert_eq!(summary.incidental, vec!["counterparty"]);
    }

    #[test]
    fn cancelled_round_frees_the_engine_but_uses_budget() {
        let schema = small_schema();
        let mut engine = ClarificationEngine::new(&PipelineConfig::default());
        assert_eq!(engine.cancel_round(), None);

        let round = engine.start_round(&schema, &FormState::new()).unwrap();
        drop(round);
        assert_eq!(engine.cancel_round(), Some(0));
        assert_eq!(engine.state(), EngineState::Idle);
        assert_eq!(engine.rounds_remaining(), 1);

        let round = engine.start_round(&schema, &FormState::new()).unwrap();
        assert_eq!(round.round_index, 1);
        assert_eq!(engine.cancel_round(), Some(1));
        assert_eq!(engine.state(), EngineState::Finished);
        assert_eq!(
            engine.start_round(&schema, &FormState::new()),
            Err(ClarificationError::RoundLimitExceeded { max: 2 })
        );
    }

    #[test]
    fn zero_round_budget_starts_finished() {
        let config = PipelineConfig {
            max_rounds: 0,
            ..Default::default()
        };
        let mut engine = ClarificationEngine::new(&config);
        assert_eq!(engine.state(), EngineState::Finished);
        assert_eq!(
            engine.start_round(&small_schema(), &FormState::new()),
            Err(ClarificationError::RoundLimitExceeded { max: 0 })
        );
    }
}
