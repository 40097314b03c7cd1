//! Final full-schema check.
//!
//! The validator is the only producer of `CompletedForm`, so anything that
//! takes a `CompletedForm` (the export writers) can rely on a complete,
//! type-correct record.

use serde::Serialize;

use crate::form::{FieldSchema, FieldValue, FormState, TypeMismatch};

use super::gaps::is_unresolved;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationReason {
    Missing,
    InvalidType,
    NotAllowedValue,
}

impl From<TypeMismatch> for ViolationReason {
    fn from(m: TypeMismatch) -> Self {
        match m {
            TypeMismatch::InvalidType => Self::InvalidType,
            TypeMismatch::NotAllowedValue => Self::NotAllowedValue,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field_name: String,
    pub reason: ViolationReason,
}

/// A form that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedForm {
    state: FormState,
}

impl CompletedForm {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.state.get(name)
    }

    /// Display string for a field, empty when the (optional) field is unset.
    pub fn display_value(&self, name: &str) -> String {
        self.state
            .get(name)
            .map(|v| v.value.to_string())
            .unwrap_or_default()
    }

    pub fn state(&self) -> &FormState {
        &self.state
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult {
    Complete(CompletedForm),
    Incomplete { violations: Vec<Violation> },
}

impl ValidationResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Complete(_) => &[],
            Self::Incomplete { violations } => violations,
        }
    }
}

/// Check every field of `state` against `schema`. Does not mutate the
/// state; calling it twice gives the same answer.
pub fn validate(state: &FormState, schema: &FieldSchema) -> ValidationResult {
    let mut violations = Vec::new();

    for field in schema.fields() {
        let entry = state.get(&field.name);

        if let Some(value) = entry {
            if let Err(mismatch) = field.check(&value.value) {
                violations.push(Violation {
                    field_name: field.name.clone(),
                    reason: mismatch.into(),
                });
                continue;
            }
        }

        if field.required && is_unresolved(field, entry) {
            violations.push(Violation {
                field_name: field.name.clone(),
                reason: ViolationReason::Missing,
            });
        }
    }

    if violations.is_empty() {
        ValidationResult::Complete(CompletedForm {
            state: state.clone(),
        })
    } else {
        tracing::debug!(count = violations.len(), "Form is incomplete");
        ValidationResult::Incomplete { violations }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{FieldDescriptor, Source, Value};
    use crate::pipeline::gaps::find_gaps;
    use chrono::NaiveDate;

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![
            FieldDescriptor::string("title", "Title").required(),
            FieldDescriptor::date("start_date", "Start date").required(),
            FieldDescriptor::enumeration("kind", "Kind", &["nda", "license"]).required(),
            FieldDescriptor::number("amount", "Amount"),
        ])
        .unwrap()
    }

    fn filled(schema: &FieldSchema) -> FormState {
        let mut state = FormState::new();
        state.merge(schema, FieldValue::new("title", Value::text("Supply"), Source::Model));
        state.merge(
            schema,
            FieldValue::new(
                "start_date",
                Value::Date(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()),
                Source::Pattern,
            ),
        );
        state.merge(schema, FieldValue::new("kind", Value::text("nda"), Source::User));
        state
    }

    #[test]
    fn complete_form_passes() {
        let schema = schema();
        let state = filled(&schema);
        let result = validate(&state, &schema);
        let ValidationResult::Complete(form) = result else {
            panic!("expected complete");
        };
        assert_eq!(form.display_value("start_date"), "2025-04-01");
        assert_eq!(form.display_value("amount"), "");
    }

    #[test]
    fn missing_required_reported_in_order() {
        let schema = schema();
        let mut state = FormState::new();
        state.merge(&schema, FieldValue::new("title", Value::text(" "), Source::Model));
        let result = validate(&state, &schema);
        let names: Vec<_> = result.violations().iter().map(|v| v.field_name.as_str()).collect();
        assert_eq!(names, vec!["title", "start_date", "kind"]);
        assert!(result.violations().iter().all(|v| v.reason == ViolationReason::Missing));
    }

    #[test]
    fn type_and_membership_checked_against_schema() {
        // A state built for one schema, validated against a stricter one.
        let loose = FieldSchema::new(vec![
            FieldDescriptor::string("title", "Title"),
            FieldDescriptor::string("start_date", "Start date"),
            FieldDescriptor::string("kind", "Kind"),
        ])
        .unwrap();
        let mut state = FormState::new();
        state.merge(&loose, FieldValue::new("title", Value::text("T"), Source::User));
        state.merge(&loose, FieldValue::new("start_date", Value::text("soon"), Source::User));
        state.merge(&loose, FieldValue::new("kind", Value::text("lease"), Source::User));

        let result = validate(&state, &schema());
        assert_eq!(
            result.violations(),
            &[
                Violation {
                    field_name: "start_date".into(),
                    reason: ViolationReason::InvalidType
                },
                Violation {
                    field_name: "kind".into(),
                    reason: ViolationReason::NotAllowedValue
                },
            ]
        );
    }

    #[test]
    fn validation_is_idempotent_and_pure() {
        let schema = schema();
        let state = filled(&schema);
        let before = state.clone();
        assert_eq!(validate(&state, &schema), validate(&state, &schema));
        assert_eq!(state, before);
    }

    #[test]
    fn gaps_empty_iff_complete() {
        let schema = schema();
        let mut state = FormState::new();
        let steps = [
            FieldValue::new("title", Value::text("Supply"), Source::Model),
            FieldValue::new(
                "start_date",
                Value::Date(NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()),
                Source::Pattern,
            ),
            FieldValue::new("amount", Value::Number(10.0), Source::Pattern),
            FieldValue::new("kind", Value::text("license"), Source::User),
        ];
        for step in steps {
            assert_eq!(
                find_gaps(&state, &schema).is_empty(),
                validate(&state, &schema).is_complete()
            );
            state.merge(&schema, step);
        }
        assert!(find_gaps(&state, &schema).is_empty());
        assert!(validate(&state, &schema).is_complete());
    }
}
