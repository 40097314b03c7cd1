//! The form as currently known, and the only ways to change it.
//!
//! `FormState` is mutated exclusively through `merge` (source precedence)
//! and `merge_override` (explicit user answers). Both check the value
//! against the schema first; rejected values are reported, never stored.

use std::collections::BTreeMap;

use serde::Serialize;

use super::schema::{FieldSchema, TypeMismatch};
use super::value::{FieldValue, Source};

/// What a merge did with a candidate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Field had no value before.
    Inserted,
    /// Existing value was replaced.
    Replaced,
    /// Existing value has higher precedence and was kept.
    KeptExisting,
    /// Candidate failed the schema check and was dropped.
    Rejected(RejectReason),
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Inserted | Self::Replaced)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    UnknownField,
    InvalidType,
    NotAllowedValue,
}

impl From<TypeMismatch> for RejectReason {
    fn from(m: TypeMismatch) -> Self {
        match m {
            TypeMismatch::InvalidType => Self::InvalidType,
            TypeMismatch::NotAllowedValue => Self::NotAllowedValue,
        }
    }
}

/// Field name → accepted value. At most one entry per schema field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormState {
    values: BTreeMap<String, FieldValue>,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state seeded with every declared default, tagged `source=default`.
    pub fn with_defaults(schema: &FieldSchema) -> Self {
        let mut state = Self::new();
        for field in schema.fields() {
            if let Some(default) = &field.default {
                state.merge(
                    schema,
                    FieldValue::new(&field.name, default.clone(), Source::Default),
                );
            }
        }
        state
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldValue> {
        self.values.values()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge under the precedence rule: the candidate replaces an existing
    /// value only if its rank is >= the existing rank, or the existing value
    /// is empty or default-sourced.
    pub fn merge(&mut self, schema: &FieldSchema, candidate: FieldValue) -> MergeOutcome {
        self.merge_with(schema, candidate, false)
    }

    /// Merge that always replaces, used when the user answers a named gap.
    pub fn merge_override(&mut self, schema: &FieldSchema, candidate: FieldValue) -> MergeOutcome {
        self.merge_with(schema, candidate, true)
    }

    /// Merge every value of `other` under the precedence rule.
    pub fn merge_state(&mut self, schema: &FieldSchema, other: FormState) -> Vec<(String, MergeOutcome)> {
        other
            .values
            .into_values()
            .map(|candidate| {
                let name = candidate.name.clone();
                let outcome = self.merge(schema, candidate);
                (name, outcome)
            })
            .collect()
    }

    fn merge_with(&mut self, schema: &FieldSchema, candidate: FieldValue, force: bool) -> MergeOutcome {
        let Some(descriptor) = schema.get(&candidate.name) else {
            tracing::debug!(field = %candidate.name, "Dropping value for unknown field");
            return MergeOutcome::Rejected(RejectReason::UnknownField);
        };

        if let Err(mismatch) = descriptor.check(&candidate.value) {
            tracing::debug!(
                field = %candidate.name,
                source = %candidate.source,
                reason = ?mismatch,
                "Dropping value that fails schema check"
            );
            return MergeOutcome::Rejected(mismatch.into());
        }

        // Empty candidates never displace anything.
        if candidate.value.is_empty() && !force {
            return match self.values.get(&candidate.name) {
                Some(_) => MergeOutcome::KeptExisting,
                None => {
                    self.values.insert(candidate.name.clone(), candidate);
                    MergeOutcome::Inserted
                }
            };
        }

        match self.values.get(&candidate.name) {
            None => {
                self.values.insert(candidate.name.clone(), candidate);
                MergeOutcome::Inserted
            }
            Some(existing) => {
                let replace = force
                    || existing.value.is_empty()
                    || existing.source == Source::Default
                    || candidate.confidence_rank() >= existing.confidence_rank();
                if replace {
                    self.values.insert(candidate.name.clone(), candidate);
                    MergeOutcome::Replaced
                } else {
                    MergeOutcome::KeptExisting
                }
            }
        }
    }
}
