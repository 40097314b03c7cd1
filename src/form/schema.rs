//! Declarative description of the contract-request form.
//!
//! Pure data: name, label, type, required flag, allowed values and default
//! for every field, in declaration order. Declaration order is the order
//! gaps are reported and questions are asked.

use std::collections::HashSet;

use serde::Serialize;
use thiserror::Error;

use super::value::Value;

#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    #[error("Enum field {0} declares no allowed values")]
    EmptyEnum(String),

    #[error("Default for field {0} does not satisfy its type")]
    InvalidDefault(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Enum,
    Date,
    Number,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Enum => "enum",
            Self::Date => "date",
            Self::Number => "number",
        }
    }
}

/// Why a value does not fit a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeMismatch {
    InvalidType,
    NotAllowedValue,
}

/// One form field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// Human-facing label used in questions and exports.
    pub label: String,
    pub field_type: FieldType,
    pub required: bool,
    pub allowed_values: Option<Vec<String>>,
    pub default: Option<Value>,
}

impl FieldDescriptor {
    fn new(name: &str, label: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            field_type,
            required: false,
            allowed_values: None,
            default: None,
        }
    }

    pub fn string(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldType::String)
    }

    pub fn date(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldType::Date)
    }

    pub fn number(name: &str, label: &str) -> Self {
        Self::new(name, label, FieldType::Number)
    }

    pub fn enumeration(name: &str, label: &str, allowed: &[&str]) -> Self {
        let mut field = Self::new(name, label, FieldType::Enum);
        field.allowed_values = Some(allowed.iter().map(|s| s.to_string()).collect());
        field
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Check type conformance and enum membership.
    pub fn check(&self, value: &Value) -> Result<(), TypeMismatch> {
        match (self.field_type, value) {
            (FieldType::String, Value::Text(_)) => Ok(()),
            (FieldType::Date, Value::Date(_)) => Ok(()),
            (FieldType::Number, Value::Number(n)) if n.is_finite() => Ok(()),
            (FieldType::Enum, Value::Text(s)) => {
                let allowed = self.allowed_values.as_deref().unwrap_or_default();
                if allowed.iter().any(|a| a == s) {
                    Ok(())
                } else {
                    Err(TypeMismatch::NotAllowedValue)
                }
            }
            _ => Err(TypeMismatch::InvalidType),
        }
    }
}

/// Immutable, ordered set of field descriptors.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSchema {
    fields: Vec<FieldDescriptor>,
}

impl FieldSchema {
    /// Build a schema, rejecting duplicate names, empty enums and defaults
    /// that do not satisfy their own descriptor.
    pub fn new(fields: Vec<FieldDescriptor>) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            if field.field_type == FieldType::Enum
                && field.allowed_values.as_ref().map_or(true, |v| v.is_empty())
            {
                return Err(SchemaError::EmptyEnum(field.name.clone()));
            }
            if let Some(default) = &field.default {
                if field.check(default).is_err() {
                    return Err(SchemaError::InvalidDefault(field.name.clone()));
                }
            }
        }
        Ok(Self { fields })
    }

    /// The contract-request form used by the application.
    pub fn contract_request() -> Self {
        Self {
            fields: vec![
                FieldDescriptor::string("project_name", "Project name").required(),
                FieldDescriptor::string("counterparty_name", "Counterparty name").required(),
                FieldDescriptor::enumeration(
                    "counterparty_type",
                    "Counterparty type",
                    &["corporate", "government", "academic", "individual"],
                )
                .required(),
                FieldDescriptor::string("affiliation", "Affiliation (department)").required(),
                FieldDescriptor::string("target_product", "Target product").required(),
                FieldDescriptor::string("activity_background", "Background and purpose")
                    .required(),
                FieldDescriptor::string(
                    "counterparty_relationship",
                    "Relationship with counterparty and related contracts",
                ),
                FieldDescriptor::string("activity_details", "Activity details").required(),
                FieldDescriptor::date("request_date", "Request date"),
                FieldDescriptor::number("amount_jpy", "Amount (JPY)"),
                FieldDescriptor::enumeration(
                    "confidentiality",
                    "Confidentiality level",
                    &["internal", "confidential", "strictly_confidential"],
                )
                .required()
                .with_default(Value::text("confidential")),
            ],
        }
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Label for a field, or the raw name if the field is unknown.
    pub fn label_for<'a>(&'a self, name: &'a str) -> &'a str {
        self.get(name).map_or(name, |f| f.label.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}
