use crate::form::{FieldDescriptor, FieldSchema, FieldValue, FormState, Source};

/// Whether a required field still lacks a usable value.
///
/// Unresolved means absent, the type's empty value, or a `default`-sourced
/// value where the schema itself declares no default. Shared with the
/// validator so both agree on what "missing" means.
pub(crate) fn is_unresolved(descriptor: &FieldDescriptor, entry: Option<&FieldValue>) -> bool {
    match entry {
        None => true,
        Some(v) if v.value.is_empty() => true,
        Some(v) => v.source == Source::Default && descriptor.default.is_none(),
    }
}

/// Required fields without a usable value, in schema declaration order.
pub fn find_gaps(state: &FormState, schema: &FieldSchema) -> Vec<String> {
    schema
        .required_fields()
        .filter(|field| is_unresolved(field, state.get(&field.name)))
        .map(|field| field.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::Value;

    fn schema() -> FieldSchema {
        FieldSchema::new(vec![
            FieldDescriptor::string("title", "Title").required(),
            FieldDescriptor::date("start_date", "Start date").required(),
            FieldDescriptor::string("notes", "Notes"),
            FieldDescriptor::string("counterparty", "Counterparty").required(),
            FieldDescriptor::enumeration("kind", "Kind", &["nda", "license"])
                .required()
                .with_default(Value::text("nda")),
        ])
        .unwrap()
    }

    #[test]
    fn gaps_follow_declaration_order() {
        let schema = schema();
        let state = FormState::with_defaults(&schema);
        assert_eq!(find_gaps(&state, &schema), vec!["title", "start_date", "counterparty"]);
    }

    #[test]
    fn empty_values_are_gaps_optional_fields_never() {
        let schema = schema();
        let mut state = FormState::with_defaults(&schema);
        state.merge(&schema, FieldValue::new("title", Value::text("   "), Source::Model));
        state.merge(&schema, FieldValue::new("counterparty", Value::text("Acme"), Source::User));
        assert_eq!(find_gaps(&state, &schema), vec!["title", "start_date"]);
    }

    #[test]
    fn declared_default_resolves_field() {
        let schema = schema();
        let state = FormState::with_defaults(&schema);
        assert!(!find_gaps(&state, &schema).contains(&"kind".to_string()));
    }

    #[test]
    fn default_sourced_value_without_declared_default_is_a_gap() {
        let descriptor = FieldDescriptor::string("title", "Title").required();
        let entry = FieldValue::new("title", Value::text("Untitled"), Source::Default);
        assert!(is_unresolved(&descriptor, Some(&entry)));
        assert!(!is_unresolved(&descriptor, Some(&entry.with_source(Source::Pattern))));
    }
}
