use crate::form::FieldSchema;
use crate::pipeline::CompletedForm;

/// Render the form as `【label】` / value blocks in schema order.
/// Unset optional fields keep their heading with an empty value line.
pub fn format_form_as_text(form: &CompletedForm, schema: &FieldSchema) -> String {
    let mut lines = Vec::with_capacity(schema.len() * 3);
    for field in schema.fields() {
        lines.push(format!("【{}】", field.label));
        lines.push(form.display_value(&field.name).trim().to_string());
        lines.push(String::new());
    }
    format!("{}\n", lines.join("\n").trim_end())
}
