use crate::form::{FieldSchema, FieldType, FormState};

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are an assistant that fills in a contract-request \
form from meeting notes written in Japanese or English. You output a single JSON object and \
nothing else: no prose, no Markdown. You never guess: when the text gives no evidence for a \
field, its value is null.";

/// Maximum number of follow-up questions the model may propose.
pub const MAX_MODEL_FOLLOW_UPS: usize = 5;

/// Build the extraction prompt.
///
/// `prior` lists values already accepted into the form; `focus` narrows the
/// request to the fields being clarified (empty = whole schema).
pub fn build_extraction_prompt(
    schema: &FieldSchema,
    text: &str,
    prior: Option<&FormState>,
    focus: &[String],
) -> String {
    let fields: Vec<_> = schema
        .fields()
        .iter()
        .filter(|f| focus.is_empty() || focus.contains(&f.name))
        .collect();

    let field_lines = fields
        .iter()
        .map(|f| {
            let kind = match f.field_type {
                FieldType::String => "string".to_string(),
                FieldType::Date => "date as YYYY-MM-DD".to_string(),
                FieldType::Number => "number without separators or units".to_string(),
                FieldType::Enum => format!(
                    "one of [{}]",
                    f.allowed_values.as_deref().unwrap_or_default().join(", ")
                ),
            };
            let required = if f.required { "required" } else { "optional" };
            format!("- {}: {} ({kind}, {required})", f.name, f.label)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let skeleton = fields
        .iter()
        .map(|f| format!("    \"{}\": null", f.name))
        .collect::<Vec<_>>()
        .join(",\n");

    let prior_section = match prior {
        Some(state) if !state.is_empty() => {
            let lines = state
                .iter()
                .filter(|v| focus.is_empty() || focus.contains(&v.name))
                .map(|v| format!("- {}: {}", v.name, v.value))
                .collect::<Vec<_>>();
            if lines.is_empty() {
                String::new()
            } else {
                format!(
                    "\nVALUES ALREADY IN THE FORM (replace only if the text clearly says otherwise):\n{}\n",
                    lines.join("\n")
                )
            }
        }
        _ => String::new(),
    };

    let scope_note = if focus.is_empty() {
        String::new()
    } else {
        "\nThe text below is the user's answer to follow-up questions about exactly these fields.\n"
            .to_string()
    };

    format!(
        "FIELDS:\n{field_lines}\n{prior_section}{scope_note}\n\
RULES:\n\
1. Copy values from the text; summarise only for background and activity fields.\n\
2. Use null for anything the text does not state.\n\
3. Enum fields must use one of the listed values exactly.\n\
4. Propose at most {MAX_MODEL_FOLLOW_UPS} short follow-up questions for missing required fields.\n\n\
OUTPUT FORMAT:\n\
{{\n  \"form\": {{\n{skeleton}\n  }},\n  \"follow_up_questions\": []\n}}\n\n\
INPUT TEXT:\n<<<\n{text}\n>>>",
        text = text.trim(),
    )
}
