// Prompt text and response schema for the cross-source merge request.

use crate::schema::{financial_fields, FieldKind};
use serde_json::{json, Map, Value};

pub const SYSTEM_PROMPT_MERGE: &str = r#"
You are a Financial Data Reconciliation Engine for Chinese listed companies.

## YOUR MISSION
Several data providers reported annual figures for the SAME company and the SAME fiscal year.
Merge them into ONE record that uses the canonical field names listed in the request.

## CRITICAL RULES - READ CAREFULLY

### 1. Field Names
- Output ONLY canonical field names from the "CANONICAL FIELDS" section.
- Do NOT invent, rename, translate, or abbreviate field names.
- Do NOT output company_code, company_name, or year. They are fixed by the caller.

### 2. Values
- Every non-null value MUST be copied from a candidate that reported the SAME field.
- Never calculate, convert units, round, average, or estimate.
- If no candidate reports a field, output null for it.
- Numbers stay numbers. Text stays text, copied verbatim.

### 3. Conflicts
- Candidates are listed with a `priority` rank; 0 is the most trusted provider.
- When candidates disagree, prefer the lowest `priority` rank.
- Only prefer a less trusted provider when the trusted value is an obvious placeholder
  (e.g. "--", "N/A") or has the wrong type for the field.

## OUTPUT FORMAT
Return ONE JSON object. Keys are canonical field names, values are a number, a string, or null.
No markdown fences, no commentary.
"#;

/// The canonical fields offered to the model, one per line.
pub fn canonical_field_listing() -> String {
    financial_fields()
        .map(|f| {
            let kind = match f.kind {
                FieldKind::Numeric => "number",
                FieldKind::Text => "string",
            };
            format!("- {} ({}): {}", f.name, kind, f.description)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn merge_user_prompt(company_code: &str, year: &str, candidates_json: &str) -> String {
    format!(
        "## COMPANY-YEAR\ncompany_code: {}\nyear: {}\n\n\
         ## CANONICAL FIELDS\n{}\n\n\
         ## CANDIDATE RECORDS\n```json\n{}\n```\n\n\
         ## YOUR TASK\n\
         Return the merged record as a JSON object keyed by canonical field name. \
         Use null where no candidate reports a value.",
        company_code,
        year,
        canonical_field_listing(),
        candidates_json
    )
}

/// Gemini-compatible response schema: every non-identity canonical field as a
/// nullable property of one object.
pub fn merge_response_schema() -> Value {
    let mut properties = Map::new();
    for f in financial_fields() {
        let kind = match f.kind {
            FieldKind::Numeric => "NUMBER",
            FieldKind::Text => "STRING",
        };
        properties.insert(
            f.name.to_string(),
            json!({ "type": kind, "nullable": true, "description": f.description }),
        );
    }
    json!({ "type": "OBJECT", "properties": Value::Object(properties) })
}
