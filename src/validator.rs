use crate::error::{ReconcileError, Result};
use crate::record::{CanonicalRecord, PartialRecord};
use crate::schema::{
    field_index, is_placeholder, parse_numeric, FieldKind, FieldValue, ANNOUNCEMENT_DATE, CANONICAL_FIELDS,
    COMPANY_CODE, FIELD_COUNT, YEAR,
};
use chrono::NaiveDate;
use log::debug;

/// Builds a schema-complete record from a partial field mapping.
///
/// All 36 canonical fields start out null and recognized fields from
/// `partial` are overlaid; unrecognized keys are dropped. `company_code` and
/// `year` come from the arguments, never from `partial`.
///
/// Numeric fields accept numbers and numeric-looking strings; anything else is
/// nulled rather than failing the record. Completing an already complete
/// record yields an identical record.
pub fn complete(partial: &PartialRecord, company_code: &str, year: &str) -> Result<CanonicalRecord> {
    let company_code = company_code.trim();
    let year = year.trim();

    if company_code.is_empty() {
        return Err(invalid(company_code, year, "company_code is empty"));
    }
    if !is_four_digit_year(year) {
        return Err(invalid(
            company_code,
            year,
            "year is not a four-digit year",
        ));
    }

    let mut values: [Option<FieldValue>; FIELD_COUNT] = std::array::from_fn(|_| None);

    for (name, value) in partial {
        let Some(idx) = field_index(name) else {
            debug!(
                "Dropping unrecognized field '{}' for {}/{}",
                name, company_code, year
            );
            continue;
        };
        let spec = &CANONICAL_FIELDS[idx];
        values[idx] = match spec.kind {
            FieldKind::Numeric => normalize_numeric(spec.name, value),
            FieldKind::Text => normalize_text(spec.name, value),
        };
    }

    for (name, value) in [(COMPANY_CODE, company_code), (YEAR, year)] {
        if let Some(idx) = field_index(name) {
            values[idx] = Some(FieldValue::Text(value.to_string()));
        }
    }

    Ok(CanonicalRecord::from_values(values))
}

pub fn is_four_digit_year(year: &str) -> bool {
    year.len() == 4 && year.chars().all(|c| c.is_ascii_digit())
}

fn invalid(company_code: &str, year: &str, reason: &str) -> ReconcileError {
    ReconcileError::InvalidRecord {
        company_code: company_code.to_string(),
        year: year.to_string(),
        reason: reason.to_string(),
    }
}

fn normalize_numeric(field: &str, value: &FieldValue) -> Option<FieldValue> {
    let number = match value {
        FieldValue::Number(n) if n.is_finite() => Some(*n),
        FieldValue::Number(_) => None,
        FieldValue::Text(s) => parse_numeric(s),
    };
    if number.is_none() {
        debug!("Nulling non-numeric value '{}' in field '{}'", value, field);
    }
    number.map(FieldValue::Number)
}

fn normalize_text(field: &str, value: &FieldValue) -> Option<FieldValue> {
    let text = match value {
        FieldValue::Text(s) => s.trim().to_string(),
        FieldValue::Number(n) if n.is_finite() => n.to_string(),
        FieldValue::Number(_) => String::new(),
    };
    if is_placeholder(&text) {
        return None;
    }
    if field == ANNOUNCEMENT_DATE {
        return Some(FieldValue::Text(normalize_date(&text)));
    }
    Some(FieldValue::Text(text))
}

/// Cuts a trailing time component off date strings such as
/// `2024-04-03 00:00:00`. Anything that is not a date is kept verbatim.
fn normalize_date(text: &str) -> String {
    let date_part = text.split(|c| c == ' ' || c == 'T').next().unwrap_or(text);
    match NaiveDate::parse_from_str(date_part, "%Y-%m-%d") {
        Ok(date) => date.format("%Y-%m-%d").to_string(),
        Err(_) => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(entries: &[(&str, FieldValue)]) -> PartialRecord {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn test_empty_partial_yields_all_fields() {
        let record = complete(&PartialRecord::new(), "600519", "2024").unwrap();
        assert_eq!(record.len(), 36);
        assert_eq!(record.iter().count(), 36);
        assert_eq!(record.null_count(), 34);
        assert_eq!(record.company_code(), "600519");
        assert_eq!(record.year(), "2024");
    }

    #[test]
    fn test_rejects_missing_identity() {
        let err = complete(&PartialRecord::new(), "", "2024").unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidRecord { .. }));

        let err = complete(&PartialRecord::new(), "   ", "2024").unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidRecord { .. }));

        for year in ["24", "2024-12-31", "二〇二四", "", "20a4"] {
            assert!(
                complete(&PartialRecord::new(), "600519", year).is_err(),
                "year '{}' should be rejected",
                year
            );
        }
    }

    #[test]
    fn test_numeric_coercion() {
        let record = complete(
            &partial(&[
                ("roe", text("68.64")),
                ("total_assets", text("29,894,457.99")),
                ("gross_profit_margin", text("91.5%")),
                ("inventory_days", text("not available")),
                ("earnings_per_share", FieldValue::Number(59.49)),
            ]),
            "600519",
            "2024",
        )
        .unwrap();

        assert_eq!(record.number("roe"), Some(68.64));
        assert_eq!(record.number("total_assets"), Some(29894457.99));
        assert_eq!(record.number("gross_profit_margin"), Some(91.5));
        assert_eq!(record.get("inventory_days"), None);
        assert_eq!(record.number("earnings_per_share"), Some(59.49));
    }

    #[test]
    fn test_text_fields() {
        let record = complete(
            &partial(&[
                ("dividend_year", FieldValue::Number(2024.0)),
                ("dividend_plan", text("  10派276.24元(含税)  ")),
                ("industry", text("   ")),
                ("announcement_date", text("2025-04-03 00:00:00")),
                ("company_name", text("贵州茅台")),
            ]),
            "600519",
            "2024",
        )
        .unwrap();

        assert_eq!(record.text("dividend_year"), Some("2024"));
        assert_eq!(record.text("dividend_plan"), Some("10派276.24元(含税)"));
        assert_eq!(record.get("industry"), None);
        assert_eq!(record.text("announcement_date"), Some("2025-04-03"));
        assert_eq!(record.company_name(), Some("贵州茅台"));
    }

    #[test]
    fn test_placeholders_are_null() {
        let record = complete(
            &partial(&[
                ("industry", text("--")),
                ("dividend_plan", text("N/A")),
                ("dividend_yield", text("-")),
            ]),
            "600519",
            "2024",
        )
        .unwrap();

        assert_eq!(record.get("industry"), None);
        assert_eq!(record.get("dividend_plan"), None);
        assert_eq!(record.get("dividend_yield"), None);
    }

    #[test]
    fn test_identity_comes_from_arguments() {
        let record = complete(
            &partial(&[("company_code", text("000001")), ("year", text("1999"))]),
            " 600519 ",
            "2024",
        )
        .unwrap();
        assert_eq!(record.company_code(), "600519");
        assert_eq!(record.year(), "2024");
    }

    #[test]
    fn test_unrecognized_fields_dropped() {
        let record = complete(
            &partial(&[("营业总收入", FieldValue::Number(1.0)), ("roe", text("1"))]),
            "600519",
            "2024",
        )
        .unwrap();
        assert_eq!(record.len(), 36);
        assert_eq!(record.get("营业总收入"), None);
    }

    #[test]
    fn test_idempotent() {
        let first = complete(
            &partial(&[
                ("roe", text("36.02%")),
                ("dividend_year", FieldValue::Number(2023.0)),
                ("announcement_date", text("2024-04-03T00:00:00")),
                ("industry", text(" 白酒 ")),
                ("inventory_days", text("garbage")),
                ("bogus", text("x")),
            ]),
            "600519",
            "2024",
        )
        .unwrap();
        let second = complete(&first.to_partial(), first.company_code(), first.year()).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
