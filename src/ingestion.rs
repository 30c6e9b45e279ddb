use crate::provider::Provider;
use crate::schema::FieldValue;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Period keys of a CNINFO statement table, in preference order.
const PERIOD_KEYS: [&str; 4] = ["year", "middle", "one", "three"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
}

impl StatementType {
    pub const ALL: [StatementType; 3] = [
        StatementType::BalanceSheet,
        StatementType::IncomeStatement,
        StatementType::CashFlow,
    ];

    /// Accepts the labels the crawlers emit: snake_case names, the short file
    /// tags (`balance`, `income`, `cashflow`) and the Chinese statement names.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "balance_sheet" | "balance" | "balancesheet" | "资产负债表" => {
                Some(StatementType::BalanceSheet)
            }
            "income_statement" | "income" | "profit" | "利润表" => {
                Some(StatementType::IncomeStatement)
            }
            "cash_flow" | "cashflow" | "cash_flow_statement" | "现金流量表" => {
                Some(StatementType::CashFlow)
            }
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            StatementType::BalanceSheet => 0,
            StatementType::IncomeStatement => 1,
            StatementType::CashFlow => 2,
        }
    }
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StatementType::BalanceSheet => "balance_sheet",
            StatementType::IncomeStatement => "income_statement",
            StatementType::CashFlow => "cash_flow",
        };
        f.write_str(label)
    }
}

/// One provider's statement table for one company and one year, as handed
/// over by the crawler layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawStatementRecord {
    #[schemars(description = "Exchange security code, e.g. 600519")]
    pub company_code: String,

    #[serde(default)]
    #[schemars(description = "Short company name, if the provider reports one")]
    pub company_name: Option<String>,

    #[schemars(
        description = "Fiscal year, or a report date whose first four characters are the year (e.g. 2024-12-31)"
    )]
    pub year: String,

    #[schemars(
        description = "Statement label: balance_sheet, income_statement or cash_flow (aliases balance, income, cashflow accepted)"
    )]
    pub statement_type: String,

    #[serde(default)]
    #[schemars(description = "Provider-local field label to reported value")]
    pub fields: BTreeMap<String, FieldValue>,

    #[schemars(description = "Provider the table was collected from")]
    pub source_id: Provider,
}

impl RawStatementRecord {
    pub fn new(
        source_id: Provider,
        statement_type: impl Into<String>,
        company_code: impl Into<String>,
        year: impl Into<String>,
    ) -> Self {
        Self {
            company_code: company_code.into(),
            company_name: None,
            year: year.into(),
            statement_type: statement_type.into(),
            fields: BTreeMap::new(),
            source_id,
        }
    }

    pub fn with_name(mut self, company_name: impl Into<String>) -> Self {
        self.company_name = Some(company_name.into());
        self
    }

    pub fn with_field(mut self, label: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(label.into(), value);
        self
    }

    pub fn statement(&self) -> Option<StatementType> {
        StatementType::parse(&self.statement_type)
    }

    /// The leading four digits of the year label, if it has them.
    pub fn normalized_year(&self) -> Option<String> {
        normalize_year(&self.year)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RawStatementRecord)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

/// `"2024"`, `"2024-12-31"` and `"20241231"` all become `"2024"`.
pub fn normalize_year(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let head: String = trimmed.chars().take(4).collect();
    if head.len() == 4 && head.chars().all(|c| c.is_ascii_digit()) {
        Some(head)
    } else {
        None
    }
}

/// A payload row that could not be turned into a raw record.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    pub index: usize,
    pub reason: String,
}

/// Pivots a CNINFO statement table into one record per year column.
///
/// The table lives at `raw_data.data.records[0]` under the first present
/// period key (`year`, `middle`, `one`, `three`); each row carries an `index`
/// label plus one column per year. Rows without a label and null cells are
/// skipped. An unrecognized payload shape yields no records.
pub fn records_from_year_table(
    provider: Provider,
    company_code: &str,
    company_name: Option<&str>,
    statement_type: &str,
    payload: &Value,
) -> Vec<RawStatementRecord> {
    let rows = payload
        .pointer("/raw_data/data/records/0")
        .and_then(|record| PERIOD_KEYS.iter().find_map(|key| record.get(*key)))
        .and_then(Value::as_array);

    let Some(rows) = rows else {
        return Vec::new();
    };

    let mut by_year: BTreeMap<String, RawStatementRecord> = BTreeMap::new();

    for row in rows {
        let Some(label) = row.get("index").and_then(Value::as_str) else {
            continue;
        };
        let Some(columns) = row.as_object() else {
            continue;
        };

        for (year, cell) in columns {
            if year == "index" {
                continue;
            }
            let Some(value) = FieldValue::from_json(cell) else {
                continue;
            };

            let record = by_year.entry(year.clone()).or_insert_with(|| {
                let mut record =
                    RawStatementRecord::new(provider, statement_type, company_code, year.clone());
                record.company_name = company_name.map(str::to_string);
                record
            });
            record.fields.insert(label.to_string(), value);
        }
    }

    by_year.into_values().collect()
}

/// Key names used to pull identity out of flat payload rows.
#[derive(Debug, Clone)]
pub struct RowKeys<'a> {
    pub company_code: &'a str,
    pub company_name: Option<&'a str>,
    pub year: &'a str,
    /// Read when `year` is absent or not a scalar.
    pub year_fallback: Option<&'a str>,
}

impl RowKeys<'static> {
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            Provider::Eastmoney => RowKeys {
                company_code: "SECURITY_CODE",
                company_name: Some("SECURITY_NAME_ABBR"),
                year: "REPORTDATE",
                year_fallback: Some("DATAYEAR"),
            },
            Provider::Thsl => RowKeys {
                company_code: "company_code",
                company_name: None,
                year: "date",
                year_fallback: None,
            },
            Provider::Cninfo | Provider::Szse => RowKeys {
                company_code: "公司代码",
                company_name: Some("公司简称"),
                year: "年份",
                year_fallback: None,
            },
        }
    }
}

/// Turns a list of flat per-year rows into raw records.
///
/// Accepts a bare array, a single object, or the Eastmoney envelope
/// `{"result": {"data": [...]}}`. SZSE rows of the form
/// `{"报告期": [{"指标": {...}}, ...]}` are flattened first. Rows missing a
/// company code or a year are returned as rejected.
pub fn records_from_rows(
    provider: Provider,
    statement_type: &str,
    payload: &Value,
    keys: &RowKeys<'_>,
    default_company_code: Option<&str>,
) -> (Vec<RawStatementRecord>, Vec<RejectedRow>) {
    let rows: Vec<&Value> = match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => match payload.pointer("/result/data").and_then(Value::as_array) {
            Some(items) => items.iter().collect(),
            None => vec![payload],
        },
        _ => Vec::new(),
    };

    let rows: Vec<&Value> = rows
        .into_iter()
        .flat_map(|row| match row.get("报告期").and_then(Value::as_array) {
            Some(periods) => periods
                .iter()
                .filter_map(|period| period.get("指标"))
                .collect::<Vec<_>>(),
            None => vec![row],
        })
        .collect();

    let mut records = Vec::new();
    let mut rejected = Vec::new();

    for (index, row) in rows.into_iter().enumerate() {
        let Some(object) = row.as_object() else {
            rejected.push(RejectedRow {
                index,
                reason: "row is not an object".to_string(),
            });
            continue;
        };

        let code = object
            .get(keys.company_code)
            .and_then(scalar_text)
            .or_else(|| default_company_code.map(str::to_string));
        let Some(code) = code.filter(|c| !c.trim().is_empty()) else {
            rejected.push(RejectedRow {
                index,
                reason: format!("missing company code '{}'", keys.company_code),
            });
            continue;
        };

        let year = object.get(keys.year).and_then(scalar_text).or_else(|| {
            keys.year_fallback
                .and_then(|key| object.get(key))
                .and_then(scalar_text)
        });
        let Some(year) = year else {
            rejected.push(RejectedRow {
                index,
                reason: format!("missing year '{}'", keys.year),
            });
            continue;
        };

        let mut record = RawStatementRecord::new(provider, statement_type, code, year);
        record.company_name = keys
            .company_name
            .and_then(|key| object.get(key))
            .and_then(scalar_text);

        for (label, cell) in object {
            if label == keys.company_code
                || label == keys.year
                || keys.year_fallback == Some(label.as_str())
            {
                continue;
            }
            if let Some(value) = FieldValue::from_json(cell) {
                record.fields.insert(label.clone(), value);
            }
        }

        records.push(record);
    }

    (records, rejected)
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_statement_type_parse() {
        assert_eq!(StatementType::parse("balance"), Some(StatementType::BalanceSheet));
        assert_eq!(StatementType::parse(" Income_Statement "), Some(StatementType::IncomeStatement));
        assert_eq!(StatementType::parse("现金流量表"), Some(StatementType::CashFlow));
        assert_eq!(StatementType::parse("dividend"), None);
    }

    #[test]
    fn test_normalize_year() {
        assert_eq!(normalize_year("2024"), Some("2024".to_string()));
        assert_eq!(normalize_year("2024-12-31 00:00:00"), Some("2024".to_string()));
        assert_eq!(normalize_year("20241231"), Some("2024".to_string()));
        assert_eq!(normalize_year("FY24"), None);
        assert_eq!(normalize_year(""), None);
    }

    #[test]
    fn test_records_from_year_table() {
        let payload = json!({
            "raw_data": {
                "data": {
                    "records": [{
                        "year": [
                            {"index": "货币资金", "2024": 59294393.9, "2023": 69070765.5},
                            {"index": "总资产", "2024": 29894457.99, "2023": null},
                            {"2024": 1.0}
                        ]
                    }]
                }
            }
        });

        let records =
            records_from_year_table(Provider::Cninfo, "600519", Some("贵州茅台"), "balance", &payload);
        assert_eq!(records.len(), 2);

        let r2023 = &records[0];
        assert_eq!(r2023.year, "2023");
        assert_eq!(r2023.fields.len(), 1);

        let r2024 = &records[1];
        assert_eq!(r2024.year, "2024");
        assert_eq!(r2024.company_name.as_deref(), Some("贵州茅台"));
        assert_eq!(r2024.fields.get("总资产"), Some(&FieldValue::Number(29894457.99)));
        assert_eq!(r2024.statement(), Some(StatementType::BalanceSheet));
    }

    #[test]
    fn test_year_table_falls_back_to_other_periods() {
        let payload = json!({
            "raw_data": {"data": {"records": [{"middle": [{"index": "营业总收入", "2024": 1.0}]}]}}
        });
        let records = records_from_year_table(Provider::Cninfo, "600519", None, "income", &payload);
        assert_eq!(records.len(), 1);

        assert!(records_from_year_table(Provider::Cninfo, "600519", None, "income", &json!([]))
            .is_empty());
    }

    #[test]
    fn test_records_from_eastmoney_envelope() {
        let payload = json!({
            "result": {
                "data": [
                    {
                        "SECURITY_CODE": "600519",
                        "SECURITY_NAME_ABBR": "贵州茅台",
                        "REPORTDATE": "2024-12-31 00:00:00",
                        "WEIGHTAVG_ROE": 36.02,
                        "DIVIDEND_PLAN": null
                    },
                    {"SECURITY_NAME_ABBR": "贵州茅台", "REPORTDATE": "2023-12-31 00:00:00"}
                ]
            }
        });

        let keys = RowKeys::for_provider(Provider::Eastmoney);
        let (records, rejected) =
            records_from_rows(Provider::Eastmoney, "income", &payload, &keys, None);

        assert_eq!(records.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].index, 1);

        let record = &records[0];
        assert_eq!(record.normalized_year(), Some("2024".to_string()));
        assert_eq!(record.company_name.as_deref(), Some("贵州茅台"));
        assert_eq!(record.fields.get("WEIGHTAVG_ROE"), Some(&FieldValue::Number(36.02)));
        assert!(!record.fields.contains_key("DIVIDEND_PLAN"));
    }

    #[test]
    fn test_eastmoney_year_falls_back_to_data_year() {
        let payload = json!([
            {"SECURITY_CODE": "600519", "DATAYEAR": 2023, "WEIGHTAVG_ROE": 34.19},
            {"SECURITY_CODE": "600519", "REPORTDATE": null, "DATAYEAR": "2022", "WEIGHTAVG_ROE": 30.26},
            {"SECURITY_CODE": "600519", "REPORTDATE": "2024-12-31 00:00:00", "DATAYEAR": "2024"}
        ]);
        let keys = RowKeys::for_provider(Provider::Eastmoney);
        let (records, rejected) =
            records_from_rows(Provider::Eastmoney, "income", &payload, &keys, None);

        assert!(rejected.is_empty());
        let years: Vec<String> = records.iter().filter_map(|r| r.normalized_year()).collect();
        assert_eq!(years, vec!["2023", "2022", "2024"]);
        assert!(records.iter().all(|r| !r.fields.contains_key("DATAYEAR")));
    }

    #[test]
    fn test_records_from_szse_periods() {
        let payload = json!([{
            "报告期": [
                {"指标": {"年份": "2024", "营业收入": "1,741.44"}},
                {"指标": {"年份": "2023", "营业收入": "1,505.60"}}
            ]
        }]);
        let keys = RowKeys::for_provider(Provider::Szse);
        let (records, rejected) =
            records_from_rows(Provider::Szse, "income", &payload, &keys, Some("600519"));

        assert!(rejected.is_empty());
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.company_code == "600519"));
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = RawStatementRecord::schema_as_json().unwrap();
        assert!(schema_json.contains("statement_type"));
        assert!(schema_json.contains("source_id"));
    }
}
