use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const COMPANY_CODE: &str = "company_code";
pub const COMPANY_NAME: &str = "company_name";
pub const YEAR: &str = "year";
pub const ANNOUNCEMENT_DATE: &str = "announcement_date";

pub const FIELD_COUNT: usize = 36;

/// Values providers use to mean "no data".
const PLACEHOLDERS: &[&str] = &["", "-", "--", "—", "n/a", "na", "null", "none"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldGroup {
    #[schemars(description = "Company code, short name and fiscal year of the record")]
    Identity,

    #[schemars(description = "Point-in-time balances at fiscal year end")]
    BalanceSheet,

    #[schemars(description = "Totals accumulated over the fiscal year")]
    IncomeStatement,

    #[schemars(description = "Net cash flows per activity over the fiscal year")]
    CashFlow,

    #[schemars(description = "Per-share figures and profitability ratios")]
    PerShare,

    #[schemars(description = "Turnover ratios and their day equivalents")]
    OperatingEfficiency,

    #[schemars(description = "Dividend distribution and disclosure metadata")]
    Dividend,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub group: FieldGroup,
    pub kind: FieldKind,
    pub description: &'static str,
}

impl FieldSpec {
    pub fn is_identity(&self) -> bool {
        self.group == FieldGroup::Identity
    }

    pub fn is_numeric(&self) -> bool {
        self.kind == FieldKind::Numeric
    }
}

const fn field(
    name: &'static str,
    group: FieldGroup,
    kind: FieldKind,
    description: &'static str,
) -> FieldSpec {
    FieldSpec {
        name,
        group,
        kind,
        description,
    }
}

use FieldGroup::*;
use FieldKind::*;

/// The canonical record layout. Order here is the order of every serialized
/// record and of the resolver's field scan.
pub static CANONICAL_FIELDS: [FieldSpec; FIELD_COUNT] = [
    field(COMPANY_CODE, Identity, Text, "Exchange security code, e.g. 600519"),
    field(COMPANY_NAME, Identity, Text, "Short company name"),
    field(YEAR, Identity, Text, "Four-digit fiscal year"),
    field("cash_and_cash_equivalents", BalanceSheet, Numeric, "Cash and cash equivalents"),
    field("total_current_assets", BalanceSheet, Numeric, "Total current assets"),
    field("total_non_current_assets", BalanceSheet, Numeric, "Total non-current assets"),
    field("total_assets", BalanceSheet, Numeric, "Total assets"),
    field("total_current_liabilities", BalanceSheet, Numeric, "Total current liabilities"),
    field("total_non_current_liabilities", BalanceSheet, Numeric, "Total non-current liabilities"),
    field("total_liabilities", BalanceSheet, Numeric, "Total liabilities"),
    field("paid_in_capital", BalanceSheet, Numeric, "Paid-in capital (share capital)"),
    field("retained_earnings", BalanceSheet, Numeric, "Undistributed profit"),
    field("total_owners_equity", BalanceSheet, Numeric, "Total owners' equity"),
    field("total_operating_revenue", IncomeStatement, Numeric, "Total operating revenue"),
    field("total_operating_cost", IncomeStatement, Numeric, "Total operating cost"),
    field("operating_profit", IncomeStatement, Numeric, "Operating profit"),
    field("total_profit", IncomeStatement, Numeric, "Total profit before tax"),
    field("income_tax_expense", IncomeStatement, Numeric, "Income tax expense"),
    field("net_profit_attributable_to_parent", IncomeStatement, Numeric, "Net profit attributable to shareholders of the parent"),
    field("net_cash_flow_from_operating_activities", CashFlow, Numeric, "Net cash flow from operating activities"),
    field("net_cash_flow_from_investing_activities", CashFlow, Numeric, "Net cash flow from investing activities"),
    field("net_cash_flow_from_financing_activities", CashFlow, Numeric, "Net cash flow from financing activities"),
    field("earnings_per_share", PerShare, Numeric, "Basic earnings per share"),
    field("earnings_per_share_excluding_non_recurring", PerShare, Numeric, "Basic EPS excluding non-recurring items"),
    field("roe", PerShare, Numeric, "Return on equity, percent"),
    field("book_value_per_share", PerShare, Numeric, "Net assets per share"),
    field("gross_profit_margin", PerShare, Numeric, "Gross profit margin, percent"),
    field("accounts_receivable_turnover", OperatingEfficiency, Numeric, "Accounts receivable turnover ratio"),
    field("accounts_receivable_days", OperatingEfficiency, Numeric, "Accounts receivable turnover in days"),
    field("inventory_turnover", OperatingEfficiency, Numeric, "Inventory turnover ratio"),
    field("inventory_days", OperatingEfficiency, Numeric, "Inventory turnover in days"),
    field("dividend_plan", Dividend, Text, "Dividend distribution plan as disclosed"),
    field("dividend_year", Dividend, Text, "Year the dividend plan refers to"),
    field("industry", Dividend, Text, "Industry classification name"),
    field("dividend_yield", Dividend, Numeric, "Dividend yield, percent"),
    field(ANNOUNCEMENT_DATE, Dividend, Text, "Announcement date, YYYY-MM-DD"),
];

pub fn field_index(name: &str) -> Option<usize> {
    CANONICAL_FIELDS.iter().position(|f| f.name == name)
}

pub fn field_spec(name: &str) -> Option<&'static FieldSpec> {
    CANONICAL_FIELDS.iter().find(|f| f.name == name)
}

pub fn is_canonical(name: &str) -> bool {
    field_index(name).is_some()
}

pub fn is_identity_field(name: &str) -> bool {
    field_spec(name).is_some_and(|f| f.is_identity())
}

/// Every canonical field except the identity trio.
pub fn financial_fields() -> impl Iterator<Item = &'static FieldSpec> {
    CANONICAL_FIELDS.iter().filter(|f| !f.is_identity())
}

pub fn fields_in_group(group: FieldGroup) -> impl Iterator<Item = &'static FieldSpec> {
    CANONICAL_FIELDS.iter().filter(move |f| f.group == group)
}

/// A scalar as reported by a provider. Missing data is `Option::None`, never a
/// variant of this enum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Converts a JSON scalar. Booleans, arrays, objects and null yield `None`.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Number),
            serde_json::Value::String(s) => Some(FieldValue::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    /// True for empty strings and the usual "no data" markers.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Number(n) => !n.is_finite(),
            FieldValue::Text(s) => is_placeholder(s),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) if n.is_finite() => Some(*n),
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => parse_numeric(s),
        }
    }

    /// Whether two reported values denote the same datum.
    pub fn matches(&self, other: &FieldValue) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => numbers_match(a, b),
            _ => self.to_string().trim() == other.to_string().trim(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

pub fn is_placeholder(raw: &str) -> bool {
    let trimmed = raw.trim().to_lowercase();
    PLACEHOLDERS.contains(&trimmed.as_str())
}

/// Parses numeric-looking provider strings such as `"68.64"`, `"1,234.5"`,
/// `"+3.1"` or `"36.02%"`.
pub fn parse_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed).trim_end();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }
    let cleaned: String = trimmed.chars().filter(|c| *c != ',').collect();
    if !cleaned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | 'e' | 'E'))
    {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn numbers_match(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= scale * 1e-9
}
