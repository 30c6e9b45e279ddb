use crate::error::{ReconcileError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An external financial-data provider.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[schemars(description = "CNINFO (巨潮资讯网), the exchange-designated disclosure platform")]
    Cninfo,

    #[schemars(description = "Shenzhen Stock Exchange (深交所) periodic report data")]
    Szse,

    #[schemars(description = "Eastmoney (东方财富) data center API")]
    Eastmoney,

    #[schemars(description = "Tonghuashun (同花顺) financial summary pages")]
    Thsl,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Cninfo,
        Provider::Szse,
        Provider::Eastmoney,
        Provider::Thsl,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Provider::Cninfo => "cninfo",
            Provider::Szse => "szse",
            Provider::Eastmoney => "eastmoney",
            Provider::Thsl => "thsl",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Cninfo => "巨潮资讯网",
            Provider::Szse => "深交所",
            Provider::Eastmoney => "东方财富",
            Provider::Thsl => "同花顺",
        }
    }

    /// Ordered provider-local label → canonical field table. When several
    /// labels map to one canonical field, the later entry wins.
    pub fn field_map(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Provider::Cninfo => CNINFO_FIELDS,
            Provider::Szse => SZSE_FIELDS,
            Provider::Eastmoney => EASTMONEY_FIELDS,
            Provider::Thsl => THSL_FIELDS,
        }
    }

    pub fn canonical_name(&self, local: &str) -> Option<&'static str> {
        self.field_map()
            .iter()
            .find(|(label, _)| *label == local)
            .map(|(_, canonical)| *canonical)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Provider {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        Provider::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(trimmed) || p.display_name() == trimmed)
            .ok_or_else(|| ReconcileError::InvalidConfig(format!("Unknown provider '{}'", s)))
    }
}

/// Fixed total order over the providers, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "Vec<Provider>", into = "Vec<Provider>")]
pub struct SourcePriorityOrder([Provider; 4]);

impl SourcePriorityOrder {
    pub fn new(order: [Provider; 4]) -> Result<Self> {
        for provider in Provider::ALL {
            if !order.contains(&provider) {
                return Err(ReconcileError::InvalidConfig(format!(
                    "Priority order {:?} does not rank provider '{}'",
                    order, provider
                )));
            }
        }
        Ok(Self(order))
    }

    /// Zero for the highest-priority provider.
    pub fn rank(&self, provider: Provider) -> usize {
        self.0
            .iter()
            .position(|p| *p == provider)
            .unwrap_or(self.0.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = Provider> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[Provider] {
        &self.0
    }
}

impl Default for SourcePriorityOrder {
    fn default() -> Self {
        Self(Provider::ALL)
    }
}

impl TryFrom<Vec<Provider>> for SourcePriorityOrder {
    type Error = ReconcileError;

    fn try_from(order: Vec<Provider>) -> Result<Self> {
        let order: [Provider; 4] = order.try_into().map_err(|v: Vec<Provider>| {
            ReconcileError::InvalidConfig(format!(
                "Priority order must list 4 providers, got {}",
                v.len()
            ))
        })?;
        Self::new(order)
    }
}

impl From<SourcePriorityOrder> for Vec<Provider> {
    fn from(order: SourcePriorityOrder) -> Self {
        order.0.to_vec()
    }
}

const CNINFO_FIELDS: &[(&str, &str)] = &[
    ("公司简称", "company_name"),
    ("货币资金", "cash_and_cash_equivalents"),
    ("流动资产", "total_current_assets"),
    ("流动资产合计", "total_current_assets"),
    ("非流动资产", "total_non_current_assets"),
    ("非流动资产合计", "total_non_current_assets"),
    ("总资产", "total_assets"),
    ("资产总计", "total_assets"),
    ("流动负债", "total_current_liabilities"),
    ("流动负债合计", "total_current_liabilities"),
    ("非流动负债", "total_non_current_liabilities"),
    ("非流动负债合计", "total_non_current_liabilities"),
    ("总负债", "total_liabilities"),
    ("负债合计", "total_liabilities"),
    ("实收资本（或股本）", "paid_in_capital"),
    ("未分配利润", "retained_earnings"),
    ("所有者权益", "total_owners_equity"),
    ("所有者权益合计", "total_owners_equity"),
    ("营业总收入", "total_operating_revenue"),
    ("营业总成本", "total_operating_cost"),
    ("营业利润", "operating_profit"),
    ("利润总额", "total_profit"),
    ("所得税", "income_tax_expense"),
    ("所得税费用", "income_tax_expense"),
    ("归属母公司净利润", "net_profit_attributable_to_parent"),
    ("归属于母公司所有者的净利润", "net_profit_attributable_to_parent"),
    ("经营活动产生的现金流量净额", "net_cash_flow_from_operating_activities"),
    ("投资活动产生的现金流量净额", "net_cash_flow_from_investing_activities"),
    ("筹资活动产生的现金流量净额", "net_cash_flow_from_financing_activities"),
    ("基本每股收益", "earnings_per_share"),
    ("扣非每股收益", "earnings_per_share_excluding_non_recurring"),
    ("净资产收益率", "roe"),
    ("每股净资产", "book_value_per_share"),
    ("销售毛利率", "gross_profit_margin"),
    ("应收账款周转率", "accounts_receivable_turnover"),
    ("应收账款周转天数", "accounts_receivable_days"),
    ("存货周转率", "inventory_turnover"),
    ("存货周转天数", "inventory_days"),
    ("分红方案", "dividend_plan"),
    ("分红年度", "dividend_year"),
    ("行业名称", "industry"),
    ("股息率", "dividend_yield"),
    ("公告日期", "announcement_date"),
];

const SZSE_FIELDS: &[(&str, &str)] = &[
    ("公司简称", "company_name"),
    ("货币资金", "cash_and_cash_equivalents"),
    ("流动资产", "total_current_assets"),
    ("非流动资产", "total_non_current_assets"),
    ("总资产", "total_assets"),
    ("流动负债", "total_current_liabilities"),
    ("非流动负债", "total_non_current_liabilities"),
    ("总负债", "total_liabilities"),
    ("实收资本", "paid_in_capital"),
    ("未分配利润", "retained_earnings"),
    ("所有者权益", "total_owners_equity"),
    ("股东权益", "total_owners_equity"),
    ("营业总收入", "total_operating_revenue"),
    ("营业收入", "total_operating_revenue"),
    ("营业总成本", "total_operating_cost"),
    ("营业利润", "operating_profit"),
    ("利润总额", "total_profit"),
    ("所得税", "income_tax_expense"),
    ("归属于本行股东的净利润", "net_profit_attributable_to_parent"),
    ("净利润", "net_profit_attributable_to_parent"),
    ("经营活动产生的现金流量净额", "net_cash_flow_from_operating_activities"),
    ("投资活动产生的现金流量净额", "net_cash_flow_from_investing_activities"),
    ("筹资活动产生的现金流量净额", "net_cash_flow_from_financing_activities"),
    ("基本每股收益", "earnings_per_share"),
    ("扣非每股收益", "earnings_per_share_excluding_non_recurring"),
    ("净资产收益率", "roe"),
    ("加权平均净资产收益率", "roe"),
    ("每股净资产", "book_value_per_share"),
    ("销售毛利率", "gross_profit_margin"),
    ("应收账款周转率", "accounts_receivable_turnover"),
    ("应收账款周转天数", "accounts_receivable_days"),
    ("存货周转率", "inventory_turnover"),
    ("存货周转天数", "inventory_days"),
    ("分红方案", "dividend_plan"),
    ("分红年度", "dividend_year"),
    ("行业名称", "industry"),
    ("股息率", "dividend_yield"),
    ("公告日期", "announcement_date"),
];

const EASTMONEY_FIELDS: &[(&str, &str)] = &[
    ("SECURITY_NAME_ABBR", "company_name"),
    ("TOTAL_OPERATE_INCOME", "total_operating_revenue"),
    ("PARENT_NETPROFIT", "net_profit_attributable_to_parent"),
    ("TOTAL_ASSETS", "total_assets"),
    ("TOTAL_LIABILITIES", "total_liabilities"),
    ("PAID_IN_CAPITAL", "paid_in_capital"),
    ("RETAINED_EARNINGS", "retained_earnings"),
    ("TOTAL_OWNERS_EQUITY", "total_owners_equity"),
    ("BASIC_EPS", "earnings_per_share"),
    ("DEDUCT_BASIC_EPS", "earnings_per_share_excluding_non_recurring"),
    ("WEIGHTAVG_ROE", "roe"),
    ("BPS", "book_value_per_share"),
    ("GROSS_PROFIT_MARGIN", "gross_profit_margin"),
    ("ACCOUNTS_RECEIVABLE_TURNOVER", "accounts_receivable_turnover"),
    ("ACCOUNTS_RECEIVABLE_DAYS", "accounts_receivable_days"),
    ("INVENTORY_TURNOVER", "inventory_turnover"),
    ("INVENTORY_DAYS", "inventory_days"),
    ("DIVIDEND_PLAN", "dividend_plan"),
    ("PAYYEAR", "dividend_year"),
    ("PUBLISHNAME", "industry"),
    ("DIVIDEND_YIELD", "dividend_yield"),
    ("NOTICE_DATE", "announcement_date"),
];

const THSL_FIELDS: &[(&str, &str)] = &[
    ("营业总收入", "total_operating_revenue"),
    ("净利润", "net_profit_attributable_to_parent"),
    ("总资产", "total_assets"),
    ("总负债", "total_liabilities"),
    ("每股净资产", "book_value_per_share"),
    ("基本每股收益", "earnings_per_share"),
    ("净资产收益率", "roe"),
    ("销售毛利率", "gross_profit_margin"),
    ("应收账款周转率", "accounts_receivable_turnover"),
    ("应收账款周转天数", "accounts_receivable_days"),
    ("存货周转率", "inventory_turnover"),
    ("存货周转天数", "inventory_days"),
    ("分红方案", "dividend_plan"),
    ("分红年度", "dividend_year"),
    ("行业名称", "industry"),
    ("股息率", "dividend_yield"),
];
