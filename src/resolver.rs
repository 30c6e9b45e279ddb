use crate::provider::{Provider, SourcePriorityOrder};
use crate::record::{PartialRecord, ProviderYearRecord};
use crate::schema::{FieldValue, CANONICAL_FIELDS, COMPANY_CODE, COMPANY_NAME, YEAR};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedField {
    pub field: &'static str,
    pub value: Option<FieldValue>,
    /// Provider that supplied `value`; `None` when every candidate was null.
    pub source: Option<Provider>,
}

/// Per-field winners for one company-year, in canonical order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub fields: Vec<ResolvedField>,
}

impl Resolution {
    pub fn get(&self, field: &str) -> Option<&ResolvedField> {
        self.fields.iter().find(|f| f.field == field)
    }

    pub fn value(&self, field: &str) -> Option<&FieldValue> {
        self.get(field).and_then(|f| f.value.as_ref())
    }

    pub fn source(&self, field: &str) -> Option<Provider> {
        self.get(field).and_then(|f| f.source)
    }

    pub fn to_partial(&self) -> PartialRecord {
        self.fields
            .iter()
            .filter_map(|f| f.value.as_ref().map(|v| (f.field.to_string(), v.clone())))
            .collect()
    }
}

/// First-available-by-priority conflict resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityResolver {
    order: SourcePriorityOrder,
}

impl PriorityResolver {
    pub fn new(order: SourcePriorityOrder) -> Self {
        Self { order }
    }

    pub fn order(&self) -> &SourcePriorityOrder {
        &self.order
    }

    /// Candidates sorted by provider priority. The sort is stable, so
    /// duplicates of one provider keep their input order.
    pub fn rank<'a>(&self, candidates: &'a [ProviderYearRecord]) -> Vec<&'a ProviderYearRecord> {
        let mut ranked: Vec<&ProviderYearRecord> = candidates.iter().collect();
        ranked.sort_by_key(|c| self.order.rank(c.source_id));
        ranked
    }

    /// For each canonical field, takes the first non-null value scanning the
    /// candidates in priority order. No voting, no averaging.
    pub fn resolve(&self, candidates: &[ProviderYearRecord]) -> Resolution {
        let ranked = self.rank(candidates);

        let fields = CANONICAL_FIELDS
            .iter()
            .map(|spec| {
                let winner = ranked.iter().find_map(|candidate| {
                    self.candidate_value(candidate, spec.name)
                        .map(|value| (value, candidate.source_id))
                });
                match winner {
                    Some((value, source)) => ResolvedField {
                        field: spec.name,
                        value: Some(value),
                        source: Some(source),
                    },
                    None => ResolvedField {
                        field: spec.name,
                        value: None,
                        source: None,
                    },
                }
            })
            .collect();

        Resolution { fields }
    }

    fn candidate_value(&self, candidate: &ProviderYearRecord, field: &str) -> Option<FieldValue> {
        match field {
            COMPANY_CODE => Some(FieldValue::Text(candidate.company_code.clone())),
            YEAR => Some(FieldValue::Text(candidate.year.clone())),
            COMPANY_NAME => candidate
                .company_name
                .as_ref()
                .filter(|n| !n.trim().is_empty())
                .map(|n| FieldValue::Text(n.clone())),
            _ => candidate.get(field).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn candidate(provider: Provider, fields: &[(&str, FieldValue)]) -> ProviderYearRecord {
        ProviderYearRecord {
            company_code: "600519".to_string(),
            company_name: None,
            year: "2024".to_string(),
            source_id: provider,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_higher_priority_wins() {
        let candidates = vec![
            candidate(Provider::Thsl, &[("roe", FieldValue::Number(40.0))]),
            candidate(Provider::Cninfo, &[("roe", FieldValue::Number(36.02))]),
        ];
        let resolution = PriorityResolver::default().resolve(&candidates);

        assert_eq!(resolution.value("roe"), Some(&FieldValue::Number(36.02)));
        assert_eq!(resolution.source("roe"), Some(Provider::Cninfo));
    }

    #[test]
    fn test_falls_through_nulls() {
        let candidates = vec![
            candidate(Provider::Cninfo, &[("industry", FieldValue::Text("--".into()))]),
            candidate(Provider::Szse, &[]),
            candidate(Provider::Eastmoney, &[("industry", FieldValue::Text("酿酒行业".into()))]),
        ];
        let resolution = PriorityResolver::default().resolve(&candidates);

        assert_eq!(
            resolution.value("industry"),
            Some(&FieldValue::Text("酿酒行业".into()))
        );
        assert_eq!(resolution.source("industry"), Some(Provider::Eastmoney));
        assert_eq!(resolution.value("total_assets"), None);
        assert_eq!(resolution.source("total_assets"), None);
        assert_eq!(resolution.fields.len(), 36);
    }

    #[test]
    fn test_custom_order() {
        let order = SourcePriorityOrder::new([
            Provider::Thsl,
            Provider::Eastmoney,
            Provider::Szse,
            Provider::Cninfo,
        ])
        .unwrap();
        let candidates = vec![
            candidate(Provider::Cninfo, &[("roe", FieldValue::Number(36.02))]),
            candidate(Provider::Thsl, &[("roe", FieldValue::Number(40.0))]),
        ];
        let resolution = PriorityResolver::new(order).resolve(&candidates);
        assert_eq!(resolution.value("roe"), Some(&FieldValue::Number(40.0)));
    }

    #[test]
    fn test_deterministic_output() {
        let candidates = vec![
            candidate(
                Provider::Eastmoney,
                &[
                    ("roe", FieldValue::Number(34.2)),
                    ("dividend_plan", FieldValue::Text("10派276.24元".into())),
                ],
            ),
            candidate(Provider::Szse, &[("total_assets", FieldValue::Number(2.9e7))]),
            candidate(Provider::Thsl, &[("inventory_days", FieldValue::Text("1,234".into()))]),
        ];
        let resolver = PriorityResolver::default();

        let first = serde_json::to_vec(&resolver.resolve(&candidates)).unwrap();
        let second = serde_json::to_vec(&resolver.resolve(&candidates)).unwrap();
        assert_eq!(first, second);

        let mut reversed = candidates.clone();
        reversed.reverse();
        let third = serde_json::to_vec(&resolver.resolve(&reversed)).unwrap();
        assert_eq!(first, third);
    }

    #[test]
    fn test_empty_candidates() {
        let resolution = PriorityResolver::default().resolve(&[]);
        assert_eq!(resolution.fields.len(), 36);
        assert!(resolution.to_partial().is_empty());
    }
}
