use crate::error::ReconcileError;
use crate::provider::Provider;
use crate::schema::{
    field_index, financial_fields, FieldValue, CANONICAL_FIELDS, COMPANY_CODE, COMPANY_NAME,
    FIELD_COUNT, YEAR,
};
use crate::validator;
use schemars::JsonSchema;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Canonical field name → value, with missing data left out.
pub type PartialRecord = BTreeMap<String, FieldValue>;

/// The (company_code, year) key of one annual record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompanyYear {
    pub company_code: String,
    pub year: String,
}

impl CompanyYear {
    pub fn new(company_code: impl Into<String>, year: impl Into<String>) -> Self {
        Self {
            company_code: company_code.into(),
            year: year.into(),
        }
    }
}

impl fmt::Display for CompanyYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.company_code, self.year)
    }
}

/// One provider's view of one company-year after intra-source integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProviderYearRecord {
    pub company_code: String,
    pub company_name: Option<String>,
    pub year: String,
    pub source_id: Provider,
    /// Canonical field name → reported value. Only non-identity fields.
    pub fields: BTreeMap<String, FieldValue>,
}

impl ProviderYearRecord {
    pub fn key(&self) -> CompanyYear {
        CompanyYear::new(self.company_code.clone(), self.year.clone())
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        if field == COMPANY_NAME {
            return None;
        }
        self.fields.get(field).filter(|v| !v.is_blank())
    }

    /// Fraction of the non-identity canonical fields this provider reported.
    pub fn completeness_ratio(&self) -> f64 {
        let total = financial_fields().count();
        let present = financial_fields()
            .filter(|f| self.get(f.name).is_some())
            .count();
        present as f64 / total as f64
    }
}

/// Which merge path produced a canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeProvenance {
    LlmMerged,
    PriorityMerged,
}

/// One schema-complete annual record.
///
/// Always holds exactly the 36 canonical fields; missing data is an explicit
/// null. Built by [`validator::complete`], which is also what deserialization
/// goes through.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, Option<FieldValue>>")]
pub struct CanonicalRecord {
    values: [Option<FieldValue>; FIELD_COUNT],
}

impl CanonicalRecord {
    pub(crate) fn from_values(values: [Option<FieldValue>; FIELD_COUNT]) -> Self {
        Self { values }
    }

    pub fn company_code(&self) -> &str {
        self.text(COMPANY_CODE).unwrap_or_default()
    }

    pub fn company_name(&self) -> Option<&str> {
        self.text(COMPANY_NAME)
    }

    pub fn year(&self) -> &str {
        self.text(YEAR).unwrap_or_default()
    }

    pub fn key(&self) -> CompanyYear {
        CompanyYear::new(self.company_code(), self.year())
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        field_index(field).and_then(|idx| self.values[idx].as_ref())
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        match self.get(field) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        match self.get(field) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Fields in canonical order, including nulls.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Option<&FieldValue>)> + '_ {
        CANONICAL_FIELDS
            .iter()
            .zip(self.values.iter())
            .map(|(spec, value)| (spec.name, value.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn null_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    pub fn to_partial(&self) -> PartialRecord {
        self.iter()
            .filter_map(|(name, value)| value.map(|v| (name.to_string(), v.clone())))
            .collect()
    }
}

impl Serialize for CanonicalRecord {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(FIELD_COUNT))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

impl TryFrom<BTreeMap<String, Option<FieldValue>>> for CanonicalRecord {
    type Error = ReconcileError;

    fn try_from(map: BTreeMap<String, Option<FieldValue>>) -> Result<Self, Self::Error> {
        let identity = |key: &str| {
            map.get(key)
                .and_then(|v| v.as_ref())
                .map(|v| v.to_string())
                .unwrap_or_default()
        };
        let company_code = identity(COMPANY_CODE);
        let year = identity(YEAR);
        let partial: PartialRecord = map
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();
        validator::complete(&partial, &company_code, &year)
    }
}
