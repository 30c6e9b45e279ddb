use crate::ingestion::{RawStatementRecord, StatementType};
use crate::provider::Provider;
use crate::record::{CompanyYear, ProviderYearRecord};
use crate::schema::{FieldValue, COMPANY_NAME};
use log::{debug, info, warn};
use std::collections::BTreeMap;

/// A raw record the integrator skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRawRecord {
    pub provider: Provider,
    pub company_code: String,
    pub year: String,
    pub statement_type: String,
    pub reason: String,
}

/// A duplicate statement for one provider-year; the later one was kept.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyOverwrite {
    pub provider: Provider,
    pub key: CompanyYear,
    pub statement: StatementType,
}

#[derive(Debug, Clone, Default)]
pub struct IntegrationOutcome {
    pub records: BTreeMap<CompanyYear, ProviderYearRecord>,
    pub rejected: Vec<RejectedRawRecord>,
    pub overwrites: Vec<AnomalyOverwrite>,
    /// Provider-local labels with no canonical counterpart.
    pub dropped_fields: usize,
}

/// Merges one provider's balance-sheet, income and cash-flow tables into one
/// record per company-year.
pub struct IntraSourceIntegrator {
    provider: Provider,
}

type StatementSlots<'a> = [Option<&'a RawStatementRecord>; 3];

impl IntraSourceIntegrator {
    pub fn new(provider: Provider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn integrate(&self, records: &[RawStatementRecord]) -> IntegrationOutcome {
        let mut outcome = IntegrationOutcome::default();
        let mut groups: BTreeMap<CompanyYear, StatementSlots<'_>> = BTreeMap::new();

        for record in records {
            let (statement, key) = match self.classify(record) {
                Ok(classified) => classified,
                Err(reason) => {
                    warn!(
                        "[{}] Rejected raw record {}/{} ({}): {}",
                        self.provider,
                        record.company_code,
                        record.year,
                        record.statement_type,
                        reason
                    );
                    outcome.rejected.push(RejectedRawRecord {
                        provider: self.provider,
                        company_code: record.company_code.clone(),
                        year: record.year.clone(),
                        statement_type: record.statement_type.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let slots = groups.entry(key.clone()).or_default();
            if slots[statement.index()].replace(record).is_some() {
                warn!(
                    "[{}] Duplicate {} for {}; keeping the later record",
                    self.provider, statement, key
                );
                outcome.overwrites.push(AnomalyOverwrite {
                    provider: self.provider,
                    key,
                    statement,
                });
            }
        }

        for (key, slots) in groups {
            let (record, dropped) = self.flatten(&key, &slots);
            outcome.dropped_fields += dropped;
            outcome.records.insert(key, record);
        }

        info!(
            "[{}] Integrated {} provider-years ({} rejected, {} overwritten, {} unmapped fields)",
            self.provider,
            outcome.records.len(),
            outcome.rejected.len(),
            outcome.overwrites.len(),
            outcome.dropped_fields
        );

        outcome
    }

    fn classify(
        &self,
        record: &RawStatementRecord,
    ) -> std::result::Result<(StatementType, CompanyYear), String> {
        if record.source_id != self.provider {
            return Err(format!("record belongs to provider '{}'", record.source_id));
        }
        let statement = record
            .statement()
            .ok_or_else(|| format!("unknown statement type '{}'", record.statement_type))?;
        let company_code = record.company_code.trim();
        if company_code.is_empty() {
            return Err("empty company code".to_string());
        }
        let year = record
            .normalized_year()
            .ok_or_else(|| format!("unparsable year '{}'", record.year))?;
        Ok((statement, CompanyYear::new(company_code, year)))
    }

    /// Unions the statements in statement order (balance, income, cash flow).
    /// A non-blank value overwrites what an earlier statement or an earlier
    /// alias in the lookup table supplied; blanks never overwrite.
    fn flatten(&self, key: &CompanyYear, slots: &StatementSlots<'_>) -> (ProviderYearRecord, usize) {
        let mut fields: BTreeMap<String, FieldValue> = BTreeMap::new();
        let mut company_name: Option<String> = None;
        let mut dropped = 0;

        for record in slots.iter().flatten() {
            if company_name.is_none() {
                company_name = record
                    .company_name
                    .as_deref()
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string);
            }

            for label in record.fields.keys() {
                if self.provider.canonical_name(label).is_none() {
                    debug!("[{}] Dropping unmapped field '{}' for {}", self.provider, label, key);
                    dropped += 1;
                }
            }

            for (label, canonical) in self.provider.field_map() {
                let Some(value) = record.fields.get(*label).filter(|v| !v.is_blank()) else {
                    continue;
                };
                if *canonical == COMPANY_NAME {
                    if company_name.is_none() {
                        company_name = Some(value.to_string().trim().to_string());
                    }
                    continue;
                }
                fields.insert(canonical.to_string(), value.clone());
            }
        }

        let missing: Vec<String> = StatementType::ALL
            .iter()
            .filter(|s| slots[s.index()].is_none())
            .map(|s| s.to_string())
            .collect();
        if !missing.is_empty() {
            debug!(
                "[{}] {} has no {} statement(s); their fields stay unset",
                self.provider,
                key,
                missing.join(", ")
            );
        }

        let record = ProviderYearRecord {
            company_code: key.company_code.clone(),
            company_name,
            year: key.year.clone(),
            source_id: self.provider,
            fields,
        };
        (record, dropped)
    }
}
