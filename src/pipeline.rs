use crate::config::{MergeMode, PipelineConfig};
use crate::error::{MergeUnavailable, Result};
use crate::ingestion::{normalize_year, RawStatementRecord};
use crate::integrator::{AnomalyOverwrite, IntraSourceIntegrator, RejectedRawRecord};
use crate::llm::{DisabledBackend, LlmMergeAdapter, MergeBackend};
use crate::provider::Provider;
use crate::record::{CanonicalRecord, CompanyYear, MergeProvenance, PartialRecord, ProviderYearRecord};
use crate::resolver::PriorityResolver;
use crate::schema::{FieldValue, COMPANY_NAME};
use crate::validator;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::{pending, Future};
use std::pin::pin;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

/// Progress notifications for a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started {
        raw_records: usize,
    },
    SourceIntegrated {
        provider: Provider,
        provider_years: usize,
        rejected: usize,
        overwrites: usize,
    },
    MergeFallback {
        key: CompanyYear,
        reason: String,
    },
    RecordCompleted {
        key: CompanyYear,
        provenance: MergeProvenance,
    },
    RecordInvalid {
        key: CompanyYear,
        reason: String,
    },
    Cancelled {
        completed: usize,
    },
    Finished {
        records: usize,
    },
}

/// A company-year whose record failed validation and was left out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct YearFailure {
    pub key: CompanyYear,
    pub reason: String,
}

/// Counters for every non-fatal condition seen during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineMetrics {
    pub raw_records: usize,
    pub rejected_raw: usize,
    pub overwrites: usize,
    pub dropped_fields: usize,
    pub provider_years: usize,
    pub company_years: usize,
    pub llm_merged: usize,
    pub priority_merged: usize,
    /// Fallbacks keyed by [`MergeUnavailable::kind`].
    pub merge_unavailable: BTreeMap<String, usize>,
    pub invalid_records: usize,
    /// Progress events dropped because the receiver was not keeping up.
    pub dropped_events: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Sorted by year, then company code.
    pub records: Vec<CanonicalRecord>,
    pub provenance: BTreeMap<CompanyYear, MergeProvenance>,
    pub rejected: Vec<RejectedRawRecord>,
    pub overwrites: Vec<AnomalyOverwrite>,
    pub failures: Vec<YearFailure>,
    pub metrics: PipelineMetrics,
    /// The run was cancelled; `records` holds only what completed before.
    pub cancelled: bool,
}

impl PipelineReport {
    pub fn record(&self, company_code: &str, year: &str) -> Option<&CanonicalRecord> {
        self.records
            .iter()
            .find(|r| r.company_code() == company_code && r.year() == year)
    }

    pub fn years(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.year()).collect()
    }
}

struct YearOutcome {
    key: CompanyYear,
    provenance: MergeProvenance,
    fallback: Option<MergeUnavailable>,
    result: Result<CanonicalRecord>,
}

/// Turns raw provider statements into ordered canonical annual records.
///
/// Per-provider integration runs first. Each company-year is then merged by
/// the configured backend, falling back to priority resolution whenever the
/// backend is unavailable, and completed against the schema. Nothing inside a
/// run is fatal: anomalies end up in the [`PipelineReport`].
pub struct ReconciliationPipeline<B = DisabledBackend> {
    config: PipelineConfig,
    resolver: PriorityResolver,
    adapter: LlmMergeAdapter<B>,
    events: Option<Sender<PipelineEvent>>,
}

impl ReconciliationPipeline<DisabledBackend> {
    /// A pipeline that never contacts a merge backend.
    pub fn priority_only(config: PipelineConfig) -> Result<Self> {
        let config = PipelineConfig {
            merge_mode: MergeMode::PriorityOnly,
            ..config
        };
        Self::new(config, DisabledBackend)
    }
}

impl<B: MergeBackend> ReconciliationPipeline<B> {
    pub fn new(config: PipelineConfig, backend: B) -> Result<Self> {
        config.validate()?;
        let adapter = LlmMergeAdapter::new(backend, config.priority_order)
            .with_timeout(config.merge_timeout())
            .with_max_prompt_chars(config.max_prompt_chars);
        Ok(Self {
            resolver: PriorityResolver::new(config.priority_order),
            adapter,
            config,
            events: None,
        })
    }

    /// Progress events are delivered with `try_send`; a full channel drops
    /// the event and counts it in [`PipelineMetrics::dropped_events`].
    pub fn with_events(mut self, sender: Sender<PipelineEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self, records: &[RawStatementRecord]) -> PipelineReport {
        self.run_until(records, pending::<()>()).await
    }

    /// Like [`run`](Self::run), but stops starting new company-years once
    /// `cancel` resolves. Years still in flight are abandoned; completed
    /// records are returned with `cancelled` set.
    pub async fn run_until<C>(&self, records: &[RawStatementRecord], cancel: C) -> PipelineReport
    where
        C: Future<Output = ()>,
    {
        let mut report = PipelineReport::default();
        report.metrics.raw_records = records.len();
        info!("Starting reconciliation of {} raw records", records.len());
        self.send_event(
            &mut report.metrics,
            PipelineEvent::Started {
                raw_records: records.len(),
            },
        );

        let provider_years = self.integrate(records, &mut report);
        self.reconcile(provider_years, cancel, report).await
    }

    /// Reconciles records that were already integrated per provider.
    pub async fn run_integrated(&self, provider_years: Vec<ProviderYearRecord>) -> PipelineReport {
        self.reconcile(provider_years, pending::<()>(), PipelineReport::default())
            .await
    }

    fn integrate(
        &self,
        records: &[RawStatementRecord],
        report: &mut PipelineReport,
    ) -> Vec<ProviderYearRecord> {
        let mut provider_years = Vec::new();

        for provider in Provider::ALL {
            let own: Vec<RawStatementRecord> = records
                .iter()
                .filter(|r| r.source_id == provider)
                .cloned()
                .collect();
            if own.is_empty() {
                debug!("No raw records from provider '{}'", provider);
                continue;
            }

            let outcome = IntraSourceIntegrator::new(provider).integrate(&own);
            self.send_event(
                &mut report.metrics,
                PipelineEvent::SourceIntegrated {
                    provider,
                    provider_years: outcome.records.len(),
                    rejected: outcome.rejected.len(),
                    overwrites: outcome.overwrites.len(),
                },
            );

            report.metrics.rejected_raw += outcome.rejected.len();
            report.metrics.overwrites += outcome.overwrites.len();
            report.metrics.dropped_fields += outcome.dropped_fields;
            report.rejected.extend(outcome.rejected);
            report.overwrites.extend(outcome.overwrites);
            provider_years.extend(outcome.records.into_values());
        }

        provider_years
    }

    async fn reconcile<C>(
        &self,
        provider_years: Vec<ProviderYearRecord>,
        cancel: C,
        mut report: PipelineReport,
    ) -> PipelineReport
    where
        C: Future<Output = ()>,
    {
        report.metrics.provider_years = provider_years.len();

        let mut groups: BTreeMap<CompanyYear, Vec<ProviderYearRecord>> = BTreeMap::new();
        for mut record in provider_years {
            normalize_identity(&mut record);
            groups.entry(record.key()).or_default().push(record);
        }
        report.metrics.company_years = groups.len();

        let mut outcomes = stream::iter(groups)
            .map(|(key, candidates)| self.reconcile_year(key, candidates))
            .buffer_unordered(self.config.max_concurrency);
        let mut cancel = pin!(cancel);

        loop {
            let next = tokio::select! {
                biased;
                _ = &mut cancel => {
                    report.cancelled = true;
                    None
                }
                next = outcomes.next() => next,
            };
            let Some(outcome) = next else {
                break;
            };
            self.record_outcome(&mut report, outcome);
        }

        report
            .records
            .sort_by(|a, b| (a.year(), a.company_code()).cmp(&(b.year(), b.company_code())));

        if report.cancelled {
            warn!(
                "Reconciliation cancelled with {} of {} company-years completed",
                report.records.len(),
                report.metrics.company_years
            );
            let completed = report.records.len();
            self.send_event(&mut report.metrics, PipelineEvent::Cancelled { completed });
        } else {
            info!(
                "Reconciled {} records ({} LLM merged, {} priority merged, {} invalid)",
                report.records.len(),
                report.metrics.llm_merged,
                report.metrics.priority_merged,
                report.metrics.invalid_records
            );
            let records = report.records.len();
            self.send_event(&mut report.metrics, PipelineEvent::Finished { records });
        }

        report
    }

    async fn reconcile_year(&self, key: CompanyYear, candidates: Vec<ProviderYearRecord>) -> YearOutcome {
        let (mut partial, provenance, fallback) = match self.config.merge_mode {
            MergeMode::PriorityOnly => (self.resolve(&candidates), MergeProvenance::PriorityMerged, None),
            MergeMode::Llm => match self.adapter.merge(&candidates).await {
                Ok(merged) => (merged, MergeProvenance::LlmMerged, None),
                Err(reason) => {
                    warn!(
                        "LLM merge unavailable for {} ({}); using priority resolution",
                        key, reason
                    );
                    (
                        self.resolve(&candidates),
                        MergeProvenance::PriorityMerged,
                        Some(reason),
                    )
                }
            },
        };

        if !partial.contains_key(COMPANY_NAME) {
            if let Some(name) = self.company_name(&candidates) {
                partial.insert(COMPANY_NAME.to_string(), FieldValue::Text(name));
            }
        }

        let result = validator::complete(&partial, &key.company_code, &key.year);
        YearOutcome {
            key,
            provenance,
            fallback,
            result,
        }
    }

    fn resolve(&self, candidates: &[ProviderYearRecord]) -> PartialRecord {
        self.resolver.resolve(candidates).to_partial()
    }

    fn company_name(&self, candidates: &[ProviderYearRecord]) -> Option<String> {
        self.resolver.rank(candidates).into_iter().find_map(|c| {
            c.company_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
        })
    }

    fn record_outcome(&self, report: &mut PipelineReport, outcome: YearOutcome) {
        let YearOutcome {
            key,
            provenance,
            fallback,
            result,
        } = outcome;

        if let Some(reason) = fallback {
            *report
                .metrics
                .merge_unavailable
                .entry(reason.kind().to_string())
                .or_default() += 1;
            self.send_event(
                &mut report.metrics,
                PipelineEvent::MergeFallback {
                    key: key.clone(),
                    reason: reason.to_string(),
                },
            );
        }

        match result {
            Ok(record) => {
                match provenance {
                    MergeProvenance::LlmMerged => report.metrics.llm_merged += 1,
                    MergeProvenance::PriorityMerged => report.metrics.priority_merged += 1,
                }
                let key = record.key();
                debug!("Completed {} ({:?}, {} null fields)", key, provenance, record.null_count());
                report.provenance.insert(key.clone(), provenance);
                self.send_event(
                    &mut report.metrics,
                    PipelineEvent::RecordCompleted { key, provenance },
                );
                report.records.push(record);
            }
            Err(err) => {
                warn!("Dropping {}: {}", key, err);
                report.metrics.invalid_records += 1;
                self.send_event(
                    &mut report.metrics,
                    PipelineEvent::RecordInvalid {
                        key: key.clone(),
                        reason: err.to_string(),
                    },
                );
                report.failures.push(YearFailure {
                    key,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn send_event(&self, metrics: &mut PipelineMetrics, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            if let Err(TrySendError::Full(event)) = tx.try_send(event) {
                debug!("Event channel full; dropping {:?}", event);
                metrics.dropped_events += 1;
            }
        }
    }
}

/// Trims the company code and cuts the year to its leading four digits, so
/// that candidates for one company-year always share a group. Years that do
/// not normalize are left for the completer to reject.
fn normalize_identity(record: &mut ProviderYearRecord) {
    let company_code = record.company_code.trim();
    if company_code.len() != record.company_code.len() {
        record.company_code = company_code.to_string();
    }
    match normalize_year(&record.year) {
        Some(year) => record.year = year,
        None => record.year = record.year.trim().to_string(),
    }
}
