//! # Financial Record Reconciler
//!
//! A library for reconciling annual financial statements of Chinese listed
//! companies, as reported by several data providers, into one canonical,
//! schema-complete record per company and year.
//!
//! ## Core Concepts
//!
//! - **Raw Statements**: balance sheet, income statement and cash flow tables tagged with
//!   the provider they came from ([`RawStatementRecord`])
//! - **Provider-Year Records**: one provider's statements for one year, flattened onto
//!   canonical field names ([`IntraSourceIntegrator`])
//! - **Source Priority**: a fixed trust order CNINFO > SZSE > Eastmoney > THSL used to
//!   settle conflicts ([`PriorityResolver`])
//! - **LLM Merge**: an optional external model proposes the merged record; its answer is
//!   only accepted when every value traces back to a provider ([`LlmMergeAdapter`])
//! - **Canonical Records**: always exactly 36 fields, missing data as explicit null
//!   ([`CanonicalRecord`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use financial_record_reconciler::*;
//!
//! let raw = vec![
//!     RawStatementRecord::new(Provider::Cninfo, "balance_sheet", "600519", "2024")
//!         .with_name("贵州茅台")
//!         .with_field("总资产", FieldValue::Number(29894457.99)),
//! ];
//!
//! let report = reconcile_records(&raw, PipelineConfig::default()).await?;
//! let record = report.record("600519", "2024").unwrap();
//! assert_eq!(record.number("total_assets"), Some(29894457.99));
//! ```

pub mod config;
pub mod error;
pub mod ingestion;
pub mod integrator;
pub mod llm;
pub mod pipeline;
pub mod provider;
pub mod record;
pub mod resolver;
pub mod schema;
pub mod validator;

pub use config::{MergeMode, PipelineConfig};
pub use error::{MergeUnavailable, ReconcileError, Result, SchemaViolation};
pub use ingestion::*;
pub use integrator::{AnomalyOverwrite, IntegrationOutcome, IntraSourceIntegrator, RejectedRawRecord};
pub use llm::{parse_merge_response, DisabledBackend, LlmMergeAdapter, MergeBackend, MergeRequest};
#[cfg(feature = "gemini")]
pub use llm::{GeminiClient, GeminiSettings};
pub use pipeline::{
    PipelineEvent, PipelineMetrics, PipelineReport, ReconciliationPipeline, YearFailure,
};
pub use provider::{Provider, SourcePriorityOrder};
pub use record::{CanonicalRecord, CompanyYear, MergeProvenance, PartialRecord, ProviderYearRecord};
pub use resolver::{PriorityResolver, Resolution, ResolvedField};
pub use schema::{FieldGroup, FieldKind, FieldSpec, FieldValue, CANONICAL_FIELDS, FIELD_COUNT};
pub use validator::complete;

/// Reconciles raw statements with priority resolution only.
pub async fn reconcile_records(
    records: &[RawStatementRecord],
    config: PipelineConfig,
) -> Result<PipelineReport> {
    let pipeline = ReconciliationPipeline::priority_only(config)?;
    Ok(pipeline.run(records).await)
}
