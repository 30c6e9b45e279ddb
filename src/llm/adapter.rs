use crate::error::{MergeUnavailable, SchemaViolation};
use crate::llm::prompts::{merge_response_schema, merge_user_prompt, SYSTEM_PROMPT_MERGE};
use crate::provider::{Provider, SourcePriorityOrder};
use crate::record::{CompanyYear, PartialRecord, ProviderYearRecord};
use crate::schema::{is_canonical, is_identity_field, FieldValue};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_PROMPT_CHARS: usize = 48_000;
const MAX_TEXT_CHARS: usize = 256;

/// One provider's fields as shown to the model.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateView {
    pub source: Provider,
    pub provider_name: &'static str,
    pub priority: usize,
    pub fields: BTreeMap<String, FieldValue>,
}

/// Everything a backend needs to ask for one merged company-year.
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub key: CompanyYear,
    pub system_prompt: &'static str,
    pub user_prompt: String,
    pub response_schema: Value,
    pub candidates: Vec<CandidateView>,
}

/// An external service that answers a merge request with raw JSON text.
pub trait MergeBackend: Send + Sync {
    fn complete(
        &self,
        request: &MergeRequest,
    ) -> impl Future<Output = Result<String, MergeUnavailable>> + Send;
}

/// Backend used when no merge service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledBackend;

impl MergeBackend for DisabledBackend {
    async fn complete(&self, _request: &MergeRequest) -> Result<String, MergeUnavailable> {
        Err(MergeUnavailable::Disabled)
    }
}

/// Asks a [`MergeBackend`] to merge candidate records and validates the
/// answer against the canonical schema.
pub struct LlmMergeAdapter<B> {
    backend: B,
    order: SourcePriorityOrder,
    timeout: Duration,
    max_prompt_chars: usize,
}

impl<B: MergeBackend> LlmMergeAdapter<B> {
    pub fn new(backend: B, order: SourcePriorityOrder) -> Self {
        Self {
            backend,
            order,
            timeout: DEFAULT_MERGE_TIMEOUT,
            max_prompt_chars: DEFAULT_MAX_PROMPT_CHARS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_prompt_chars(mut self, max_prompt_chars: usize) -> Self {
        self.max_prompt_chars = max_prompt_chars;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn merge(
        &self,
        candidates: &[ProviderYearRecord],
    ) -> Result<PartialRecord, MergeUnavailable> {
        self.merge_with_timeout(candidates, self.timeout).await
    }

    pub async fn merge_with_timeout(
        &self,
        candidates: &[ProviderYearRecord],
        timeout: Duration,
    ) -> Result<PartialRecord, MergeUnavailable> {
        let request = self.build_request(candidates)?;
        debug!(
            "Requesting LLM merge for {} with {} candidates",
            request.key,
            request.candidates.len()
        );

        let raw = match tokio::time::timeout(timeout, self.backend.complete(&request)).await {
            Ok(result) => result?,
            Err(_) => return Err(MergeUnavailable::Timeout(timeout)),
        };

        parse_merge_response(&raw, candidates)
    }

    /// Builds the bounded request. Candidates are listed by priority; when the
    /// payload exceeds the character budget the least trusted candidates are
    /// left out, never the first one.
    pub fn build_request(
        &self,
        candidates: &[ProviderYearRecord],
    ) -> Result<MergeRequest, MergeUnavailable> {
        let first = candidates
            .first()
            .ok_or_else(|| MergeUnavailable::Malformed("no candidates to merge".to_string()))?;
        let key = first.key();

        let mut views: Vec<CandidateView> = candidates.iter().map(|c| self.view(c)).collect();
        views.sort_by_key(|v| v.priority);

        let mut payload = serde_json::to_string_pretty(&views)
            .map_err(|e| MergeUnavailable::Malformed(e.to_string()))?;
        while payload.chars().count() > self.max_prompt_chars && views.len() > 1 {
            if let Some(dropped) = views.pop() {
                warn!(
                    "Merge prompt for {} over budget; leaving out candidate '{}'",
                    key, dropped.source
                );
            }
            payload = serde_json::to_string_pretty(&views)
                .map_err(|e| MergeUnavailable::Malformed(e.to_string()))?;
        }

        Ok(MergeRequest {
            user_prompt: merge_user_prompt(&key.company_code, &key.year, &payload),
            key,
            system_prompt: SYSTEM_PROMPT_MERGE,
            response_schema: merge_response_schema(),
            candidates: views,
        })
    }

    fn view(&self, candidate: &ProviderYearRecord) -> CandidateView {
        let fields = candidate
            .fields
            .iter()
            .filter(|(_, v)| !v.is_blank())
            .map(|(k, v)| {
                let value = match v {
                    FieldValue::Text(s) if s.chars().count() > MAX_TEXT_CHARS => {
                        FieldValue::Text(s.chars().take(MAX_TEXT_CHARS).collect())
                    }
                    other => other.clone(),
                };
                (k.clone(), value)
            })
            .collect();

        CandidateView {
            source: candidate.source_id,
            provider_name: candidate.source_id.display_name(),
            priority: self.order.rank(candidate.source_id),
            fields,
        }
    }
}

/// The strict boundary between model output and the pipeline.
///
/// Accepts only a JSON object whose keys are canonical fields and whose
/// non-null values were reported for the same field by at least one
/// candidate. Identity keys are ignored. Anything else is
/// [`MergeUnavailable`].
pub fn parse_merge_response(
    raw: &str,
    candidates: &[ProviderYearRecord],
) -> Result<PartialRecord, MergeUnavailable> {
    let cleaned = clean_json_output(raw);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| MergeUnavailable::Malformed(format!("response is not valid JSON: {}", e)))?;
    let Value::Object(object) = value else {
        return Err(MergeUnavailable::Malformed(
            "response is not a JSON object".to_string(),
        ));
    };

    let mut merged = PartialRecord::new();

    for (field, value) in object {
        if !is_canonical(&field) {
            return Err(SchemaViolation::UnknownField(field).into());
        }
        if is_identity_field(&field) {
            continue;
        }

        let value = match &value {
            Value::Null => continue,
            Value::Number(_) | Value::String(_) => match FieldValue::from_json(&value) {
                Some(v) if !v.is_blank() => v,
                _ => continue,
            },
            other => {
                return Err(SchemaViolation::WrongType {
                    field,
                    found: json_type_name(other).to_string(),
                }
                .into())
            }
        };

        let traceable = candidates
            .iter()
            .any(|c| c.get(&field).is_some_and(|reported| reported.matches(&value)));
        if !traceable {
            return Err(SchemaViolation::Untraceable {
                field,
                value: value.to_string(),
            }
            .into());
        }

        merged.insert(field, value);
    }

    Ok(merged)
}

/// Cuts model output down to the outermost JSON object, dropping markdown
/// fences and surrounding prose.
fn clean_json_output(raw: &str) -> String {
    if let Some(start) = raw.find('{') {
        if let Some(end) = raw.rfind('}') {
            if end > start {
                return raw[start..=end].to_string();
            }
        }
    }
    raw.trim().to_string()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn candidate(provider: Provider, fields: &[(&str, FieldValue)]) -> ProviderYearRecord {
        ProviderYearRecord {
            company_code: "600519".to_string(),
            company_name: Some("贵州茅台".to_string()),
            year: "2024".to_string(),
            source_id: provider,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn candidates() -> Vec<ProviderYearRecord> {
        vec![
            candidate(
                Provider::Thsl,
                &[
                    ("roe", FieldValue::Number(40.0)),
                    ("industry", FieldValue::Text("白酒".to_string())),
                ],
            ),
            candidate(
                Provider::Cninfo,
                &[
                    ("roe", FieldValue::Number(36.02)),
                    ("total_assets", FieldValue::Number(29894457.99)),
                ],
            ),
        ]
    }

    struct ScriptedBackend {
        response: Result<String, MergeUnavailable>,
        delay: Duration,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        fn answering(response: &str) -> Self {
            Self {
                response: Ok(response.to_string()),
                delay: Duration::ZERO,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl MergeBackend for ScriptedBackend {
        async fn complete(&self, request: &MergeRequest) -> Result<String, MergeUnavailable> {
            self.seen.lock().unwrap().push(request.user_prompt.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.clone()
        }
    }

    #[test]
    fn test_parse_accepts_traceable_values() {
        let raw = r#"```json
{"roe": 36.02, "total_assets": "29894457.99", "industry": "白酒", "inventory_days": null, "company_code": "X"}
```"#;
        let merged = parse_merge_response(raw, &candidates()).unwrap();

        assert_eq!(merged.len(), 3);
        assert_eq!(merged["roe"], FieldValue::Number(36.02));
        assert!(!merged.contains_key("company_code"));
    }

    #[test]
    fn test_parse_rejects_unknown_field() {
        let err = parse_merge_response(r#"{"roe": 36.02, "net_margin": 50.0}"#, &candidates())
            .unwrap_err();
        assert_eq!(
            err,
            MergeUnavailable::SchemaViolation(SchemaViolation::UnknownField(
                "net_margin".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_rejects_untraceable_value() {
        let err = parse_merge_response(r#"{"roe": 38.0}"#, &candidates()).unwrap_err();
        assert!(matches!(
            err,
            MergeUnavailable::SchemaViolation(SchemaViolation::Untraceable { .. })
        ));

        // Reported, but for a different field.
        let err = parse_merge_response(r#"{"gross_profit_margin": 36.02}"#, &candidates())
            .unwrap_err();
        assert!(matches!(
            err,
            MergeUnavailable::SchemaViolation(SchemaViolation::Untraceable { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            parse_merge_response("I could not merge these records.", &candidates()),
            Err(MergeUnavailable::Malformed(_))
        ));
        assert!(matches!(
            parse_merge_response("[1, 2]", &candidates()),
            Err(MergeUnavailable::Malformed(_))
        ));
        assert!(matches!(
            parse_merge_response(r#"{"roe": [36.02]}"#, &candidates()),
            Err(MergeUnavailable::SchemaViolation(SchemaViolation::WrongType { .. }))
        ));
    }

    #[test]
    fn test_request_lists_candidates_by_priority() {
        let adapter = LlmMergeAdapter::new(DisabledBackend, SourcePriorityOrder::default());
        let request = adapter.build_request(&candidates()).unwrap();

        assert_eq!(request.key, CompanyYear::new("600519", "2024"));
        assert_eq!(request.candidates[0].source, Provider::Cninfo);
        assert_eq!(request.candidates[1].priority, 3);
        assert!(request.user_prompt.contains("巨潮资讯网"));
        assert!(request.user_prompt.contains("total_assets"));
    }

    #[test]
    fn test_request_respects_budget() {
        let long = "x".repeat(1000);
        let many = vec![
            candidate(Provider::Cninfo, &[("dividend_plan", FieldValue::Text(long.clone()))]),
            candidate(Provider::Thsl, &[("dividend_plan", FieldValue::Text(long))]),
        ];
        let adapter = LlmMergeAdapter::new(DisabledBackend, SourcePriorityOrder::default())
            .with_max_prompt_chars(400);
        let request = adapter.build_request(&many).unwrap();

        assert_eq!(request.candidates.len(), 1);
        assert_eq!(request.candidates[0].source, Provider::Cninfo);
        match &request.candidates[0].fields["dividend_plan"] {
            FieldValue::Text(s) => assert_eq!(s.chars().count(), 256),
            other => panic!("unexpected value {:?}", other),
        }

        assert!(adapter.build_request(&[]).is_err());
    }

    #[tokio::test]
    async fn test_merge_success() {
        let backend = ScriptedBackend::answering(r#"{"roe": 36.02, "industry": "白酒"}"#);
        let adapter = LlmMergeAdapter::new(backend, SourcePriorityOrder::default());

        let merged = adapter.merge(&candidates()).await.unwrap();
        assert_eq!(merged["industry"], FieldValue::Text("白酒".to_string()));
        assert_eq!(adapter.backend.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_merge_times_out() {
        let mut backend = ScriptedBackend::answering(r#"{"roe": 36.02}"#);
        backend.delay = Duration::from_millis(200);
        let adapter = LlmMergeAdapter::new(backend, SourcePriorityOrder::default())
            .with_timeout(Duration::from_secs(5));

        let err = adapter
            .merge_with_timeout(&candidates(), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, MergeUnavailable::Timeout(Duration::from_millis(10)));
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_merge_propagates_backend_failure() {
        let backend = ScriptedBackend {
            response: Err(MergeUnavailable::RateLimited("quota exceeded".to_string())),
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        };
        let adapter = LlmMergeAdapter::new(backend, SourcePriorityOrder::default());
        let err = adapter.merge(&candidates()).await.unwrap_err();
        assert_eq!(err.kind(), "rate_limited");

        let disabled = LlmMergeAdapter::new(DisabledBackend, SourcePriorityOrder::default());
        assert_eq!(
            disabled.merge(&candidates()).await.unwrap_err(),
            MergeUnavailable::Disabled
        );
    }
}
