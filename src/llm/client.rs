use crate::error::{MergeUnavailable, ReconcileError, Result};
use crate::llm::adapter::{MergeBackend, MergeRequest};
use crate::llm::types::*;
use log::debug;
use reqwest::{Client, StatusCode};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash-lite";

#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GeminiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            temperature: 0.1,
            max_output_tokens: 8000,
        }
    }

    /// Reads `GEMINI_API_KEY` and optionally `GEMINI_MODEL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ReconcileError::InvalidConfig("GEMINI_API_KEY is not set".to_string()))?;
        let mut settings = Self::new(api_key);
        if let Some(model) = std::env::var("GEMINI_MODEL").ok().filter(|m| !m.trim().is_empty()) {
            settings.model = model;
        }
        Ok(settings)
    }
}

/// Merge backend over the Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    settings: GeminiSettings,
    base_url: String,
}

impl GeminiClient {
    pub fn new(settings: GeminiSettings) -> Self {
        Self {
            client: Client::new(),
            settings,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub(crate) async fn generate_content(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        response_schema: Option<serde_json::Value>,
    ) -> std::result::Result<String, MergeUnavailable> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.settings.model, self.settings.api_key
        );

        let payload = GenerateContentRequest {
            contents: vec![Content::text("user", user_prompt)],
            system_instruction: Some(Content::text("user", system_prompt)),
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema,
                temperature: self.settings.temperature,
                max_output_tokens: self.settings.max_output_tokens,
            },
        };

        let res = self.client.post(&url).json(&payload).send().await?;
        let status = res.status();

        if !status.is_success() {
            let err_text = res.text().await?;
            return Err(classify_failure(status, err_text));
        }

        let body: GenerateContentResponse = res
            .json()
            .await
            .map_err(|e| MergeUnavailable::Malformed(format!("unreadable Gemini response: {}", e)))?;

        body.first_text().ok_or_else(|| {
            MergeUnavailable::Malformed("Gemini returned no text candidates".to_string())
        })
    }
}

impl MergeBackend for GeminiClient {
    async fn complete(&self, request: &MergeRequest) -> std::result::Result<String, MergeUnavailable> {
        debug!("Gemini merge request for {} ({})", request.key, self.settings.model);
        self.generate_content(
            request.system_prompt,
            &request.user_prompt,
            Some(request.response_schema.clone()),
        )
        .await
    }
}

fn classify_failure(status: StatusCode, body: String) -> MergeUnavailable {
    if status == StatusCode::TOO_MANY_REQUESTS || body.contains("RESOURCE_EXHAUSTED") {
        MergeUnavailable::RateLimited(format!("status {}: {}", status, body))
    } else {
        MergeUnavailable::Transport(format!("Gemini API Error (status {}): {}", status, body))
    }
}

impl From<reqwest::Error> for MergeUnavailable {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => MergeUnavailable::RateLimited(e.to_string()),
            _ => MergeUnavailable::Transport(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_errors_are_rate_limits() {
        let err = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down".to_string());
        assert_eq!(err.kind(), "rate_limited");

        let err = classify_failure(
            StatusCode::FORBIDDEN,
            r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#.to_string(),
        );
        assert_eq!(err.kind(), "rate_limited");

        let err = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom".to_string());
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn test_settings_defaults() {
        let settings = GeminiSettings::new("key");
        assert_eq!(settings.model, DEFAULT_GEMINI_MODEL);
        assert_eq!(settings.max_output_tokens, 8000);
        let client = GeminiClient::new(settings).with_base_url("http://localhost:1");
        assert_eq!(client.model(), "gemini-2.0-flash-lite");
    }
}
