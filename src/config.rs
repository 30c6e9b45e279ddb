use crate::error::{ReconcileError, Result};
use crate::provider::SourcePriorityOrder;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Ask the merge backend first; fall back to priority resolution.
    #[default]
    Llm,
    /// Never contact the merge backend.
    PriorityOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    #[serde(default)]
    #[schemars(description = "Whether cross-source merging goes through the LLM backend ('llm') or straight to priority resolution ('priority_only'). Defaults to 'llm'.")]
    pub merge_mode: MergeMode,

    #[serde(default = "default_merge_timeout_secs")]
    #[schemars(description = "Upper bound in seconds for one LLM merge request. Defaults to 30.")]
    pub merge_timeout_secs: u64,

    #[serde(default = "default_max_concurrency")]
    #[schemars(description = "Maximum number of company-years merged at the same time. Must be at least 1. Defaults to 4.")]
    pub max_concurrency: usize,

    #[serde(default)]
    #[schemars(description = "Providers from most to least trusted. Must list cninfo, szse, eastmoney and thsl exactly once.")]
    pub priority_order: SourcePriorityOrder,

    #[serde(default = "default_max_prompt_chars")]
    #[schemars(description = "Character budget for the candidate payload of one merge prompt. Lower-priority candidates are left out once it is exceeded.")]
    pub max_prompt_chars: usize,
}

fn default_merge_timeout_secs() -> u64 {
    30
}

fn default_max_concurrency() -> usize {
    4
}

fn default_max_prompt_chars() -> usize {
    48_000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            merge_mode: MergeMode::default(),
            merge_timeout_secs: default_merge_timeout_secs(),
            max_concurrency: default_max_concurrency(),
            priority_order: SourcePriorityOrder::default(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

impl PipelineConfig {
    pub fn priority_only() -> Self {
        Self {
            merge_mode: MergeMode::PriorityOnly,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(ReconcileError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.merge_timeout_secs == 0 {
            return Err(ReconcileError::InvalidConfig(
                "merge_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_prompt_chars == 0 {
            return Err(ReconcileError::InvalidConfig(
                "max_prompt_chars must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn merge_timeout(&self) -> Duration {
        Duration::from_secs(self.merge_timeout_secs)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(PipelineConfig)
    }
}
