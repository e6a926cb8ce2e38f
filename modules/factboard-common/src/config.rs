use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use typed_builder::TypedBuilder;

use crate::error::FactboardError;
use crate::resilience::{Pacer, RetryPolicy};
use crate::types::RecordType;

pub const DEFAULT_MODEL: &str = "qwen3-72b-instruct";

/// DashScope compatible-mode endpoint family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmRegion {
    #[default]
    Cn,
    Intl,
    Finance,
}

impl LlmRegion {
    pub fn base_url(&self) -> &'static str {
        match self {
            LlmRegion::Cn => "https://dashscope.aliyuncs.com/compatible-mode/v1",
            LlmRegion::Intl => "https://dashscope-intl.aliyuncs.com/compatible-mode/v1",
            LlmRegion::Finance => "https://dashscope-finance.aliyuncs.com/compatible-mode/v1",
        }
    }
}

impl FromStr for LlmRegion {
    type Err = FactboardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cn" | "china" | "" => Ok(LlmRegion::Cn),
            "intl" | "international" | "sg" => Ok(LlmRegion::Intl),
            "finance" | "fin" => Ok(LlmRegion::Finance),
            other => Err(FactboardError::Config(format!(
                "unknown LLM region '{other}' (expected cn, intl or finance)"
            ))),
        }
    }
}

impl fmt::Display for LlmRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LlmRegion::Cn => "cn",
            LlmRegion::Intl => "intl",
            LlmRegion::Finance => "finance",
        })
    }
}

/// Secrets and endpoints, loaded from the environment (and `.env`).
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub llm_api_key: String,
    pub llm_model: String,
    /// Explicit endpoint; overrides the region's default.
    pub llm_base_url: Option<String>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &redact(&self.database_url))
            .field("llm_api_key", &redact(&self.llm_api_key))
            .field("llm_model", &self.llm_model)
            .field("llm_base_url", &self.llm_base_url)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, FactboardError> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: required_env(&["DATABASE_URL"])?,
            llm_api_key: required_env(&["LLM_API_KEY", "QWEN_API_KEY"])?,
            llm_model: optional_env(&["LLM_MODEL", "QWEN_MODEL"])
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            llm_base_url: optional_env(&["LLM_BASE_URL"]),
        };

        config.log_keys();
        Ok(config)
    }

    /// Endpoint to call: the explicit override, else the region default.
    pub fn llm_endpoint(&self, region: LlmRegion) -> String {
        self.llm_base_url
            .clone()
            .unwrap_or_else(|| region.base_url().to_string())
    }

    fn log_keys(&self) {
        tracing::info!("Config loaded:");
        tracing::info!("  DATABASE_URL: {}", redact(&self.database_url));
        tracing::info!("  LLM_API_KEY: {}", redact(&self.llm_api_key));
        tracing::info!("  LLM_MODEL: {}", self.llm_model);
        tracing::info!(
            "  LLM_BASE_URL: {}",
            self.llm_base_url.as_deref().unwrap_or("<region default>")
        );
    }
}

fn redact(val: &str) -> String {
    let n = val.char_indices().nth(5).map(|(i, _)| i).unwrap_or(val.len());
    format!("{}...({} chars)", &val[..n], val.chars().count())
}

fn optional_env(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn required_env(keys: &[&str]) -> Result<String, FactboardError> {
    optional_env(keys).ok_or_else(|| {
        FactboardError::Config(format!("{} environment variable is required", keys.join(" or ")))
    })
}

/// Knobs for one enrichment run.
#[derive(Debug, Clone, TypedBuilder)]
pub struct RunOptions {
    /// Lower bound on `published_at`, computed once per run.
    #[builder(default, setter(strip_option))]
    pub since: Option<DateTime<Utc>>,
    #[builder(default)]
    pub include_types: BTreeSet<RecordType>,
    #[builder(default)]
    pub exclude_types: BTreeSet<RecordType>,
    #[builder(default = true)]
    pub geo_by_llm: bool,
    /// Skip records whose stored `row_hash` matches the source row.
    #[builder(default = true)]
    pub only_changed: bool,
    #[builder(default)]
    pub log_geo: bool,
    #[builder(default)]
    pub log_llm: bool,
    #[builder(default = 20)]
    pub page_size: usize,
    #[builder(default = 20)]
    pub max_pages: usize,
    /// Pause after each model call.
    #[builder(default = Duration::from_millis(400))]
    pub llm_pause: Duration,
    #[builder(default = 6000)]
    pub content_chars: usize,
    #[builder(default = 120)]
    pub summary_chars: usize,
    /// Page reads and upserts.
    #[builder(default)]
    pub retry: RetryPolicy,
    #[builder(default = RetryPolicy::exponential(4, Duration::from_secs(1), Duration::from_secs(20)))]
    pub llm_retry: RetryPolicy,
    #[builder(default)]
    pub pacer: Pacer,
    #[builder(default = 3)]
    pub max_consecutive_skips: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}
