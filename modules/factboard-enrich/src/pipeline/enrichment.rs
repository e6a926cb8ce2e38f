//! Enrichment engine: one summarization call per record, a lenient parse into
//! an all-optional wire shape, validation into [`EnrichmentOutput`], and at
//! most one corrective call when the output is not in Chinese.

use std::sync::Arc;

use ai_client::{extract_json_object, truncate_chars};
use factboard_common::{contains_cjk, EnrichmentOutput, FactboardError, RawRecord, RetryPolicy};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::traits::{CompletionRequest, TextCompleter};

const SUMMARY_PROMPT: &str = "\
你是一名严谨的信息摘要与地理定位助手。无论输入是何种语言，一律使用简体中文输出；\
英文资讯或论文需先理解再用中文专业概括，不保留英文原句。\
请判断事件发生的国家：优先给出 ISO3 代码（如 CHN、USA、DEU），无法判断时返回 null；\
不要仅因出现中文或中国机构名称就认定为中国。\
若事件发生在中国，请给出省级行政区中文全称（如 浙江省、北京市）：\
依次检查 URL 中的省份拼音或缩写（如 zj.gov.cn 对应浙江省）、标题中的省份名称、正文中明确提到的省份；\
全国性文件可返回“全国”或 null。\
只返回一个 JSON 对象，字段为：\
{\"summary\": \"不超过300字的简体中文摘要\", \"keywords\": [\"关键词\"], \
\"country\": \"ISO3 或国家名\", \"province\": \"省级行政区中文名或 null\"}。\
不要臆测，不确定的字段置为 null，不要输出 JSON 以外的任何内容。";

const CORRECTION_PROMPT: &str = "\
请将下列 JSON 中的所有值翻译为简体中文，键名与结构保持不变，只返回 JSON。";

/// Model output as it arrives: every field optional, keywords in either
/// shape. Validated once into [`EnrichmentOutput`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LlmEnrichment {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub keywords: Option<KeywordsField>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub province: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum KeywordsField {
    List(Vec<Value>),
    Text(String),
}

impl KeywordsField {
    /// Trimmed, de-duplicated keywords in their original order.
    pub fn into_vec(self) -> Vec<String> {
        let raw: Vec<String> = match self {
            KeywordsField::List(items) => items
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            KeywordsField::Text(text) => text
                .split([',', '，', '、', ';', '；', '|'])
                .map(str::to_string)
                .collect(),
        };
        let mut out: Vec<String> = Vec::with_capacity(raw.len());
        for keyword in raw {
            let keyword = keyword.trim();
            if !keyword.is_empty() && !out.iter().any(|k| k == keyword) {
                out.push(keyword.to_string());
            }
        }
        out
    }
}

/// Accepts a string, a number, or null; anything else becomes `None`.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Strip fences, take the outermost object, and parse it.
pub fn parse_llm_json(raw: &str) -> Result<LlmEnrichment, FactboardError> {
    let body = extract_json_object(raw);
    serde_json::from_str(body).map_err(|e| {
        FactboardError::LlmResponseParse(format!("{e}; response starts: {}", truncate_chars(raw, 120)))
    })
}

impl LlmEnrichment {
    /// Require a non-empty summary; everything else stays optional.
    pub fn validate(self) -> Result<EnrichmentOutput, FactboardError> {
        let summary = self
            .summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FactboardError::LlmResponseParse("summary missing or empty".into()))?;
        Ok(EnrichmentOutput {
            summary,
            keywords: self.keywords.map(KeywordsField::into_vec).unwrap_or_default(),
            llm_country: self.country,
            llm_province: self.province,
        })
    }
}

/// True when the summary or the joined keywords have no CJK at all. An empty
/// keyword list joins to "" and so asks the correction to fill it.
pub fn needs_language_correction(output: &EnrichmentOutput) -> bool {
    !contains_cjk(&output.summary) || !contains_cjk(&output.keywords.join(" "))
}

/// Overlay the fields the correction actually returned.
fn apply_correction(output: &mut EnrichmentOutput, fix: LlmEnrichment) {
    if let Some(summary) = fix.summary.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()) {
        output.summary = summary;
    }
    if let Some(keywords) = fix.keywords.map(KeywordsField::into_vec).filter(|k| !k.is_empty()) {
        output.keywords = keywords;
    }
    if fix.country.is_some() {
        output.llm_country = fix.country;
    }
    if fix.province.is_some() {
        output.llm_province = fix.province;
    }
}

/// Result of enriching one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Enriched {
    pub output: EnrichmentOutput,
    pub language_corrected: bool,
    pub language_uncorrectable: bool,
}

/// Request body sent as the user message.
pub fn build_request(record: &RawRecord, content_chars: usize) -> Value {
    let content = record.content.as_deref().unwrap_or_default();
    json!({
        "title": record.title,
        "content": truncate_chars(content, content_chars),
        "url": record.identity_url(),
        "source": record.source,
        "type": record.record_type,
        "time_hint": record.published_at.map(|t| t.to_rfc3339()),
    })
}

pub struct EnrichmentEngine {
    completer: Arc<dyn TextCompleter>,
    retry: RetryPolicy,
    content_chars: usize,
    log_llm: bool,
}

impl EnrichmentEngine {
    pub fn new(
        completer: Arc<dyn TextCompleter>,
        retry: RetryPolicy,
        content_chars: usize,
        log_llm: bool,
    ) -> Self {
        Self {
            completer,
            retry,
            content_chars,
            log_llm,
        }
    }

    async fn complete(&self, label: &str, request: CompletionRequest) -> Result<String, FactboardError> {
        self.retry
            .run(label, || self.completer.complete(&request))
            .await
            .map_err(|e| e.into_inner())
    }

    pub async fn enrich(&self, record: &RawRecord) -> Result<Enriched, FactboardError> {
        let request = CompletionRequest {
            system: SUMMARY_PROMPT.to_string(),
            user: build_request(record, self.content_chars).to_string(),
            json_mode: true,
        };
        if self.log_llm {
            debug!(origin = %record.origin(), request = %request.user, "LLM request");
        }
        let raw = self.complete("llm_summary", request).await?;
        if self.log_llm {
            debug!(origin = %record.origin(), raw = %raw, "LLM raw response");
        }
        let mut output = parse_llm_json(&raw)?.validate()?;

        if self.log_llm {
            info!(
                origin = %record.origin(),
                llm_country = output.llm_country.as_deref().unwrap_or("-"),
                llm_province = output.llm_province.as_deref().unwrap_or("-"),
                keywords = %output.keywords.iter().take(5).cloned().collect::<Vec<_>>().join(","),
                summary = %truncate_chars(&output.summary, 60),
                "LLM enrichment"
            );
        }

        let mut language_corrected = false;
        if needs_language_correction(&output) {
            match self.correct(&output).await {
                Ok(fix) => {
                    apply_correction(&mut output, fix);
                    language_corrected = true;
                }
                Err(e) => {
                    warn!(origin = %record.origin(), error = %e, "Language correction failed");
                }
            }
        }
        let language_uncorrectable = !contains_cjk(&output.summary);
        if language_uncorrectable {
            warn!(origin = %record.origin(), "Summary still has no Chinese after correction");
        }

        Ok(Enriched {
            output,
            language_corrected,
            language_uncorrectable,
        })
    }

    async fn correct(&self, output: &EnrichmentOutput) -> Result<LlmEnrichment, FactboardError> {
        let body = json!({
            "summary": output.summary,
            "keywords": output.keywords,
            "country": output.llm_country,
            "province": output.llm_province,
        });
        let request = CompletionRequest {
            system: CORRECTION_PROMPT.to_string(),
            user: body.to_string(),
            json_mode: true,
        };
        let raw = self.complete("llm_language_fix", request).await?;
        if self.log_llm {
            debug!(raw = %raw, "LLM correction raw response");
        }
        parse_llm_json(&raw)
    }
}
