use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FactboardError;
use crate::text::normalize_url;

// --- RecordType ---

/// Category tag carried by every row of the unified source view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    News,
    Competitor,
    Opportunity,
    Paper,
}

impl RecordType {
    pub const ALL: [RecordType; 4] = [
        RecordType::News,
        RecordType::Competitor,
        RecordType::Opportunity,
        RecordType::Paper,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::News => "news",
            RecordType::Competitor => "competitor",
            RecordType::Opportunity => "opportunity",
            RecordType::Paper => "paper",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" => Some(RecordType::News),
            "competitor" => Some(RecordType::Competitor),
            "opportunity" => Some(RecordType::Opportunity),
            "paper" => Some(RecordType::Paper),
            _ => None,
        }
    }

    /// Policy/paper-like content: national in scope, rarely names a province
    /// in free text, so geography is actively inferred from URL and title.
    pub fn is_document_class(&self) -> bool {
        matches!(self, RecordType::Paper)
    }

    /// Parse a comma-separated list. Blank entries are ignored; an unknown
    /// name is an error, since dropping it could turn a filter into none.
    pub fn parse_list(csv: &str) -> Result<BTreeSet<RecordType>, FactboardError> {
        csv.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                RecordType::parse(s).ok_or_else(|| {
                    FactboardError::Config(format!(
                        "unknown record type '{s}' (expected news, competitor, opportunity or paper)"
                    ))
                })
            })
            .collect()
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- RawRecord ---

/// One row of the unified source view. Read-only; owned upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub title: String,
    pub content: Option<String>,
    pub url: String,
    /// Pre-normalized URL when the view provides one.
    pub url_norm: Option<String>,
    pub source: Option<String>,
    pub record_type: String,
    pub published_at: Option<DateTime<Utc>>,
    pub src_table: String,
    pub src_id: String,
    pub row_hash: String,
    pub country_iso3: Option<String>,
    pub province_code: Option<String>,
    pub lang_hint: Option<String>,
}

impl RawRecord {
    pub fn kind(&self) -> Option<RecordType> {
        RecordType::parse(&self.record_type)
    }

    /// Upsert identity: the view's normalized URL, else our own normalization.
    pub fn identity_url(&self) -> String {
        match self.url_norm.as_deref().map(str::trim) {
            Some(norm) if !norm.is_empty() => norm.to_string(),
            _ => normalize_url(&self.url),
        }
    }

    /// `src_table:src_id`, used in log lines.
    pub fn origin(&self) -> String {
        format!("{}:{}", self.src_table, self.src_id)
    }
}

// --- EnrichmentOutput ---

/// Validated model output for one record. Only constructed at the parse
/// boundary; downstream code never sees raw model JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentOutput {
    pub summary: String,
    pub keywords: Vec<String>,
    pub llm_country: Option<String>,
    pub llm_province: Option<String>,
}

// --- Geography ---

/// Which stage of the fallback chain produced a record's final geography.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeoSource {
    Llm,
    UrlCctld,
    UrlInference,
    TitleInference,
    /// Carried through unchanged from the source view.
    Upstream,
    #[default]
    None,
}

impl GeoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeoSource::Llm => "llm",
            GeoSource::UrlCctld => "url-cctld",
            GeoSource::UrlInference => "url-inference",
            GeoSource::TitleInference => "title-inference",
            GeoSource::Upstream => "upstream",
            GeoSource::None => "none",
        }
    }
}

impl fmt::Display for GeoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GeoResolution {
    pub country_iso3: Option<String>,
    pub province_code: Option<String>,
    pub geo_source: GeoSource,
}

impl GeoResolution {
    pub fn unresolved() -> Self {
        Self::default()
    }

    /// Province vocabulary is China-only: a province needs `CHN`, and a
    /// non-China country forbids a province.
    pub fn satisfies_invariants(&self) -> bool {
        match (&self.country_iso3, &self.province_code) {
            (_, None) => true,
            (Some(c), Some(_)) => c == crate::lookup::CHINA_ISO3,
            (None, Some(_)) => false,
        }
    }
}

// --- FactEvent ---

/// Audit bag stored with every fact so a resolution can be diagnosed later
/// without calling the model again.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FactPayload {
    pub lang_hint: Option<String>,
    pub geo_source: GeoSource,
    pub llm_country: Option<String>,
    pub llm_province: Option<String>,
    pub summary_preview: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub language_corrected: bool,
    #[serde(default)]
    pub language_uncorrectable: bool,
    /// Province code the chain found but could not pair with a confirmed
    /// China country; kept here instead of on the fact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province_unconfirmed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactEvent {
    pub record_type: String,
    pub title: String,
    /// Normalized URL; the upsert key.
    pub url: String,
    pub source: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: String,
    pub keywords: Vec<String>,
    pub geo: GeoResolution,
    pub row_hash: String,
    pub src_table: String,
    pub src_id: String,
    pub payload: FactPayload,
}

// --- Source paging ---

/// Filter for one run over the unified view.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceQuery {
    /// Inclusive lower bound on `published_at`; rows without a timestamp are
    /// excluded when set.
    pub since: Option<DateTime<Utc>>,
    pub include_types: BTreeSet<RecordType>,
    /// Ignored when `include_types` is non-empty.
    pub exclude_types: BTreeSet<RecordType>,
    pub page_size: usize,
}

impl SourceQuery {
    /// Exclusions that actually apply: include wins when both are given.
    pub fn effective_exclude(&self) -> &BTreeSet<RecordType> {
        static EMPTY: BTreeSet<RecordType> = BTreeSet::new();
        if self.include_types.is_empty() {
            &self.exclude_types
        } else {
            &EMPTY
        }
    }

    /// The same predicate the store pushes down as SQL.
    pub fn admits(&self, record: &RawRecord) -> bool {
        if let Some(since) = self.since {
            match record.published_at {
                Some(ts) if ts >= since => {}
                _ => return false,
            }
        }
        let kind = record.kind();
        if !self.include_types.is_empty() {
            return kind.is_some_and(|k| self.include_types.contains(&k));
        }
        !kind.is_some_and(|k| self.exclude_types.contains(&k))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageCursor {
    pub offset: usize,
}

impl PageCursor {
    pub fn start() -> Self {
        Self::default()
    }

    pub fn advance(self, by: usize) -> Self {
        Self {
            offset: self.offset + by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// `None` once the view has no more rows for the query.
    pub next: Option<PageCursor>,
}

impl Page {
    /// Build a page from a fetched batch; a short batch ends pagination.
    pub fn from_batch(records: Vec<RawRecord>, cursor: PageCursor, page_size: usize) -> Self {
        let next = (page_size > 0 && records.len() >= page_size)
            .then(|| cursor.advance(records.len()));
        Self { records, next }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}
