// Test doubles for the enrichment pipeline.
//
// Three mocks matching the three trait boundaries:
// - MockSource (RecordSource): in-memory view with scripted page failures
// - MockCompleter (TextCompleter): scripted replies, records every request
// - MockSink (FactSink): in-memory fact table keyed by url
//
// Plus fixture dictionaries and a RawRecord builder.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use factboard_common::{
    CountryEntry, CountryTable, FactEvent, FactboardError, GeoLookups, Page, PageCursor,
    ProvinceEntry, ProvinceTable, RawRecord, SourceQuery, UpsertOutcome,
};
use serde_json::json;

use crate::traits::{CompletionRequest, FactSink, RecordSource, TextCompleter};

// ---------------------------------------------------------------------------
// Fixture dictionaries
// ---------------------------------------------------------------------------

/// Province-level divisions with their GB/T 2260 codes.
pub const PROVINCES: &[(&str, &str)] = &[
    ("北京市", "110000"),
    ("天津市", "120000"),
    ("河北省", "130000"),
    ("山西省", "140000"),
    ("内蒙古自治区", "150000"),
    ("辽宁省", "210000"),
    ("吉林省", "220000"),
    ("黑龙江省", "230000"),
    ("上海市", "310000"),
    ("江苏省", "320000"),
    ("浙江省", "330000"),
    ("安徽省", "340000"),
    ("福建省", "350000"),
    ("江西省", "360000"),
    ("山东省", "370000"),
    ("河南省", "410000"),
    ("湖北省", "420000"),
    ("湖南省", "430000"),
    ("广东省", "440000"),
    ("广西壮族自治区", "450000"),
    ("海南省", "460000"),
    ("重庆市", "500000"),
    ("四川省", "510000"),
    ("贵州省", "520000"),
    ("云南省", "530000"),
    ("西藏自治区", "540000"),
    ("陕西省", "610000"),
    ("甘肃省", "620000"),
    ("青海省", "630000"),
    ("宁夏回族自治区", "640000"),
    ("新疆维吾尔自治区", "650000"),
    ("台湾省", "710000"),
    ("香港特别行政区", "810000"),
    ("澳门特别行政区", "820000"),
];

pub const COUNTRIES: &[(&str, &str, &str)] = &[
    ("CHN", "China", "中国"),
    ("USA", "United States", "美国"),
    ("GBR", "United Kingdom", "英国"),
    ("DEU", "Germany", "德国"),
    ("JPN", "Japan", "日本"),
    ("KOR", "South Korea", "韩国"),
    ("FRA", "France", "法国"),
    ("SGP", "Singapore", "新加坡"),
];

pub fn fixture_lookups() -> GeoLookups {
    let provinces = ProvinceTable::new(PROVINCES.iter().map(|(name, code)| ProvinceEntry {
        name_zh: name.to_string(),
        code: code.to_string(),
    }));
    let countries = CountryTable::new(COUNTRIES.iter().map(|(iso3, en, zh)| CountryEntry {
        iso3: iso3.to_string(),
        name_en: en.to_string(),
        name_zh: Some(zh.to_string()),
    }));
    GeoLookups::new(provinces, countries)
}

// ---------------------------------------------------------------------------
// RawRecord builder
// ---------------------------------------------------------------------------

pub fn ts(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, 8, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A record with sensible defaults; adjust fields with struct update syntax.
pub fn record(id: u32, record_type: &str, title: &str, url: &str) -> RawRecord {
    RawRecord {
        title: title.to_string(),
        content: Some(format!("{title}。正文内容。")),
        url: url.to_string(),
        url_norm: None,
        source: Some("test".to_string()),
        record_type: record_type.to_string(),
        published_at: Some(ts(1 + id % 28)),
        src_table: format!("src_{record_type}"),
        src_id: id.to_string(),
        row_hash: format!("hash-{id}"),
        country_iso3: None,
        province_code: None,
        lang_hint: None,
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

/// In-memory unified view. Applies the query predicate and the view's
/// ordering, then pages by offset. Failures are scripted per offset.
pub struct MockSource {
    records: Vec<RawRecord>,
    /// offset → remaining transient failures before the page succeeds.
    transient_failures: Mutex<HashMap<usize, u32>>,
    /// Offsets that always fail transiently.
    dead_offsets: Vec<usize>,
    /// Offsets that fail with a non-retryable error.
    broken_offsets: Vec<usize>,
    fetches: AtomicUsize,
    probe_fails: bool,
}

impl MockSource {
    pub fn new(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            transient_failures: Mutex::new(HashMap::new()),
            dead_offsets: Vec::new(),
            broken_offsets: Vec::new(),
            fetches: AtomicUsize::new(0),
            probe_fails: false,
        }
    }

    /// Fail the page at `offset` transiently `times` times, then succeed.
    pub fn failing_at(self, offset: usize, times: u32) -> Self {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(offset, times);
        self
    }

    /// Fail the page at `offset` transiently forever.
    pub fn dead_at(mut self, offset: usize) -> Self {
        self.dead_offsets.push(offset);
        self
    }

    /// Fail the page at `offset` with a terminal database error.
    pub fn broken_at(mut self, offset: usize) -> Self {
        self.broken_offsets.push(offset);
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.probe_fails = true;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn ordered(&self, query: &SourceQuery) -> Vec<RawRecord> {
        let mut rows: Vec<RawRecord> = self
            .records
            .iter()
            .filter(|r| query.admits(r))
            .cloned()
            .collect();
        // published_at DESC NULLS LAST, src_id DESC
        rows.sort_by(|a, b| match (a.published_at, b.published_at) {
            (Some(x), Some(y)) => y.cmp(&x).then_with(|| b.src_id.cmp(&a.src_id)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.src_id.cmp(&a.src_id),
        });
        rows
    }
}

#[async_trait]
impl RecordSource for MockSource {
    async fn fetch_page(
        &self,
        query: &SourceQuery,
        cursor: PageCursor,
    ) -> Result<Page, FactboardError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if self.broken_offsets.contains(&cursor.offset) {
            return Err(FactboardError::Database(
                "22P02: invalid input syntax for type timestamp".into(),
            ));
        }
        if self.dead_offsets.contains(&cursor.offset) {
            return Err(FactboardError::TransientConnection(
                "Server disconnected without sending a response".into(),
            ));
        }
        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&cursor.offset) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FactboardError::TransientConnection("connection reset".into()));
                }
            }
        }

        let rows: Vec<RawRecord> = self
            .ordered(query)
            .into_iter()
            .skip(cursor.offset)
            .take(query.page_size)
            .collect();
        Ok(Page::from_batch(rows, cursor, query.page_size))
    }

    async fn probe(&self) -> Result<(), FactboardError> {
        if self.probe_fails {
            Err(FactboardError::Database("relation does not exist".into()))
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// MockCompleter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    /// Connection-level failure; retried by the engine.
    Transient,
    /// Auth-style failure; terminal.
    Rejected,
}

/// Scripted completer. Replies are consumed in order; once the script runs
/// out, every call gets a Chinese summary echoing the request title.
pub struct MockCompleter {
    script: Mutex<VecDeque<MockReply>>,
    by_title: HashMap<String, String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockCompleter {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            by_title: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue the next reply.
    pub fn then(self, reply: MockReply) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn then_json(self, value: serde_json::Value) -> Self {
        self.then(MockReply::Text(value.to_string()))
    }

    /// Fixed reply for summary requests whose payload title matches.
    pub fn on_title(mut self, title: &str, value: serde_json::Value) -> Self {
        self.by_title.insert(title.to_string(), value.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn default_reply(request: &CompletionRequest) -> String {
        let payload: serde_json::Value =
            serde_json::from_str(&request.user).unwrap_or(serde_json::Value::Null);
        let title = payload["title"].as_str().unwrap_or("未知");
        json!({
            "summary": format!("{title}的中文摘要"),
            "keywords": ["测试"],
            "country": null,
            "province": null,
        })
        .to_string()
    }
}

impl Default for MockCompleter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextCompleter for MockCompleter {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, FactboardError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(reply) = self.script.lock().unwrap().pop_front() {
            return match reply {
                MockReply::Text(text) => Ok(text),
                MockReply::Transient => Err(FactboardError::TransientConnection("HTTP 503".into())),
                MockReply::Rejected => Err(FactboardError::Llm("HTTP 401: invalid api key".into())),
            };
        }

        let title = serde_json::from_str::<serde_json::Value>(&request.user)
            .ok()
            .and_then(|v| v["title"].as_str().map(str::to_string));
        if let Some(reply) = title.and_then(|t| self.by_title.get(&t)) {
            return Ok(reply.clone());
        }
        Ok(Self::default_reply(request))
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

/// In-memory fact table with a unique key on `url`.
#[derive(Default)]
pub struct MockSink {
    rows: Mutex<HashMap<String, FactEvent>>,
    upserts: AtomicUsize,
    missing_table: bool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn without_table() -> Self {
        Self {
            missing_table: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, url: &str) -> Option<FactEvent> {
        self.rows.lock().unwrap().get(url).cloned()
    }

    pub fn all(&self) -> Vec<FactEvent> {
        let mut rows: Vec<FactEvent> = self.rows.lock().unwrap().values().cloned().collect();
        rows.sort_by(|a, b| a.url.cmp(&b.url));
        rows
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FactSink for MockSink {
    async fn upsert(&self, fact: &FactEvent) -> Result<UpsertOutcome, FactboardError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let previous = self
            .rows
            .lock()
            .unwrap()
            .insert(fact.url.clone(), fact.clone());
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn stored_hashes(&self, urls: &[String]) -> Result<HashMap<String, String>, FactboardError> {
        let rows = self.rows.lock().unwrap();
        Ok(urls
            .iter()
            .filter_map(|url| rows.get(url).map(|fact| (url.clone(), fact.row_hash.clone())))
            .collect())
    }

    async fn ensure_ready(&self) -> Result<(), FactboardError> {
        if self.missing_table {
            Err(FactboardError::Config("fact table 'fact_events' does not exist".into()))
        } else {
            Ok(())
        }
    }
}

/// Shared handles, for tests that inspect the doubles after a run.
pub struct Harness {
    pub source: Arc<MockSource>,
    pub completer: Arc<MockCompleter>,
    pub sink: Arc<MockSink>,
    pub lookups: Arc<GeoLookups>,
}

impl Harness {
    pub fn new(source: MockSource, completer: MockCompleter) -> Self {
        Self {
            source: Arc::new(source),
            completer: Arc::new(completer),
            sink: Arc::new(MockSink::new()),
            lookups: Arc::new(fixture_lookups()),
        }
    }

    pub fn pipeline(&self, options: factboard_common::RunOptions) -> crate::Pipeline {
        crate::Pipeline::new(
            self.source.clone(),
            self.completer.clone(),
            self.sink.clone(),
            self.lookups.clone(),
            options,
        )
    }
}
