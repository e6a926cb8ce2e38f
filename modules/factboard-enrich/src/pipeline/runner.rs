//! Run orchestrator: read → enrich → geocode → assemble → upsert, one record
//! at a time, with cancellation checked between pages and between records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use factboard_common::{
    preview, FactEvent, FactboardError, GeoLookups, RawRecord, RunOptions, SourceQuery, Transient,
    UpsertOutcome,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::assembler::assemble;
use super::enrichment::EnrichmentEngine;
use super::geocode::{resolve, GeoInputs};
use super::reader::{PageOutcome, SourceReader};
use super::stats::RunStats;
use crate::traits::{FactSink, RecordSource, TextCompleter};

/// How a single record ended.
#[derive(Debug)]
pub enum RecordResult {
    Upserted(FactEvent, UpsertOutcome),
    /// Not processed (no URL).
    Skipped,
}

pub struct Pipeline {
    source: Arc<dyn RecordSource>,
    sink: Arc<dyn FactSink>,
    lookups: Arc<GeoLookups>,
    engine: EnrichmentEngine,
    options: RunOptions,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn RecordSource>,
        completer: Arc<dyn TextCompleter>,
        sink: Arc<dyn FactSink>,
        lookups: Arc<GeoLookups>,
        options: RunOptions,
    ) -> Self {
        let engine = EnrichmentEngine::new(
            completer,
            options.llm_retry,
            options.content_chars,
            options.log_llm,
        );
        Self {
            source,
            sink,
            lookups,
            engine,
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn query(&self) -> SourceQuery {
        SourceQuery {
            since: self.options.since,
            include_types: self.options.include_types.clone(),
            exclude_types: self.options.exclude_types.clone(),
            page_size: self.options.page_size,
        }
    }

    /// Startup checks; failing here aborts before any model call is spent.
    pub async fn preflight(&self) -> Result<(), FactboardError> {
        self.options
            .retry
            .run("source_probe", || self.source.probe())
            .await
            .map_err(|e| e.into_inner())?;
        self.sink.ensure_ready().await
    }

    /// Enrich, geocode and upsert one record.
    pub async fn process_record(&self, record: &RawRecord) -> Result<RecordResult, FactboardError> {
        let no_norm = record.url_norm.as_deref().map_or(true, |u| u.trim().is_empty());
        if record.url.trim().is_empty() && no_norm {
            return Ok(RecordResult::Skipped);
        }

        let enriched = self.engine.enrich(record).await?;

        let geo_url = if record.url.trim().is_empty() {
            record.url_norm.as_deref().unwrap_or_default()
        } else {
            record.url.as_str()
        };
        let inputs = GeoInputs {
            record_type: record.kind(),
            url: geo_url,
            title: &record.title,
            upstream_country: record.country_iso3.as_deref(),
            upstream_province: record.province_code.as_deref(),
            llm_country: enriched.output.llm_country.as_deref(),
            llm_province: enriched.output.llm_province.as_deref(),
            geo_by_llm: self.options.geo_by_llm,
        };
        let geo = resolve(&inputs, &self.lookups);

        if self.options.log_geo {
            info!(
                origin = %record.origin(),
                country = geo.resolution.country_iso3.as_deref().unwrap_or("-"),
                province = geo.resolution.province_code.as_deref().unwrap_or("-"),
                geo_source = %geo.resolution.geo_source,
                province_unconfirmed = geo.province_unconfirmed.as_deref().unwrap_or("-"),
                "Geo resolved"
            );
        }

        let fact = assemble(record, &enriched, geo, self.options.summary_chars);
        let outcome = self
            .options
            .retry
            .run("fact_upsert", || self.sink.upsert(&fact))
            .await
            .map_err(|e| e.into_inner())?;

        Ok(RecordResult::Upserted(fact, outcome))
    }

    /// Run until the view is exhausted, the page limit is hit, or `cancel`
    /// fires. Per-record and per-page failures are counted, not returned.
    pub async fn run(&self, cancel: CancellationToken) -> RunStats {
        let started = Instant::now();
        let mut stats = RunStats::new(Uuid::new_v4());
        let mut reader = SourceReader::new(
            self.source.clone(),
            self.query(),
            self.options.retry,
            self.options.pacer.clone(),
            self.options.max_pages,
            self.options.max_consecutive_skips,
        );

        info!(
            run_id = %stats.run_id,
            since = ?self.options.since,
            page_size = self.options.page_size,
            max_pages = self.options.max_pages,
            geo_by_llm = self.options.geo_by_llm,
            only_changed = self.options.only_changed,
            "Enrichment run starting"
        );

        'pages: loop {
            if cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let records = match reader.next_page().await {
                PageOutcome::Records(records) => records,
                PageOutcome::Skipped { .. } => {
                    stats.pages_skipped += 1;
                    continue;
                }
                PageOutcome::Exhausted => break,
            };
            stats.pages_read += 1;
            let stored = self.stored_hashes(&records).await;

            for record in &records {
                if cancel.is_cancelled() {
                    stats.cancelled = true;
                    break 'pages;
                }
                stats.records_seen += 1;
                if is_unchanged(record, &stored) {
                    stats.records_unchanged += 1;
                    continue;
                }
                self.process_counted(record, &mut stats).await;

                if !self.options.llm_pause.is_zero() {
                    let interrupted = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(self.options.llm_pause) => false,
                    };
                    if interrupted {
                        stats.cancelled = true;
                        break 'pages;
                    }
                }
            }
        }

        if stats.cancelled {
            warn!(run_id = %stats.run_id, "Run cancelled; stopping between records");
        }
        stats.elapsed = started.elapsed();
        stats.log_summary();
        stats
    }

    /// Stored hashes for a page when only changed rows are wanted. A failed
    /// lookup falls back to processing the whole page.
    async fn stored_hashes(&self, records: &[RawRecord]) -> HashMap<String, String> {
        if !self.options.only_changed {
            return HashMap::new();
        }
        let urls: Vec<String> = records.iter().map(RawRecord::identity_url).collect();
        match self
            .options
            .retry
            .run("stored_hashes", || self.sink.stored_hashes(&urls))
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "Stored hash lookup failed; processing the whole page");
                HashMap::new()
            }
        }
    }

    async fn process_counted(&self, record: &RawRecord, stats: &mut RunStats) {
        match self.process_record(record).await {
            Ok(RecordResult::Upserted(fact, outcome)) => {
                stats.record_upsert(outcome, fact.geo.geo_source);
                if fact.payload.language_corrected {
                    stats.language_corrected += 1;
                }
                if fact.payload.language_uncorrectable {
                    stats.language_uncorrectable += 1;
                }
                if fact.payload.province_unconfirmed.is_some() {
                    stats.province_unconfirmed += 1;
                }
                info!(
                    record_type = %fact.record_type,
                    title = %preview(&fact.title, 40),
                    outcome = ?outcome,
                    "Upserted fact"
                );
            }
            Ok(RecordResult::Skipped) => {
                stats.records_skipped += 1;
                warn!(origin = %record.origin(), "Record has no URL; skipped");
            }
            Err(FactboardError::LlmResponseParse(reason)) => {
                stats.parse_failures += 1;
                warn!(origin = %record.origin(), reason = %reason, "Model output rejected; record skipped");
            }
            Err(e) => {
                stats.record_failures += 1;
                warn!(
                    origin = %record.origin(),
                    transient = e.is_transient(),
                    error = %e,
                    "Record failed"
                );
            }
        }
    }
}

fn is_unchanged(record: &RawRecord, stored: &HashMap<String, String>) -> bool {
    !record.row_hash.is_empty()
        && stored
            .get(&record.identity_url())
            .is_some_and(|hash| *hash == record.row_hash)
}
