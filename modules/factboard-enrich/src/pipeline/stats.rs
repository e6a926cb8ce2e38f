use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use factboard_common::{GeoSource, UpsertOutcome};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// Counters for one enrichment run, logged at the end.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    pub run_id: Uuid,
    pub pages_read: u32,
    pub pages_skipped: u32,
    pub records_seen: u32,
    pub inserted: u32,
    pub updated: u32,
    /// Rows without a usable URL.
    pub records_skipped: u32,
    /// Already stored with the same `row_hash`; not re-enriched.
    pub records_unchanged: u32,
    /// Model output unparseable or missing a summary.
    pub parse_failures: u32,
    /// Model, sink or other per-record failures.
    pub record_failures: u32,
    pub language_corrected: u32,
    pub language_uncorrectable: u32,
    pub province_unconfirmed: u32,
    pub geo_sources: BTreeMap<String, u32>,
    pub cancelled: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunStats {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            ..Default::default()
        }
    }

    pub fn record_upsert(&mut self, outcome: UpsertOutcome, geo_source: GeoSource) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
        *self
            .geo_sources
            .entry(geo_source.as_str().to_string())
            .or_default() += 1;
    }

    pub fn upserts(&self) -> u32 {
        self.inserted + self.updated
    }

    pub fn log_summary(&self) {
        info!(
            run_id = %self.run_id,
            pages_read = self.pages_read,
            pages_skipped = self.pages_skipped,
            records_seen = self.records_seen,
            inserted = self.inserted,
            updated = self.updated,
            records_skipped = self.records_skipped,
            records_unchanged = self.records_unchanged,
            parse_failures = self.parse_failures,
            record_failures = self.record_failures,
            language_corrected = self.language_corrected,
            language_uncorrectable = self.language_uncorrectable,
            province_unconfirmed = self.province_unconfirmed,
            cancelled = self.cancelled,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "Enrichment run complete"
        );
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Enrichment Run {} ===", self.run_id)?;
        writeln!(f, "Pages read:       {}", self.pages_read)?;
        writeln!(f, "Pages skipped:    {}", self.pages_skipped)?;
        writeln!(f, "Records seen:     {}", self.records_seen)?;
        writeln!(f, "Inserted:         {}", self.inserted)?;
        writeln!(f, "Updated:          {}", self.updated)?;
        writeln!(f, "Skipped (no url): {}", self.records_skipped)?;
        writeln!(f, "Unchanged:        {}", self.records_unchanged)?;
        writeln!(f, "Parse failures:   {}", self.parse_failures)?;
        writeln!(f, "Record failures:  {}", self.record_failures)?;
        writeln!(f, "Language fixed:   {}", self.language_corrected)?;
        writeln!(f, "Language unfixed: {}", self.language_uncorrectable)?;
        writeln!(f, "Geo sources:")?;
        for (source, count) in &self.geo_sources {
            writeln!(f, "  {source:<16} {count}")?;
        }
        if self.cancelled {
            writeln!(f, "Run was cancelled before completion.")?;
        }
        write!(f, "Elapsed: {:.1}s", self.elapsed.as_secs_f64())
    }
}
