//! Lazy, restartable page reader over a [`RecordSource`]. Each page fetch is
//! retried per policy; a page that still fails is reported as skipped and
//! reading moves on to the next offset.

use std::sync::Arc;

use factboard_common::{Pacer, PageCursor, RawRecord, RetryPolicy, SourceQuery};
use tracing::{error, info, warn};

use crate::traits::RecordSource;

#[derive(Debug)]
pub enum PageOutcome {
    Records(Vec<RawRecord>),
    /// The page at `offset` could not be read; later pages still follow.
    Skipped { offset: usize, error: String },
    /// No more pages: end of view, page limit, or too many skips in a row.
    Exhausted,
}

pub struct SourceReader {
    source: Arc<dyn RecordSource>,
    query: SourceQuery,
    cursor: Option<PageCursor>,
    retry: RetryPolicy,
    pacer: Pacer,
    max_pages: usize,
    max_consecutive_skips: usize,
    pages_attempted: usize,
    consecutive_skips: usize,
}

impl SourceReader {
    pub fn new(
        source: Arc<dyn RecordSource>,
        query: SourceQuery,
        retry: RetryPolicy,
        pacer: Pacer,
        max_pages: usize,
        max_consecutive_skips: usize,
    ) -> Self {
        Self {
            source,
            query,
            cursor: Some(PageCursor::start()),
            retry,
            pacer,
            max_pages,
            max_consecutive_skips: max_consecutive_skips.max(1),
            pages_attempted: 0,
            consecutive_skips: 0,
        }
    }

    /// Resume from an arbitrary cursor.
    pub fn starting_at(mut self, cursor: PageCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn cursor(&self) -> Option<PageCursor> {
        self.cursor
    }

    pub fn pages_attempted(&self) -> usize {
        self.pages_attempted
    }

    /// Fetch the next page. A failed page, whether its retries ran out or the
    /// error was terminal, is reported as `Skipped` and reading moves on.
    pub async fn next_page(&mut self) -> PageOutcome {
        let Some(cursor) = self.cursor else {
            return PageOutcome::Exhausted;
        };
        if self.max_pages > 0 && self.pages_attempted >= self.max_pages {
            info!(max_pages = self.max_pages, "Reached page limit");
            self.cursor = None;
            return PageOutcome::Exhausted;
        }
        if self.pages_attempted > 0 {
            self.pacer.tick().await;
        }
        self.pages_attempted += 1;

        let source = &self.source;
        let query = &self.query;
        let fetched = self
            .retry
            .run("source_page", || source.fetch_page(query, cursor))
            .await;

        match fetched {
            Ok(page) => {
                self.consecutive_skips = 0;
                self.cursor = page.next;
                if page.records.is_empty() {
                    self.cursor = None;
                    return PageOutcome::Exhausted;
                }
                PageOutcome::Records(page.records)
            }
            Err(e) => {
                let exhausted = e.is_exhausted();
                self.consecutive_skips += 1;
                self.cursor = Some(cursor.advance(self.query.page_size.max(1)));
                if exhausted {
                    warn!(
                        offset = cursor.offset,
                        consecutive_skips = self.consecutive_skips,
                        error = %e,
                        "Page retries exhausted; skipping page"
                    );
                } else {
                    error!(
                        offset = cursor.offset,
                        consecutive_skips = self.consecutive_skips,
                        error = %e,
                        "Page failed with a non-retryable error; skipping page"
                    );
                }
                if self.consecutive_skips >= self.max_consecutive_skips {
                    error!(
                        consecutive_skips = self.consecutive_skips,
                        "Too many consecutive skipped pages; source looks unavailable"
                    );
                    self.cursor = None;
                }
                PageOutcome::Skipped {
                    offset: cursor.offset,
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, MockSource};
    use std::time::Duration;

    fn reader(source: MockSource, max_pages: usize) -> SourceReader {
        let query = SourceQuery {
            page_size: 2,
            ..Default::default()
        };
        SourceReader::new(
            Arc::new(source),
            query,
            RetryPolicy::linear(2, Duration::from_millis(10)),
            Pacer::default(),
            max_pages,
            3,
        )
    }

    fn five() -> MockSource {
        MockSource::new(
            (1..=5)
                .map(|i| record(i, "news", "t", &format!("https://example.com/{i}")))
                .collect(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn page_limit_stops_reading() {
        let mut reader = reader(five(), 2);
        assert!(matches!(reader.next_page().await, PageOutcome::Records(r) if r.len() == 2));
        assert!(matches!(reader.next_page().await, PageOutcome::Records(r) if r.len() == 2));
        assert!(matches!(reader.next_page().await, PageOutcome::Exhausted));
        assert_eq!(reader.pages_attempted(), 2);
        assert_eq!(reader.cursor(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_from_cursor() {
        let mut reader = reader(five(), 0).starting_at(PageCursor { offset: 4 });
        match reader.next_page().await {
            PageOutcome::Records(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].src_id, "1");
            }
            other => panic!("expected records, got {other:?}"),
        }
        assert!(matches!(reader.next_page().await, PageOutcome::Exhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_page_is_skipped_and_cursor_advances() {
        let mut reader = reader(five().dead_at(0), 0);
        match reader.next_page().await {
            PageOutcome::Skipped { offset, .. } => assert_eq!(offset, 0),
            other => panic!("expected skip, got {other:?}"),
        }
        assert_eq!(reader.cursor(), Some(PageCursor { offset: 2 }));
        assert!(matches!(reader.next_page().await, PageOutcome::Records(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_page_error_is_skipped_not_returned() {
        let mut reader = reader(five().broken_at(2), 0);
        assert!(matches!(reader.next_page().await, PageOutcome::Records(_)));
        match reader.next_page().await {
            PageOutcome::Skipped { offset, error } => {
                assert_eq!(offset, 2);
                assert!(error.contains("22P02"));
            }
            other => panic!("expected skip, got {other:?}"),
        }
        assert!(matches!(reader.next_page().await, PageOutcome::Records(r) if r.len() == 1));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_errors_count_toward_consecutive_skips() {
        let source = five().broken_at(0).dead_at(2).broken_at(4);
        let mut reader = reader(source, 0);
        for _ in 0..3 {
            assert!(matches!(reader.next_page().await, PageOutcome::Skipped { .. }));
        }
        assert_eq!(reader.cursor(), None);
        assert!(matches!(reader.next_page().await, PageOutcome::Exhausted));
    }
}
