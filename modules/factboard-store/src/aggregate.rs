//! Paginated group counts over the fact store. Only the group column is
//! selected; counting happens in memory so the query stays a plain SELECT.

use std::collections::BTreeMap;
use std::future::Future;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use factboard_common::{FactboardError, Pacer, RetryPolicy};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{error, info, warn};
use typed_builder::TypedBuilder;

use crate::cache::{CacheKey, CacheStore};
use crate::error::db_error;
use crate::ident::Ident;

pub const DEFAULT_AGG_PAGE_SIZE: usize = 5000;

#[derive(Debug, Clone, TypedBuilder)]
pub struct GroupCountQuery {
    pub table: Ident,
    pub group_field: Ident,
    pub time_field: Ident,
    /// Half-open window `[start, end)`.
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Equality filters, ANDed.
    #[builder(default)]
    pub filters: Vec<(Ident, String)>,
    #[builder(default = DEFAULT_AGG_PAGE_SIZE)]
    pub page_size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupCounts {
    pub counts: BTreeMap<String, u64>,
    pub pages: usize,
    pub skipped_pages: usize,
}

impl GroupCounts {
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    fn tally<I: IntoIterator<Item = Option<String>>>(&mut self, values: I) {
        for value in values.into_iter().flatten() {
            let key = value.trim();
            if key.is_empty() || key.eq_ignore_ascii_case("null") {
                continue;
            }
            *self.counts.entry(key.to_string()).or_default() += 1;
        }
    }
}

/// Shared paging loop: retry each page per `retry`, skip a page whose
/// retries are exhausted, pace between pages, and give up after
/// `max_consecutive_skips` skipped pages in a row.
pub async fn count_pages<F, Fut>(
    label: &str,
    page_size: usize,
    retry: &RetryPolicy,
    mut pacer: Pacer,
    max_consecutive_skips: usize,
    mut fetch: F,
) -> Result<GroupCounts, FactboardError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<Option<String>>, FactboardError>>,
{
    let page_size = page_size.max(1);
    let mut result = GroupCounts::default();
    let mut offset = 0usize;
    let mut consecutive_skips = 0usize;

    loop {
        match retry.run(label, || fetch(offset)).await {
            Ok(values) => {
                consecutive_skips = 0;
                result.pages += 1;
                let fetched = values.len();
                result.tally(values);
                if fetched < page_size {
                    break;
                }
            }
            Err(e) if e.is_exhausted() => {
                result.skipped_pages += 1;
                consecutive_skips += 1;
                warn!(operation = label, offset, error = %e, "Page retries exhausted; skipping page");
                if consecutive_skips >= max_consecutive_skips.max(1) {
                    error!(
                        operation = label,
                        consecutive_skips, "Too many consecutive skipped pages; stopping"
                    );
                    break;
                }
            }
            Err(e) => return Err(e.into_inner()),
        }
        offset += page_size;
        pacer.tick().await;
    }

    Ok(result)
}

fn select_group_page(query: &GroupCountQuery, offset: usize) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT ");
    qb.push(query.group_field.as_str())
        .push("::text FROM ")
        .push(query.table.as_str())
        .push(" WHERE ")
        .push(query.time_field.as_str())
        .push(" >= ")
        .push_bind(query.start)
        .push(" AND ")
        .push(query.time_field.as_str())
        .push(" < ")
        .push_bind(query.end);
    for (column, value) in &query.filters {
        qb.push(" AND ")
            .push(column.as_str())
            .push(" = ")
            .push_bind(value.clone());
    }
    qb.push(" ORDER BY ")
        .push(query.group_field.as_str())
        .push(" ASC OFFSET ")
        .push_bind(offset as i64)
        .push(" LIMIT ")
        .push_bind(query.page_size.max(1) as i64);
    qb
}

pub async fn group_count(
    pool: &PgPool,
    query: &GroupCountQuery,
    retry: &RetryPolicy,
    pacer: Pacer,
    max_consecutive_skips: usize,
) -> Result<GroupCounts, FactboardError> {
    let label = format!("group_count:{}.{}", query.table, query.group_field);
    let counts = count_pages(
        &label,
        query.page_size,
        retry,
        pacer,
        max_consecutive_skips,
        |offset| async move {
            let rows: Vec<(Option<String>,)> = select_group_page(query, offset)
                .build_query_as()
                .fetch_all(pool)
                .await
                .map_err(db_error)?;
            Ok(rows.into_iter().map(|(v,)| v).collect())
        },
    )
    .await?;

    info!(
        table = %query.table,
        group = %query.group_field,
        groups = counts.counts.len(),
        total = counts.total(),
        pages = counts.pages,
        skipped_pages = counts.skipped_pages,
        "Group count complete"
    );
    Ok(counts)
}

/// Fact counts per province for one UTC calendar day, cached by date.
pub async fn province_counts_for_day(
    pool: &PgPool,
    cache: &CacheStore,
    fact_table: &Ident,
    date: NaiveDate,
    retry: &RetryPolicy,
    ttl: Duration,
) -> Result<GroupCounts, FactboardError> {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    let query = GroupCountQuery::builder()
        .table(fact_table.clone())
        .group_field(Ident::parse("province_code")?)
        .time_field(Ident::parse("published_at")?)
        .start(start)
        .end(start + Duration::days(1))
        .build();

    let entry = cache
        .get_or_insert_with(&CacheKey::Date(date), ttl, || async {
            let counts = group_count(pool, &query, retry, Pacer::default(), 3).await?;
            serde_json::to_value(&counts)
                .map_err(|e| FactboardError::Database(format!("cache encode: {e}")))
        })
        .await?;

    serde_json::from_value(entry.payload)
        .map_err(|e| FactboardError::Database(format!("cache decode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn values(codes: &[&str]) -> Vec<Option<String>> {
        codes.iter().map(|c| Some(c.to_string())).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn counts_across_pages_and_ignores_blanks() {
        let pages = vec![
            values(&["330000", "330000"]),
            vec![Some("440000".into()), None],
            vec![Some("null".into())],
        ];
        let result = count_pages(
            "test",
            2,
            &RetryPolicy::default(),
            Pacer::default(),
            3,
            |offset| {
                let page = pages.get(offset / 2).cloned().unwrap_or_default();
                async move { Ok(page) }
            },
        )
        .await
        .unwrap();

        // The third page is short, so paging stops there.
        assert_eq!(result.pages, 3);
        assert_eq!(result.skipped_pages, 0);
        assert_eq!(result.counts.get("330000"), Some(&2));
        assert_eq!(result.counts.get("440000"), Some(&1));
        assert_eq!(result.total(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_page_is_skipped_and_paging_continues() {
        let calls = AtomicUsize::new(0);
        let started = tokio::time::Instant::now();
        let result = count_pages(
            "test",
            2,
            &RetryPolicy::default(),
            Pacer::new(5, StdDuration::from_millis(100)),
            3,
            |offset| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    match offset {
                        0 => Ok(values(&["110000", "330000"])),
                        2 => Err(FactboardError::TransientConnection("reset".into())),
                        _ => Ok(values(&["330000"])),
                    }
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(result.skipped_pages, 1);
        assert_eq!(result.pages, 2);
        assert_eq!(result.counts.get("330000"), Some(&2));
        assert_eq!(result.counts.get("110000"), Some(&1));
        // 1 + 3 attempts + 1
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(started.elapsed(), StdDuration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_consecutive_skips() {
        let result = count_pages(
            "test",
            2,
            &RetryPolicy::linear(1, StdDuration::from_millis(1)),
            Pacer::default(),
            2,
            |_| async { Err(FactboardError::TransientConnection("down".into())) },
        )
        .await
        .unwrap();

        assert_eq!(result.skipped_pages, 2);
        assert_eq!(result.total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_page_error_aborts() {
        let result = count_pages(
            "test",
            2,
            &RetryPolicy::default(),
            Pacer::default(),
            3,
            |_| async { Err(FactboardError::Database("42703: column does not exist".into())) },
        )
        .await;

        assert!(matches!(result, Err(FactboardError::Database(_))));
    }

    #[test]
    fn group_sql_selects_only_the_group_column() {
        let query = GroupCountQuery::builder()
            .table(Ident::parse("fact_events").unwrap())
            .group_field(Ident::parse("province_code").unwrap())
            .time_field(Ident::parse("published_at").unwrap())
            .start(Utc::now())
            .end(Utc::now())
            .filters(vec![(Ident::parse("country_iso3").unwrap(), "CHN".into())])
            .build();
        let qb = select_group_page(&query, 0);
        assert_eq!(
            qb.sql(),
            "SELECT province_code::text FROM fact_events WHERE published_at >= $1 \
             AND published_at < $2 AND country_iso3 = $3 ORDER BY province_code ASC OFFSET $4 LIMIT $5"
        );
    }
}
