//! Read side: paged, filtered access to the unified source view.

use chrono::{DateTime, Utc};
use factboard_common::{FactboardError, Page, PageCursor, RawRecord, SourceQuery};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use crate::error::db_error;
use crate::ident::Ident;

pub const DEFAULT_VIEW: &str = "v_events_ready";

#[derive(Debug, sqlx::FromRow)]
struct SourceRow {
    title: Option<String>,
    content: Option<String>,
    url: Option<String>,
    url_norm: Option<String>,
    source: Option<String>,
    record_type: Option<String>,
    published_at: Option<DateTime<Utc>>,
    src_table: Option<String>,
    src_id: Option<String>,
    row_hash: Option<String>,
    country_iso3: Option<String>,
    province_code: Option<String>,
    lang_hint: Option<String>,
}

impl From<SourceRow> for RawRecord {
    fn from(row: SourceRow) -> Self {
        RawRecord {
            title: row.title.unwrap_or_default(),
            content: row.content,
            url: row.url.unwrap_or_default(),
            url_norm: row.url_norm,
            source: row.source,
            record_type: row.record_type.unwrap_or_default(),
            published_at: row.published_at,
            src_table: row.src_table.unwrap_or_default(),
            src_id: row.src_id.unwrap_or_default(),
            row_hash: row.row_hash.unwrap_or_default(),
            country_iso3: row.country_iso3.filter(|s| !s.trim().is_empty()),
            province_code: row.province_code.filter(|s| !s.trim().is_empty()),
            lang_hint: row.lang_hint,
        }
    }
}

/// The unified view is owned upstream; this type only ever reads it.
#[derive(Clone)]
pub struct PgRecordSource {
    pool: PgPool,
    view: Ident,
}

impl PgRecordSource {
    pub fn new(pool: PgPool, view: Ident) -> Self {
        Self { pool, view }
    }

    pub fn view(&self) -> &Ident {
        &self.view
    }

    /// One page in `published_at DESC NULLS LAST, src_id DESC` order.
    pub async fn fetch_page(
        &self,
        query: &SourceQuery,
        cursor: PageCursor,
    ) -> Result<Page, FactboardError> {
        let mut qb = select_page(&self.view, query, cursor);
        let rows: Vec<SourceRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        debug!(
            view = %self.view,
            offset = cursor.offset,
            rows = rows.len(),
            "Fetched source page"
        );

        let records = rows.into_iter().map(RawRecord::from).collect();
        Ok(Page::from_batch(records, cursor, query.page_size))
    }

    /// Cheap reachability check run before a batch starts.
    pub async fn probe(&self) -> Result<(), FactboardError> {
        let sql = format!("SELECT 1 FROM {} LIMIT 1", self.view);
        sqlx::query(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

fn select_page<'a>(
    view: &Ident,
    query: &'a SourceQuery,
    cursor: PageCursor,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT title, content, url, url_norm, source, type AS record_type, published_at, \
         src_table, src_id::text AS src_id, row_hash, country_iso3, province_code::text AS province_code, \
         lang_hint FROM ",
    );
    qb.push(view.as_str());
    qb.push(" WHERE TRUE");

    if let Some(since) = query.since {
        qb.push(" AND published_at >= ").push_bind(since);
    }

    if !query.include_types.is_empty() {
        let include: Vec<String> = query.include_types.iter().map(|t| t.to_string()).collect();
        qb.push(" AND type = ANY(").push_bind(include).push(")");
    } else if !query.exclude_types.is_empty() {
        let exclude: Vec<String> = query.exclude_types.iter().map(|t| t.to_string()).collect();
        qb.push(" AND (type IS NULL OR NOT (type = ANY(")
            .push_bind(exclude)
            .push(")))");
    }

    qb.push(" ORDER BY published_at DESC NULLS LAST, src_id DESC");
    qb.push(" OFFSET ").push_bind(cursor.offset as i64);
    qb.push(" LIMIT ").push_bind(query.page_size.max(1) as i64);
    qb
}

#[cfg(test)]
mod tests {
    use super::*;
    use factboard_common::RecordType;

    #[test]
    fn page_sql_pushes_filters_down() {
        let view = Ident::parse("v_events_ready").unwrap();
        let query = SourceQuery {
            since: Some(Utc::now()),
            include_types: RecordType::parse_list("paper").unwrap(),
            exclude_types: RecordType::parse_list("news").unwrap(),
            page_size: 20,
        };
        let qb = select_page(&view, &query, PageCursor { offset: 40 });
        let sql = qb.sql();
        assert!(sql.contains("FROM v_events_ready WHERE TRUE"));
        assert!(sql.contains("published_at >= $1"));
        assert!(sql.contains("type = ANY($2)"));
        // include wins; no exclusion clause
        assert!(!sql.contains("NOT (type"));
        assert!(sql.contains("ORDER BY published_at DESC NULLS LAST, src_id DESC"));
        assert!(sql.ends_with("OFFSET $3 LIMIT $4"));
    }

    #[test]
    fn exclusion_keeps_untyped_rows() {
        let view = Ident::parse("v_events_ready").unwrap();
        let query = SourceQuery {
            exclude_types: RecordType::parse_list("competitor").unwrap(),
            page_size: 20,
            ..Default::default()
        };
        let qb = select_page(&view, &query, PageCursor::start());
        assert!(qb.sql().contains("(type IS NULL OR NOT (type = ANY($1)))"));
    }

    #[test]
    fn row_conversion_blanks_empty_upstream_geo() {
        let row = SourceRow {
            title: Some("标题".into()),
            content: None,
            url: Some("https://a.cn/x".into()),
            url_norm: None,
            source: None,
            record_type: Some("paper".into()),
            published_at: None,
            src_table: Some("papers".into()),
            src_id: Some("9".into()),
            row_hash: None,
            country_iso3: Some(" ".into()),
            province_code: Some("330000".into()),
            lang_hint: None,
        };
        let record = RawRecord::from(row);
        assert_eq!(record.country_iso3, None);
        assert_eq!(record.province_code.as_deref(), Some("330000"));
        assert_eq!(record.row_hash, "");
    }
}
