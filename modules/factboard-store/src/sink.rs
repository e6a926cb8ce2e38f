//! Write side: idempotent merge into the fact table keyed by normalized URL.

use std::collections::HashMap;

use factboard_common::{FactEvent, FactboardError, UpsertOutcome};
use sqlx::PgPool;
use tracing::error;

use crate::error::db_error;
use crate::ident::Ident;

pub const DEFAULT_FACT_TABLE: &str = "fact_events";

#[derive(Clone)]
pub struct PgFactSink {
    pool: PgPool,
    table: Ident,
}

impl PgFactSink {
    pub fn new(pool: PgPool, table: Ident) -> Self {
        Self { pool, table }
    }

    pub fn table(&self) -> &Ident {
        &self.table
    }

    /// Insert or overwrite the row for `fact.url`. `xmax = 0` only holds for
    /// a tuple this statement inserted, which tells the two outcomes apart.
    pub async fn upsert(&self, fact: &FactEvent) -> Result<UpsertOutcome, FactboardError> {
        let payload = serde_json::to_value(&fact.payload)
            .map_err(|e| FactboardError::Database(format!("payload encode: {e}")))?;

        let sql = upsert_sql(&self.table);
        let (inserted,): (bool,) = sqlx::query_as(&sql)
            .bind(&fact.url)
            .bind(&fact.record_type)
            .bind(&fact.title)
            .bind(&fact.source)
            .bind(fact.published_at)
            .bind(&fact.summary)
            .bind(&fact.keywords)
            .bind(&fact.geo.country_iso3)
            .bind(&fact.geo.province_code)
            .bind(fact.geo.geo_source.as_str())
            .bind(&fact.row_hash)
            .bind(&fact.src_table)
            .bind(&fact.src_id)
            .bind(payload)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    /// Stored `row_hash` for each of `urls` that already has a row.
    pub async fn stored_hashes(
        &self,
        urls: &[String],
    ) -> Result<HashMap<String, String>, FactboardError> {
        if urls.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(&stored_hashes_sql(&self.table))
            .bind(urls)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .filter_map(|(url, hash)| hash.map(|h| (url, h)))
            .collect())
    }

    /// Fails when the fact table is missing, so a run aborts before spending
    /// model calls on rows it cannot store.
    pub async fn ensure_ready(&self) -> Result<(), FactboardError> {
        let (exists,): (bool,) = sqlx::query_as("SELECT to_regclass($1) IS NOT NULL")
            .bind(self.table.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;

        if !exists {
            error!(
                table = %self.table,
                "Fact table does not exist; apply the DDL in migrations/ or run with --migrate"
            );
            return Err(FactboardError::Config(format!(
                "fact table '{}' does not exist",
                self.table
            )));
        }
        Ok(())
    }
}

fn stored_hashes_sql(table: &Ident) -> String {
    format!("SELECT url, row_hash FROM {table} WHERE url = ANY($1)")
}

fn upsert_sql(table: &Ident) -> String {
    format!(
        r#"
        INSERT INTO {table}
            (url, record_type, title, source, published_at, summary, keywords,
             country_iso3, province_code, geo_source, row_hash, src_table, src_id, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (url) DO UPDATE SET
            record_type   = EXCLUDED.record_type,
            title         = EXCLUDED.title,
            source        = EXCLUDED.source,
            published_at  = EXCLUDED.published_at,
            summary       = EXCLUDED.summary,
            keywords      = EXCLUDED.keywords,
            country_iso3  = EXCLUDED.country_iso3,
            province_code = EXCLUDED.province_code,
            geo_source    = EXCLUDED.geo_source,
            row_hash      = EXCLUDED.row_hash,
            src_table     = EXCLUDED.src_table,
            src_id        = EXCLUDED.src_id,
            payload       = EXCLUDED.payload,
            updated_at    = now()
        RETURNING (xmax = 0) AS inserted
        "#
    )
}
