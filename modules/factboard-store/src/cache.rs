//! Read-through caches for derived reports. Entries carry an explicit
//! `expires_at`; reads never return an expired entry, and eviction only
//! happens when a caller asks for it.

use std::future::Future;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use factboard_common::FactboardError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::db_error;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// Daily report keyed by calendar date (`report_cache`).
    Date(NaiveDate),
    /// Search result keyed by the SHA-256 hex of the normalized query
    /// (`search_cache`).
    Query(String),
}

impl CacheKey {
    /// Fingerprint a free-form query: trimmed, lowercased, whitespace
    /// collapsed, then hashed.
    pub fn for_query(raw: &str) -> Self {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        let digest = Sha256::digest(normalized.as_bytes());
        CacheKey::Query(hex::encode(digest))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub payload: Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Clone)]
pub struct CacheStore {
    pool: PgPool,
}

impl CacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up a live entry. Expired rows are treated as missing.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, FactboardError> {
        let row: Option<(Value, DateTime<Utc>)> = match key {
            CacheKey::Date(date) => sqlx::query_as(
                "SELECT payload, expires_at FROM report_cache
                 WHERE report_date = $1 AND expires_at > now()",
            )
            .bind(date)
            .fetch_optional(&self.pool)
            .await,
            CacheKey::Query(hash) => sqlx::query_as(
                "SELECT payload, expires_at FROM search_cache
                 WHERE query_hash = $1 AND expires_at > now()",
            )
            .bind(hash)
            .fetch_optional(&self.pool)
            .await,
        }
        .map_err(db_error)?;

        Ok(row.map(|(payload, expires_at)| CacheEntry {
            key: key.clone(),
            payload,
            expires_at,
        }))
    }

    /// Store `payload` under `key`, replacing any previous entry.
    pub async fn put(
        &self,
        key: &CacheKey,
        payload: &Value,
        ttl: Duration,
    ) -> Result<CacheEntry, FactboardError> {
        let expires_at = Utc::now() + ttl;
        match key {
            CacheKey::Date(date) => sqlx::query(
                "INSERT INTO report_cache (report_date, payload, expires_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (report_date)
                 DO UPDATE SET payload = EXCLUDED.payload,
                               expires_at = EXCLUDED.expires_at,
                               created_at = now()",
            )
            .bind(date)
            .bind(payload)
            .bind(expires_at)
            .execute(&self.pool)
            .await,
            CacheKey::Query(hash) => sqlx::query(
                "INSERT INTO search_cache (query_hash, payload, expires_at)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (query_hash)
                 DO UPDATE SET payload = EXCLUDED.payload,
                               expires_at = EXCLUDED.expires_at,
                               created_at = now()",
            )
            .bind(hash)
            .bind(payload)
            .bind(expires_at)
            .execute(&self.pool)
            .await,
        }
        .map_err(db_error)?;

        Ok(CacheEntry {
            key: key.clone(),
            payload: payload.clone(),
            expires_at,
        })
    }

    /// Return the live entry for `key`, or compute, store and return it.
    pub async fn get_or_insert_with<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<CacheEntry, FactboardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, FactboardError>>,
    {
        if let Some(hit) = self.get(key).await? {
            debug!(key = ?key, "Cache hit");
            return Ok(hit);
        }
        debug!(key = ?key, "Cache miss");
        let payload = compute().await?;
        self.put(key, &payload, ttl).await
    }

    /// Delete expired entries from both cache tables.
    pub async fn evict_expired(&self) -> Result<u64, FactboardError> {
        let reports = sqlx::query("DELETE FROM report_cache WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(db_error)?
            .rows_affected();
        let searches = sqlx::query("DELETE FROM search_cache WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(db_error)?
            .rows_affected();

        if reports + searches > 0 {
            info!(reports, searches, "Evicted expired cache entries");
        }
        Ok(reports + searches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_fingerprint_ignores_case_and_spacing() {
        let a = CacheKey::for_query("  Data  Elements   policy ");
        let b = CacheKey::for_query("data elements POLICY");
        assert_eq!(a, b);
        match a {
            CacheKey::Query(hash) => {
                assert_eq!(hash.len(), 64);
                assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
            }
            other => panic!("unexpected key {other:?}"),
        }
        assert_ne!(CacheKey::for_query("a"), CacheKey::for_query("b"));
    }

    #[test]
    fn expiry_is_exclusive_of_the_deadline() {
        let now = Utc::now();
        let entry = CacheEntry {
            key: CacheKey::Date(now.date_naive()),
            payload: Value::Null,
            expires_at: now,
        };
        assert!(entry.is_expired(now));
        assert!(!entry.is_expired(now - Duration::seconds(1)));
    }
}
