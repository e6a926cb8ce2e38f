//! Postgres side of the pipeline: the unified-view reader, the fact sink,
//! dictionary loading, paginated aggregation and the cache tables.

pub mod aggregate;
pub mod cache;
pub mod dictionaries;
pub mod error;
pub mod ident;
pub mod sink;
pub mod source;

pub use aggregate::{group_count, province_counts_for_day, GroupCountQuery, GroupCounts};
pub use cache::{CacheEntry, CacheKey, CacheStore};
pub use dictionaries::load_geo_lookups;
pub use error::db_error;
pub use ident::Ident;
pub use sink::PgFactSink;
pub use source::PgRecordSource;

use factboard_common::FactboardError;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, FactboardError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(std::time::Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(db_error)
}

/// Run the embedded SQL migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), FactboardError> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| FactboardError::Database(format!("migration failed: {e}")))?;
    Ok(())
}
