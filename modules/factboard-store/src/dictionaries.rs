//! Administrative dictionaries, read once at startup.

use factboard_common::{
    CountryEntry, CountryTable, FactboardError, GeoLookups, ProvinceEntry, ProvinceTable,
};
use sqlx::PgPool;
use tracing::{info, warn};

use crate::error::db_error;
use crate::ident::Ident;

pub const DEFAULT_DIM_CN_REGION: &str = "dim_cn_region";
pub const DEFAULT_DIM_COUNTRY: &str = "dim_country";

pub async fn load_geo_lookups(
    pool: &PgPool,
    dim_cn_region: &Ident,
    dim_country: &Ident,
) -> Result<GeoLookups, FactboardError> {
    let province_sql = format!(
        "SELECT name_zh, code::text FROM {dim_cn_region} WHERE level = 'province' AND name_zh IS NOT NULL AND code IS NOT NULL"
    );
    let provinces: Vec<(String, String)> = sqlx::query_as(&province_sql)
        .fetch_all(pool)
        .await
        .map_err(db_error)?;

    let country_sql = format!("SELECT iso3, name_en, name_zh FROM {dim_country} WHERE iso3 IS NOT NULL");
    let countries: Vec<(String, Option<String>, Option<String>)> = sqlx::query_as(&country_sql)
        .fetch_all(pool)
        .await
        .map_err(db_error)?;

    let provinces = ProvinceTable::new(
        provinces
            .into_iter()
            .map(|(name_zh, code)| ProvinceEntry { name_zh, code }),
    );
    let countries = CountryTable::new(countries.into_iter().map(|(iso3, name_en, name_zh)| {
        CountryEntry {
            iso3,
            name_en: name_en.unwrap_or_default(),
            name_zh,
        }
    }));

    if provinces.is_empty() {
        warn!(table = %dim_cn_region, "No provinces loaded; province resolution will always miss");
    }
    if countries.is_empty() {
        warn!(table = %dim_country, "No countries loaded; only ccTLD and China aliases will resolve");
    }
    info!(
        provinces = provinces.len(),
        countries = countries.len(),
        "Loaded geo dictionaries"
    );

    Ok(GeoLookups::new(provinces, countries))
}
