pub mod config;
pub mod error;
pub mod lookup;
pub mod resilience;
pub mod text;
pub mod types;

pub use config::{Config, LlmRegion, RunOptions, DEFAULT_MODEL};
pub use error::{looks_like_connection_failure, FactboardError};
pub use lookup::{
    is_china_alias, strip_province_suffix, CountryEntry, CountryTable, GeoLookups, ProvinceEntry,
    ProvinceTable, CHINA_ISO3,
};
pub use resilience::{Backoff, Pacer, RetryError, RetryPolicy, Transient};
pub use text::*;
pub use types::*;
