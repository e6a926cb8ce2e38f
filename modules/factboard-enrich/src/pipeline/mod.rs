pub mod assembler;
pub mod enrichment;
pub mod geo_rules;
pub mod geocode;
pub mod reader;
pub mod runner;
pub mod stats;

pub use enrichment::{EnrichmentEngine, Enriched, LlmEnrichment};
pub use geocode::{resolve, GeoInputs, GeoOutcome};
pub use reader::{PageOutcome, SourceReader};
pub use runner::{Pipeline, RecordResult};
pub use stats::RunStats;
