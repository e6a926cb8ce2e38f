use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use factboard_common::{Config, LlmRegion, RecordType, RetryPolicy, RunOptions};
use factboard_enrich::Pipeline;
use factboard_store::dictionaries::{DEFAULT_DIM_CN_REGION, DEFAULT_DIM_COUNTRY};
use factboard_store::sink::DEFAULT_FACT_TABLE;
use factboard_store::source::DEFAULT_VIEW;
use factboard_store::{CacheStore, Ident, PgFactSink, PgRecordSource};

#[derive(Parser)]
#[command(name = "factboard", about = "Enrich and geocode unified records into the fact table")]
struct Cli {
    #[command(flatten)]
    run: RunArgs,

    #[command(flatten)]
    store: StoreArgs,

    /// Apply pending migrations before running
    #[arg(long)]
    migrate: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print per-province fact counts for one UTC day (cached)
    Aggregate {
        /// Day to count, YYYY-MM-DD; defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Cache lifetime in minutes
        #[arg(long, default_value_t = 60)]
        ttl_minutes: i64,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Only records published within the last N days
    #[arg(long)]
    days: Option<i64>,

    /// Comma-separated record types to include (wins over exclude)
    #[arg(long, default_value = "", value_parser = parse_types)]
    include_types: BTreeSet<RecordType>,

    /// Comma-separated record types to exclude
    #[arg(long, default_value = "", value_parser = parse_types)]
    exclude_types: BTreeSet<RecordType>,

    /// Let the model's country/province take priority
    #[arg(long, overrides_with = "no_geo_by_llm")]
    geo_by_llm: bool,

    #[arg(long, overrides_with = "geo_by_llm")]
    no_geo_by_llm: bool,

    /// Reprocess every record, including rows already stored with the same hash
    #[arg(long)]
    all: bool,

    /// Log every geography resolution
    #[arg(long)]
    log_geo: bool,

    /// Log parsed model output per record; raw responses at debug level
    #[arg(long)]
    log_llm: bool,

    #[arg(long, default_value_t = 20)]
    batch_size: usize,

    /// Page limit per run (0 = unlimited)
    #[arg(long, default_value_t = 20)]
    max_batches: usize,

    /// Pause between model calls, in seconds
    #[arg(long, default_value_t = 0.4)]
    sleep: f64,

    /// Model endpoint region: cn, intl or finance
    #[arg(long, default_value = "cn")]
    region: LlmRegion,

    /// Endpoint does not accept response_format; ask for JSON in the prompt only
    #[arg(long)]
    no_openai_compat: bool,

    #[arg(long, default_value_t = 120)]
    summary_chars: usize,

    #[arg(long, default_value_t = 6000)]
    content_chars: usize,

    #[arg(long, default_value_t = 3)]
    retry_attempts: u32,

    #[arg(long, default_value_t = 1000)]
    retry_base_ms: u64,
}

#[derive(Args)]
struct StoreArgs {
    #[arg(long, default_value = DEFAULT_VIEW)]
    unified_view: String,

    #[arg(long, default_value = DEFAULT_FACT_TABLE)]
    fact_table: String,

    #[arg(long, default_value = DEFAULT_DIM_CN_REGION)]
    dim_cn_region: String,

    #[arg(long, default_value = DEFAULT_DIM_COUNTRY)]
    dim_country: String,
}

fn parse_types(csv: &str) -> Result<BTreeSet<RecordType>, String> {
    RecordType::parse_list(csv).map_err(|e| e.to_string())
}

impl RunArgs {
    fn options(&self) -> RunOptions {
        let retry = RetryPolicy::linear(
            self.retry_attempts.max(1),
            Duration::from_millis(self.retry_base_ms),
        );
        let mut options = RunOptions::builder()
            .include_types(self.include_types.clone())
            .exclude_types(self.exclude_types.clone())
            .geo_by_llm(self.geo_by_llm || !self.no_geo_by_llm)
            .only_changed(!self.all)
            .log_geo(self.log_geo)
            .log_llm(self.log_llm)
            .page_size(self.batch_size.max(1))
            .max_pages(self.max_batches)
            .llm_pause(Duration::from_secs_f64(self.sleep.max(0.0)))
            .content_chars(self.content_chars)
            .summary_chars(self.summary_chars)
            .retry(retry)
            .build();
        options.since = self.days.map(|d| Utc::now() - chrono::Duration::days(d));
        options
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,factboard=info,sqlx=warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    let pool = factboard_store::connect(&config.database_url, 4)
        .await
        .context("Failed to connect to Postgres")?;

    if cli.migrate {
        tracing::info!("Running database migrations");
        factboard_store::migrate(&pool).await?;
    }

    let fact_table = Ident::parse(&cli.store.fact_table)?;

    if let Some(Command::Aggregate { date, ttl_minutes }) = cli.command {
        let date = date.unwrap_or_else(|| Utc::now().date_naive());
        let cache = CacheStore::new(pool.clone());
        let counts = factboard_store::province_counts_for_day(
            &pool,
            &cache,
            &fact_table,
            date,
            &RetryPolicy::default(),
            chrono::Duration::minutes(ttl_minutes),
        )
        .await?;
        println!("=== Province counts for {date} ===");
        for (province, count) in &counts.counts {
            println!("{province:<10} {count}");
        }
        println!("Total: {} ({} pages, {} skipped)", counts.total(), counts.pages, counts.skipped_pages);
        return Ok(());
    }

    let lookups = factboard_store::load_geo_lookups(
        &pool,
        &Ident::parse(&cli.store.dim_cn_region)?,
        &Ident::parse(&cli.store.dim_country)?,
    )
    .await
    .context("Failed to load geography dictionaries")?;

    let mut ai = ai_client::OpenAi::new(config.llm_api_key.clone(), config.llm_model.clone())
        .with_base_url(config.llm_endpoint(cli.run.region));
    if cli.run.no_openai_compat {
        ai = ai.without_json_mode();
    }

    let source = PgRecordSource::new(pool.clone(), Ident::parse(&cli.store.unified_view)?);
    let sink = PgFactSink::new(pool.clone(), fact_table);
    let pipeline = Pipeline::new(
        Arc::new(source),
        Arc::new(ai),
        Arc::new(sink),
        Arc::new(lookups),
        cli.run.options(),
    );

    pipeline
        .preflight()
        .await
        .context("Preflight failed; no records were processed")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received; finishing current record");
            on_signal.cancel();
        }
    });

    let stats = pipeline.run(cancel).await;
    println!("{stats}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misspelled_type_filter_is_rejected() {
        let result = Cli::try_parse_from(["factboard", "--include-types", "papers"]);
        assert!(result.is_err());
    }

    #[test]
    fn type_filters_and_reprocess_flag() {
        let cli = Cli::try_parse_from([
            "factboard",
            "--include-types",
            "paper,news",
            "--exclude-types",
            "competitor",
            "--all",
        ])
        .unwrap();
        let options = cli.run.options();
        assert_eq!(
            options.include_types,
            BTreeSet::from([RecordType::News, RecordType::Paper])
        );
        assert_eq!(options.exclude_types, BTreeSet::from([RecordType::Competitor]));
        assert!(!options.only_changed);
    }

    #[test]
    fn defaults_skip_unchanged_rows_with_no_type_filter() {
        let options = Cli::try_parse_from(["factboard"]).unwrap().run.options();
        assert!(options.only_changed);
        assert!(options.include_types.is_empty());
        assert!(options.exclude_types.is_empty());
        assert!(options.geo_by_llm);
    }
}
