//! IOCSift
//!
//! A service that ingests open threat-intelligence feeds, normalizes and
//! enriches their records, deduplicates the result, and serves the committed
//! indicator set.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use iocsift::api::{create_router, run_refresh, AppState};
use iocsift::collectors::{
    blocklist_de::{BlocklistDeCollector, BLOCKLIST_DE_URL},
    digitalside::{DigitalSideCollector, DIGITALSIDE_URL},
    spamhaus::{SpamhausCollector, SPAMHAUS_DROP_URL},
    FeedCollector,
};
use iocsift::config::FeedRegistry;
use iocsift::enrichment::geoip::{GeoLookupStep, GeoResolver, MaxMindResolver, TableResolver};
use iocsift::enrichment::url_suspicion::UrlSuspicionStep;
use iocsift::enrichment::Enricher;
use iocsift::normalize::Normalizer;
use iocsift::pipeline::Pipeline;
use iocsift::storage::{IocStore, JsonFileStore};

/// IOCSift
#[derive(Parser, Debug)]
#[command(name = "iocsift")]
#[command(about = "Normalize, enrich, and deduplicate threat intelligence feeds")]
struct Args {
    /// Server host
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Server port
    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Directory for the committed set and run statistics
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: String,

    /// Feed registry JSON (defaults to the built-in table)
    #[arg(long, env = "FEEDS_CONFIG")]
    feeds_config: Option<String>,

    /// GeoIP city database path
    #[arg(long, env = "GEOIP_CITY_DB")]
    geoip_city_db: Option<String>,

    /// GeoIP ASN database path
    #[arg(long, env = "GEOIP_ASN_DB")]
    geoip_asn_db: Option<String>,

    /// Static geolocation reference table (JSON), used when no MaxMind
    /// database is configured
    #[arg(long, env = "GEO_TABLE")]
    geo_table: Option<String>,

    /// Cron expression for scheduled refreshes (e.g. "0 0 */6 * * *")
    #[arg(long, env = "REFRESH_SCHEDULE")]
    refresh_schedule: Option<String>,

    /// Run one refresh immediately on startup
    #[arg(long, default_value = "false")]
    refresh_on_start: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iocsift=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting IOCSift");

    // Feed trust table
    let registry = match args.feeds_config.as_deref() {
        Some(path) => FeedRegistry::from_path(Path::new(path))?,
        None => FeedRegistry::builtin(),
    };
    let registry = Arc::new(registry);

    // Geolocation capability: prefer MaxMind when configured, fall back to
    // the static reference table.
    let resolver: Arc<dyn GeoResolver> = match args.geo_table.as_deref() {
        Some(path) => {
            tracing::info!(path, "using static geolocation table");
            Arc::new(TableResolver::from_path(Path::new(path))?)
        }
        None => Arc::new(MaxMindResolver::open(
            args.geoip_city_db.as_ref().map(Path::new),
            args.geoip_asn_db.as_ref().map(Path::new),
        )?),
    };

    let mut enricher = Enricher::new();
    enricher.add_step(Box::new(GeoLookupStep::new(resolver)));
    enricher.add_step(Box::new(UrlSuspicionStep::new()));

    let pipeline = Arc::new(Pipeline::new(
        Normalizer::new(registry.clone()),
        enricher,
    ));

    // Collectors, honoring per-feed URL overrides from the registry
    let feed_url = |feed_id: &str, fallback: &str| {
        registry
            .profile(feed_id)
            .and_then(|p| p.url.clone())
            .unwrap_or_else(|| fallback.to_string())
    };
    let collectors: Vec<Arc<dyn FeedCollector>> = vec![
        Arc::new(SpamhausCollector::with_url(feed_url(
            "spamhaus",
            SPAMHAUS_DROP_URL,
        ))),
        Arc::new(BlocklistDeCollector::with_url(feed_url(
            "blocklist_de",
            BLOCKLIST_DE_URL,
        ))),
        Arc::new(DigitalSideCollector::with_url(feed_url(
            "digitalside",
            DIGITALSIDE_URL,
        ))),
    ];

    let store: Arc<dyn IocStore> = Arc::new(JsonFileStore::new(&args.data_dir));

    let state = Arc::new(AppState {
        store,
        pipeline,
        collectors,
    });

    if args.refresh_on_start {
        match run_refresh(&state).await {
            Ok(result) => tracing::info!(
                run_id = %result.run_id,
                committed = result.iocs.len(),
                "startup refresh complete"
            ),
            Err(err) => tracing::error!(error = %err, "startup refresh failed"),
        }
    }

    // Scheduled refreshes
    if let Some(schedule) = args.refresh_schedule.clone() {
        let scheduler = tokio_cron_scheduler::JobScheduler::new()
            .await
            .map_err(|e| anyhow::anyhow!("failed to create scheduler: {e}"))?;
        let job_state = state.clone();
        let job = tokio_cron_scheduler::Job::new_async(schedule.as_str(), move |_id, _sched| {
            let state = job_state.clone();
            Box::pin(async move {
                match run_refresh(&state).await {
                    Ok(result) => tracing::info!(
                        run_id = %result.run_id,
                        committed = result.iocs.len(),
                        "scheduled refresh complete"
                    ),
                    Err(err) => tracing::error!(error = %err, "scheduled refresh failed"),
                }
            })
        })
        .map_err(|e| anyhow::anyhow!("invalid refresh schedule {schedule:?}: {e}"))?;
        scheduler
            .add(job)
            .await
            .map_err(|e| anyhow::anyhow!("failed to add refresh job: {e}"))?;
        scheduler
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start scheduler: {e}"))?;
        tracing::info!(schedule = %schedule, "scheduled refresh enabled");
    }

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid host/port")?;
    tracing::info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
