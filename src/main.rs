use duckdb::Connection;
use parking_lot::Mutex;
use std::sync::Arc;
use teal_analytics::config::Config;
use teal_analytics::ingest::classifier::Classifier;
use teal_analytics::ingest::geoip::GeoReader;
use teal_analytics::ingest::handler::AppState;
use teal_analytics::ingest::site::SiteRegistry;
use teal_analytics::server;
use teal_analytics::storage::counters::CounterStore;
use teal_analytics::storage::migrations;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teal_analytics=info,tower_http=info".into()),
        )
        .init();

    // Load configuration
    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref().map(std::path::Path::new));

    tracing::info!(
        host = %config.host,
        port = config.port,
        sites = config.sites.len(),
        "Starting Teal Analytics"
    );

    if config.sites.is_empty() {
        tracing::warn!("No sites configured; every tracking request will be rejected");
    }

    // Initialize DuckDB
    let conn = match &config.db_path {
        Some(path) => Connection::open(path).expect("Failed to open DuckDB database"),
        None => Connection::open_in_memory().expect("Failed to open DuckDB"),
    };
    migrations::run_migrations(&conn).expect("Failed to run migrations");
    let conn = Arc::new(Mutex::new(conn));

    let state = Arc::new(AppState {
        sites: SiteRegistry::new(&config.sites, config.require_domain_key),
        classifier: Classifier::new(GeoReader::open(config.geoip_db_path.as_deref())),
        store: CounterStore::new(conn),
        recent_activity_cap: config.recent_activity_cap,
    });

    let app = server::build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {addr}: {e}"));

    tracing::info!(addr = %addr, "Listening");
    axum::serve(listener, app).await.expect("Server error");
}
