use comfig_backend::create_app;
use comfig_db::Database;
use std::net::SocketAddr;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    // Initialize tracing for structured logging
    #[cfg(debug_assertions)]
    let log_level = tracing::Level::DEBUG;
    #[cfg(not(debug_assertions))]
    let log_level = tracing::Level::INFO;

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();
    tracing::info!("Starting comfig backend server...");
    // Load configuration from environment variables or use defaults
    let config = comfig_backend::config::Config::from_env();
    tracing::info!(
        "Configuration: port={}, db_path={}, body_limit={}KB, timeout={}s, edge={}, dev={}",
        config.port,
        config.database_path,
        config.request_body_limit / 1024,
        config.request_timeout.as_secs(),
        config.default_edge_node,
        config.dev_mode
    );
    tracing::info!(
        "Quickplay: fiber_bands={}, min_overhead={}ms, constant_overhead={}ms, min_freshness={}s, store_timeout={}ms",
        config.fiber_bands,
        config.min_overhead_ms,
        config.constant_overhead_ms,
        config.cache_min_freshness.as_secs(),
        config.store_timeout.as_millis()
    );
    tracing::info!(
        "Rate limits: query={}/sec (burst {}), stats={}/sec (burst {}), publish={}/min (burst {})",
        config.rate_limit_query_per_sec,
        config.rate_limit_query_burst,
        config.rate_limit_stats_per_sec,
        config.rate_limit_stats_burst,
        config.rate_limit_publish_per_min,
        config.rate_limit_publish_burst
    );
    if config.api_token.is_none() {
        tracing::warn!("API_TOKEN is not set, publishing and download counts are disabled");
    }

    let db = match Database::open(&config.database_path).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!("Failed to open database {}: {}", config.database_path, e);
            std::process::exit(1);
        }
    };
    let app = create_app(db, &config);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Server listening on {}", addr);

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    {
        tracing::error!("Axum server error: {}", e);
    }
}
