pub mod cache;
pub mod config;
pub mod edges;
mod error;
pub mod geo;
pub mod helpers;
pub mod latency;
pub mod ranking;
mod routes;
pub mod servers;
mod validation;

use axum::{
    Router,
    http::{HeaderValue, Method, StatusCode, header},
    routing::{get, post},
};
use comfig_db::{Database, DownloadCounters};
use std::sync::Arc;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::edges::EdgeDirectory;
use crate::ranking::QuickplayService;

pub struct AppState {
    pub quickplay: QuickplayService<Database>,
    pub downloads: DownloadCounters,
    pub api_token: Option<String>,
    pub dev_mode: bool,
    pub default_edge_node: String,
}

impl AppState {
    pub fn new(db: Database, config: &Config) -> Self {
        let edges = EdgeDirectory::default();
        if edges.is_empty() {
            tracing::warn!("edge directory is empty, every quickplay request will be refused");
        }
        tracing::info!(
            edges = edges.len(),
            fiber_bands = config.fiber_bands.bands().len(),
            "quickplay ranking configured"
        );

        Self {
            quickplay: QuickplayService::new(
                db.clone(),
                edges,
                config.fiber_bands.clone(),
                config.overhead(),
                config.cache_min_freshness,
                config.store_timeout,
            ),
            downloads: DownloadCounters::new(db),
            api_token: config.api_token.clone(),
            dev_mode: config.dev_mode,
            default_edge_node: config.default_edge_node.clone(),
        }
    }
}

/// Milliseconds between replenished requests for a per-second rate.
fn replenish_ms(per_sec: u64) -> u64 {
    (1000 / per_sec.max(1)).max(1)
}

/// Create the application router with the given database and configuration
pub fn create_app(db: Database, config: &Config) -> Router {
    let state = Arc::new(AppState::new(db, config));

    // Lenient rate limit for quickplay queries - every client polls the list
    let query_governor = GovernorConfigBuilder::default()
        .per_millisecond(replenish_ms(config.rate_limit_query_per_sec))
        .burst_size(config.rate_limit_query_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("query rate limit is non-zero");

    // HUD stats are hit once per download
    let stats_governor = GovernorConfigBuilder::default()
        .per_millisecond(replenish_ms(config.rate_limit_stats_per_sec))
        .burst_size(config.rate_limit_stats_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("stats rate limit is non-zero");

    // Strict rate limit for publishing - only the list publisher calls these
    let publish_governor = GovernorConfigBuilder::default()
        .per_millisecond(60_000 / config.rate_limit_publish_per_min.max(1))
        .burst_size(config.rate_limit_publish_burst.max(1))
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .expect("publish rate limit is non-zero");

    let query_routes = Router::new()
        .route("/api/quickplay", post(routes::query))
        .route("/api/schema", get(routes::schema))
        .layer(GovernorLayer::new(query_governor));

    let stats_routes = Router::new()
        .route("/api/huds/download/add", post(routes::download_add))
        .route("/api/huds/download/get", post(routes::download_count))
        .layer(GovernorLayer::new(stats_governor));

    let publish_routes = Router::new()
        .route("/api/quickplay/update", post(routes::update))
        .route("/api/schema/update", post(routes::schema_update))
        .layer(GovernorLayer::new(publish_governor));

    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid allowed origin");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .merge(query_routes)
        .merge(stats_routes)
        .merge(publish_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(RequestBodyLimitLayer::new(config.request_body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
