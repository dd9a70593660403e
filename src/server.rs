//! HTTP API for entity statistics
//!
//! # Routes
//!
//! - `GET /health` - Liveness check
//! - `GET /api/stats/{entity_type}/{id}?year=&term=&week=` - Rolled-up statistics
//! - `POST /api/cache/invalidate` - Drop cached keys (body: `{"pattern": "school:*"}`)
//! - `GET /api/cache/stats` - Cache counters
//! - `GET /metrics` - Prometheus metrics
//!
//! # Example
//!
//! ```no_run
//! use ges_stats::config::GesStatsConfig;
//! use ges_stats::server::StatsServer;
//! use ges_stats::stats::StatsService;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = GesStatsConfig::default();
//!     let stats = StatsService::from_config(&config).expect("Failed to open databases");
//!
//!     StatsServer::new(stats)
//!         .run(&config.server.bind)
//!         .await
//!         .expect("Server failed");
//! }
//! ```

use crate::cache::CacheStats;
use crate::entity::{EntityScope, EntityType, Period};
use crate::metrics;
use crate::stats::{EntityStats, StatsService};
use crate::StatsError;
use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

/// Server error types
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind error: {0}")]
    Bind(String),
}

/// Shared server state
struct AppState {
    stats: StatsService,
}

/// HTTP server for entity statistics
pub struct StatsServer {
    state: Arc<AppState>,
    sweep_interval: Option<Duration>,
}

impl StatsServer {
    pub fn new(stats: StatsService) -> Self {
        Self {
            state: Arc::new(AppState { stats }),
            sweep_interval: None,
        }
    }

    /// Purge expired cache entries on this interval while running
    pub fn with_sweeper(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Build the router
    pub fn router(&self) -> Router {
        Self::build_router(self.state.clone())
    }

    fn build_router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route("/api/stats/{entity_type}/{id}", get(entity_stats))
            .route("/api/cache/invalidate", post(invalidate_cache))
            .route("/api/cache/stats", get(cache_stats))
            .route("/metrics", get(prometheus_metrics))
            .with_state(state)
    }

    /// Run the server on the given address until Ctrl-C
    pub async fn run(self, addr: &str) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        let sweeper = self.sweep_interval.map(|interval| {
            self.state
                .stats
                .cache()
                .clone()
                .spawn_sweeper(interval)
        });

        tracing::info!(
            addr = addr,
            cache = ?self.state.stats.cache().options(),
            sweep_interval_secs = self.sweep_interval.map(|d| d.as_secs()),
            "Statistics server listening"
        );

        let result = axum::serve(listener, Self::build_router(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(ServerError::Io);

        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }

        result
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down statistics server");
}

// ============================================================================
// Request/Response types
// ============================================================================

/// Successful statistics response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    #[serde(flatten)]
    pub stats: EntityStats,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub pattern: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub success: bool,
    pub removed: usize,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: &StatsError) -> ApiError {
    let status = if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(ErrorResponse {
            success: false,
            error: err.to_string(),
        }),
    )
}

fn bad_request(message: String) -> ApiError {
    api_error(&StatsError::InvalidRequest(message))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn entity_stats(
    State(state): State<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
    query: Result<Query<Period>, QueryRejection>,
) -> Result<Json<StatsResponse>, ApiError> {
    let Path((entity_type, id)) = path.map_err(|e| bad_request(e.body_text()))?;
    let Query(period) = query.map_err(|e| bad_request(e.body_text()))?;

    let entity_type: EntityType = entity_type.parse().map_err(|e| api_error(&e))?;
    let id: i64 = id
        .trim()
        .parse()
        .map_err(|_| bad_request(format!("Entity id must be an integer, got '{}'", id)))?;
    let scope = EntityScope::new(entity_type, id);

    let stats = state
        .stats
        .entity_stats(scope, period)
        .await
        .map_err(|e| api_error(&e))?;

    Ok(Json(StatsResponse {
        success: true,
        stats,
    }))
}

async fn invalidate_cache(
    State(state): State<Arc<AppState>>,
    Json(req): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResponse>, ApiError> {
    let removed = state
        .stats
        .cache()
        .invalidate(&req.pattern)
        .await
        .map_err(|e| api_error(&StatsError::from(e)))?;

    Ok(Json(InvalidateResponse {
        success: true,
        removed,
    }))
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStats> {
    Json(state.stats.cache().stats().await)
}

async fn prometheus_metrics() -> Result<impl IntoResponse, ApiError> {
    let body = metrics::encode_metrics().map_err(|e| api_error(&e))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
