pub mod handlers;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use epilog_core::grouper::TraceGrouper;
use epilog_core::query::LedgerEngine;
use tower_http::cors::{AllowOrigin, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LedgerEngine>,
    pub grouper: Arc<TraceGrouper>,
}

/// Construct the full Axum router for the Epilog REST API.
///
/// All routes are nested under `/v1/`. CORS is restrictive by default
/// (localhost only); set `EPILOG_CORS_ORIGINS` to a comma-separated list
/// of allowed origins to override, or `*` to allow all (not recommended
/// for production).
pub fn router(engine: Arc<LedgerEngine>, grouper: Arc<TraceGrouper>) -> Router {
    let cors = build_cors_layer();
    let state = AppState { engine, grouper };

    Router::new()
        .route(
            "/v1/episodes",
            post(handlers::ingest_handler).get(handlers::list_handler),
        )
        .route("/v1/episodes/{id}", get(handlers::get_handler))
        .route("/v1/episodes/{id}/steps", post(handlers::append_handler))
        .route("/v1/episodes/{id}/finish", post(handlers::finish_handler))
        .route("/v1/episodes/{id}/replay", get(handlers::replay_handler))
        .route("/v1/episodes/{id}/ancestry", get(handlers::ancestry_handler))
        .route("/v1/episodes/{id}/children", get(handlers::children_handler))
        .route("/v1/links", post(handlers::link_handler))
        .route("/v1/traces", post(handlers::trace_handler))
        .route("/v1/health", get(handlers::health_handler))
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024)) // 2 MB max request body
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

fn build_cors_layer() -> CorsLayer {
    use axum::http::{HeaderName, Method};

    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("authorization"),
        ])
        .max_age(std::time::Duration::from_secs(3600));

    match std::env::var("EPILOG_CORS_ORIGINS") {
        Ok(val) if val == "*" => base.allow_origin(AllowOrigin::any()),
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            base.allow_origin(origins)
        }
        Err(_) => {
            // Default: localhost only
            let origins: Vec<_> = [
                "http://localhost:3000",
                "http://localhost:8080",
                "http://127.0.0.1:3000",
                "http://127.0.0.1:8080",
            ]
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
            base.allow_origin(origins)
        }
    }
}
