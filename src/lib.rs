pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::MergeConfig;
use crate::services::spool::SpoolStore;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::merge::merge_pdfs,
        api::handlers::validate::validate_uploads,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::merge::MergeForm,
            api::handlers::validate::ValidateForm,
        )
    ),
    tags(
        (name = "pdf", description = "PDF merge endpoints"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

/// Shared, read-only state. Everything a request mutates is request-local.
#[derive(Clone)]
pub struct AppState {
    pub spool: Arc<SpoolStore>,
    pub config: MergeConfig,
}

impl AppState {
    /// Opens (and creates if needed) the spool directory named in `config`.
    pub fn new(config: MergeConfig) -> std::io::Result<Self> {
        let spool = SpoolStore::open(&config.spool_dir)?;
        Ok(Self {
            spool: Arc::new(spool),
            config,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/api/health", get(api::handlers::health::health_check))
        .route("/api/merge", post(api::handlers::merge::merge_pdfs))
        .route("/api/validate", post(api::handlers::validate::validate_uploads))
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .layer(DefaultBodyLimit::max(state.config.max_upload_size))
        .with_state(state)
}
