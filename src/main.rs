mod api;
mod core;
mod error;
mod infra;
mod models;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::relations::resolve;
use crate::api::tables::{clear_template_cache, health, list_columns, preview_sql, query_table};
use crate::core::display_format::TemplateCache;
use crate::infra::config::AppConfig;
use crate::infra::permissions::PgPermissionOracle;
use crate::infra::pg_executor::PgExecutor;

pub mod ax_state {
    use super::*;
    use crate::core::pagination::PaginationOptions;

    pub struct AppState {
        pub db: sqlx::PgPool,
        pub executor: PgExecutor,
        pub permissions: PgPermissionOracle,
        pub templates: TemplateCache,
        pub pagination: PaginationOptions,
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.log_level);
    info!(
        "启动 table-explorer (bind={}, approx_threshold={}, staleness={}s)",
        config.bind_addr, config.approx_count_threshold, config.approx_count_max_staleness_secs
    );

    let db = infra::db_internal::init_db(&config).await?;
    let state = Arc::new(ax_state::AppState {
        executor: PgExecutor::new(db.clone()),
        permissions: PgPermissionOracle::new(db.clone()),
        templates: TemplateCache::new(),
        pagination: config.pagination_options(),
        db,
    });

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/tables/query", post(query_table))
        .route("/api/tables/sql", post(preview_sql))
        .route("/api/schemas/{schema}/tables/{table}/columns", get(list_columns))
        .route("/api/relations/resolve", post(resolve))
        .route("/api/templates/clear", post(clear_template_cache))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    info!("table-explorer 运行在 http://{}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
