use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::ax_state::AppState;
use crate::core::executor::PermissionOracle;
use crate::core::pagination::{prepare_params, query_table_data};
use crate::core::query_builder::{build_query, QueryMetadata};
use crate::core::statement::SqlParam;
use crate::error::AppError;
use crate::infra::catalog::{load_columns, validate_params_against_catalog};
use crate::models::query::{TableDataResult, TableQueryParams};
use crate::models::schema::ColumnMetadata;

async fn ensure_select(state: &AppState, schema: &str, table: &str) -> Result<(), AppError> {
    if state.permissions.has_select_permission(schema, table).await? {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!("no SELECT permission on {}.{}", schema, table)))
    }
}

async fn catalog_columns(
    state: &AppState,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnMetadata>, AppError> {
    let columns = load_columns(&state.db, schema, table).await?;
    if columns.is_empty() {
        return Err(AppError::NotFound(format!("table {}.{} not found", schema, table)));
    }
    Ok(columns)
}

/// 分页查询表数据 (核心入口)
pub async fn query_table(
    State(state): State<Arc<AppState>>,
    Json(params): Json<TableQueryParams>,
) -> Result<Json<TableDataResult>, AppError> {
    info!(
        "表数据查询: {}.{} page={} page_size={}",
        params.schema, params.table, params.page, params.page_size
    );
    if params.schema.trim().is_empty() || params.table.trim().is_empty() {
        return Err(AppError::BadRequest("schema and table are required".into()));
    }
    if !params.skip_permission_check {
        ensure_select(&state, &params.schema, &params.table).await?;
    }
    let columns = catalog_columns(&state, &params.schema, &params.table).await?;
    validate_params_against_catalog(&params, &columns)?;

    let result = query_table_data(&state.executor, &params, &state.pagination).await?;
    Ok(Json(result))
}

#[derive(Serialize)]
pub struct SqlPreview {
    sql: String,
    params: Vec<SqlParam>,
    metadata: QueryMetadata,
}

/// 只生成 SQL, 不执行; 过滤条件拆分与实际查询一致
pub async fn preview_sql(Json(params): Json<TableQueryParams>) -> Result<Json<SqlPreview>, AppError> {
    let query = build_query(&prepare_params(&params))?;
    let rendered = query.sql.render();
    Ok(Json(SqlPreview {
        sql: rendered.sql,
        params: rendered.params,
        metadata: query.metadata,
    }))
}

/// 获取表的列元数据
pub async fn list_columns(
    State(state): State<Arc<AppState>>,
    Path((schema, table)): Path<(String, String)>,
) -> Result<Json<Vec<ColumnMetadata>>, AppError> {
    ensure_select(&state, &schema, &table).await?;
    Ok(Json(catalog_columns(&state, &schema, &table).await?))
}

pub async fn clear_template_cache(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let evicted = state.templates.len();
    state.templates.clear();
    info!("展示模板缓存已清空, 共 {} 项", evicted);
    Json(json!({ "evicted": evicted }))
}

pub async fn health() -> &'static str {
    "ok"
}
