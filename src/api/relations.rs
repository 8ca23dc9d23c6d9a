use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::warn;

use crate::ax_state::AppState;
use crate::core::fk_resolver::{resolve_relations, Authorization};
use crate::error::AppError;
use crate::infra::catalog::{display_from_columns, load_columns};
use crate::models::relation::{DisplayMetadata, FormattedRelation, RelationsConfig};
use crate::models::Row;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRelationsRequest {
    pub rows: Vec<Row>,
    #[serde(default)]
    pub relations: RelationsConfig,
    #[serde(default)]
    pub display_metadata: DisplayMetadata,
}

/// 未声明主键的目标表, 从目录补全主键与唯一列
async fn complete_display_metadata(state: &AppState, mut display: DisplayMetadata) -> DisplayMetadata {
    for (key, entry) in display.iter_mut() {
        if entry.primary_key.is_some() {
            continue;
        }
        let Some((schema, table)) = key.split_once('.') else {
            continue;
        };
        match load_columns(&state.db, schema, table).await {
            Ok(columns) if !columns.is_empty() => {
                let mut completed = display_from_columns(&columns, entry.display_format.take());
                for column in entry.unique_columns.drain(..) {
                    if !completed.unique_columns.contains(&column) {
                        completed.unique_columns.push(column);
                    }
                }
                *entry = completed;
            }
            Ok(_) => {}
            Err(e) => warn!("读取 {} 的目录信息失败: {}", key, e),
        }
    }
    display
}

/// 批量解析当前页数据的外键展示值
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResolveRelationsRequest>,
) -> Result<Json<Vec<FormattedRelation>>, AppError> {
    let display = complete_display_metadata(&state, payload.display_metadata).await;
    let formatted = resolve_relations(
        &state.executor,
        Authorization::Check(&state.permissions),
        &payload.rows,
        &payload.relations,
        &display,
        &state.templates,
    )
    .await?;
    Ok(Json(formatted))
}
