use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 目录中的列元数据, 用于在查询前校验列名
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub is_unique: bool,
    pub filterable: bool,
    pub sortable: bool,
}
