pub mod query;
pub mod relation;
pub mod schema;

/// 动态表的一行数据: 列名 -> JSON 值
pub type Row = serde_json::Map<String, serde_json::Value>;
