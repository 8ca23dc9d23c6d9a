use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Row;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
    #[serde(other)]
    Other,
}

impl RelationType {
    /// 只有查找型关系 (多对一/一对一) 参与外键解析
    pub fn is_lookup(self) -> bool {
        matches!(self, Self::ManyToOne | Self::OneToOne)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RelationConfig {
    pub source_column: String,
    pub target_schema: String,
    pub target_table: String,
    pub target_column: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
}

/// 关系配置既可能存成数组, 也可能存成以关系名为键的对象
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum RelationsConfig {
    List(Vec<RelationConfig>),
    Named(BTreeMap<String, RelationConfig>),
}

impl Default for RelationsConfig {
    fn default() -> Self {
        Self::List(Vec::new())
    }
}

impl RelationsConfig {
    /// 统一成有序列表并过滤掉非查找型关系
    pub fn lookup_relations(&self) -> Vec<RelationConfig> {
        let all: Vec<&RelationConfig> = match self {
            Self::List(list) => list.iter().collect(),
            Self::Named(map) => map.values().collect(),
        };
        all.into_iter()
            .filter(|r| r.relation_type.is_lookup())
            .cloned()
            .collect()
    }
}

/// 每个 (行, 关系) 对应一次外键查找, 值非空
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyLookup {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub value: Value,
    pub source_row: usize,
    pub source_column: String,
}

/// 批量执行单元: 共享同一目标 schema/table/column 的查找
#[derive(Debug, Clone)]
pub struct BatchGroup {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub values: Vec<Value>,
    pub lookups: Vec<ForeignKeyLookup>,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub records: Vec<Row>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FormattedRelation {
    pub row_index: usize,
    pub column: String,
    pub original: Value,
    pub formatted: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct TableDisplay {
    #[serde(default)]
    pub display_format: Option<String>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub unique_columns: Vec<String>,
}

impl TableDisplay {
    pub fn primary_key(&self) -> &str {
        self.primary_key.as_deref().unwrap_or("id")
    }
}

/// 目标表展示元数据, 键为 "schema.table"
pub type DisplayMetadata = HashMap<String, TableDisplay>;

pub fn display_key(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}
