use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Row;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    Between,
    IsNull,
    NotNull,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterValueType {
    Text,
    Number,
    Date,
}

/// 单个过滤条件, 由调用方按请求构造, 不可变
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FilterCondition {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<FilterValueType>,
}

impl FilterCondition {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
            value_type: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TimeAggregation {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeAggregation {
    /// DATE_TRUNC 使用的单位字面量
    pub fn unit(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    #[serde(rename = "asc", alias = "ASC")]
    Asc,
    #[serde(rename = "desc", alias = "DESC")]
    Desc,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

fn default_page() -> u64 {
    1
}

fn default_page_size() -> u64 {
    50
}

/// 表数据查询请求参数, 每个请求新建, 不做持久化
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TableQueryParams {
    pub schema: String,
    pub table: String,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub sort_column: Option<String>,
    #[serde(default)]
    pub sort_direction: Option<SortDirection>,
    #[serde(default)]
    pub filters: Vec<FilterCondition>,
    #[serde(default)]
    pub having_filters: Vec<FilterCondition>,
    #[serde(default)]
    pub aggregation: Option<String>,
    #[serde(default)]
    pub aggregation_column: Option<String>,
    #[serde(default)]
    pub group_by: Option<Vec<String>>,
    #[serde(default)]
    pub time_aggregation: Option<TimeAggregation>,
    #[serde(default)]
    pub x_axis: Option<String>,
    #[serde(default)]
    pub y_axis: Option<String>,
    #[serde(default)]
    pub skip_count: bool,
    #[serde(default)]
    pub skip_permission_check: bool,
}

impl TableQueryParams {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            page: default_page(),
            page_size: default_page_size(),
            columns: None,
            search: None,
            sort_column: None,
            sort_direction: None,
            filters: Vec::new(),
            having_filters: Vec::new(),
            aggregation: None,
            aggregation_column: None,
            group_by: None,
            time_aggregation: None,
            x_axis: None,
            y_axis: None,
            skip_count: false,
            skip_permission_check: false,
        }
    }

    pub fn is_aggregated(&self) -> bool {
        self.aggregation.is_some() || self.group_by.is_some() || self.time_aggregation.is_some()
    }

    pub fn search_term(&self) -> Option<&str> {
        self.search.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

/// 分页查询结果, total_count 列已剔除
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TableDataResult {
    pub data: Vec<Row>,
    pub total_count: u64,
    pub page_count: f64,
}
