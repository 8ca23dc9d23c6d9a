//! WHERE / HAVING 过滤条件拆分
//!
//! 只按命名约定判断 (别名 + 聚合函数形态), 并不分析真实的 SELECT 列表.
//! 因此在聚合查询里, 名字恰好叫 `value` 的真实列会被当作 HAVING 条件.

use lazy_static::lazy_static;
use regex::Regex;

use crate::models::query::FilterCondition;

pub const DEFAULT_AGGREGATION_ALIASES: [&str; 7] =
    ["value", "count", "total", "avg", "min", "max", "sum"];

lazy_static! {
    static ref AGGREGATE_PREFIX: Regex = Regex::new(r"(?i)^(count|sum|avg|min|max)\s*\(").unwrap();
    static ref AGGREGATE_CALL: Regex =
        Regex::new(r#"(?i)^\s*(count|sum|avg|min|max)\s*\(\s*(\*|"[^"]+"|[A-Za-z0-9_$]+)\s*\)\s*$"#)
            .unwrap();
}

#[derive(Debug, Clone, Default)]
pub struct AggregationContext<'a> {
    pub is_aggregated: bool,
    pub y_axis: Option<&'a str>,
    pub aggregation: Option<&'a str>,
    /// 为空时使用 DEFAULT_AGGREGATION_ALIASES
    pub aliases: Option<&'a [String]>,
}

impl AggregationContext<'_> {
    fn is_alias(&self, column: &str) -> bool {
        match self.aliases {
            Some(aliases) => aliases.iter().any(|a| a.eq_ignore_ascii_case(column)),
            None => DEFAULT_AGGREGATION_ALIASES
                .iter()
                .any(|a| a.eq_ignore_ascii_case(column)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CategorizedFilters {
    pub where_filters: Vec<FilterCondition>,
    pub having_filters: Vec<FilterCondition>,
}

pub fn categorize_filters(
    filters: &[FilterCondition],
    ctx: &AggregationContext<'_>,
) -> CategorizedFilters {
    let mut out = CategorizedFilters::default();
    for filter in filters {
        if is_having_column(&filter.column, ctx) {
            out.having_filters.push(filter.clone());
        } else {
            out.where_filters.push(filter.clone());
        }
    }
    out
}

pub fn is_having_column(column: &str, ctx: &AggregationContext<'_>) -> bool {
    if !ctx.is_aggregated {
        return false;
    }
    if ctx.is_alias(column) {
        return true;
    }
    if AGGREGATE_PREFIX.is_match(column) {
        return true;
    }
    if let (Some(y_axis), Some(aggregation)) = (ctx.y_axis, ctx.aggregation) {
        let pattern = format!(
            r"(?i)^{}\s*\(.*{}.*\)$",
            regex::escape(aggregation),
            regex::escape(y_axis)
        );
        if let Ok(re) = Regex::new(&pattern) {
            return re.is_match(column);
        }
    }
    false
}

pub fn is_default_alias(column: &str) -> bool {
    DEFAULT_AGGREGATION_ALIASES
        .iter()
        .any(|a| a.eq_ignore_ascii_case(column))
}

/// 把 `sum(price)` / `COUNT(*)` 之类的列名拆成 (函数, 列)
pub fn parse_aggregate_call(column: &str) -> Option<(String, String)> {
    let caps = AGGREGATE_CALL.captures(column)?;
    let function = caps.get(1)?.as_str().to_string();
    let inner = caps.get(2)?.as_str();
    let inner = inner
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(inner);
    Some((function, inner.to_string()))
}
