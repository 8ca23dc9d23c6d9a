//! 表查询构造器
//!
//! 纯函数: 参数 -> 一条参数化 SELECT 以及查询类型元数据.
//! 子句顺序固定为 SELECT, FROM, WHERE, GROUP BY, HAVING, ORDER BY, LIMIT/OFFSET.

use serde::Serialize;

use crate::core::filter_categorizer::{is_default_alias, parse_aggregate_call};
use crate::core::filters::{having_condition, search_condition, where_condition};
use crate::core::identifiers::{
    build_aggregation_expression, ensure_column_name, qualified_table, quote_identifier,
};
use crate::core::statement::Statement;
use crate::error::EngineResult;
use crate::models::query::{SortDirection, TableQueryParams};

pub const TIME_BUCKET_ALIAS: &str = "time_bucket";
pub const VALUE_ALIAS: &str = "value";
pub const TOTAL_COUNT_COLUMN: &str = "total_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    Select,
    Aggregate,
    TimeSeries,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub query_type: QueryType,
    pub has_aggregation: bool,
    pub is_time_series: bool,
}

#[derive(Debug, Clone)]
pub struct QueryResult {
    pub sql: Statement,
    pub metadata: QueryMetadata,
}

/// 聚合查询的分组部分
struct Grouping {
    /// GROUP BY 表达式, 与 SELECT 中顺序一致
    exprs: Vec<String>,
    /// SELECT 项 (带别名)
    select: Vec<String>,
    time_expr: Option<String>,
    columns: Vec<String>,
    aggregate_expr: String,
}

fn build_grouping(params: &TableQueryParams) -> EngineResult<Grouping> {
    let mut grouping = Grouping {
        exprs: Vec::new(),
        select: Vec::new(),
        time_expr: None,
        columns: Vec::new(),
        aggregate_expr: String::new(),
    };

    if let Some(x_axis) = params.x_axis.as_deref() {
        ensure_column_name(x_axis)?;
        match params.time_aggregation {
            Some(unit) => {
                let expr = format!("DATE_TRUNC('{}', {})", unit.unit(), quote_identifier(x_axis));
                grouping
                    .select
                    .push(format!("{} AS {}", expr, quote_identifier(TIME_BUCKET_ALIAS)));
                grouping.exprs.push(expr.clone());
                grouping.time_expr = Some(expr);
            }
            None => {
                let expr = quote_identifier(x_axis);
                grouping.select.push(expr.clone());
                grouping.exprs.push(expr);
            }
        }
        grouping.columns.push(x_axis.to_string());
    }

    for column in params.group_by.iter().flatten() {
        ensure_column_name(column)?;
        if grouping.columns.iter().any(|c| c == column) && params.time_aggregation.is_none() {
            continue;
        }
        let expr = quote_identifier(column);
        grouping.select.push(expr.clone());
        grouping.exprs.push(expr);
        grouping.columns.push(column.clone());
    }

    let function = params.aggregation.as_deref().unwrap_or("COUNT");
    let column = params
        .aggregation_column
        .as_deref()
        .or(params.y_axis.as_deref())
        .unwrap_or("*");
    if column != "*" {
        ensure_column_name(column)?;
    }
    grouping.aggregate_expr = build_aggregation_expression(function, column)?;
    grouping.select.push(format!(
        "{} AS {}",
        grouping.aggregate_expr,
        quote_identifier(VALUE_ALIAS)
    ));
    Ok(grouping)
}

fn is_metric_column(column: &str, params: &TableQueryParams) -> bool {
    is_default_alias(column)
        || parse_aggregate_call(column).is_some()
        || params.y_axis.as_deref() == Some(column)
        || params.aggregation_column.as_deref() == Some(column)
}

fn metric_expr(column: &str, grouping: &Grouping) -> EngineResult<String> {
    match parse_aggregate_call(column) {
        Some((function, inner)) => {
            if inner != "*" {
                ensure_column_name(&inner)?;
            }
            build_aggregation_expression(&function, &inner)
        }
        None => Ok(grouping.aggregate_expr.clone()),
    }
}

fn aggregated_order(params: &TableQueryParams, grouping: &Grouping) -> EngineResult<Vec<String>> {
    let direction = params.sort_direction.unwrap_or_default().as_sql();
    let sort = params.sort_column.as_deref();

    if let Some(time) = grouping.time_expr.as_deref() {
        let time_asc = format!("{} ASC", time);
        return Ok(match sort {
            None => vec![time_asc],
            Some(s) if s == TIME_BUCKET_ALIAS || params.x_axis.as_deref() == Some(s) => {
                vec![format!("{} {}", time, direction)]
            }
            // 按指标排序时时间顺序依然是主排序键
            Some(s) if is_metric_column(s, params) => {
                vec![time_asc, format!("{} {}", metric_expr(s, grouping)?, direction)]
            }
            Some(_) => vec![time_asc],
        });
    }

    Ok(match sort {
        None => Vec::new(),
        Some(s) if is_metric_column(s, params) => {
            vec![format!("{} {}", metric_expr(s, grouping)?, direction)]
        }
        Some(s) if grouping.columns.iter().any(|c| c == s) => {
            vec![format!("{} {}", quote_identifier(s), direction)]
        }
        Some(_) => Vec::new(),
    })
}

pub fn build_query(params: &TableQueryParams) -> EngineResult<QueryResult> {
    let is_aggregated = params.is_aggregated();
    let is_time_series = params.time_aggregation.is_some();

    let grouping = if is_aggregated {
        Some(build_grouping(params)?)
    } else {
        None
    };

    // SELECT
    let mut select: Vec<String> = match &grouping {
        Some(g) => g.select.clone(),
        None => match params.columns.as_deref() {
            Some(columns) if !columns.is_empty() => {
                let mut out = Vec::with_capacity(columns.len());
                for column in columns {
                    ensure_column_name(column)?;
                    out.push(quote_identifier(column));
                }
                out
            }
            _ => vec!["*".to_string()],
        },
    };
    if !params.skip_count {
        select.push(format!(
            "COUNT(*) OVER() AS {}",
            quote_identifier(TOTAL_COUNT_COLUMN)
        ));
    }

    let mut stmt = Statement::text(format!(
        "SELECT {} FROM {}",
        select.join(", "),
        qualified_table(&params.schema, &params.table)
    ));

    // WHERE
    let mut conditions = Vec::new();
    for filter in &params.filters {
        conditions.push(where_condition(filter)?);
    }
    if let Some(term) = params.search_term() {
        conditions.push(search_condition(&params.table, term));
    }
    if !conditions.is_empty() {
        stmt.push(" WHERE ");
        stmt.push_statement(Statement::join(conditions, " AND "));
    }

    let mut order_by = Vec::new();
    if let Some(g) = &grouping {
        // GROUP BY
        if !g.exprs.is_empty() {
            stmt.push(format!(" GROUP BY {}", g.exprs.join(", ")));
        }
        // HAVING
        if !params.having_filters.is_empty() {
            let mut having = Vec::new();
            for filter in &params.having_filters {
                having.push(having_condition(filter, &g.aggregate_expr)?);
            }
            stmt.push(" HAVING ");
            stmt.push_statement(Statement::join(having, " AND "));
        }
        order_by = aggregated_order(params, g)?;
    } else if let Some(sort) = params.sort_column.as_deref() {
        ensure_column_name(sort)?;
        let direction = params.sort_direction.unwrap_or(SortDirection::Asc);
        order_by.push(format!("{} {}", quote_identifier(sort), direction.as_sql()));
    }

    // ORDER BY
    if !order_by.is_empty() {
        stmt.push(format!(" ORDER BY {}", order_by.join(", ")));
    }

    // LIMIT / OFFSET
    stmt.push(" LIMIT ");
    stmt.push_bind(params.page_size);
    stmt.push(" OFFSET ");
    stmt.push_bind(params.offset());

    let query_type = if is_time_series {
        QueryType::TimeSeries
    } else if is_aggregated {
        QueryType::Aggregate
    } else {
        QueryType::Select
    };

    Ok(QueryResult {
        sql: stmt,
        metadata: QueryMetadata {
            query_type,
            has_aggregation: is_aggregated,
            is_time_series,
        },
    })
}
