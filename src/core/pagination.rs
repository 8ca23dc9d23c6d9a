//! 自适应分页策略
//!
//! 每个请求按有序策略列表执行, 失败则尝试下一个, 最多三步:
//! 优化路径 -> 并行估算 -> 窗口函数计数.

use tracing::{debug, info, instrument, warn};

use crate::core::approximate_count::{approximate_count, count_from_row, ApproximateCountOptions};
use crate::core::executor::SqlExecutor;
use crate::core::filter_categorizer::{categorize_filters, AggregationContext};
use crate::core::query_builder::{build_query, TOTAL_COUNT_COLUMN};
use crate::error::{EngineError, EngineResult};
use crate::models::query::{TableDataResult, TableQueryParams};
use crate::models::Row;

pub const DEFAULT_FALLBACK_PAGES: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountStrategy {
    /// 第一页: 多取一行探测是否还有下一页
    LimitProbe,
    /// 后续页: 估算计数与数据查询并发执行
    ParallelEstimate,
    /// 单条查询, 由 COUNT(*) OVER() 带出总数
    WindowCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationOptions {
    pub approximate: ApproximateCountOptions,
    /// 估算失败时假定的页数
    pub fallback_pages: u64,
}

impl Default for PaginationOptions {
    fn default() -> Self {
        Self {
            approximate: ApproximateCountOptions::default(),
            fallback_pages: DEFAULT_FALLBACK_PAGES,
        }
    }
}

/// pageSize 为 0 时返回 +Infinity
pub fn page_count(total: u64, page_size: u64) -> f64 {
    if page_size == 0 {
        return f64::INFINITY;
    }
    total.div_ceil(page_size) as f64
}

/// 拆分过滤条件: 聚合别名类的条件移入 having_filters
pub fn prepare_params(params: &TableQueryParams) -> TableQueryParams {
    let ctx = AggregationContext {
        is_aggregated: params.is_aggregated(),
        y_axis: params.y_axis.as_deref(),
        aggregation: params.aggregation.as_deref(),
        aliases: None,
    };
    let split = categorize_filters(&params.filters, &ctx);
    let mut prepared = params.clone();
    prepared.filters = split.where_filters;
    prepared.having_filters.extend(split.having_filters);
    prepared
}

/// 无搜索, 无 WHERE 过滤, 且非聚合
pub fn is_simple_scan(prepared: &TableQueryParams) -> bool {
    prepared.search_term().is_none() && prepared.filters.is_empty() && !prepared.is_aggregated()
}

pub fn plan_strategies(prepared: &TableQueryParams) -> Vec<CountStrategy> {
    if !is_simple_scan(prepared) {
        return vec![CountStrategy::WindowCount];
    }
    if prepared.page <= 1 {
        vec![CountStrategy::LimitProbe, CountStrategy::WindowCount]
    } else {
        vec![CountStrategy::ParallelEstimate, CountStrategy::WindowCount]
    }
}

fn strip_total_count(rows: &mut [Row]) {
    for row in rows.iter_mut() {
        row.remove(TOTAL_COUNT_COLUMN);
    }
}

async fn limit_probe(
    executor: &dyn SqlExecutor,
    params: &TableQueryParams,
    options: &PaginationOptions,
) -> EngineResult<TableDataResult> {
    let mut probe = params.clone();
    probe.page = 1;
    probe.page_size = params.page_size.saturating_add(1);
    probe.skip_count = true;
    let query = build_query(&probe)?;
    let mut rows = executor.execute(&query.sql).await?;

    let fetched = rows.len() as u64;
    if fetched <= params.page_size {
        // 不足一页, 行数即精确总数
        return Ok(TableDataResult {
            data: rows,
            total_count: fetched,
            page_count: page_count(fetched, params.page_size),
        });
    }

    rows.truncate(params.page_size as usize);
    let total_count = match approximate_count(
        executor,
        &params.schema,
        &params.table,
        &options.approximate,
    )
    .await
    {
        Ok(estimate) => estimate.max(fetched),
        Err(e) => {
            warn!(
                "{}.{} 估算行数失败, 使用启发式总数: {}",
                params.schema, params.table, e
            );
            params.page_size.saturating_mul(options.fallback_pages)
        }
    };
    Ok(TableDataResult {
        data: rows,
        total_count,
        page_count: page_count(total_count, params.page_size),
    })
}

async fn parallel_estimate(
    executor: &dyn SqlExecutor,
    params: &TableQueryParams,
    options: &PaginationOptions,
) -> EngineResult<TableDataResult> {
    let mut data_params = params.clone();
    data_params.skip_count = true;
    let query = build_query(&data_params)?;

    let (count, rows) = tokio::join!(
        approximate_count(executor, &params.schema, &params.table, &options.approximate),
        executor.execute(&query.sql)
    );
    let total_count = count?;
    let rows = rows?;
    Ok(TableDataResult {
        data: rows,
        total_count,
        page_count: page_count(total_count, params.page_size),
    })
}

async fn window_count(
    executor: &dyn SqlExecutor,
    params: &TableQueryParams,
) -> EngineResult<TableDataResult> {
    let mut counted = params.clone();
    counted.skip_count = false;
    let query = build_query(&counted)?;
    let mut rows = executor.execute(&query.sql).await?;
    let total_count = rows.first().and_then(count_from_row).unwrap_or(0);
    strip_total_count(&mut rows);
    Ok(TableDataResult {
        data: rows,
        total_count,
        page_count: page_count(total_count, params.page_size),
    })
}

async fn run_strategy(
    strategy: CountStrategy,
    executor: &dyn SqlExecutor,
    params: &TableQueryParams,
    options: &PaginationOptions,
) -> EngineResult<TableDataResult> {
    match strategy {
        CountStrategy::LimitProbe => limit_probe(executor, params, options).await,
        CountStrategy::ParallelEstimate => parallel_estimate(executor, params, options).await,
        CountStrategy::WindowCount => window_count(executor, params).await,
    }
}

#[instrument(skip(executor, params, options), fields(schema = %params.schema, table = %params.table, page = params.page))]
pub async fn query_table_data(
    executor: &dyn SqlExecutor,
    params: &TableQueryParams,
    options: &PaginationOptions,
) -> EngineResult<TableDataResult> {
    let prepared = prepare_params(params);
    let plan = plan_strategies(&prepared);
    debug!("分页策略: {:?}", plan);

    let mut last_error = None;
    for strategy in plan {
        match run_strategy(strategy, executor, &prepared, options).await {
            Ok(mut result) => {
                strip_total_count(&mut result.data);
                info!(
                    "表数据查询完成: strategy={:?}, rows={}, total={}",
                    strategy,
                    result.data.len(),
                    result.total_count
                );
                return Ok(result);
            }
            // 配置类错误换策略也不会成功
            Err(e) if e.is_configuration() => return Err(e),
            Err(e) => {
                warn!("分页策略 {:?} 失败, 尝试下一个: {}", strategy, e);
                last_error = Some(e);
            }
        }
    }
    Err(EngineError::StrategiesExhausted(Box::new(
        last_error.unwrap_or_else(|| {
            EngineError::Database(sqlx::Error::Protocol("no pagination strategy".into()))
        }),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{db_error, id_rows, ScriptedExecutor};
    use crate::models::query::{FilterCondition, FilterOperator};
    use serde_json::{json, Value};

    fn params(page: u64, page_size: u64) -> TableQueryParams {
        let mut p = TableQueryParams::new("public", "events");
        p.page = page;
        p.page_size = page_size;
        p
    }

    fn is_estimate(sql: &str) -> bool {
        sql.contains("pg_stat_user_tables")
    }

    fn with_total(rows: Vec<Value>, total: u64) -> Vec<Value> {
        rows.into_iter()
            .map(|mut r| {
                r["total_count"] = json!(total);
                r
            })
            .collect()
    }

    #[test]
    fn page_count_is_ceiling() {
        assert_eq!(page_count(0, 10), 0.0);
        assert_eq!(page_count(10, 10), 1.0);
        assert_eq!(page_count(11, 10), 2.0);
        assert_eq!(page_count(99, 25), 4.0);
        for total in 0..50u64 {
            for size in 1..7u64 {
                assert_eq!(page_count(total, size), (total as f64 / size as f64).ceil());
            }
        }
    }

    #[test]
    fn zero_page_size_gives_infinite_pages() {
        assert!(page_count(5, 0).is_infinite());
    }

    #[test]
    fn planning_follows_request_shape() {
        assert_eq!(
            plan_strategies(&params(1, 10)),
            vec![CountStrategy::LimitProbe, CountStrategy::WindowCount]
        );
        assert_eq!(
            plan_strategies(&params(4, 10)),
            vec![CountStrategy::ParallelEstimate, CountStrategy::WindowCount]
        );
        let mut searched = params(1, 10);
        searched.search = Some("x".into());
        assert_eq!(plan_strategies(&searched), vec![CountStrategy::WindowCount]);
        let mut blank = params(1, 10);
        blank.search = Some("   ".into());
        assert!(is_simple_scan(&blank));
    }

    #[test]
    fn having_only_filters_do_not_break_simple_scan_for_plain_tables() {
        // 非聚合查询下, 所有过滤都是 WHERE
        let mut p = params(1, 10);
        p.filters = vec![FilterCondition::new("value", FilterOperator::Gt, json!(1))];
        let prepared = prepare_params(&p);
        assert_eq!(prepared.filters.len(), 1);
        assert!(!is_simple_scan(&prepared));
    }

    #[test]
    fn aggregated_filters_move_to_having() {
        let mut p = params(1, 10);
        p.group_by = Some(vec!["kind".into()]);
        p.filters = vec![
            FilterCondition::new("count", FilterOperator::Gt, json!(1)),
            FilterCondition::new("kind", FilterOperator::Eq, json!("a")),
        ];
        let prepared = prepare_params(&p);
        assert_eq!(prepared.filters.len(), 1);
        assert_eq!(prepared.having_filters.len(), 1);
        assert_eq!(plan_strategies(&prepared), vec![CountStrategy::WindowCount]);
    }

    #[tokio::test]
    async fn first_page_exact_fit_issues_one_query() {
        let exec = ScriptedExecutor::new(|_| Ok(id_rows(10)));
        let out = query_table_data(&exec, &params(1, 10), &PaginationOptions::default())
            .await
            .unwrap();
        assert_eq!(out.total_count, 10);
        assert_eq!(out.page_count, 1.0);
        assert_eq!(out.data.len(), 10);
        assert_eq!(exec.calls(), 1);
        let stmt = &exec.statements()[0];
        assert!(!stmt.sql.contains("OVER()"));
        assert_eq!(stmt.params[0], crate::core::statement::SqlParam::Int(11));
    }

    #[tokio::test]
    async fn first_page_overflow_uses_estimate() {
        let exec = ScriptedExecutor::new(|sql| {
            if is_estimate(sql) {
                Ok(vec![json!({"total_count": 5_000})])
            } else {
                Ok(id_rows(11))
            }
        });
        let out = query_table_data(&exec, &params(1, 10), &PaginationOptions::default())
            .await
            .unwrap();
        assert_eq!(out.data.len(), 10);
        assert_eq!(out.total_count, 5_000);
        assert_eq!(out.page_count, 500.0);
        assert_eq!(exec.calls(), 2);
    }

    #[tokio::test]
    async fn first_page_estimate_failure_uses_heuristic() {
        let exec = ScriptedExecutor::new(|sql| {
            if is_estimate(sql) {
                Err(db_error())
            } else {
                Ok(id_rows(26))
            }
        });
        let out = query_table_data(&exec, &params(1, 25), &PaginationOptions::default())
            .await
            .unwrap();
        assert_eq!(out.data.len(), 25);
        assert_eq!(out.total_count, 250);
        assert_eq!(out.page_count, 10.0);
    }

    #[tokio::test]
    async fn later_pages_run_estimate_and_data_together() {
        let exec = ScriptedExecutor::new(|sql| {
            if is_estimate(sql) {
                Ok(vec![json!({"total_count": 1_000})])
            } else {
                Ok(id_rows(20))
            }
        });
        let out = query_table_data(&exec, &params(3, 20), &PaginationOptions::default())
            .await
            .unwrap();
        assert_eq!(out.total_count, 1_000);
        assert_eq!(out.page_count, 50.0);
        assert_eq!(exec.calls(), 2);
        assert!(exec
            .statements()
            .iter()
            .all(|s| !s.sql.contains("OVER()")));
    }

    #[tokio::test]
    async fn later_page_estimate_failure_falls_back_to_window_count() {
        let exec = ScriptedExecutor::new(|sql| {
            if is_estimate(sql) {
                Err(db_error())
            } else if sql.contains("OVER()") {
                Ok(with_total(id_rows(5), 45))
            } else {
                Ok(id_rows(20))
            }
        });
        let out = query_table_data(&exec, &params(3, 20), &PaginationOptions::default())
            .await
            .unwrap();
        assert_eq!(out.total_count, 45);
        assert_eq!(out.page_count, 3.0);
        assert_eq!(out.data.len(), 5);
        assert!(out.data.iter().all(|r| !r.contains_key("total_count")));
        assert_eq!(exec.calls(), 3);
    }

    #[tokio::test]
    async fn later_page_data_failure_falls_back_to_window_count() {
        let exec = ScriptedExecutor::new(|sql| {
            if is_estimate(sql) {
                Ok(vec![json!({"total_count": 1_000})])
            } else if sql.contains("OVER()") {
                Ok(with_total(id_rows(20), 60))
            } else {
                Err(db_error())
            }
        });
        let out = query_table_data(&exec, &params(2, 20), &PaginationOptions::default())
            .await
            .unwrap();
        assert_eq!(out.total_count, 60);
        assert_eq!(out.page_count, 3.0);
        assert_eq!(out.data.len(), 20);
        assert!(out.data.iter().all(|r| !r.contains_key("total_count")));
        assert_eq!(exec.calls(), 3);
    }

    #[tokio::test]
    async fn window_count_with_no_rows_reports_zero() {
        let exec = ScriptedExecutor::new(|_| Ok(vec![]));
        let mut p = params(2, 10);
        p.search = Some("nothing".into());
        let out = query_table_data(&exec, &p, &PaginationOptions::default())
            .await
            .unwrap();
        assert_eq!(out.total_count, 0);
        assert_eq!(out.page_count, 0.0);
        assert_eq!(exec.calls(), 1);
    }

    #[tokio::test]
    async fn filtered_queries_use_single_window_query() {
        let exec = ScriptedExecutor::new(|_| Ok(with_total(id_rows(3), 3)));
        let mut p = params(1, 10);
        p.filters = vec![FilterCondition::new("kind", FilterOperator::Eq, json!("a"))];
        let out = query_table_data(&exec, &p, &PaginationOptions::default())
            .await
            .unwrap();
        assert_eq!(out.total_count, 3);
        assert_eq!(exec.calls(), 1);
        assert!(exec.statements()[0].sql.contains("COUNT(*) OVER()"));
        assert!(!exec.statements()[0].sql.contains("pg_stat_user_tables"));
    }

    #[tokio::test]
    async fn ladder_is_bounded_when_everything_fails() {
        let exec = ScriptedExecutor::new(|_| Err(db_error()));
        let err = query_table_data(&exec, &params(5, 10), &PaginationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::StrategiesExhausted(_)));
        assert!(exec.calls() <= 3);
    }

    #[tokio::test]
    async fn configuration_errors_skip_the_ladder() {
        let exec = ScriptedExecutor::new(|_| Ok(vec![]));
        let mut p = params(1, 10);
        p.sort_column = Some("bad column;".into());
        let err = query_table_data(&exec, &p, &PaginationOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidIdentifier(_)));
        assert_eq!(exec.calls(), 0);
    }
}
