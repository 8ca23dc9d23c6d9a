//! 基于统计信息的行数估算
//!
//! 大表且统计信息新鲜时直接读 pg_stat_user_tables.n_live_tup (O(1)),
//! 否则退回精确 COUNT(*). 分区表会把 pg_inherits 中的子表一起计入.
//! 声明式分区的父表不会被自动 ANALYZE, 未手动 ANALYZE 前 staleness 为 Infinity,
//! 此时走精确计数.

use serde_json::Value;
use tracing::debug;

use crate::core::executor::SqlExecutor;
use crate::core::identifiers::qualified_table;
use crate::core::query_builder::TOTAL_COUNT_COLUMN;
use crate::core::statement::Statement;
use crate::error::{EngineError, EngineResult};
use crate::models::Row;

pub const DEFAULT_THRESHOLD: u64 = 100_000;
pub const DEFAULT_MAX_STALENESS_SECS: u64 = 900;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproximateCountOptions {
    pub threshold: u64,
    pub max_staleness_secs: u64,
}

impl Default for ApproximateCountOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            max_staleness_secs: DEFAULT_MAX_STALENESS_SECS,
        }
    }
}

pub fn approximate_count_statement(
    schema: &str,
    table: &str,
    options: &ApproximateCountOptions,
) -> Statement {
    let mut stmt = Statement::text(
        "WITH target AS (\
            SELECT c.oid FROM pg_catalog.pg_class c \
            JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
            WHERE n.nspname = ",
    );
    stmt.push_bind(schema)
        .push(" AND c.relname = ")
        .push_bind(table)
        .push(
            "), rels AS (\
                SELECT oid FROM target \
                UNION ALL \
                SELECT i.inhrelid FROM pg_catalog.pg_inherits i JOIN target t ON i.inhparent = t.oid\
            ), stats AS (\
                SELECT COALESCE(SUM(GREATEST(s.n_live_tup, 0)), 0)::bigint AS estimate, \
                       MAX(COALESCE(EXTRACT(EPOCH FROM (now() - GREATEST(s.last_analyze, s.last_autoanalyze)))::float8, 'Infinity'::float8)) AS staleness, \
                       COALESCE(SUM(c.relpages), 0)::bigint AS pages \
                FROM rels r \
                JOIN pg_catalog.pg_class c ON c.oid = r.oid \
                LEFT JOIN pg_catalog.pg_stat_user_tables s ON s.relid = r.oid\
            ) \
            SELECT CASE WHEN stats.estimate >= ",
        )
        .push_bind(options.threshold)
        .push(" AND stats.staleness <= ")
        .push_bind(options.max_staleness_secs as f64)
        .push(format!(
            " AND stats.pages > 0 THEN stats.estimate ELSE (SELECT COUNT(*) FROM {}) END AS {} FROM stats",
            qualified_table(schema, table),
            TOTAL_COUNT_COLUMN
        ));
    stmt
}

/// 从结果行里读出 total_count, 兼容数值与 NUMERIC 转成的字符串
pub fn count_from_row(row: &Row) -> Option<u64> {
    match row.get(TOTAL_COUNT_COLUMN)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
}

pub async fn approximate_count(
    executor: &dyn SqlExecutor,
    schema: &str,
    table: &str,
    options: &ApproximateCountOptions,
) -> EngineResult<u64> {
    let stmt = approximate_count_statement(schema, table, options);
    let rows = executor.execute(&stmt).await?;
    let count = rows.first().and_then(count_from_row).ok_or_else(|| {
        EngineError::Database(sqlx::Error::Protocol(format!(
            "approximate count for {}.{} returned no {}",
            schema, table, TOTAL_COUNT_COLUMN
        )))
    })?;
    debug!("{}.{} 估算行数: {}", schema, table, count);
    Ok(count)
}
