use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::core::executor::SqlExecutor;
use crate::core::statement::{SqlParam, Statement};
use crate::error::EngineResult;
use crate::infra::utils::pg_row_to_json;
use crate::models::Row;

/// 基于连接池的执行器, 所有参数按类型绑定
#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn execute(&self, stmt: &Statement) -> EngineResult<Vec<Row>> {
        let rendered = stmt.render();
        debug!(sql = %rendered.sql, params = rendered.params.len(), "执行查询");

        let mut query = sqlx::query(&rendered.sql);
        for param in &rendered.params {
            query = match param {
                SqlParam::Null => query.bind(None::<String>),
                SqlParam::Bool(b) => query.bind(*b),
                SqlParam::Int(i) => query.bind(*i),
                SqlParam::Float(f) => query.bind(*f),
                SqlParam::Text(s) => query.bind(s.as_str()),
            };
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(pg_row_to_json).collect())
    }
}
