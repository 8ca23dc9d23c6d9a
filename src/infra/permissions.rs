use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::core::executor::{PermissionOracle, TableTarget};
use crate::error::EngineResult;

/// 通过 has_table_privilege 判定 SELECT 权限; 不存在的表视为无权限
#[derive(Clone)]
pub struct PgPermissionOracle {
    pool: PgPool,
}

impl PgPermissionOracle {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const BATCH_PRIVILEGE_SQL: &str = "\
    SELECT COALESCE(has_table_privilege(to_regclass(format('%I.%I', t.schema_name, t.table_name)), 'SELECT'), false) AS allowed \
    FROM unnest($1::text[], $2::text[]) WITH ORDINALITY AS t(schema_name, table_name, ord) \
    ORDER BY t.ord";

#[async_trait]
impl PermissionOracle for PgPermissionOracle {
    async fn has_select_permission(&self, schema: &str, table: &str) -> EngineResult<bool> {
        let allowed = self
            .has_select_permissions(&[TableTarget::new(schema, table)])
            .await?;
        Ok(allowed.first().copied().unwrap_or(false))
    }

    async fn has_select_permissions(&self, targets: &[TableTarget]) -> EngineResult<Vec<bool>> {
        if targets.is_empty() {
            return Ok(Vec::new());
        }
        let schemas: Vec<String> = targets.iter().map(|t| t.schema.clone()).collect();
        let tables: Vec<String> = targets.iter().map(|t| t.table.clone()).collect();
        let rows = sqlx::query(BATCH_PRIVILEGE_SQL)
            .bind(schemas)
            .bind(tables)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| r.try_get::<bool, _>("allowed").unwrap_or(false))
            .collect())
    }
}
