use async_trait::async_trait;

use crate::core::statement::Statement;
use crate::error::EngineResult;
use crate::models::Row;

/// SQL 执行器: 连接或语句错误时返回 Err
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, stmt: &Statement) -> EngineResult<Vec<Row>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableTarget {
    pub schema: String,
    pub table: String,
}

impl TableTarget {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

/// 权限判定, 只消费布尔结果
#[async_trait]
pub trait PermissionOracle: Send + Sync {
    async fn has_select_permission(&self, schema: &str, table: &str) -> EngineResult<bool>;

    /// 批量判定, 结果与 targets 一一对应
    async fn has_select_permissions(&self, targets: &[TableTarget]) -> EngineResult<Vec<bool>> {
        let mut out = Vec::with_capacity(targets.len());
        for target in targets {
            out.push(
                self.has_select_permission(&target.schema, &target.table)
                    .await?,
            );
        }
        Ok(out)
    }
}
