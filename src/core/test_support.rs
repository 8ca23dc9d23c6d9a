//! 单元测试用的内存执行器与权限判定

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::executor::{PermissionOracle, SqlExecutor, TableTarget};
use crate::core::statement::{RenderedStatement, Statement};
use crate::error::{EngineError, EngineResult};
use crate::models::Row;

type Handler = Box<dyn Fn(&str) -> EngineResult<Vec<Value>> + Send + Sync>;

/// 按 SQL 文本脚本化返回, 并记录收到的每条语句
pub struct ScriptedExecutor {
    handler: Handler,
    log: Mutex<Vec<RenderedStatement>>,
}

impl ScriptedExecutor {
    pub fn new(handler: impl Fn(&str) -> EngineResult<Vec<Value>> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn statements(&self) -> Vec<RenderedStatement> {
        self.log.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn execute(&self, stmt: &Statement) -> EngineResult<Vec<Row>> {
        let rendered = stmt.render();
        self.log.lock().unwrap().push(rendered.clone());
        let values = (self.handler)(&rendered.sql)?;
        Ok(values
            .into_iter()
            .map(|v| match v {
                Value::Object(map) => map,
                other => panic!("scripted rows must be objects, got {other}"),
            })
            .collect())
    }
}

pub fn db_error() -> EngineError {
    EngineError::Database(sqlx::Error::PoolTimedOut)
}

/// n 行 {"id": i} 数据
pub fn id_rows(n: usize) -> Vec<Value> {
    (1..=n).map(|i| serde_json::json!({ "id": i })).collect()
}

pub struct StaticPermissions {
    denied: HashSet<TableTarget>,
    fail: bool,
    batch_calls: Mutex<usize>,
}

impl StaticPermissions {
    pub fn allow_all() -> Self {
        Self {
            denied: HashSet::new(),
            fail: false,
            batch_calls: Mutex::new(0),
        }
    }

    pub fn deny(targets: &[(&str, &str)]) -> Self {
        Self {
            denied: targets
                .iter()
                .map(|(s, t)| TableTarget::new(*s, *t))
                .collect(),
            ..Self::allow_all()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::allow_all()
        }
    }

    pub fn batch_calls(&self) -> usize {
        *self.batch_calls.lock().unwrap()
    }
}

#[async_trait]
impl PermissionOracle for StaticPermissions {
    async fn has_select_permission(&self, schema: &str, table: &str) -> EngineResult<bool> {
        if self.fail {
            return Err(db_error());
        }
        Ok(!self.denied.contains(&TableTarget::new(schema, table)))
    }

    async fn has_select_permissions(&self, targets: &[TableTarget]) -> EngineResult<Vec<bool>> {
        *self.batch_calls.lock().unwrap() += 1;
        if self.fail {
            return Err(db_error());
        }
        Ok(targets.iter().map(|t| !self.denied.contains(t)).collect())
    }
}
