use serde::Serialize;
use serde_json::Value;

/// JSON 值的文本形式, 字符串不带引号
pub fn json_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 绑定参数, 永远不拼接进 SQL 文本
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for SqlParam {
    fn from(v: u64) -> Self {
        Self::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for SqlParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Fragment {
    Text(String),
    Param(SqlParam),
}

/// 参数化 SQL: 按顺序累积文本片段与绑定参数, 最后统一渲染占位符
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    fragments: Vec<Fragment>,
}

/// 渲染后的语句, Postgres `$n` 占位符
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedStatement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(sql: impl Into<String>) -> Self {
        let mut stmt = Self::new();
        stmt.push(sql);
        stmt
    }

    pub fn push(&mut self, sql: impl Into<String>) -> &mut Self {
        let sql = sql.into();
        if sql.is_empty() {
            return self;
        }
        match self.fragments.last_mut() {
            Some(Fragment::Text(last)) => last.push_str(&sql),
            _ => self.fragments.push(Fragment::Text(sql)),
        }
        self
    }

    pub fn push_bind(&mut self, param: impl Into<SqlParam>) -> &mut Self {
        self.fragments.push(Fragment::Param(param.into()));
        self
    }

    /// 拼接另一条语句, 参数编号在渲染时统一重排
    pub fn push_statement(&mut self, other: Statement) -> &mut Self {
        for fragment in other.fragments {
            match fragment {
                Fragment::Text(t) => {
                    self.push(t);
                }
                Fragment::Param(p) => {
                    self.fragments.push(Fragment::Param(p));
                }
            }
        }
        self
    }

    pub fn join(parts: Vec<Statement>, separator: &str) -> Statement {
        let mut out = Statement::new();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            out.push_statement(part);
        }
        out
    }

    pub fn render(&self) -> RenderedStatement {
        let mut sql = String::new();
        let mut params = Vec::new();
        for fragment in &self.fragments {
            match fragment {
                Fragment::Text(t) => sql.push_str(t),
                Fragment::Param(p) => {
                    params.push(p.clone());
                    sql.push('$');
                    sql.push_str(&params.len().to_string());
                }
            }
        }
        RenderedStatement { sql, params }
    }
}
