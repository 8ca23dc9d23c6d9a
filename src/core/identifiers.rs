//! 标识符引用与聚合表达式构造
//!
//! 所有运行时传入的 schema/table/column 名在拼进 SQL 之前都必须经过 `quote_identifier`.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{EngineError, EngineResult};

/// Postgres 标识符最大长度 (NAMEDATALEN - 1)
pub const MAX_IDENTIFIER_LEN: usize = 63;

pub const SUPPORTED_AGGREGATIONS: [&str; 5] = ["COUNT", "SUM", "AVG", "MIN", "MAX"];

lazy_static! {
    static ref COLUMN_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").unwrap();
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

pub fn build_aggregation_expression(function: &str, column: &str) -> EngineResult<String> {
    let function = function.trim().to_uppercase();
    if !SUPPORTED_AGGREGATIONS.contains(&function.as_str()) {
        return Err(EngineError::UnsupportedAggregation(function));
    }
    // SUM(*) / AVG(*) 等不是合法 SQL, 统一改写为 COUNT(*)
    if column == "*" {
        return Ok("COUNT(*)".to_string());
    }
    Ok(format!("{}({})", function, quote_identifier(column)))
}

pub fn is_valid_column_name(name: &str) -> bool {
    name.len() <= MAX_IDENTIFIER_LEN && COLUMN_NAME.is_match(name)
}

pub fn validate_column_names<S: AsRef<str>>(names: &[S]) -> bool {
    names.iter().all(|n| is_valid_column_name(n.as_ref()))
}

pub fn ensure_column_name(name: &str) -> EngineResult<()> {
    if is_valid_column_name(name) {
        Ok(())
    } else {
        Err(EngineError::InvalidIdentifier(name.to_string()))
    }
}
