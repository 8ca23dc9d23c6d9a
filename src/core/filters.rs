//! 过滤条件 -> 参数化 SQL 条件
//!
//! WHERE 与 HAVING 共用同一套翻译, 只是左侧表达式不同.

use serde_json::Value;

use crate::core::filter_categorizer::{is_default_alias, parse_aggregate_call};
use crate::core::identifiers::{build_aggregation_expression, ensure_column_name, quote_identifier};
use crate::core::statement::{json_text, SqlParam, Statement};
use crate::error::{EngineError, EngineResult};
use crate::models::query::{FilterCondition, FilterOperator, FilterValueType};

/// WHERE 条件: 左侧是经过校验并引用的列
pub fn where_condition(filter: &FilterCondition) -> EngineResult<Statement> {
    ensure_column_name(&filter.column)?;
    condition(&quote_identifier(&filter.column), filter, None)
}

/// HAVING 条件: 别名替换为聚合表达式 (Postgres 的 HAVING 不能引用输出别名)
pub fn having_condition(filter: &FilterCondition, aggregate_expr: &str) -> EngineResult<Statement> {
    // 聚合值默认按数值比较, 普通分组列沿用 WHERE 的类型推断
    let (lhs, default_type) = if is_default_alias(&filter.column) {
        (aggregate_expr.to_string(), Some(FilterValueType::Number))
    } else if let Some((function, column)) = parse_aggregate_call(&filter.column) {
        if column != "*" {
            ensure_column_name(&column)?;
        }
        (
            build_aggregation_expression(&function, &column)?,
            Some(FilterValueType::Number),
        )
    } else {
        ensure_column_name(&filter.column)?;
        (quote_identifier(&filter.column), None)
    };
    condition(&lhs, filter, default_type)
}

/// 全文搜索: 整行转文本后做 ILIKE
pub fn search_condition(table: &str, term: &str) -> Statement {
    let mut stmt = Statement::text(format!(
        "CAST(ROW({}.*) AS TEXT) ILIKE ",
        quote_identifier(table)
    ));
    stmt.push_bind(format!("%{}%", escape_like(term)));
    stmt
}

pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

struct Typing {
    text_lhs: bool,
    cast: &'static str,
}

fn infer_typing(declared: Option<FilterValueType>, sample: &Value) -> Typing {
    match declared {
        Some(FilterValueType::Number) => Typing {
            text_lhs: false,
            cast: "::numeric",
        },
        Some(FilterValueType::Date) => Typing {
            text_lhs: false,
            cast: "::timestamptz",
        },
        Some(FilterValueType::Text) => Typing {
            text_lhs: true,
            cast: "",
        },
        None => Typing {
            text_lhs: matches!(sample, Value::String(_) | Value::Array(_) | Value::Object(_)),
            cast: "",
        },
    }
}

/// 列表统一类型: 未声明类型时, 只有全为数值或全为布尔才原样绑定, 否则按文本比较
fn list_typing(declared: Option<FilterValueType>, items: &[Value]) -> Typing {
    if declared.is_some() {
        return infer_typing(declared, &items[0]);
    }
    let uniform = items.iter().all(Value::is_number) || items.iter().all(Value::is_boolean);
    if uniform {
        infer_typing(None, &items[0])
    } else {
        infer_typing(Some(FilterValueType::Text), &items[0])
    }
}

fn param(value: &Value, typing: &Typing) -> SqlParam {
    if typing.text_lhs || !typing.cast.is_empty() {
        return SqlParam::Text(json_text(value));
    }
    match value {
        Value::Null => SqlParam::Null,
        Value::Bool(b) => SqlParam::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlParam::Int(i),
            None => SqlParam::Float(n.as_f64().unwrap_or_default()),
        },
        other => SqlParam::Text(json_text(other)),
    }
}

fn lhs_expr(lhs: &str, typing: &Typing) -> String {
    if typing.text_lhs {
        format!("{}::text", lhs)
    } else {
        lhs.to_string()
    }
}

fn push_operand(stmt: &mut Statement, value: &Value, typing: &Typing) {
    stmt.push_bind(param(value, typing));
    stmt.push(typing.cast);
}

fn list_values(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

fn condition(
    lhs: &str,
    filter: &FilterCondition,
    default_type: Option<FilterValueType>,
) -> EngineResult<Statement> {
    let declared = filter.value_type.or(default_type);
    let value = &filter.value;
    let mut stmt = Statement::new();

    match filter.operator {
        FilterOperator::IsNull => {
            stmt.push(format!("{} IS NULL", lhs));
        }
        FilterOperator::NotNull => {
            stmt.push(format!("{} IS NOT NULL", lhs));
        }
        FilterOperator::Eq | FilterOperator::Neq if value.is_null() => {
            let op = if filter.operator == FilterOperator::Eq {
                "IS NULL"
            } else {
                "IS NOT NULL"
            };
            stmt.push(format!("{} {}", lhs, op));
        }
        FilterOperator::Eq
        | FilterOperator::Neq
        | FilterOperator::Gt
        | FilterOperator::Gte
        | FilterOperator::Lt
        | FilterOperator::Lte => {
            let op = match filter.operator {
                FilterOperator::Eq => "=",
                FilterOperator::Neq => "<>",
                FilterOperator::Gt => ">",
                FilterOperator::Gte => ">=",
                FilterOperator::Lt => "<",
                _ => "<=",
            };
            let typing = infer_typing(declared, value);
            stmt.push(format!("{} {} ", lhs_expr(lhs, &typing), op));
            push_operand(&mut stmt, value, &typing);
        }
        FilterOperator::Contains
        | FilterOperator::NotContains
        | FilterOperator::StartsWith
        | FilterOperator::EndsWith => {
            let term = escape_like(&json_text(value));
            let (op, pattern) = match filter.operator {
                FilterOperator::Contains => ("ILIKE", format!("%{}%", term)),
                FilterOperator::NotContains => ("NOT ILIKE", format!("%{}%", term)),
                FilterOperator::StartsWith => ("ILIKE", format!("{}%", term)),
                _ => ("ILIKE", format!("%{}", term)),
            };
            stmt.push(format!("{}::text {} ", lhs, op));
            stmt.push_bind(pattern);
        }
        FilterOperator::In | FilterOperator::NotIn => {
            let items = list_values(value);
            let negated = filter.operator == FilterOperator::NotIn;
            if items.is_empty() {
                stmt.push(if negated { "TRUE" } else { "FALSE" });
                return Ok(stmt);
            }
            let typing = list_typing(declared, &items);
            stmt.push(format!(
                "{} {} (",
                lhs_expr(lhs, &typing),
                if negated { "NOT IN" } else { "IN" }
            ));
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    stmt.push(", ");
                }
                push_operand(&mut stmt, item, &typing);
            }
            stmt.push(")");
        }
        FilterOperator::Between => {
            let bounds = match value {
                Value::Array(items) if items.len() == 2 => items,
                _ => {
                    return Err(EngineError::InvalidFilter(format!(
                        "between on `{}` needs exactly two values",
                        filter.column
                    )))
                }
            };
            let typing = infer_typing(declared, &bounds[0]);
            stmt.push(format!("{} BETWEEN ", lhs_expr(lhs, &typing)));
            push_operand(&mut stmt, &bounds[0], &typing);
            stmt.push(" AND ");
            push_operand(&mut stmt, &bounds[1], &typing);
        }
    }
    Ok(stmt)
}
