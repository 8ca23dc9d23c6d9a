//! 展示模板 `"{first_name} {last_name}"` 的解析与渲染
//!
//! 占位符只接受字母/数字/下划线/点, 其余一律视为普通文本, 从而不会进入 SQL.

use std::sync::Arc;

use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::core::statement::json_text;
use crate::models::relation::TableDisplay;
use crate::models::Row;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([^{}]*)\}").unwrap();
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap();
}

fn is_placeholder_name(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// 模板中出现的合法占位符, 去重并保持顺序
pub fn parse_display_format_columns(template: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in PLACEHOLDER.captures_iter(template) {
        let name = caps[1].trim();
        if is_placeholder_name(name) && !out.iter().any(|c| c == name) {
            out.push(name.to_string());
        }
    }
    out
}

/// 渲染模板所需的最小列集合: 主键 + 唯一约束列 + 占位符列, 主键在前.
/// 没有模板时返回 None, 调用方使用 SELECT *
pub fn optimal_columns(template: Option<&str>, display: &TableDisplay) -> Option<Vec<String>> {
    let template = template?;
    let mut columns = vec![display.primary_key().to_string()];
    let placeholders = parse_display_format_columns(template);
    // 模板无合法占位符时只取主键
    if placeholders.is_empty() {
        return Some(columns);
    }
    let heads = placeholders
        .iter()
        .filter_map(|p| p.split('.').next())
        .map(str::to_string);
    for column in display.unique_columns.iter().cloned().chain(heads) {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }
    Some(columns)
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledTemplate {
    segments: Vec<Segment>,
}

impl CompiledTemplate {
    pub fn compile(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;
        for caps in PLACEHOLDER.captures_iter(template) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let name = inner.as_str().trim();
            if !is_placeholder_name(name) {
                continue;
            }
            if whole.start() > last {
                segments.push(Segment::Literal(template[last..whole.start()].to_string()));
            }
            segments.push(Segment::Field(name.split('.').map(str::to_string).collect()));
            last = whole.end();
        }
        if last < template.len() {
            segments.push(Segment::Literal(template[last..].to_string()));
        }
        Self { segments }
    }

    /// 没有任何占位符取到非空值时返回 None
    pub fn render(&self, record: &Row) -> Option<String> {
        let mut out = String::new();
        let mut resolved = false;
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(path) => {
                    if let Some(value) = lookup(record, path) {
                        resolved = true;
                        out.push_str(&json_text(value));
                    }
                }
            }
        }
        resolved.then_some(out)
    }
}

fn lookup<'a>(record: &'a Row, path: &[String]) -> Option<&'a Value> {
    let (head, rest) = path.split_first()?;
    let mut current = record.get(head)?;
    for key in rest {
        current = current.as_object()?.get(key)?;
    }
    (!current.is_null()).then_some(current)
}

/// 已编译模板缓存, 由调用方持有, 可显式清空
#[derive(Debug, Default)]
pub struct TemplateCache {
    compiled: DashMap<String, Arc<CompiledTemplate>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, template: &str) -> Arc<CompiledTemplate> {
        if let Some(hit) = self.compiled.get(template) {
            return hit.value().clone();
        }
        let compiled = Arc::new(CompiledTemplate::compile(template));
        self.compiled
            .insert(template.to_string(), compiled.clone());
        compiled
    }

    pub fn render(&self, template: &str, record: &Row) -> Option<String> {
        self.get(template).render(record)
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    pub fn clear(&self) {
        self.compiled.clear();
    }
}
