//! 外键批量解析
//!
//! 按 (目标 schema, 表, 列) 分组, 每组一条 `IN (...)` 查询, 再把记录映射回原始行.
//! 无权限的分组不查询, 直接给出空记录; 单组查询失败只影响该组.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::display_format::{optimal_columns, TemplateCache};
use crate::core::executor::{PermissionOracle, SqlExecutor, TableTarget};
use crate::core::identifiers::{qualified_table, quote_identifier, validate_column_names};
use crate::core::statement::{json_text, Statement};
use crate::error::{EngineError, EngineResult};
use crate::models::relation::{
    display_key, BatchGroup, BatchResult, DisplayMetadata, ForeignKeyLookup, FormattedRelation,
    RelationConfig, RelationsConfig, TableDisplay,
};
use crate::models::Row;

/// 目标表权限来源
#[derive(Clone, Copy)]
pub enum Authorization<'a> {
    /// 调用方已校验过, 跳过检查
    PreAuthorized,
    /// 对所有目标表做一次批量检查
    Check(&'a dyn PermissionOracle),
}

type GroupKey = (String, String, String);

fn group_key(schema: &str, table: &str, column: &str) -> GroupKey {
    (schema.to_string(), table.to_string(), column.to_string())
}

pub fn collect_lookups(rows: &[Row], relations: &[RelationConfig]) -> Vec<ForeignKeyLookup> {
    let mut lookups = Vec::new();
    for (index, row) in rows.iter().enumerate() {
        for relation in relations {
            let value = match row.get(&relation.source_column) {
                Some(v) if !v.is_null() => v,
                _ => continue,
            };
            lookups.push(ForeignKeyLookup {
                schema: relation.target_schema.clone(),
                table: relation.target_table.clone(),
                column: relation.target_column.clone(),
                value: value.clone(),
                source_row: index,
                source_column: relation.source_column.clone(),
            });
        }
    }
    lookups
}

/// 按目标分组, 组内取值去重; 组顺序与首次出现顺序一致
pub fn group_lookups(lookups: &[ForeignKeyLookup]) -> Vec<BatchGroup> {
    let mut groups: Vec<BatchGroup> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut seen: HashMap<GroupKey, HashSet<String>> = HashMap::new();

    for lookup in lookups {
        let key = group_key(&lookup.schema, &lookup.table, &lookup.column);
        let slot = *index.entry(key.clone()).or_insert_with(|| {
            groups.push(BatchGroup {
                schema: lookup.schema.clone(),
                table: lookup.table.clone(),
                column: lookup.column.clone(),
                values: Vec::new(),
                lookups: Vec::new(),
            });
            groups.len() - 1
        });
        let group = &mut groups[slot];
        if seen.entry(key).or_default().insert(json_text(&lookup.value)) {
            group.values.push(lookup.value.clone());
        }
        group.lookups.push(lookup.clone());
    }
    groups
}

/// 每个路径段单独编码, 键值里的 `/`、`?`、空格不会破坏链接
pub fn record_link(schema: &str, table: &str, value: &Value) -> String {
    format!(
        "/{}/{}/record/{}",
        urlencoding::encode(schema),
        urlencoding::encode(table),
        urlencoding::encode(&json_text(value))
    )
}

/// 整数键直接比较以便走索引, 其它键统一按文本比较
pub fn batch_statement(group: &BatchGroup, columns: Option<&[String]>) -> EngineResult<Statement> {
    if group.values.is_empty() {
        return Err(EngineError::EmptyBatchValues {
            schema: group.schema.clone(),
            table: group.table.clone(),
            column: group.column.clone(),
        });
    }

    let projection = match columns {
        Some(cols) if !cols.is_empty() => cols
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", "),
        _ => "*".to_string(),
    };
    let integers: Option<Vec<i64>> = group.values.iter().map(Value::as_i64).collect();
    let column = quote_identifier(&group.column);

    let mut stmt = Statement::text(format!(
        "SELECT {} FROM {} WHERE ",
        projection,
        qualified_table(&group.schema, &group.table)
    ));
    match integers {
        Some(ints) => {
            stmt.push(format!("{} IN (", column));
            for (i, v) in ints.into_iter().enumerate() {
                if i > 0 {
                    stmt.push(", ");
                }
                stmt.push_bind(v);
            }
        }
        None => {
            stmt.push(format!("{}::text IN (", column));
            for (i, v) in group.values.iter().enumerate() {
                if i > 0 {
                    stmt.push(", ");
                }
                stmt.push_bind(json_text(v));
            }
        }
    }
    stmt.push(")");
    Ok(stmt)
}

fn display_for<'a>(display: &'a DisplayMetadata, schema: &str, table: &str) -> Option<&'a TableDisplay> {
    display.get(&display_key(schema, table))
}

/// 查询列: 模板所需列 + 目标列 (映射回原始行需要)
fn projection_for(group: &BatchGroup, display: &DisplayMetadata) -> Option<Vec<String>> {
    let table_display = display_for(display, &group.schema, &group.table)?;
    let mut columns = optimal_columns(table_display.display_format.as_deref(), table_display)?;
    if !columns.contains(&group.column) {
        columns.push(group.column.clone());
    }
    // 展示元数据里的列名不合法时退回 SELECT *
    validate_column_names(&columns).then_some(columns)
}

async fn authorized_targets(
    groups: &[BatchGroup],
    authorization: Authorization<'_>,
) -> HashSet<TableTarget> {
    let mut targets: Vec<TableTarget> = Vec::new();
    for group in groups {
        let target = TableTarget::new(group.schema.as_str(), group.table.as_str());
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    let oracle = match authorization {
        Authorization::PreAuthorized => return targets.into_iter().collect(),
        Authorization::Check(oracle) => oracle,
    };
    match oracle.has_select_permissions(&targets).await {
        Ok(allowed) => targets
            .into_iter()
            .zip(allowed)
            .filter_map(|(t, ok)| ok.then_some(t))
            .collect(),
        Err(e) => {
            // 权限查询失败按无权限处理, 不让整个请求失败
            warn!("批量权限检查失败, 关联表全部按无权限处理: {}", e);
            HashSet::new()
        }
    }
}

pub async fn fetch_batches(
    executor: &dyn SqlExecutor,
    groups: &[BatchGroup],
    display: &DisplayMetadata,
    authorization: Authorization<'_>,
) -> EngineResult<Vec<BatchResult>> {
    let allowed = authorized_targets(groups, authorization).await;
    let mut results = Vec::with_capacity(groups.len());

    for group in groups {
        let mut result = BatchResult {
            schema: group.schema.clone(),
            table: group.table.clone(),
            column: group.column.clone(),
            records: Vec::new(),
        };
        let target = TableTarget::new(group.schema.as_str(), group.table.as_str());
        if !allowed.contains(&target) {
            debug!("无权访问 {}.{}, 跳过外键查询", group.schema, group.table);
            results.push(result);
            continue;
        }

        let columns = projection_for(group, display);
        let stmt = batch_statement(group, columns.as_deref())?;
        match executor.execute(&stmt).await {
            Ok(records) => result.records = records,
            Err(e) => warn!(
                "外键批量查询失败 {}.{}.{}: {}",
                group.schema, group.table, group.column, e
            ),
        }
        results.push(result);
    }
    Ok(results)
}

pub fn format_relations(
    lookups: &[ForeignKeyLookup],
    results: &[BatchResult],
    display: &DisplayMetadata,
    templates: &TemplateCache,
) -> Vec<FormattedRelation> {
    let mut indexed: HashMap<GroupKey, HashMap<String, &Row>> = HashMap::new();
    for result in results {
        let by_value = indexed
            .entry(group_key(&result.schema, &result.table, &result.column))
            .or_default();
        for record in &result.records {
            if let Some(v) = record.get(&result.column).filter(|v| !v.is_null()) {
                by_value.entry(json_text(v)).or_insert(record);
            }
        }
    }

    lookups
        .iter()
        .map(|lookup| {
            let record = indexed
                .get(&group_key(&lookup.schema, &lookup.table, &lookup.column))
                .and_then(|by_value| by_value.get(&json_text(&lookup.value)));
            let template = display_for(display, &lookup.schema, &lookup.table)
                .and_then(|d| d.display_format.as_deref());
            FormattedRelation {
                row_index: lookup.source_row,
                column: lookup.source_column.clone(),
                original: lookup.value.clone(),
                formatted: match (record, template) {
                    (Some(rec), Some(t)) => templates.render(t, rec),
                    _ => None,
                },
                link: record.map(|_| record_link(&lookup.schema, &lookup.table, &lookup.value)),
            }
        })
        .collect()
}

#[instrument(skip_all, fields(rows = rows.len()))]
pub async fn resolve_relations(
    executor: &dyn SqlExecutor,
    authorization: Authorization<'_>,
    rows: &[Row],
    relations: &RelationsConfig,
    display: &DisplayMetadata,
    templates: &TemplateCache,
) -> EngineResult<Vec<FormattedRelation>> {
    let relations = relations.lookup_relations();
    if relations.is_empty() || rows.is_empty() {
        return Ok(Vec::new());
    }
    let lookups = collect_lookups(rows, &relations);
    let groups = group_lookups(&lookups);
    let results = fetch_batches(executor, &groups, display, authorization).await?;
    let formatted = format_relations(&lookups, &results, display, templates);
    info!(
        "外键解析完成: lookups={}, groups={}, resolved={}",
        lookups.len(),
        groups.len(),
        formatted.iter().filter(|f| f.link.is_some()).count()
    );
    Ok(formatted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::statement::SqlParam;
    use crate::core::test_support::{db_error, ScriptedExecutor, StaticPermissions};
    use crate::models::relation::RelationType;
    use serde_json::json;

    fn relation(source: &str, table: &str) -> RelationConfig {
        RelationConfig {
            source_column: source.into(),
            target_schema: "public".into(),
            target_table: table.into(),
            target_column: "id".into(),
            relation_type: RelationType::ManyToOne,
        }
    }

    fn rows(v: Value) -> Vec<Row> {
        v.as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect()
    }

    fn customer_display() -> DisplayMetadata {
        let mut display = DisplayMetadata::new();
        display.insert(
            "public.customers".into(),
            TableDisplay {
                display_format: Some("{name}".into()),
                primary_key: None,
                unique_columns: vec![],
            },
        );
        display
    }

    #[test]
    fn duplicate_values_collapse_but_lookups_are_kept() {
        let data = rows(json!([
            {"customer_id": 7}, {"customer_id": 7}, {"customer_id": 7}, {"customer_id": 7}
        ]));
        let lookups = collect_lookups(&data, &[relation("customer_id", "customers")]);
        let groups = group_lookups(&lookups);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].values, vec![json!(7)]);
        assert_eq!(groups[0].lookups.len(), 4);
    }

    #[test]
    fn null_and_missing_values_are_skipped() {
        let data = rows(json!([{"customer_id": null}, {}, {"customer_id": 2}]));
        let lookups = collect_lookups(&data, &[relation("customer_id", "customers")]);
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].source_row, 2);
    }

    #[test]
    fn lookups_group_by_target() {
        let data = rows(json!([
            {"customer_id": 1, "seller_id": 1},
            {"customer_id": 2, "seller_id": 3}
        ]));
        let lookups = collect_lookups(
            &data,
            &[relation("customer_id", "customers"), relation("seller_id", "users")],
        );
        let groups = group_lookups(&lookups);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].table, "customers");
        assert_eq!(groups[0].values, vec![json!(1), json!(2)]);
        assert_eq!(groups[1].values, vec![json!(1), json!(3)]);
    }

    #[test]
    fn record_links_encode_each_segment() {
        assert_eq!(
            record_link("public", "customers", &json!(42)),
            "/public/customers/record/42"
        );
        assert_eq!(
            record_link("public", "files", &json!("a/b?c d")),
            "/public/files/record/a%2Fb%3Fc%20d"
        );
        assert_eq!(
            record_link("my schema", "t", &json!("x")),
            "/my%20schema/t/record/x"
        );
    }

    #[test]
    fn empty_groups_are_rejected() {
        let group = BatchGroup {
            schema: "public".into(),
            table: "customers".into(),
            column: "id".into(),
            values: vec![],
            lookups: vec![],
        };
        assert!(matches!(
            batch_statement(&group, None),
            Err(EngineError::EmptyBatchValues { .. })
        ));
    }

    #[test]
    fn integer_and_text_keys_render_differently() {
        let mut group = BatchGroup {
            schema: "public".into(),
            table: "customers".into(),
            column: "id".into(),
            values: vec![json!(1), json!(2)],
            lookups: vec![],
        };
        let cols = vec!["id".to_string(), "name".to_string()];
        let rendered = batch_statement(&group, Some(cols.as_slice()))
            .unwrap()
            .render();
        assert_eq!(
            rendered.sql,
            "SELECT \"id\", \"name\" FROM \"public\".\"customers\" WHERE \"id\" IN ($1, $2)"
        );
        assert_eq!(rendered.params, vec![SqlParam::Int(1), SqlParam::Int(2)]);

        group.values = vec![json!("0b7e"), json!("9f21")];
        let rendered = batch_statement(&group, None).unwrap().render();
        assert_eq!(
            rendered.sql,
            "SELECT * FROM \"public\".\"customers\" WHERE \"id\"::text IN ($1, $2)"
        );
    }

    #[test]
    fn malformed_display_columns_fall_back_to_star() {
        let mut display = DisplayMetadata::new();
        display.insert(
            "public.customers".into(),
            TableDisplay {
                display_format: Some("{name}".into()),
                primary_key: Some("id; drop".into()),
                unique_columns: vec![],
            },
        );
        let group = BatchGroup {
            schema: "public".into(),
            table: "customers".into(),
            column: "id".into(),
            values: vec![json!(1)],
            lookups: vec![],
        };
        assert_eq!(projection_for(&group, &display), None);
    }

    #[tokio::test]
    async fn resolves_with_one_query_per_group() {
        let exec = ScriptedExecutor::new(|sql| {
            assert!(sql.contains("\"customers\""));
            Ok(vec![
                json!({"id": 1, "name": "Acme"}),
                json!({"id": 2, "name": "Globex"}),
            ])
        });
        let data = rows(json!([
            {"customer_id": 1}, {"customer_id": 2}, {"customer_id": 1}, {"customer_id": 9}
        ]));
        let relations = RelationsConfig::List(vec![relation("customer_id", "customers")]);
        let cache = TemplateCache::new();
        let out = resolve_relations(
            &exec,
            Authorization::PreAuthorized,
            &data,
            &relations,
            &customer_display(),
            &cache,
        )
        .await
        .unwrap();

        assert_eq!(exec.calls(), 1);
        assert!(exec.statements()[0].sql.starts_with("SELECT \"id\", \"name\" FROM"));
        assert_eq!(out.len(), 4);
        assert_eq!(out[0].formatted.as_deref(), Some("Acme"));
        assert_eq!(out[0].link.as_deref(), Some("/public/customers/record/1"));
        assert_eq!(out[2].formatted.as_deref(), Some("Acme"));
        assert_eq!(out[2].row_index, 2);
        assert_eq!(out[3].formatted, None);
        assert_eq!(out[3].link, None);
    }

    #[tokio::test]
    async fn denied_targets_are_not_queried() {
        let exec = ScriptedExecutor::new(|_| Ok(vec![json!({"id": 5, "name": "x"})]));
        let oracle = StaticPermissions::deny(&[("public", "users")]);
        let data = rows(json!([{"customer_id": 5, "seller_id": 5}]));
        let relations = RelationsConfig::List(vec![
            relation("customer_id", "customers"),
            relation("seller_id", "users"),
        ]);
        let out = resolve_relations(
            &exec,
            Authorization::Check(&oracle),
            &data,
            &relations,
            &customer_display(),
            &TemplateCache::new(),
        )
        .await
        .unwrap();

        assert_eq!(oracle.batch_calls(), 1);
        assert_eq!(exec.calls(), 1);
        assert!(exec.statements()[0].sql.contains("\"customers\""));
        assert_eq!(out.len(), 2);
        assert!(out[0].link.is_some());
        assert!(out[1].link.is_none());
    }

    #[tokio::test]
    async fn failing_oracle_degrades_to_no_access() {
        let exec = ScriptedExecutor::new(|_| Ok(vec![]));
        let oracle = StaticPermissions::failing();
        let data = rows(json!([{"customer_id": 1}]));
        let relations = RelationsConfig::List(vec![relation("customer_id", "customers")]);
        let out = resolve_relations(
            &exec,
            Authorization::Check(&oracle),
            &data,
            &relations,
            &DisplayMetadata::new(),
            &TemplateCache::new(),
        )
        .await
        .unwrap();
        assert_eq!(exec.calls(), 0);
        assert_eq!(out.len(), 1);
        assert!(out[0].link.is_none());
    }

    #[tokio::test]
    async fn one_failing_group_does_not_affect_others() {
        let exec = ScriptedExecutor::new(|sql| {
            if sql.contains("\"users\"") {
                Err(db_error())
            } else {
                Ok(vec![json!({"id": 1})])
            }
        });
        let data = rows(json!([{"customer_id": 1, "seller_id": 1}]));
        let lookups = collect_lookups(
            &data,
            &[relation("customer_id", "customers"), relation("seller_id", "users")],
        );
        let groups = group_lookups(&lookups);
        let results = fetch_batches(&exec, &groups, &DisplayMetadata::new(), Authorization::PreAuthorized)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].records.len(), 1);
        assert!(results[1].records.is_empty());
        assert_eq!(exec.calls(), 2);
    }

    #[tokio::test]
    async fn projection_includes_non_key_target_column() {
        let exec = ScriptedExecutor::new(|_| Ok(vec![json!({"id": 1, "code": "EU", "name": "Europe"})]));
        let mut display = DisplayMetadata::new();
        display.insert(
            "public.regions".into(),
            TableDisplay {
                display_format: Some("{name}".into()),
                primary_key: None,
                unique_columns: vec![],
            },
        );
        let data = rows(json!([{"region": "EU"}]));
        let relations = RelationsConfig::List(vec![RelationConfig {
            source_column: "region".into(),
            target_schema: "public".into(),
            target_table: "regions".into(),
            target_column: "code".into(),
            relation_type: RelationType::OneToOne,
        }]);
        let out = resolve_relations(
            &exec,
            Authorization::PreAuthorized,
            &data,
            &relations,
            &display,
            &TemplateCache::new(),
        )
        .await
        .unwrap();
        assert!(exec.statements()[0]
            .sql
            .starts_with("SELECT \"id\", \"name\", \"code\" FROM"));
        assert_eq!(out[0].formatted.as_deref(), Some("Europe"));
        assert_eq!(out[0].link.as_deref(), Some("/public/regions/record/EU"));
    }
}
