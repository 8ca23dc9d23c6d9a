use std::collections::HashSet;

use sqlx::PgPool;

use crate::core::filter_categorizer::{is_default_alias, parse_aggregate_call};
use crate::core::query_builder::TIME_BUCKET_ALIAS;
use crate::error::{EngineError, EngineResult};
use crate::models::query::TableQueryParams;
use crate::models::relation::TableDisplay;
use crate::models::schema::ColumnMetadata;

const COLUMNS_SQL: &str = r#"
    SELECT c.column_name::text AS name,
           c.data_type::text AS data_type,
           (c.is_nullable = 'YES') AS nullable,
           EXISTS (
               SELECT 1 FROM information_schema.table_constraints tc
               JOIN information_schema.key_column_usage k
                 ON tc.constraint_name = k.constraint_name
                AND tc.table_schema = k.table_schema
                AND tc.table_name = k.table_name
               WHERE tc.constraint_type = 'PRIMARY KEY'
                 AND tc.table_schema = c.table_schema
                 AND tc.table_name = c.table_name
                 AND k.column_name = c.column_name
           ) AS is_primary_key,
           EXISTS (
               SELECT 1 FROM information_schema.table_constraints tc
               JOIN information_schema.key_column_usage k
                 ON tc.constraint_name = k.constraint_name
                AND tc.table_schema = k.table_schema
                AND tc.table_name = k.table_name
               WHERE tc.constraint_type = 'UNIQUE'
                 AND tc.table_schema = c.table_schema
                 AND tc.table_name = c.table_name
                 AND k.column_name = c.column_name
           ) AS is_unique,
           (c.data_type NOT IN ('json', 'jsonb', 'bytea')) AS filterable,
           (c.data_type NOT IN ('json', 'jsonb', 'bytea', 'ARRAY')) AS sortable
    FROM information_schema.columns c
    WHERE c.table_schema = $1 AND c.table_name = $2
    ORDER BY c.ordinal_position
"#;

/// 探测指定表的列及其主键/唯一约束
pub async fn load_columns(pool: &PgPool, schema: &str, table: &str) -> EngineResult<Vec<ColumnMetadata>> {
    let columns = sqlx::query_as::<_, ColumnMetadata>(COLUMNS_SQL)
        .bind(schema)
        .bind(table)
        .fetch_all(pool)
        .await?;
    Ok(columns)
}

/// 由目录信息补全展示元数据中的主键与唯一列
pub fn display_from_columns(columns: &[ColumnMetadata], display_format: Option<String>) -> TableDisplay {
    TableDisplay {
        display_format,
        primary_key: columns
            .iter()
            .find(|c| c.is_primary_key)
            .map(|c| c.name.clone()),
        unique_columns: columns
            .iter()
            .filter(|c| c.is_unique && !c.is_primary_key)
            .map(|c| c.name.clone())
            .collect(),
    }
}

/// 请求中引用的每个列都必须在目录里; 聚合别名、`*` 与时间桶别名除外
pub fn validate_params_against_catalog(
    params: &TableQueryParams,
    columns: &[ColumnMetadata],
) -> EngineResult<()> {
    let known: HashSet<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let filterable: HashSet<&str> = columns
        .iter()
        .filter(|c| c.filterable)
        .map(|c| c.name.as_str())
        .collect();
    let sortable: HashSet<&str> = columns
        .iter()
        .filter(|c| c.sortable)
        .map(|c| c.name.as_str())
        .collect();

    let check = |name: &str, allowed: &HashSet<&str>| -> EngineResult<()> {
        if name == "*" || name == TIME_BUCKET_ALIAS || is_default_alias(name) {
            return Ok(());
        }
        if let Some((_, inner)) = parse_aggregate_call(name) {
            if inner == "*" || known.contains(inner.as_str()) {
                return Ok(());
            }
            return Err(EngineError::UnknownColumn(inner));
        }
        if allowed.contains(name) {
            Ok(())
        } else {
            Err(EngineError::UnknownColumn(name.to_string()))
        }
    };

    for column in params.columns.iter().flatten() {
        check(column.as_str(), &known)?;
    }
    for column in params.group_by.iter().flatten() {
        check(column.as_str(), &known)?;
    }
    for name in [
        params.x_axis.as_deref(),
        params.y_axis.as_deref(),
        params.aggregation_column.as_deref(),
    ]
    .into_iter()
    .flatten()
    {
        check(name, &known)?;
    }
    for filter in params.filters.iter().chain(&params.having_filters) {
        check(filter.column.as_str(), &filterable)?;
    }
    if let Some(sort) = params.sort_column.as_deref() {
        check(sort, &sortable)?;
    }
    Ok(())
}
