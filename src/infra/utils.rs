use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{json, Value};
use sqlx::{postgres::PgRow, Column, Row as _, TypeInfo};
use uuid::Uuid;

use crate::models::Row;

// 按 Postgres 原生类型名把一行转换成 JSON 对象
pub fn pg_row_to_json(row: &PgRow) -> Row {
    let mut map = Row::new();

    for col in row.columns() {
        let name = col.name();
        let type_name = col.type_info().name();

        let val = match type_name {
            "INT2" => json!(row.try_get::<Option<i16>, _>(name).unwrap_or(None)),
            "INT4" => json!(row.try_get::<Option<i32>, _>(name).unwrap_or(None)),
            "INT8" => json!(row.try_get::<Option<i64>, _>(name).unwrap_or(None)),
            "FLOAT4" => json!(row.try_get::<Option<f32>, _>(name).unwrap_or(None)),
            "FLOAT8" => json!(row.try_get::<Option<f64>, _>(name).unwrap_or(None)),
            "NUMERIC" => {
                // 保留精度, 以字符串返回
                let v: Option<rust_decimal::Decimal> = row.try_get(name).unwrap_or(None);
                json!(v.map(|d| d.to_string()))
            }
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => {
                json!(row.try_get::<Option<String>, _>(name).unwrap_or(None))
            }
            "BOOL" => json!(row.try_get::<Option<bool>, _>(name).unwrap_or(None)),
            "UUID" => {
                let v: Option<Uuid> = row.try_get(name).unwrap_or(None);
                json!(v.map(|u| u.to_string()))
            }
            "DATE" => {
                let v: Option<NaiveDate> = row.try_get(name).unwrap_or(None);
                json!(v.map(|d| d.to_string()))
            }
            "TIME" => {
                let v: Option<NaiveTime> = row.try_get(name).unwrap_or(None);
                json!(v.map(|t| t.to_string()))
            }
            "TIMESTAMP" => {
                let v: Option<NaiveDateTime> = row.try_get(name).unwrap_or(None);
                json!(v.map(|dt| dt.to_string()))
            }
            "TIMESTAMPTZ" => {
                let v: Option<DateTime<Utc>> = row.try_get(name).unwrap_or(None);
                json!(v.map(|dt| dt.to_rfc3339()))
            }
            "JSON" | "JSONB" => {
                let v: Option<Value> = row.try_get(name).unwrap_or(None);
                v.unwrap_or(Value::Null)
            }
            _ => {
                // 未知类型尝试按字符串读取
                json!(row.try_get::<Option<String>, _>(name).unwrap_or(None))
            }
        };

        map.insert(name.to_string(), val);
    }

    map
}
