//! Row decoding.
//!
//! Every backend row is decoded into a [`JsonRow`] so the repository layer can
//! stay backend-agnostic. Decoding is two-phase: the declared column type is
//! classified into a [`ColumnKind`], then a backend-specific decoder extracts
//! the value. Values a decoder cannot represent become `null` and are logged.

use crate::models::{DatabaseType, JsonRow};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

/// Logical category of a column's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    /// Text, dates, and anything the driver reports without a declared type
    Other,
}

/// Classify a driver type name.
pub fn classify_column(type_name: &str, db: DatabaseType) -> ColumnKind {
    let lower = type_name.to_ascii_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite NUMERIC affinity stores floats
        return if db == DatabaseType::SQLite {
            ColumnKind::Float
        } else {
            ColumnKind::Decimal
        };
    }
    if lower.contains("int") || lower.contains("serial") {
        return ColumnKind::Integer;
    }
    if lower == "bool" || lower == "boolean" {
        return ColumnKind::Boolean;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return ColumnKind::Float;
    }
    if lower == "json" || lower == "jsonb" {
        return ColumnKind::Json;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return ColumnKind::Binary;
    }
    ColumnKind::Other
}

/// Encode bytes as UTF-8 text when possible, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

/// Exact decimal text; `12.50` stays `"12.50"`.
fn decimal_value(v: Decimal) -> JsonValue {
    JsonValue::String(v.to_string())
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

/// Decode a nullable column as `T`. `Ok(None)` is SQL NULL.
fn column<'r, R, T>(row: &'r R, idx: usize) -> Result<Option<T>, sqlx::Error>
where
    R: Row,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx)
}

fn decode_failed(column_name: &str, kind: ColumnKind) -> JsonValue {
    tracing::debug!(column = %column_name, kind = ?kind, "Column value could not be decoded");
    JsonValue::Null
}

/// Date and time columns rendered as text.
fn temporal<'r, R>(row: &'r R, idx: usize) -> Result<JsonValue, sqlx::Error>
where
    R: Row,
    usize: ColumnIndex<R>,
    chrono::DateTime<chrono::Utc>: Decode<'r, R::Database> + Type<R::Database>,
    chrono::NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    chrono::NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
{
    column::<_, chrono::DateTime<chrono::Utc>>(row, idx)
        .map(|v| v.map_or(JsonValue::Null, |t| JsonValue::String(t.to_rfc3339())))
        .or_else(|_| {
            column::<_, chrono::NaiveDateTime>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, |t| JsonValue::String(t.to_string())))
        })
        .or_else(|_| {
            column::<_, chrono::NaiveDate>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, |d| JsonValue::String(d.to_string())))
        })
}

/// Conversion of a backend row into a [`JsonRow`].
pub trait RowToJson {
    fn to_json_row(&self) -> JsonRow;
}

impl RowToJson for MySqlRow {
    fn to_json_row(&self) -> JsonRow {
        self.columns()
            .iter()
            .map(|col| {
                let kind = classify_column(col.type_info().name(), DatabaseType::MySQL);
                let value = mysql::decode_column(self, col.ordinal(), kind)
                    .unwrap_or_else(|| decode_failed(col.name(), kind));
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_row(&self) -> JsonRow {
        self.columns()
            .iter()
            .map(|col| {
                let kind = classify_column(col.type_info().name(), DatabaseType::PostgreSQL);
                let value = postgres::decode_column(self, col.ordinal(), kind)
                    .unwrap_or_else(|| decode_failed(col.name(), kind));
                (col.name().to_string(), value)
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_row(&self) -> JsonRow {
        self.columns()
            .iter()
            .map(|col| {
                let kind = classify_column(col.type_info().name(), DatabaseType::SQLite);
                let value = sqlite::decode_column(self, col.ordinal(), kind)
                    .unwrap_or_else(|| decode_failed(col.name(), kind));
                (col.name().to_string(), value)
            })
            .collect()
    }
}

// Each decoder returns `None` when no representation fits, `Some(Null)` for SQL NULL.

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, kind: ColumnKind) -> Option<JsonValue> {
        match kind {
            ColumnKind::Integer => column::<_, i64>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, JsonValue::from))
                .or_else(|_| column::<_, u64>(row, idx).map(|v| v.map_or(JsonValue::Null, JsonValue::from)))
                .ok(),
            ColumnKind::Float => column::<_, f64>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, float_value))
                .or_else(|_| {
                    column::<_, f32>(row, idx)
                        .map(|v| v.map_or(JsonValue::Null, |f| float_value(f as f64)))
                })
                .ok(),
            ColumnKind::Decimal => column::<_, Decimal>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, decimal_value))
                // Beyond 28 digits; the text protocol still carries it exactly
                .or_else(|_| {
                    row.try_get_unchecked::<Option<String>, _>(idx)
                        .map(|v| v.map_or(JsonValue::Null, JsonValue::String))
                })
                .ok(),
            ColumnKind::Other => column::<_, String>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, JsonValue::String))
                .or_else(|_| temporal(row, idx))
                .ok(),
            ColumnKind::Boolean => column::<_, bool>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, JsonValue::Bool))
                .ok(),
            ColumnKind::Binary => column::<_, Vec<u8>>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, |b| decode_binary_value(&b)))
                .ok(),
            ColumnKind::Json => column::<_, JsonValue>(row, idx)
                .map(|v| v.unwrap_or(JsonValue::Null))
                .ok(),
        }
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, kind: ColumnKind) -> Option<JsonValue> {
        match kind {
            ColumnKind::Integer => column::<_, i64>(row, idx)
                .or_else(|_| column::<_, i32>(row, idx).map(|v| v.map(i64::from)))
                .or_else(|_| column::<_, i16>(row, idx).map(|v| v.map(i64::from)))
                .map(|v| v.map_or(JsonValue::Null, JsonValue::from))
                .ok(),
            ColumnKind::Float => column::<_, f64>(row, idx)
                .or_else(|_| column::<_, f32>(row, idx).map(|v| v.map(f64::from)))
                .map(|v| v.map_or(JsonValue::Null, float_value))
                .ok(),
            ColumnKind::Boolean => column::<_, bool>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, JsonValue::Bool))
                .ok(),
            ColumnKind::Binary => column::<_, Vec<u8>>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, |b| decode_binary_value(&b)))
                .ok(),
            ColumnKind::Json => column::<_, JsonValue>(row, idx)
                .map(|v| v.unwrap_or(JsonValue::Null))
                .ok(),
            // NaN and values beyond 28 digits have no `Decimal`; cast to text to read them
            ColumnKind::Decimal => column::<_, Decimal>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, decimal_value))
                .ok(),
            ColumnKind::Other => column::<_, String>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, JsonValue::String))
                .or_else(|_| temporal(row, idx))
                .ok(),
        }
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(row: &SqliteRow, idx: usize, kind: ColumnKind) -> Option<JsonValue> {
        match kind {
            ColumnKind::Integer => column::<_, i64>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, JsonValue::from))
                .ok(),
            ColumnKind::Float | ColumnKind::Decimal => column::<_, f64>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, float_value))
                .ok(),
            ColumnKind::Boolean => column::<_, bool>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, JsonValue::Bool))
                .ok(),
            ColumnKind::Binary => column::<_, Vec<u8>>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, |b| decode_binary_value(&b)))
                .ok(),
            ColumnKind::Json => column::<_, String>(row, idx)
                .map(|v| {
                    v.map_or(JsonValue::Null, |s| {
                        serde_json::from_str(&s).unwrap_or(JsonValue::String(s))
                    })
                })
                .ok(),
            // Expression columns (COUNT(*), literals) carry no declared type;
            // the stored value decides
            ColumnKind::Other => column::<_, String>(row, idx)
                .map(|v| v.map_or(JsonValue::Null, JsonValue::String))
                .or_else(|_| column::<_, i64>(row, idx).map(|v| v.map_or(JsonValue::Null, JsonValue::from)))
                .or_else(|_| column::<_, f64>(row, idx).map(|v| v.map_or(JsonValue::Null, float_value)))
                .or_else(|_| {
                    column::<_, Vec<u8>>(row, idx)
                        .map(|v| v.map_or(JsonValue::Null, |b| decode_binary_value(&b)))
                })
                .ok(),
        }
    }
}
