//! Database-agnostic row decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Database-specific decoders handle the actual value extraction
//!
//! Rows come out as `RowMap`s keyed by column label, which the mapper and
//! the query builder then hand to serde.

use crate::models::{DatabaseType, RowMap};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Timestamp,
    TimestampTz,
    Date,
    Time,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // SQLite keeps temporal values as text; only the server drivers need typed decoding.
    if db != DatabaseType::SQLite {
        match lower.as_str() {
            "timestamptz" => return TypeCategory::TimestampTz,
            // MySQL TIMESTAMP is decoded as UTC by the driver
            "timestamp" if db == DatabaseType::MySQL => return TypeCategory::TimestampTz,
            "timestamp" | "datetime" => return TypeCategory::Timestamp,
            "date" => return TypeCategory::Date,
            "time" => return TypeCategory::Time,
            _ => {}
        }
    }

    if lower.contains("char") || lower.contains("text") || lower == "string" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Encode binary column data as base64 text.
pub fn encode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to `RowMap`s.
pub trait RowToJson {
    fn to_json_map(&self) -> RowMap;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> RowMap {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::MySQL);
                (col.name().to_string(), mysql::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> RowMap {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::PostgreSQL);
                (col.name().to_string(), postgres::decode_column(self, idx, category))
            })
            .collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> RowMap {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::SQLite);
                (col.name().to_string(), sqlite::decode_column(self, idx, type_name, category))
            })
            .collect()
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

const NAIVE_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Decode a nullable column; a decode failure reads as NULL so that the
/// caller can fall through to the next candidate type.
fn get<'r, R, T>(row: &'r R, idx: usize) -> Option<T>
where
    R: Row,
    T: Decode<'r, R::Database> + Type<R::Database>,
    usize: ColumnIndex<R>,
{
    row.try_get::<Option<T>, _>(idx).ok().flatten()
}

fn string(v: impl ToString) -> JsonValue {
    JsonValue::String(v.to_string())
}

mod mysql {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
        let value = match category {
            TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|d| JsonValue::String(d.0)),
            // Signed first, then the unsigned column types.
            TypeCategory::Integer => get::<_, i64>(row, idx)
                .map(JsonValue::from)
                .or_else(|| get::<_, u64>(row, idx).map(JsonValue::from)),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(float_value),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|b| encode_binary_value(&b)),
            TypeCategory::Json => get::<_, JsonValue>(row, idx),
            TypeCategory::TimestampTz => {
                get::<_, DateTime<Utc>>(row, idx).map(|v| string(v.to_rfc3339()))
            }
            TypeCategory::Timestamp => get::<_, NaiveDateTime>(row, idx)
                .map(|v| string(v.format(NAIVE_DATETIME_FORMAT))),
            TypeCategory::Date => get::<_, NaiveDate>(row, idx).map(string),
            TypeCategory::Time => get::<_, NaiveTime>(row, idx).map(string),
            _ => get::<_, String>(row, idx).map(JsonValue::String),
        };
        value.unwrap_or(JsonValue::Null)
    }
}

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
        let value = match category {
            TypeCategory::Decimal => get::<_, RawDecimal>(row, idx).map(|d| JsonValue::String(d.0)),
            // INT8, INT4 and INT2 each decode only as their own width.
            TypeCategory::Integer => get::<_, i64>(row, idx)
                .or_else(|| get::<_, i32>(row, idx).map(i64::from))
                .or_else(|| get::<_, i16>(row, idx).map(i64::from))
                .map(JsonValue::from),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Float => get::<_, f64>(row, idx)
                .or_else(|| get::<_, f32>(row, idx).map(f64::from))
                .map(float_value),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|b| encode_binary_value(&b)),
            TypeCategory::Json => get::<_, JsonValue>(row, idx),
            TypeCategory::Uuid => get::<_, uuid::Uuid>(row, idx).map(string),
            TypeCategory::TimestampTz => {
                get::<_, DateTime<Utc>>(row, idx).map(|v| string(v.to_rfc3339()))
            }
            TypeCategory::Timestamp => get::<_, NaiveDateTime>(row, idx)
                .map(|v| string(v.format(NAIVE_DATETIME_FORMAT))),
            TypeCategory::Date => get::<_, NaiveDate>(row, idx).map(string),
            TypeCategory::Time => get::<_, NaiveTime>(row, idx).map(string),
            _ => get::<_, String>(row, idx).map(JsonValue::String),
        };
        value.unwrap_or(JsonValue::Null)
    }
}

mod sqlite {
    use super::*;

    pub fn decode_column(
        row: &SqliteRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        let value = match category {
            TypeCategory::Integer => get::<_, i64>(row, idx).map(JsonValue::from),
            TypeCategory::Boolean => get::<_, bool>(row, idx).map(JsonValue::Bool),
            TypeCategory::Float | TypeCategory::Decimal => get::<_, f64>(row, idx).map(float_value),
            TypeCategory::Binary => get::<_, Vec<u8>>(row, idx).map(|b| encode_binary_value(&b)),
            _ => decode_dynamic(row, idx, type_name),
        };
        value.unwrap_or(JsonValue::Null)
    }

    /// Columns without a usable declared type (expressions, untyped
    /// columns) take whatever storage class the value has.
    fn decode_dynamic(row: &SqliteRow, idx: usize, type_name: &str) -> Option<JsonValue> {
        if let Some(text) = get::<_, String>(row, idx) {
            if type_name.eq_ignore_ascii_case("json") {
                if let Ok(json) = serde_json::from_str::<JsonValue>(&text) {
                    return Some(json);
                }
            }
            return Some(JsonValue::String(text));
        }
        get::<_, i64>(row, idx)
            .map(JsonValue::from)
            .or_else(|| get::<_, f64>(row, idx).map(float_value))
            .or_else(|| get::<_, Vec<u8>>(row, idx).map(|b| encode_binary_value(&b)))
    }
}
