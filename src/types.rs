//! Mapping between abstract property types, SQLite column types and wire literals.
//!
//! Every value crossing into storage goes through [`encode_literal`], and every value
//! read back goes through [`decode_literal`]. For canonical values the two are exact
//! inverses:
//!
//! | property type | column  | canonical value                       |
//! |---------------|---------|---------------------------------------|
//! | `string`      | TEXT    | any JSON string                       |
//! | `number`      | REAL    | finite JSON number, decoded as f64    |
//! | `integer`     | INTEGER | JSON number fitting `i64`             |
//! | `boolean`     | INTEGER | `true` / `false`, stored as 1 / 0     |
//! | `date`        | TEXT    | `YYYY-MM-DD`                          |
//! | `datetime`    | TEXT    | `YYYY-MM-DDTHH:MM:SSZ` (UTC, seconds) |
//! | `object`      | TEXT    | JSON object, keys sorted              |
//! | `array`       | TEXT    | JSON array                            |
//! | `any`         | TEXT    | any JSON value                        |

use std::fmt;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::LabelGraphError;

/// Declared type of a vertex or edge property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    String,
    Number,
    Integer,
    Boolean,
    Date,
    DateTime,
    Object,
    Array,
    Any,
}

impl PropertyType {
    pub const ALL: [PropertyType; 9] = [
        PropertyType::String,
        PropertyType::Number,
        PropertyType::Integer,
        PropertyType::Boolean,
        PropertyType::Date,
        PropertyType::DateTime,
        PropertyType::Object,
        PropertyType::Array,
        PropertyType::Any,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Integer => "integer",
            PropertyType::Boolean => "boolean",
            PropertyType::Date => "date",
            PropertyType::DateTime => "datetime",
            PropertyType::Object => "object",
            PropertyType::Array => "array",
            PropertyType::Any => "any",
        }
    }

    /// Whether `self` converts to `target` without a narrowing plan step.
    ///
    /// `Integer` to `Number` counts as widening although the stored REAL is an f64:
    /// integers beyond 2^53 in magnitude round to the nearest representable value.
    pub fn widens_to(self, target: PropertyType) -> bool {
        use PropertyType::*;
        match (self, target) {
            (a, b) if a == b => true,
            (_, Any) => true,
            (Integer, Number) => true,
            (Date, DateTime) => true,
            (Integer | Number | Boolean | Date | DateTime, String) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend column type a property is stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
}

impl ColumnType {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
        }
    }
}

/// Total mapping from property types to column types.
pub fn map_type(property_type: PropertyType) -> ColumnType {
    match property_type {
        PropertyType::Integer | PropertyType::Boolean => ColumnType::Integer,
        PropertyType::Number => ColumnType::Real,
        PropertyType::String
        | PropertyType::Date
        | PropertyType::DateTime
        | PropertyType::Object
        | PropertyType::Array
        | PropertyType::Any => ColumnType::Text,
    }
}

/// A value in the form the backend stores and binds it.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(v) => SqlValue::Integer(v),
            ValueRef::Real(v) => SqlValue::Real(v),
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
                SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            SqlValue::Integer(v) => ToSqlOutput::Borrowed(ValueRef::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Borrowed(ValueRef::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Integer(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

/// Encodes a JSON value for storage in a column of `property_type`.
///
/// JSON `null` encodes to [`SqlValue::Null`] for every type; presence checks are the
/// validator's job, not the mapper's.
pub fn encode_literal(value: &Value, property_type: PropertyType) -> Result<SqlValue, LabelGraphError> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }
    match property_type {
        PropertyType::String => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            other => Err(mismatch(property_type, other)),
        },
        PropertyType::Number => match value {
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(SqlValue::Real)
                .ok_or_else(|| LabelGraphError::out_of_range(n.to_string(), property_type)),
            other => Err(mismatch(property_type, other)),
        },
        PropertyType::Integer => match value {
            Value::Number(n) => encode_integer(n),
            other => Err(mismatch(property_type, other)),
        },
        PropertyType::Boolean => match value {
            Value::Bool(b) => Ok(SqlValue::Integer(i64::from(*b))),
            other => Err(mismatch(property_type, other)),
        },
        PropertyType::Date => match value {
            Value::String(s) => canonical_date(s)
                .map(SqlValue::Text)
                .ok_or_else(|| LabelGraphError::type_mismatch(property_type, format!("string {s:?}"))),
            other => Err(mismatch(property_type, other)),
        },
        PropertyType::DateTime => match value {
            Value::String(s) => canonical_datetime(s)
                .map(SqlValue::Text)
                .ok_or_else(|| LabelGraphError::type_mismatch(property_type, format!("string {s:?}"))),
            other => Err(mismatch(property_type, other)),
        },
        PropertyType::Object => match value {
            Value::Object(_) => canonical_json(value),
            other => Err(mismatch(property_type, other)),
        },
        PropertyType::Array => match value {
            Value::Array(_) => canonical_json(value),
            other => Err(mismatch(property_type, other)),
        },
        PropertyType::Any => canonical_json(value),
    }
}

/// Decodes a stored value back into its canonical JSON form.
pub fn decode_literal(value: &SqlValue, property_type: PropertyType) -> Result<Value, LabelGraphError> {
    match (property_type, value) {
        (_, SqlValue::Null) => Ok(Value::Null),
        (PropertyType::String, SqlValue::Text(s)) => Ok(Value::String(s.clone())),
        (PropertyType::Number, SqlValue::Real(f)) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .ok_or_else(|| LabelGraphError::out_of_range(f.to_string(), property_type)),
        (PropertyType::Number, SqlValue::Integer(i)) => serde_json::Number::from_f64(*i as f64)
            .map(Value::Number)
            .ok_or_else(|| LabelGraphError::out_of_range(i.to_string(), property_type)),
        (PropertyType::Integer, SqlValue::Integer(i)) => Ok(Value::from(*i)),
        (PropertyType::Boolean, SqlValue::Integer(i)) => match *i {
            0 => Ok(Value::Bool(false)),
            1 => Ok(Value::Bool(true)),
            other => Err(LabelGraphError::out_of_range(other.to_string(), property_type)),
        },
        (PropertyType::Date, SqlValue::Text(s)) => canonical_date(s)
            .map(Value::String)
            .ok_or_else(|| LabelGraphError::type_mismatch(property_type, format!("stored {s:?}"))),
        (PropertyType::DateTime, SqlValue::Text(s)) => canonical_datetime(s)
            .map(Value::String)
            .ok_or_else(|| LabelGraphError::type_mismatch(property_type, format!("stored {s:?}"))),
        (PropertyType::Object | PropertyType::Array | PropertyType::Any, SqlValue::Text(s)) => {
            let parsed: Value = serde_json::from_str(s)
                .map_err(|e| LabelGraphError::type_mismatch(property_type, e.to_string()))?;
            match (property_type, &parsed) {
                (PropertyType::Object, Value::Object(_))
                | (PropertyType::Array, Value::Array(_))
                | (PropertyType::Any, _) => Ok(parsed),
                (_, other) => Err(mismatch(property_type, other)),
            }
        }
        (_, other) => Err(LabelGraphError::type_mismatch(
            property_type,
            format!("stored {}", sql_shape(other)),
        )),
    }
}

/// Short description of a JSON value's shape, used in mismatch messages.
pub fn json_shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn sql_shape(value: &SqlValue) -> &'static str {
    match value {
        SqlValue::Null => "NULL",
        SqlValue::Integer(_) => "INTEGER",
        SqlValue::Real(_) => "REAL",
        SqlValue::Text(_) => "TEXT",
    }
}

fn mismatch(expected: PropertyType, found: &Value) -> LabelGraphError {
    LabelGraphError::type_mismatch(expected, json_shape(found))
}

fn encode_integer(n: &serde_json::Number) -> Result<SqlValue, LabelGraphError> {
    if let Some(i) = n.as_i64() {
        return Ok(SqlValue::Integer(i));
    }
    if n.is_u64() {
        return Err(LabelGraphError::out_of_range(n.to_string(), PropertyType::Integer));
    }
    let f = n.as_f64().unwrap_or(f64::NAN);
    if f.fract() != 0.0 || !f.is_finite() {
        return Err(LabelGraphError::type_mismatch(PropertyType::Integer, format!("number {n}")));
    }
    // i64::MAX as f64 rounds up to 2^63, which is already out of range.
    if f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(LabelGraphError::out_of_range(n.to_string(), PropertyType::Integer));
    }
    Ok(SqlValue::Integer(f as i64))
}

fn canonical_date(text: &str) -> Option<String> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|date| date.format("%Y-%m-%d").to_string())
}

fn canonical_datetime(text: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(text).ok().map(|parsed| {
        let utc = parsed.with_timezone(&Utc);
        let truncated = DateTime::<Utc>::from_timestamp(utc.timestamp(), 0).unwrap_or(utc);
        truncated.to_rfc3339_opts(SecondsFormat::Secs, true)
    })
}

fn canonical_json(value: &Value) -> Result<SqlValue, LabelGraphError> {
    // serde_json's default map is ordered, so serialization is canonical.
    serde_json::to_string(value)
        .map(SqlValue::Text)
        .map_err(|e| LabelGraphError::invalid_literal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::errors::ErrorKind;

    fn round_trip(value: Value, ty: PropertyType) -> Value {
        let encoded = encode_literal(&value, ty).expect("encode");
        decode_literal(&encoded, ty).expect("decode")
    }

    #[test]
    fn every_property_type_maps_to_a_column() {
        for ty in PropertyType::ALL {
            let column = map_type(ty);
            assert!(!column.sql_name().is_empty());
        }
        assert_eq!(map_type(PropertyType::Boolean), ColumnType::Integer);
        assert_eq!(map_type(PropertyType::Number), ColumnType::Real);
        assert_eq!(map_type(PropertyType::DateTime), ColumnType::Text);
    }

    #[test]
    fn string_for_integer_is_a_type_mismatch() {
        let err = encode_literal(&json!("abc"), PropertyType::Integer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn integer_round_trips() {
        assert_eq!(round_trip(json!(42), PropertyType::Integer), json!(42));
        assert_eq!(round_trip(json!(i64::MIN), PropertyType::Integer), json!(i64::MIN));
    }

    #[test]
    fn integer_outside_i64_is_out_of_range() {
        let err = encode_literal(&json!(u64::MAX), PropertyType::Integer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        let err = encode_literal(&json!(1e300), PropertyType::Integer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
    }

    #[test]
    fn fractional_number_is_not_an_integer() {
        let err = encode_literal(&json!(1.5), PropertyType::Integer).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert_eq!(
            encode_literal(&json!(3.0), PropertyType::Integer).unwrap(),
            SqlValue::Integer(3)
        );
    }

    #[test]
    fn temporal_values_round_trip_at_second_resolution() {
        assert_eq!(round_trip(json!("2024-02-29"), PropertyType::Date), json!("2024-02-29"));
        assert_eq!(
            round_trip(json!("2024-02-29T10:11:12Z"), PropertyType::DateTime),
            json!("2024-02-29T10:11:12Z")
        );
        assert_eq!(
            round_trip(json!("2024-02-29T12:11:12.750+02:00"), PropertyType::DateTime),
            json!("2024-02-29T10:11:12Z")
        );
        assert!(encode_literal(&json!("2023-02-29"), PropertyType::Date).is_err());
    }

    #[test]
    fn objects_round_trip_through_sorted_text() {
        let encoded = encode_literal(&json!({"b": 1, "a": [true, null]}), PropertyType::Object).unwrap();
        assert_eq!(encoded, SqlValue::Text(r#"{"a":[true,null],"b":1}"#.into()));
        assert_eq!(
            decode_literal(&encoded, PropertyType::Object).unwrap(),
            json!({"a": [true, null], "b": 1})
        );
        assert_eq!(round_trip(json!([1, "x"]), PropertyType::Array), json!([1, "x"]));
        assert_eq!(round_trip(json!("free"), PropertyType::Any), json!("free"));
        assert!(encode_literal(&json!([1]), PropertyType::Object).is_err());
    }

    #[test]
    fn booleans_and_numbers_round_trip() {
        assert_eq!(round_trip(json!(true), PropertyType::Boolean), json!(true));
        assert_eq!(round_trip(json!(false), PropertyType::Boolean), json!(false));
        assert_eq!(round_trip(json!(42.5), PropertyType::Number), json!(42.5));
        assert_eq!(round_trip(Value::Null, PropertyType::Date), Value::Null);
    }

    #[test]
    fn widening_rules() {
        assert!(PropertyType::Integer.widens_to(PropertyType::Number));
        assert!(PropertyType::Date.widens_to(PropertyType::DateTime));
        assert!(PropertyType::Object.widens_to(PropertyType::Any));
        assert!(PropertyType::Boolean.widens_to(PropertyType::String));
        assert!(!PropertyType::Number.widens_to(PropertyType::Integer));
        assert!(!PropertyType::String.widens_to(PropertyType::Integer));
        assert!(!PropertyType::Object.widens_to(PropertyType::String));
    }
}
