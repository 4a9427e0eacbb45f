//! Statement text for the per-label storage layout.
//!
//! Vertex label `L` lives in table `v_L` (`_id` plus one column per property), edge
//! label `E` in `e_E` (`_id`, `_from`, `_to` plus properties). Identifiers are always
//! quoted through [`quote_identifier`]; the only literals spliced into text are DDL
//! defaults and backfill values, rendered by [`escape_literal`].

use std::collections::BTreeMap;

use crate::{
    errors::LabelGraphError,
    schema::{LabelKind, LabelRef, PropertyDefinition},
    types::{ColumnType, PropertyType, SqlValue, map_type},
};

use super::escape::{escape_literal, quote_identifier};

pub const ID_COLUMN: &str = "_id";
pub const FROM_COLUMN: &str = "_from";
pub const TO_COLUMN: &str = "_to";

/// Unquoted storage table name of a label.
pub fn table_name(label: &LabelRef) -> String {
    match label.kind {
        LabelKind::Vertex => format!("v_{}", label.label),
        LabelKind::Edge => format!("e_{}", label.label),
    }
}

pub fn quoted_table(label: &LabelRef) -> Result<String, LabelGraphError> {
    quote_identifier(&table_name(label))
}

/// Unquoted name of the index on `label.property`: `idx_<kind><len>_<label>_<property>`.
/// Index names share one namespace per database, so the label is length-prefixed to
/// keep `a_b`.`c` and `a`.`b_c` apart.
pub fn index_name(label: &LabelRef, property: &str) -> String {
    let kind = match label.kind {
        LabelKind::Vertex => 'v',
        LabelKind::Edge => 'e',
    };
    format!("idx_{kind}{}_{}_{property}", label.label.chars().count(), label.label)
}

pub fn create_label_table(
    label: &LabelRef,
    properties: &BTreeMap<String, PropertyDefinition>,
) -> Result<String, LabelGraphError> {
    let mut columns = vec![format!("{} INTEGER PRIMARY KEY", quote_identifier(ID_COLUMN)?)];
    if label.kind == LabelKind::Edge {
        columns.push(format!("{} INTEGER NOT NULL", quote_identifier(FROM_COLUMN)?));
        columns.push(format!("{} INTEGER NOT NULL", quote_identifier(TO_COLUMN)?));
    }
    for (name, definition) in properties {
        columns.push(format!(
            "{} {}",
            quote_identifier(name)?,
            map_type(definition.property_type).sql_name()
        ));
    }
    Ok(format!(
        "CREATE TABLE {} ({})",
        quoted_table(label)?,
        columns.join(", ")
    ))
}

pub fn drop_table(label: &LabelRef) -> Result<String, LabelGraphError> {
    Ok(format!("DROP TABLE {}", quoted_table(label)?))
}

pub fn drop_table_if_exists(table: &str) -> Result<String, LabelGraphError> {
    Ok(format!("DROP TABLE IF EXISTS {}", quote_identifier(table)?))
}

pub fn create_index(label: &LabelRef, property: &str) -> Result<String, LabelGraphError> {
    Ok(format!(
        "CREATE INDEX {} ON {} ({})",
        quote_identifier(&index_name(label, property))?,
        quoted_table(label)?,
        quote_identifier(property)?
    ))
}

pub fn drop_index(label: &LabelRef, property: &str) -> Result<String, LabelGraphError> {
    Ok(format!(
        "DROP INDEX IF EXISTS {}",
        quote_identifier(&index_name(label, property))?
    ))
}

pub fn add_column(
    label: &LabelRef,
    column: &str,
    definition: &PropertyDefinition,
    default: Option<&SqlValue>,
) -> Result<String, LabelGraphError> {
    let mut sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        quoted_table(label)?,
        quote_identifier(column)?,
        map_type(definition.property_type).sql_name()
    );
    if let Some(default) = default.filter(|value| !value.is_null()) {
        sql.push_str(" DEFAULT ");
        sql.push_str(&escape_literal(default)?);
    }
    Ok(sql)
}

pub fn drop_column(label: &LabelRef, column: &str) -> Result<String, LabelGraphError> {
    Ok(format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quoted_table(label)?,
        quote_identifier(column)?
    ))
}

pub fn rename_column(label: &LabelRef, from: &str, to: &str) -> Result<String, LabelGraphError> {
    Ok(format!(
        "ALTER TABLE {} RENAME COLUMN {} TO {}",
        quoted_table(label)?,
        quote_identifier(from)?,
        quote_identifier(to)?
    ))
}

/// Fills NULLs in `column` with `value`.
pub fn backfill_nulls(label: &LabelRef, column: &str, value: &SqlValue) -> Result<String, LabelGraphError> {
    let column = quote_identifier(column)?;
    Ok(format!(
        "UPDATE {} SET {column} = {} WHERE {column} IS NULL",
        quoted_table(label)?,
        escape_literal(value)?
    ))
}

/// Copies `from_column` into `to_column`, converting the stored representation.
pub fn copy_converted(
    label: &LabelRef,
    from_column: &str,
    to_column: &str,
    from: PropertyType,
    to: PropertyType,
) -> Result<String, LabelGraphError> {
    let source = quote_identifier(from_column)?;
    Ok(format!(
        "UPDATE {} SET {} = {}",
        quoted_table(label)?,
        quote_identifier(to_column)?,
        conversion_expr(&source, from, to)
    ))
}

pub fn delete_rows_where_null(label: &LabelRef, column: &str) -> Result<String, LabelGraphError> {
    Ok(format!(
        "DELETE FROM {} WHERE {} IS NULL",
        quoted_table(label)?,
        quote_identifier(column)?
    ))
}

/// Deletes rows of edge table `edge` whose `endpoint_column` points at a vertex of
/// `vertex` whose `column` is NULL.
pub fn delete_edges_of_null_vertices(
    edge: &LabelRef,
    endpoint_column: &str,
    vertex: &LabelRef,
    column: &str,
) -> Result<String, LabelGraphError> {
    Ok(format!(
        "DELETE FROM {} WHERE {} IN (SELECT {} FROM {} WHERE {} IS NULL)",
        quoted_table(edge)?,
        quote_identifier(endpoint_column)?,
        quote_identifier(ID_COLUMN)?,
        quoted_table(vertex)?,
        quote_identifier(column)?
    ))
}

pub fn delete_all(label: &LabelRef) -> Result<String, LabelGraphError> {
    Ok(format!("DELETE FROM {}", quoted_table(label)?))
}

pub fn count_rows(label: &LabelRef) -> Result<String, LabelGraphError> {
    Ok(format!("SELECT COUNT(*) FROM {}", quoted_table(label)?))
}

pub fn max_id(label: &LabelRef) -> Result<String, LabelGraphError> {
    Ok(format!(
        "SELECT COALESCE(MAX({}), 0) FROM {}",
        quote_identifier(ID_COLUMN)?,
        quoted_table(label)?
    ))
}

pub fn id_exists(label: &LabelRef) -> Result<String, LabelGraphError> {
    let id = quote_identifier(ID_COLUMN)?;
    Ok(format!(
        "SELECT {id} FROM {} WHERE {id} = ?1",
        quoted_table(label)?
    ))
}

pub fn create_staging_table(table: &str, columns: &[(String, ColumnType)]) -> Result<String, LabelGraphError> {
    let mut defs = Vec::with_capacity(columns.len());
    for (name, column_type) in columns {
        defs.push(format!("{} {}", quote_identifier(name)?, column_type.sql_name()));
    }
    Ok(format!(
        "CREATE TEMP TABLE {} ({})",
        quote_identifier(table)?,
        defs.join(", ")
    ))
}

/// Multi-row parameterized insert: `rows` groups of `columns.len()` placeholders.
pub fn insert_rows(table: &str, columns: &[String], rows: usize) -> Result<String, LabelGraphError> {
    let quoted = columns
        .iter()
        .map(|column| quote_identifier(column))
        .collect::<Result<Vec<_>, _>>()?;
    let group = format!("({})", vec!["?"; columns.len()].join(", "));
    Ok(format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_identifier(table)?,
        quoted.join(", "),
        vec![group; rows].join(", ")
    ))
}

/// Moves staged rows into `target` in `_seq` order. Vertex moves assign
/// `_id = _seq + ?1`; edge moves let the backend assign ids.
pub fn insert_from_staging(target: &LabelRef, staging: &str, columns: &[String]) -> Result<String, LabelGraphError> {
    let mut target_columns = Vec::with_capacity(columns.len() + 1);
    let mut source_columns = Vec::with_capacity(columns.len() + 1);
    if target.kind == LabelKind::Vertex {
        target_columns.push(quote_identifier(ID_COLUMN)?);
        source_columns.push(format!("{} + ?1", quote_identifier(STAGING_SEQ_COLUMN)?));
    }
    for column in columns {
        let quoted = quote_identifier(column)?;
        target_columns.push(quoted.clone());
        source_columns.push(quoted);
    }
    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} ORDER BY {}",
        quoted_table(target)?,
        target_columns.join(", "),
        source_columns.join(", "),
        quote_identifier(staging)?,
        quote_identifier(STAGING_SEQ_COLUMN)?
    ))
}

/// Sequence column every staging table starts with.
pub const STAGING_SEQ_COLUMN: &str = "_seq";

/// Looks a table up by its unquoted name (`?1`).
pub const TABLE_EXISTS: &str = "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1";

pub fn copy_table(source: &str, target: &str) -> Result<String, LabelGraphError> {
    Ok(format!(
        "CREATE TABLE {} AS SELECT * FROM {}",
        quote_identifier(target)?,
        quote_identifier(source)?
    ))
}

/// Counts edges of `edge` whose endpoints are missing from their vertex tables.
pub fn count_orphan_edges(edge: &LabelRef, from: &LabelRef, to: &LabelRef) -> Result<String, LabelGraphError> {
    let id = quote_identifier(ID_COLUMN)?;
    Ok(format!(
        "SELECT COUNT(*) FROM {} AS e WHERE NOT EXISTS (SELECT 1 FROM {} AS v WHERE v.{id} = e.{}) \
         OR NOT EXISTS (SELECT 1 FROM {} AS v WHERE v.{id} = e.{})",
        quoted_table(edge)?,
        quoted_table(from)?,
        quote_identifier(FROM_COLUMN)?,
        quoted_table(to)?,
        quote_identifier(TO_COLUMN)?
    ))
}

pub fn count_nulls(label: &LabelRef, column: &str) -> Result<String, LabelGraphError> {
    Ok(format!(
        "SELECT COUNT(*) FROM {} WHERE {} IS NULL",
        quoted_table(label)?,
        quote_identifier(column)?
    ))
}

/// Stored-representation conversion between property types. Widening conversions
/// are exact, except that integers beyond 2^53 in magnitude round when cast to REAL;
/// narrowing ones keep what converts and yield NULL otherwise.
pub fn conversion_expr(column: &str, from: PropertyType, to: PropertyType) -> String {
    use PropertyType::*;

    let bool_text = format!("CASE {column} WHEN 1 THEN 'true' WHEN 0 THEN 'false' END");
    let text_to_bool = format!("CASE {column} WHEN 'true' THEN 1 WHEN 'false' THEN 0 END");
    let json_when = |condition: &str, value: &str| {
        format!("CASE WHEN json_valid({column}) THEN CASE WHEN {condition} THEN {value} END END")
    };
    let json_type = format!("json_type({column})");
    let json_value = format!("json_extract({column}, '$')");

    match (from, to) {
        (a, b) if a == b => column.to_string(),

        (String | Date | DateTime | Integer | Number, Any) => format!("json_quote({column})"),
        (Boolean, Any) => bool_text,
        (Object | Array, Any) => column.to_string(),

        (Integer | Number, String) => format!("CAST({column} AS TEXT)"),
        (Boolean, String) => bool_text,
        (Date | DateTime | Object | Array, String) => column.to_string(),
        (Any, String) => json_when(&format!("{json_type} = 'text'"), &json_value),

        (Integer | Boolean, Number) => format!("CAST({column} AS REAL)"),
        (String | Any, Number) => json_when(
            &format!("{json_type} IN ('integer', 'real')"),
            &format!("CAST({json_value} AS REAL)"),
        ),

        (Number, Integer) => format!("CAST({column} AS INTEGER)"),
        (Boolean, Integer) => column.to_string(),
        (String | Any, Integer) => json_when(&format!("{json_type} = 'integer'"), &json_value),

        (Integer, Boolean) => format!("CASE {column} WHEN 0 THEN 0 WHEN 1 THEN 1 END"),
        (String, Boolean) => text_to_bool,
        (Any, Boolean) => format!(
            "CASE WHEN json_valid({column}) THEN CASE {json_type} WHEN 'true' THEN 1 WHEN 'false' THEN 0 END END"
        ),

        (Date, DateTime) => format!("{column} || 'T00:00:00Z'"),
        (DateTime, Date) => format!("substr({column}, 1, 10)"),
        (String, Date) => format!("CASE WHEN date({column}) = {column} THEN {column} END"),
        (String, DateTime) => format!(
            "CASE WHEN strftime('%Y-%m-%dT%H:%M:%SZ', {column}) = {column} THEN {column} END"
        ),
        (Any, Date) => json_when(
            &format!("{json_type} = 'text' AND date({json_value}) = {json_value}"),
            &json_value,
        ),
        (Any, DateTime) => json_when(
            &format!(
                "{json_type} = 'text' AND strftime('%Y-%m-%dT%H:%M:%SZ', {json_value}) = {json_value}"
            ),
            &json_value,
        ),

        (String | Any, Object) => json_when(&format!("{json_type} = 'object'"), &format!("json({column})")),
        (String | Any, Array) => json_when(&format!("{json_type} = 'array'"), &format!("json({column})")),

        _ => "NULL".to_string(),
    }
}
