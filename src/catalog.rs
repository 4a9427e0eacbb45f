//! Catalog tables recording which schema definition the backend currently holds.

use crate::{
    errors::LabelGraphError,
    executor::{GraphExecutor, GraphTransaction, with_transaction},
    schema::SchemaDefinition,
    types::SqlValue,
};

/// Layout version of the catalog tables themselves.
pub const CATALOG_VERSION: i64 = 1;

const CATALOG_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS graph_meta (
        id              INTEGER PRIMARY KEY CHECK (id = 1),
        catalog_version INTEGER NOT NULL,
        schema_version  TEXT NOT NULL,
        definition      TEXT NOT NULL,
        updated_at      TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS graph_backups (
        id           TEXT PRIMARY KEY,
        created_at   TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        from_version TEXT NOT NULL,
        to_version   TEXT NOT NULL,
        definition   TEXT NOT NULL,
        tables       TEXT NOT NULL
    )",
];

pub fn ensure_catalog(tx: &mut dyn GraphTransaction) -> Result<(), LabelGraphError> {
    for sql in CATALOG_TABLES {
        tx.execute(sql, &[])?;
    }
    let stored = tx.execute("SELECT catalog_version FROM graph_meta WHERE id = 1", &[])?;
    if let Some(existing) = stored.scalar_i64()
        && existing > CATALOG_VERSION
    {
        return Err(LabelGraphError::invalid_schema(format!(
            "catalog version {existing} is newer than supported {CATALOG_VERSION}"
        )));
    }
    Ok(())
}

/// Schema definition recorded by the last committed migration, if any.
pub fn read_schema(tx: &mut dyn GraphTransaction) -> Result<Option<SchemaDefinition>, LabelGraphError> {
    let rows = tx.execute("SELECT definition FROM graph_meta WHERE id = 1", &[])?;
    let Some(text) = rows.rows.first().and_then(|row| row.first()).and_then(SqlValue::as_str) else {
        return Ok(None);
    };
    let schema: SchemaDefinition = serde_json::from_str(text)
        .map_err(|e| LabelGraphError::invalid_schema(format!("stored schema is unreadable: {e}")))?;
    Ok(Some(schema))
}

pub fn write_schema(tx: &mut dyn GraphTransaction, schema: &SchemaDefinition) -> Result<(), LabelGraphError> {
    let definition = schema.to_canonical_json()?;
    tx.execute(
        "INSERT INTO graph_meta (id, catalog_version, schema_version, definition) VALUES (1, ?1, ?2, ?3)
         ON CONFLICT(id) DO UPDATE SET catalog_version = excluded.catalog_version,
             schema_version = excluded.schema_version,
             definition = excluded.definition,
             updated_at = CURRENT_TIMESTAMP",
        &[
            SqlValue::Integer(CATALOG_VERSION),
            SqlValue::Text(schema.version.to_string()),
            SqlValue::Text(definition),
        ],
    )?;
    Ok(())
}

/// Reads the stored schema in a transaction of its own.
pub fn load_schema<E: GraphExecutor + ?Sized>(executor: &mut E) -> Result<Option<SchemaDefinition>, LabelGraphError> {
    with_transaction(executor, |tx| {
        ensure_catalog(tx)?;
        read_schema(tx)
    })
}
