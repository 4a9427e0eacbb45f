//! Pre-migration copies of the tables a destructive plan touches.
//!
//! A backup is written inside the migration's own transaction, so it becomes
//! visible only together with the migration that needed it.

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::ensure_catalog,
    errors::LabelGraphError,
    executor::{GraphExecutor, GraphTransaction, with_transaction},
    fault_injection::{FaultPoint, check_fault},
    schema::{SchemaDefinition, SchemaVersion},
    sql::ddl,
    types::SqlValue,
};

use super::plan::MigrationPlan;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTable {
    pub source: String,
    pub backup: String,
}

/// One row of the backup registry.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BackupRecord {
    pub id: String,
    pub created_at: String,
    pub from_version: SchemaVersion,
    pub to_version: SchemaVersion,
    /// Schema the copied tables conform to.
    pub schema: SchemaDefinition,
    pub tables: Vec<BackupTable>,
}

fn new_backup_id() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..0x100_0000);
    format!("{}_{suffix:06x}", Utc::now().format("%Y%m%d%H%M%S"))
}

/// Copies every table the plan's destructive steps touch. Returns `None` when the
/// plan has nothing to back up.
pub(crate) fn create_backup(
    tx: &mut dyn GraphTransaction,
    plan: &MigrationPlan,
    old: &SchemaDefinition,
) -> Result<Option<String>, LabelGraphError> {
    let sources = plan.backup_tables();
    if sources.is_empty() {
        return Ok(None);
    }
    let id = new_backup_id();
    let mut tables = Vec::with_capacity(sources.len());
    for source in sources {
        let backup = format!("bak_{id}_{source}");
        tx.execute(&ddl::copy_table(&source, &backup)?, &[])?;
        log::debug!("backup {id}: copied {source} to {backup}");
        tables.push(BackupTable { source, backup });
    }
    check_fault(FaultPoint::MigrationBackup)?;

    let definition = old.to_canonical_json()?;
    let listing = serde_json::to_string(&tables).map_err(|e| LabelGraphError::invalid_schema(e.to_string()))?;
    tx.execute(
        "INSERT INTO graph_backups (id, created_at, from_version, to_version, definition, tables)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        &[
            SqlValue::Text(id.clone()),
            SqlValue::Text(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            SqlValue::Text(plan.from_version.to_string()),
            SqlValue::Text(plan.to_version.to_string()),
            SqlValue::Text(definition),
            SqlValue::Text(listing),
        ],
    )?;
    Ok(Some(id))
}

pub fn list_backups<E: GraphExecutor + ?Sized>(executor: &mut E) -> Result<Vec<BackupRecord>, LabelGraphError> {
    with_transaction(executor, |tx| {
        ensure_catalog(tx)?;
        let rows = tx.execute(
            "SELECT id, created_at, from_version, to_version, definition, tables
             FROM graph_backups ORDER BY created_at, id",
            &[],
        )?;
        rows.rows.iter().map(|row| parse_record(row)).collect()
    })
}

/// Drops a backup's tables and its registry row. Returns `false` for unknown ids.
pub fn drop_backup<E: GraphExecutor + ?Sized>(executor: &mut E, id: &str) -> Result<bool, LabelGraphError> {
    with_transaction(executor, |tx| {
        ensure_catalog(tx)?;
        let rows = tx.execute(
            "SELECT id, created_at, from_version, to_version, definition, tables
             FROM graph_backups WHERE id = ?1",
            &[SqlValue::from(id)],
        )?;
        let Some(row) = rows.rows.first() else {
            return Ok(false);
        };
        let record = parse_record(row)?;
        for table in &record.tables {
            tx.execute(&ddl::drop_table_if_exists(&table.backup)?, &[])?;
        }
        tx.execute("DELETE FROM graph_backups WHERE id = ?1", &[SqlValue::from(id)])?;
        log::debug!("dropped backup {id} ({} tables)", record.tables.len());
        Ok(true)
    })
}

fn parse_record(row: &[SqlValue]) -> Result<BackupRecord, LabelGraphError> {
    let column = |index: usize| {
        row.get(index)
            .and_then(SqlValue::as_str)
            .ok_or_else(|| LabelGraphError::invalid_schema(format!("graph_backups column {index} is not text")))
    };
    let malformed = |e: serde_json::Error| LabelGraphError::invalid_schema(format!("graph_backups row: {e}"));
    Ok(BackupRecord {
        id: column(0)?.to_string(),
        created_at: column(1)?.to_string(),
        from_version: column(2)?.parse()?,
        to_version: column(3)?.parse()?,
        schema: serde_json::from_str(column(4)?).map_err(malformed)?,
        tables: serde_json::from_str(column(5)?).map_err(malformed)?,
    })
}
