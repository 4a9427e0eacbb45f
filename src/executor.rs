//! The transactional executor seam. Migrations and loads talk to the backend only
//! through [`GraphExecutor`] and [`GraphTransaction`]; [`SqliteExecutor`] is the
//! bundled implementation.

use rusqlite::{Connection, ErrorCode, InterruptHandle, params_from_iter};

use crate::{
    config::{DatabaseLocation, SqliteConfig},
    errors::LabelGraphError,
    types::SqlValue,
};

/// Result of one statement: the rows it produced, or the number of rows it changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
    pub affected: usize,
}

impl RowSet {
    /// First column of the first row as an integer.
    pub fn scalar_i64(&self) -> Option<i64> {
        self.rows.first().and_then(|row| row.first()).and_then(SqlValue::as_i64)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An open backend transaction. Dropping it without calling [`commit`] or
/// [`rollback`] must roll it back.
///
/// [`commit`]: GraphTransaction::commit
/// [`rollback`]: GraphTransaction::rollback
pub trait GraphTransaction {
    /// Runs one statement. `params` bind positionally to `?` placeholders.
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<RowSet, LabelGraphError>;
    fn commit(self: Box<Self>) -> Result<(), LabelGraphError>;
    fn rollback(self: Box<Self>) -> Result<(), LabelGraphError>;
}

/// Source of transactions. One executor is one backend session: everything a load or
/// migration does happens on transactions of the same executor.
pub trait GraphExecutor {
    fn begin(&mut self) -> Result<Box<dyn GraphTransaction + '_>, LabelGraphError>;
}

impl<E: GraphExecutor + ?Sized> GraphExecutor for &mut E {
    fn begin(&mut self) -> Result<Box<dyn GraphTransaction + '_>, LabelGraphError> {
        (**self).begin()
    }
}

/// Runs `f` in its own transaction, committing on success and rolling back otherwise.
pub fn with_transaction<E, F, R>(executor: &mut E, f: F) -> Result<R, LabelGraphError>
where
    E: GraphExecutor + ?Sized,
    F: FnOnce(&mut dyn GraphTransaction) -> Result<R, LabelGraphError>,
{
    let mut tx = executor.begin()?;
    match f(tx.as_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                log::warn!("rollback after failure also failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

/// [`GraphExecutor`] over a single rusqlite connection.
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    pub fn open(config: &SqliteConfig) -> Result<Self, LabelGraphError> {
        let conn = match &config.location {
            DatabaseLocation::InMemory => Connection::open_in_memory(),
            DatabaseLocation::File(path) => Connection::open(path),
        }
        .map_err(|e| LabelGraphError::execution("open", e.to_string()))?;
        conn.busy_timeout(config.busy_timeout)
            .map_err(|e| LabelGraphError::execution("busy_timeout", e.to_string()))?;
        conn.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
        for (name, value) in &config.pragma_settings {
            conn.pragma_update(None, name, value)
                .map_err(|e| LabelGraphError::execution(format!("PRAGMA {name}"), e.to_string()))?;
        }
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, LabelGraphError> {
        Self::open(&SqliteConfig::in_memory())
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Handle that cancels the statement currently running on this connection from
    /// another thread. The interrupted call fails with [`LabelGraphError::Cancelled`].
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.get_interrupt_handle()
    }
}

impl GraphExecutor for SqliteExecutor {
    fn begin(&mut self) -> Result<Box<dyn GraphTransaction + '_>, LabelGraphError> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| map_sqlite_error("BEGIN IMMEDIATE", e))?;
        Ok(Box::new(SqliteTransaction {
            conn: &self.conn,
            finished: false,
        }))
    }
}

struct SqliteTransaction<'a> {
    conn: &'a Connection,
    finished: bool,
}

impl GraphTransaction for SqliteTransaction<'_> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<RowSet, LabelGraphError> {
        log::trace!("execute: {sql}");
        let mut stmt = self
            .conn
            .prepare_cached(sql)
            .map_err(|e| map_sqlite_error(sql, e))?;
        if stmt.column_count() == 0 {
            let affected = stmt
                .execute(params_from_iter(params.iter()))
                .map_err(|e| map_sqlite_error(sql, e))?;
            return Ok(RowSet {
                affected,
                ..RowSet::default()
            });
        }
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| map_sqlite_error(sql, e))?;
        let mut collected = Vec::new();
        while let Some(row) = rows.next().map_err(|e| map_sqlite_error(sql, e))? {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                let value = row.get_ref(index).map_err(|e| map_sqlite_error(sql, e))?;
                values.push(SqlValue::from_value_ref(value));
            }
            collected.push(values);
        }
        Ok(RowSet {
            columns,
            rows: collected,
            affected: 0,
        })
    }

    fn commit(mut self: Box<Self>) -> Result<(), LabelGraphError> {
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| map_sqlite_error("COMMIT", e))?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), LabelGraphError> {
        self.finished = true;
        self.conn
            .execute_batch("ROLLBACK")
            .map_err(|e| map_sqlite_error("ROLLBACK", e))
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

fn map_sqlite_error(sql: &str, err: rusqlite::Error) -> LabelGraphError {
    match err.sqlite_error_code() {
        Some(ErrorCode::OperationInterrupted) => LabelGraphError::cancelled(format!("{sql}: {err}")),
        _ => LabelGraphError::execution(sql, err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_return_rows_or_affected_counts() {
        let mut executor = SqliteExecutor::open_in_memory().unwrap();
        let mut tx = executor.begin().unwrap();
        tx.execute("CREATE TABLE t (a INTEGER, b TEXT)", &[]).unwrap();
        let inserted = tx
            .execute(
                "INSERT INTO t (a, b) VALUES (?, ?), (?, ?)",
                &[SqlValue::Integer(1), "x".into(), SqlValue::Integer(2), SqlValue::Null],
            )
            .unwrap();
        assert_eq!(inserted.affected, 2);
        let rows = tx.execute("SELECT a, b FROM t ORDER BY a", &[]).unwrap();
        assert_eq!(rows.columns, vec!["a", "b"]);
        assert_eq!(rows.rows[1], vec![SqlValue::Integer(2), SqlValue::Null]);
        tx.commit().unwrap();
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let mut executor = SqliteExecutor::open_in_memory().unwrap();
        {
            let mut tx = executor.begin().unwrap();
            tx.execute("CREATE TABLE t (a INTEGER)", &[]).unwrap();
        }
        let exists = with_transaction(&mut executor, |tx| {
            Ok(!tx
                .execute("SELECT name FROM sqlite_master WHERE name = 't'", &[])?
                .is_empty())
        })
        .unwrap();
        assert!(!exists);
    }

    #[test]
    fn failures_map_to_execution_errors() {
        let mut executor = SqliteExecutor::open_in_memory().unwrap();
        let err = with_transaction(&mut executor, |tx| tx.execute("SELECT * FROM missing", &[]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::errors::ErrorKind::Execution);
        assert!(err.to_string().contains("missing"));
    }
}
