use rand::Rng;

use crate::{
    errors::LabelGraphError,
    executor::{GraphExecutor, GraphTransaction, with_transaction},
    schema::LabelRef,
    sql::ddl,
    types::{ColumnType, SqlValue},
};

/// SQLite's default limit on bound parameters per statement.
pub const MAX_BOUND_PARAMETERS: usize = 32_766;

/// One TEMP table accumulating the rows of a label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagingTable {
    pub name: String,
    pub label: LabelRef,
    /// Column names, starting with the sequence column.
    pub columns: Vec<String>,
    pub rows: usize,
}

/// Staging tables of one load. Table names carry a random session suffix so
/// concurrent loads on other connections never collide.
#[derive(Debug)]
pub struct StagingSession {
    id: String,
    tables: Vec<StagingTable>,
}

impl Default for StagingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StagingSession {
    pub fn new() -> Self {
        let id: u32 = rand::thread_rng().r#gen();
        Self {
            id: format!("{id:08x}"),
            tables: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tables(&self) -> &[StagingTable] {
        &self.tables
    }

    pub(crate) fn table(&self, index: usize) -> Option<&StagingTable> {
        self.tables.get(index)
    }

    /// Creates the staging table for `label` and returns its index in the session.
    /// The table is registered before it is created so cleanup covers a failed
    /// creation too.
    pub(crate) fn create_table(
        &mut self,
        tx: &mut dyn GraphTransaction,
        label: LabelRef,
        columns: Vec<(String, ColumnType)>,
    ) -> Result<usize, LabelGraphError> {
        let name = format!("stg_{}_{}", self.id, self.tables.len());
        let sql = ddl::create_staging_table(&name, &columns)?;
        self.tables.push(StagingTable {
            name,
            label,
            columns: columns.into_iter().map(|(column, _)| column).collect(),
            rows: 0,
        });
        tx.execute(&sql, &[])?;
        Ok(self.tables.len() - 1)
    }

    /// Appends `rows` to table `index` with one multi-row insert.
    pub(crate) fn append(
        &mut self,
        tx: &mut dyn GraphTransaction,
        index: usize,
        rows: &[Vec<SqlValue>],
    ) -> Result<(), LabelGraphError> {
        if rows.is_empty() {
            return Ok(());
        }
        let table = self
            .tables
            .get_mut(index)
            .ok_or_else(|| LabelGraphError::execution("staging insert", format!("no staging table {index}")))?;
        let width = table.columns.len();
        let mut params = Vec::with_capacity(rows.len() * width);
        for row in rows {
            if row.len() != width {
                return Err(LabelGraphError::execution(
                    table.name.as_str(),
                    format!("row has {} values for {width} columns", row.len()),
                ));
            }
            params.extend(row.iter().cloned());
        }
        let sql = ddl::insert_rows(&table.name, &table.columns, rows.len())?;
        tx.execute(&sql, &params)?;
        table.rows += rows.len();
        Ok(())
    }

    pub(crate) fn drop_all(&self, tx: &mut dyn GraphTransaction) -> Result<(), LabelGraphError> {
        for table in &self.tables {
            tx.execute(&ddl::drop_table_if_exists(&table.name)?, &[])?;
        }
        Ok(())
    }
}

/// Rows per staging insert for a table `width` columns wide.
pub(crate) fn chunk_rows(batch_size: usize, width: usize) -> usize {
    batch_size.min(MAX_BOUND_PARAMETERS / width.max(1)).max(1)
}

/// Staging tables still present on the executor's connection.
pub fn list_staging_tables<E: GraphExecutor + ?Sized>(executor: &mut E) -> Result<Vec<String>, LabelGraphError> {
    with_transaction(executor, |tx| {
        let rows = tx.execute(
            "SELECT name FROM sqlite_temp_master WHERE type = 'table' AND name LIKE 'stg\\_%' ESCAPE '\\' ORDER BY name",
            &[],
        )?;
        Ok(rows
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(SqlValue::as_str).map(String::from))
            .collect())
    })
}
