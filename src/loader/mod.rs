//! Transactional bulk loading of vertex and edge batches.
//!
//! A load runs `Validating -> StagingVertices -> StagingEdges -> Committing` and
//! ends in `Done` or `Failed`. Every record is validated before anything is staged;
//! staging and the move into permanent storage share one backend transaction, so
//! either every batch becomes visible or none does.

mod progress;
mod records;
mod staging;
mod validate;

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use ahash::{AHashMap, AHashSet};
use serde::Serialize;

use crate::{
    config::LoaderConfig,
    errors::{LabelGraphError, LoadPhase, ValidationIssue},
    executor::{GraphExecutor, GraphTransaction, with_transaction},
    fault_injection::{FaultPoint, check_fault},
    schema::{LabelKind, LabelRef, SchemaDefinition},
    sql::ddl,
    types::{ColumnType, SqlValue, map_type},
};

pub use progress::{LoadProgress, LoaderState};
pub use records::{EdgeBatch, EdgeRecord, Properties, RecordBatch, VertexBatch, VertexRecord, VertexRef};
pub use staging::{MAX_BOUND_PARAMETERS, StagingSession, StagingTable, list_staging_tables};
pub use validate::{ErrorCollector, PathGuard};

use progress::ProgressTracker;
use staging::chunk_rows;
use validate::{LabelValidator, ValidatorCache};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LabelCounts {
    pub staged: usize,
    pub committed: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub validation: Duration,
    pub staging_vertices: Duration,
    pub staging_edges: Duration,
    pub commit: Duration,
    pub total: Duration,
}

/// Outcome of a successful load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Staging session id; staging table names carry it.
    pub session: String,
    pub vertices: BTreeMap<String, LabelCounts>,
    pub edges: BTreeMap<String, LabelCounts>,
    pub timings: PhaseTimings,
}

impl LoadReport {
    pub fn committed_vertices(&self) -> usize {
        self.vertices.values().map(|c| c.committed).sum()
    }

    pub fn committed_edges(&self) -> usize {
        self.edges.values().map(|c| c.committed).sum()
    }
}

/// Loads batches through one executor.
///
/// ```rust
/// use labelgraph::{
///     BatchLoader, EdgeBatch, EdgeLabel, EdgeRecord, LoaderConfig, MigrationOptions, PropertyDefinition,
///     PropertyType, SchemaDefinition, SchemaVersion, SqliteExecutor, VertexBatch, VertexLabel, VertexRecord,
///     VertexRef, install_schema,
/// };
///
/// let schema = SchemaDefinition::new(SchemaVersion::new(1, 0, 0))
///     .with_vertex("Person", VertexLabel::new().property("name", PropertyDefinition::new(PropertyType::String)))
///     .with_edge("KNOWS", EdgeLabel::new("Person", "Person"));
/// let mut executor = SqliteExecutor::open_in_memory()?;
/// install_schema(&mut executor, &schema, &MigrationOptions::apply())?;
///
/// let people = [VertexBatch::from_records(
///     "Person",
///     vec![VertexRecord::new().with("name", "ada"), VertexRecord::new().with("name", "bob")],
/// )];
/// let knows = [EdgeBatch::from_records(
///     "KNOWS",
///     vec![EdgeRecord::new(VertexRef::staged("Person", 0), VertexRef::staged("Person", 1))],
/// )];
/// let mut loader = BatchLoader::new(&mut executor, LoaderConfig::default());
/// let report = loader.load(&schema, &people, &knows)?;
/// assert_eq!(report.committed_vertices(), 2);
/// assert_eq!(report.committed_edges(), 1);
/// # Ok::<(), labelgraph::LabelGraphError>(())
/// ```
pub struct BatchLoader<E: GraphExecutor> {
    executor: E,
    config: LoaderConfig,
    state: LoaderState,
}

impl<E: GraphExecutor> BatchLoader<E> {
    pub fn new(executor: E, config: LoaderConfig) -> Self {
        Self {
            executor,
            config,
            state: LoaderState::Idle,
        }
    }

    /// State reached by the most recent load.
    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn executor_mut(&mut self) -> &mut E {
        &mut self.executor
    }

    pub fn into_inner(self) -> E {
        self.executor
    }

    pub fn load(
        &mut self,
        schema: &SchemaDefinition,
        vertex_batches: &[VertexBatch<'_>],
        edge_batches: &[EdgeBatch<'_>],
    ) -> Result<LoadReport, LabelGraphError> {
        let started = Instant::now();
        let mut run = LoadRun {
            schema,
            validators: ValidatorCache::new(schema),
            batch_size: self.config.batch_size,
            progress: ProgressTracker::new(&self.config, started),
            state: &mut self.state,
            started,
            timings: PhaseTimings::default(),
            counts: AHashMap::new(),
            id_bases: AHashMap::new(),
            tables: AHashMap::new(),
            positions: AHashMap::new(),
            verified: AHashMap::new(),
        };
        let result = run.execute(&mut self.executor, vertex_batches, edge_batches);
        run.transition(if result.is_ok() { LoaderState::Done } else { LoaderState::Failed });
        result
    }
}

/// Working state of one load.
struct LoadRun<'r, 's> {
    schema: &'s SchemaDefinition,
    validators: ValidatorCache<'s>,
    batch_size: usize,
    progress: ProgressTracker<'r>,
    state: &'r mut LoaderState,
    started: Instant,
    timings: PhaseTimings,
    /// Record counts per label from the validation pass.
    counts: AHashMap<LabelRef, usize>,
    /// Id given to staged vertex 0, per vertex label.
    id_bases: AHashMap<String, i64>,
    /// Staging table index in the session, per label.
    tables: AHashMap<LabelRef, usize>,
    /// Records staged so far, per label.
    positions: AHashMap<LabelRef, usize>,
    /// Committed vertex ids already confirmed, per vertex label.
    verified: AHashMap<String, AHashSet<i64>>,
}

enum Endpoint {
    Resolved(i64),
    Unresolved(String),
}

impl<'s> LoadRun<'_, 's> {
    fn transition(&mut self, next: LoaderState) {
        log::debug!("loader: {} -> {next}", *self.state);
        *self.state = next;
    }

    fn execute<E: GraphExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        vertex_batches: &[VertexBatch<'_>],
        edge_batches: &[EdgeBatch<'_>],
    ) -> Result<LoadReport, LabelGraphError> {
        self.transition(LoaderState::Validating);
        let mark = Instant::now();
        for batch in vertex_batches {
            let label = LabelRef::vertex(batch.label.as_str());
            self.validate_batch(&label, batch.open().map(|record| record.properties))?;
        }
        for batch in edge_batches {
            let label = LabelRef::edge(batch.label.as_str());
            self.validate_batch(&label, batch.open().map(|record| record.properties))?;
        }
        self.timings.validation = mark.elapsed();

        let mut session = StagingSession::new();
        let outcome = executor
            .begin()
            .map_err(|e| phase_error(LoadPhase::Transaction, None, e))
            .and_then(|mut tx| match self.stage_and_move(tx.as_mut(), &mut session, vertex_batches, edge_batches) {
                Ok(committed) => tx
                    .commit()
                    .map(|()| committed)
                    .map_err(|e| phase_error(LoadPhase::Transaction, None, e)),
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback() {
                        log::warn!("load {}: rollback failed: {rollback_err}", session.id());
                    }
                    Err(err)
                }
            });
        let committed = match outcome {
            Ok(committed) => committed,
            Err(err) => return Err(cleanup_after_failure(executor, &session, err)),
        };
        self.timings.total = self.started.elapsed();

        let mut report = LoadReport {
            session: session.id().to_string(),
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            timings: self.timings.clone(),
        };
        for label in self.counts.keys() {
            let counts = LabelCounts {
                staged: self.staged_rows(&session, label),
                committed: committed.get(label).copied().unwrap_or(0),
            };
            let target = match label.kind {
                LabelKind::Vertex => &mut report.vertices,
                LabelKind::Edge => &mut report.edges,
            };
            target.insert(label.label.clone(), counts);
        }
        log::debug!(
            "load {}: committed {} vertices and {} edges",
            report.session,
            report.committed_vertices(),
            report.committed_edges()
        );
        Ok(report)
    }

    fn validate_batch(
        &mut self,
        label: &LabelRef,
        records: impl Iterator<Item = Properties>,
    ) -> Result<(), LabelGraphError> {
        let validator = self
            .validators
            .get(label)
            .map_err(|e| phase_error(LoadPhase::Validation, Some(&label.label), e))?
            .ok_or_else(|| {
                load_error(
                    LoadPhase::Validation,
                    &label.label,
                    None,
                    vec![ValidationIssue {
                        path: label.label.clone(),
                        message: format!("unknown {} label", label.kind),
                    }],
                )
            })?;
        let count = self.counts.entry(label.clone()).or_insert(0);
        let mut errors = ErrorCollector::new();
        for properties in records {
            let encoded = {
                let mut scope = errors.enter(format!("{}[{}]", label.label, *count));
                validator.encode(&properties, &mut scope)
            };
            if encoded.is_none() {
                return Err(load_error(
                    LoadPhase::Validation,
                    &label.label,
                    Some(*count),
                    errors.take_issues(),
                ));
            }
            *count += 1;
        }
        Ok(())
    }

    fn stage_and_move(
        &mut self,
        tx: &mut dyn GraphTransaction,
        session: &mut StagingSession,
        vertex_batches: &[VertexBatch<'_>],
        edge_batches: &[EdgeBatch<'_>],
    ) -> Result<AHashMap<LabelRef, usize>, LabelGraphError> {
        self.transition(LoaderState::StagingVertices);
        let mark = Instant::now();
        for batch in vertex_batches {
            let label = LabelRef::vertex(batch.label.as_str());
            self.stage_vertex_batch(tx, session, &label, batch)
                .map_err(|e| phase_error(LoadPhase::Vertices, Some(&batch.label), e))?;
        }
        self.check_staged_counts(session, LabelKind::Vertex)?;
        self.timings.staging_vertices = mark.elapsed();

        self.transition(LoaderState::StagingEdges);
        let mark = Instant::now();
        for batch in edge_batches {
            let label = LabelRef::edge(batch.label.as_str());
            self.stage_edge_batch(tx, session, &label, batch)
                .map_err(|e| phase_error(LoadPhase::Edges, Some(&batch.label), e))?;
        }
        self.check_staged_counts(session, LabelKind::Edge)?;
        self.timings.staging_edges = mark.elapsed();

        self.transition(LoaderState::Committing);
        let mark = Instant::now();
        let committed = self
            .move_staged(tx, session)
            .map_err(|e| phase_error(LoadPhase::Transaction, None, e))?;
        self.timings.commit = mark.elapsed();
        Ok(committed)
    }

    /// Staged indexes resolve to ids, and the report counts rows, only if the staging
    /// pass saw exactly the records that were validated.
    fn check_staged_counts(&self, session: &StagingSession, kind: LabelKind) -> Result<(), LabelGraphError> {
        let phase = match kind {
            LabelKind::Vertex => LoadPhase::Vertices,
            LabelKind::Edge => LoadPhase::Edges,
        };
        for (label, validated) in self.counts.iter().filter(|(label, _)| label.kind == kind) {
            let staged = self.staged_rows(session, label);
            if staged != *validated {
                return Err(load_error(
                    phase,
                    &label.label,
                    None,
                    vec![ValidationIssue {
                        path: label.label.clone(),
                        message: format!("source yielded {staged} records for staging but {validated} for validation"),
                    }],
                ));
            }
        }
        Ok(())
    }

    fn staged_rows(&self, session: &StagingSession, label: &LabelRef) -> usize {
        self.tables
            .get(label)
            .and_then(|index| session.table(*index))
            .map_or(0, |table| table.rows)
    }

    /// Staging table of `label`, created on first use.
    fn staging_table(
        &mut self,
        tx: &mut dyn GraphTransaction,
        session: &mut StagingSession,
        label: &LabelRef,
    ) -> Result<usize, LabelGraphError> {
        if let Some(index) = self.tables.get(label) {
            return Ok(*index);
        }
        let mut columns = vec![(ddl::STAGING_SEQ_COLUMN.to_string(), ColumnType::Integer)];
        if label.kind == LabelKind::Edge {
            columns.push((ddl::FROM_COLUMN.to_string(), ColumnType::Integer));
            columns.push((ddl::TO_COLUMN.to_string(), ColumnType::Integer));
        }
        let validator = self.validator(label)?;
        for column in validator.columns() {
            if let Some(definition) = validator.definition(column) {
                columns.push((column.clone(), map_type(definition.property_type)));
            }
        }
        if label.kind == LabelKind::Vertex {
            let max_id = tx.execute(&ddl::max_id(label)?, &[])?.scalar_i64().unwrap_or(0);
            self.id_bases.insert(label.label.clone(), max_id + 1);
        }
        let index = session.create_table(tx, label.clone(), columns)?;
        self.tables.insert(label.clone(), index);
        Ok(index)
    }

    fn validator(&mut self, label: &LabelRef) -> Result<&LabelValidator<'s>, LabelGraphError> {
        self.validators
            .get(label)?
            .ok_or_else(|| LabelGraphError::invalid_schema(format!("unknown {label}")))
    }

    fn stage_vertex_batch(
        &mut self,
        tx: &mut dyn GraphTransaction,
        session: &mut StagingSession,
        label: &LabelRef,
        batch: &VertexBatch<'_>,
    ) -> Result<(), LabelGraphError> {
        let table = self.staging_table(tx, session, label)?;
        let chunk = chunk_rows(self.batch_size, session.table(table).map_or(1, |t| t.columns.len()));
        let total = self.counts.get(label).copied().unwrap_or(0);
        let mut position = self.positions.get(label).copied().unwrap_or(0);
        let mut buffer = Vec::with_capacity(chunk);
        for record in batch.open() {
            let mut row = vec![SqlValue::Integer(position as i64)];
            row.extend(self.encode_again(LoadPhase::Vertices, label, position, &record.properties)?);
            buffer.push(row);
            position += 1;
            if buffer.len() == chunk {
                session.append(tx, table, &buffer)?;
                buffer.clear();
            }
            self.progress.row(LoaderState::StagingVertices, &label.label, position, total);
        }
        session.append(tx, table, &buffer)?;
        self.positions.insert(label.clone(), position);
        Ok(())
    }

    fn stage_edge_batch(
        &mut self,
        tx: &mut dyn GraphTransaction,
        session: &mut StagingSession,
        label: &LabelRef,
        batch: &EdgeBatch<'_>,
    ) -> Result<(), LabelGraphError> {
        let schema = self.schema;
        let definition = schema
            .edges
            .get(&label.label)
            .ok_or_else(|| LabelGraphError::invalid_schema(format!("unknown {label}")))?;
        let table = self.staging_table(tx, session, label)?;
        let chunk = chunk_rows(self.batch_size, session.table(table).map_or(1, |t| t.columns.len()));
        let total = self.counts.get(label).copied().unwrap_or(0);
        let mut position = self.positions.get(label).copied().unwrap_or(0);
        let mut buffer = Vec::with_capacity(chunk);
        for record in batch.open() {
            let mut row = vec![SqlValue::Integer(position as i64)];
            for (role, vertex, expected) in [
                ("from", &record.from, &definition.from_vertex),
                ("to", &record.to, &definition.to_vertex),
            ] {
                match self.resolve(tx, vertex, expected)? {
                    Endpoint::Resolved(id) => row.push(SqlValue::Integer(id)),
                    Endpoint::Unresolved(message) => {
                        return Err(load_error(
                            LoadPhase::Edges,
                            &label.label,
                            Some(position),
                            vec![ValidationIssue {
                                path: format!("{}[{position}].{role}", label.label),
                                message,
                            }],
                        ));
                    }
                }
            }
            row.extend(self.encode_again(LoadPhase::Edges, label, position, &record.properties)?);
            buffer.push(row);
            position += 1;
            if buffer.len() == chunk {
                session.append(tx, table, &buffer)?;
                buffer.clear();
            }
            self.progress.row(LoaderState::StagingEdges, &label.label, position, total);
        }
        session.append(tx, table, &buffer)?;
        self.positions.insert(label.clone(), position);
        Ok(())
    }

    /// Encodes a record on the staging pass. A source that yields different records
    /// than it did while validating fails here.
    fn encode_again(
        &mut self,
        phase: LoadPhase,
        label: &LabelRef,
        position: usize,
        properties: &Properties,
    ) -> Result<Vec<SqlValue>, LabelGraphError> {
        let validated = self.counts.get(label).copied().unwrap_or(0);
        let mut errors = ErrorCollector::new();
        let encoded = {
            let mut scope = errors.enter(format!("{}[{position}]", label.label));
            if position >= validated {
                scope.report(format!("source yielded more than the {validated} records validated"));
            }
            self.validator(label)?.encode(properties, &mut scope)
        };
        match encoded {
            Some(row) if errors.is_empty() => Ok(row),
            _ => Err(load_error(phase, &label.label, Some(position), errors.take_issues())),
        }
    }

    fn resolve(
        &mut self,
        tx: &mut dyn GraphTransaction,
        vertex: &VertexRef,
        expected: &str,
    ) -> Result<Endpoint, LabelGraphError> {
        if vertex.label() != expected {
            return Ok(Endpoint::Unresolved(format!(
                "endpoint label {} does not match declared {expected}",
                vertex.label()
            )));
        }
        match vertex {
            VertexRef::Staged { label, index } => {
                let staged = self.counts.get(&LabelRef::vertex(label.as_str())).copied().unwrap_or(0);
                match self.id_bases.get(label) {
                    Some(base) if *index < staged => Ok(Endpoint::Resolved(base + *index as i64)),
                    _ => Ok(Endpoint::Unresolved(format!(
                        "staged {label} index {index} does not exist ({staged} staged)"
                    ))),
                }
            }
            VertexRef::Existing { label, id } => {
                let seen = self.verified.entry(label.clone()).or_default();
                if seen.contains(id) {
                    return Ok(Endpoint::Resolved(*id));
                }
                let found = tx.execute(&ddl::id_exists(&LabelRef::vertex(label.as_str()))?, &[SqlValue::Integer(*id)])?;
                if found.is_empty() {
                    return Ok(Endpoint::Unresolved(format!("{label} #{id} does not exist")));
                }
                seen.insert(*id);
                Ok(Endpoint::Resolved(*id))
            }
        }
    }

    /// Moves every staging table into permanent storage, then drops the staging
    /// tables. Returns committed row counts per label.
    fn move_staged(
        &mut self,
        tx: &mut dyn GraphTransaction,
        session: &StagingSession,
    ) -> Result<AHashMap<LabelRef, usize>, LabelGraphError> {
        check_fault(FaultPoint::LoadBeforeCommit)?;
        let mut committed = AHashMap::new();
        for table in session.tables() {
            let columns = table.columns.get(1..).unwrap_or(&[]);
            let sql = ddl::insert_from_staging(&table.label, &table.name, columns)?;
            let params = match (table.label.kind, self.id_bases.get(&table.label.label)) {
                (LabelKind::Vertex, Some(base)) => vec![SqlValue::Integer(*base)],
                _ => Vec::new(),
            };
            let moved = tx.execute(&sql, &params)?.affected;
            log::debug!("load {}: moved {moved} rows into {}", session.id(), table.label);
            self.progress.row(LoaderState::Committing, &table.label.label, moved, moved);
            committed.insert(table.label.clone(), moved);
        }
        session.drop_all(tx)?;
        Ok(committed)
    }
}

/// Drops the session's staging tables after a failed load. A cleanup failure is
/// reported as a cleanup-phase error carrying the original one.
fn cleanup_after_failure<E: GraphExecutor + ?Sized>(
    executor: &mut E,
    session: &StagingSession,
    original: LabelGraphError,
) -> LabelGraphError {
    if session.tables().is_empty() {
        return original;
    }
    let cleanup = with_transaction(executor, |tx| {
        check_fault(FaultPoint::StagingCleanup)?;
        session.drop_all(tx)
    });
    match cleanup {
        Ok(()) => original,
        Err(cleanup_err) => {
            log::warn!("load {}: staging cleanup failed: {cleanup_err}", session.id());
            LabelGraphError::Load {
                phase: LoadPhase::Cleanup,
                label: None,
                index: None,
                issues: vec![ValidationIssue {
                    path: format!("session {}", session.id()),
                    message: cleanup_err.to_string(),
                }],
                source: Some(Box::new(original)),
            }
        }
    }
}

fn load_error(phase: LoadPhase, label: &str, index: Option<usize>, issues: Vec<ValidationIssue>) -> LabelGraphError {
    LabelGraphError::Load {
        phase,
        label: Some(label.to_string()),
        index,
        issues,
        source: None,
    }
}

/// Attributes `err` to a load phase; errors that already carry one pass through.
fn phase_error(phase: LoadPhase, label: Option<&str>, err: LabelGraphError) -> LabelGraphError {
    match err {
        LabelGraphError::Load { .. } => err,
        other => LabelGraphError::Load {
            phase,
            label: label.map(String::from),
            index: None,
            issues: Vec::new(),
            source: Some(Box::new(other)),
        },
    }
}
