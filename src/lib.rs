//! Typed property-graph schemas on SQLite.
//!
//! A [`SchemaDefinition`] declares vertex and edge labels with typed properties.
//! [`compare_schemas`] diffs two schemas, [`plan_migration`] turns the diff into
//! ordered DDL and [`migrate_schema`] applies it in one transaction, refusing to lose
//! data unless told to. [`BatchLoader`] validates and stages vertex and edge batches,
//! then moves them into permanent storage atomically.
//!
//! Every backend access goes through the [`GraphExecutor`] seam; [`SqliteExecutor`]
//! is the bundled implementation.
//!
//! Run Criterion benchmarks with `cargo bench` to inspect reports under `target/criterion`.

pub mod catalog;
pub mod config;
pub mod diff;
pub mod errors;
pub mod executor;
pub mod fault_injection;
pub mod loader;
pub mod migration;
pub mod safety;
pub mod schema;
pub mod sql;
pub mod types;

pub use crate::catalog::{CATALOG_VERSION, load_schema};
pub use crate::config::{DatabaseLocation, LoaderConfig, MigrationOptions, ProgressCallback, SqliteConfig};
pub use crate::diff::{Endpoints, SchemaChange, compare_schemas};
pub use crate::errors::{ErrorKind, LabelGraphError, LoadPhase, ValidationIssue};
pub use crate::executor::{GraphExecutor, GraphTransaction, RowSet, SqliteExecutor, with_transaction};
pub use crate::fault_injection::{FaultPoint, configure_fault, configure_fault_after, fault_visits, reset_faults};
pub use crate::loader::{
    BatchLoader, EdgeBatch, EdgeRecord, LabelCounts, LoadProgress, LoadReport, LoaderState, PhaseTimings,
    Properties, VertexBatch, VertexRecord, VertexRef, list_staging_tables,
};
pub use crate::migration::{
    BackupRecord, MigrationPlan, MigrationReport, MigrationState, MigrationStep, drop_backup, install_schema,
    list_backups, migrate_schema, plan_migration, upgrade_schema,
};
pub use crate::safety::{SafetyReport, check_integrity, ensure_integrity};
pub use crate::schema::{
    Constraints, EdgeLabel, LabelKind, LabelRef, PropertyDefinition, SchemaDefinition, SchemaVersion, VertexLabel,
};
pub use crate::sql::{escape_literal, quote_identifier};
pub use crate::types::{ColumnType, PropertyType, SqlValue, decode_literal, encode_literal, map_type};
