//! Migration planning and transactional application.
//!
//! `Planned -> Validated -> [BackedUp] -> Applying -> Committed | RolledBack`

mod backup;
mod executor;
mod plan;

pub use backup::{BackupRecord, BackupTable, drop_backup, list_backups};
pub use executor::{MigrationReport, MigrationState, install_schema, migrate_schema, upgrade_schema};
pub use plan::{MigrationPlan, MigrationStep, PlannedStatement, plan_migration};
