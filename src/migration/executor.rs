use std::fmt;

use log::Level;
use serde::Serialize;

use crate::{
    catalog::{ensure_catalog, load_schema, read_schema, write_schema},
    config::MigrationOptions,
    errors::LabelGraphError,
    executor::{GraphExecutor, GraphTransaction},
    fault_injection::{FaultPoint, check_fault},
    schema::{SchemaDefinition, SchemaVersion},
};

use super::{
    backup::create_backup,
    plan::{MigrationPlan, MigrationStep, PlannedStatement, plan_migration},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationState {
    Planned,
    Validated,
    BackedUp,
    Applying,
    Committed,
    RolledBack,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationState::Planned => "planned",
            MigrationState::Validated => "validated",
            MigrationState::BackedUp => "backed up",
            MigrationState::Applying => "applying",
            MigrationState::Committed => "committed",
            MigrationState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MigrationReport {
    /// `new` after a committed migration; on a dry run, the schema the plan would produce.
    pub schema: SchemaDefinition,
    pub from_version: SchemaVersion,
    pub to_version: SchemaVersion,
    pub plan: MigrationPlan,
    pub state: MigrationState,
    pub backup_id: Option<String>,
    pub dry_run: bool,
}

struct MigrationLog {
    level: Level,
    from: SchemaVersion,
    to: SchemaVersion,
}

impl MigrationLog {
    fn new(options: &MigrationOptions, plan: &MigrationPlan) -> Self {
        Self {
            level: if options.log_migration { Level::Info } else { Level::Debug },
            from: plan.from_version.clone(),
            to: plan.to_version.clone(),
        }
    }

    fn state(&self, state: MigrationState) {
        log::log!(self.level, "migration {} -> {}: {state}", self.from, self.to);
    }

    fn step(&self, step: &MigrationStep) {
        log::log!(
            self.level,
            "migration {} -> {}: {}{}",
            self.from,
            self.to,
            step.describe(),
            if step.destructive { " (destructive)" } else { "" }
        );
    }
}

/// Plans, validates and (with `options.execute`) applies the migration from `old` to
/// `new` in one backend transaction.
///
/// Destructive plans fail with [`LabelGraphError::DataLoss`] unless
/// `options.allow_data_loss` is set, whether or not the plan would be executed. Any
/// failure after the transaction opened rolls it back; the stored schema is then
/// exactly what it was before the call.
pub fn migrate_schema<E: GraphExecutor + ?Sized>(
    executor: &mut E,
    old: &SchemaDefinition,
    new: &SchemaDefinition,
    options: &MigrationOptions,
) -> Result<MigrationReport, LabelGraphError> {
    let plan = plan_migration(old, new)?;
    let log = MigrationLog::new(options, &plan);
    log.state(MigrationState::Planned);

    if plan.has_destructive() && !options.allow_data_loss {
        let steps: Vec<String> = plan.destructive_steps().map(MigrationStep::describe).collect();
        return Err(LabelGraphError::DataLoss { steps });
    }
    log.state(MigrationState::Validated);

    if !options.execute {
        return Ok(MigrationReport {
            schema: plan.resulting_schema(old)?,
            from_version: plan.from_version.clone(),
            to_version: plan.to_version.clone(),
            plan,
            state: MigrationState::Validated,
            backup_id: None,
            dry_run: true,
        });
    }

    let mut tx = executor.begin()?;
    match apply(tx.as_mut(), &plan, old, new, options, &log) {
        Ok(backup_id) => {
            tx.commit()
                .map_err(|e| LabelGraphError::migration(None, Some("commit".into()), e))?;
            log.state(MigrationState::Committed);
            Ok(MigrationReport {
                schema: new.clone(),
                from_version: plan.from_version.clone(),
                to_version: plan.to_version.clone(),
                plan,
                state: MigrationState::Committed,
                backup_id,
                dry_run: false,
            })
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                log::warn!("migration rollback failed: {rollback_err}");
            }
            log.state(MigrationState::RolledBack);
            Err(err)
        }
    }
}

/// Migrates from the empty schema.
pub fn install_schema<E: GraphExecutor + ?Sized>(
    executor: &mut E,
    schema: &SchemaDefinition,
    options: &MigrationOptions,
) -> Result<MigrationReport, LabelGraphError> {
    migrate_schema(executor, &SchemaDefinition::empty(), schema, options)
}

/// Migrates from whatever schema the catalog currently records.
pub fn upgrade_schema<E: GraphExecutor + ?Sized>(
    executor: &mut E,
    new: &SchemaDefinition,
    options: &MigrationOptions,
) -> Result<MigrationReport, LabelGraphError> {
    let current = load_schema(executor)?.unwrap_or_default();
    migrate_schema(executor, &current, new, options)
}

fn apply(
    tx: &mut dyn GraphTransaction,
    plan: &MigrationPlan,
    old: &SchemaDefinition,
    new: &SchemaDefinition,
    options: &MigrationOptions,
    log: &MigrationLog,
) -> Result<Option<String>, LabelGraphError> {
    ensure_catalog(tx).map_err(|e| LabelGraphError::migration(None, None, e))?;
    check_drift(tx, old)?;

    let mut backup_id = None;
    if options.create_backup && plan.has_destructive() {
        backup_id = create_backup(tx, plan, old).map_err(LabelGraphError::backup)?;
        log.state(MigrationState::BackedUp);
    }

    log.state(MigrationState::Applying);
    for step in &plan.steps {
        log.step(step);
        run_step(tx, step)
            .map_err(|e| LabelGraphError::migration(Some(step.index), Some(step.change.to_string()), e))?;
    }

    check_fault(FaultPoint::MigrationBeforeCommit).map_err(|e| LabelGraphError::migration(None, None, e))?;
    write_schema(tx, new).map_err(|e| LabelGraphError::migration(None, Some("catalog update".into()), e))?;
    Ok(backup_id)
}

/// The catalog must record `old` (an empty catalog stands for the empty schema).
fn check_drift(tx: &mut dyn GraphTransaction, old: &SchemaDefinition) -> Result<(), LabelGraphError> {
    let stored = read_schema(tx).map_err(|e| LabelGraphError::migration(None, None, e))?;
    let drift = match &stored {
        Some(stored) if stored.version != old.version => Some(format!(
            "catalog records version {}, migration starts from {}",
            stored.version, old.version
        )),
        None if !old.is_empty() => Some(format!(
            "catalog is empty, migration starts from version {}",
            old.version
        )),
        _ => None,
    };
    match drift {
        Some(detail) => Err(LabelGraphError::migration(
            None,
            None,
            LabelGraphError::invalid_schema(format!("schema drift: {detail}")),
        )),
        None => Ok(()),
    }
}

fn run_step(tx: &mut dyn GraphTransaction, step: &MigrationStep) -> Result<(), LabelGraphError> {
    for statement in &step.statements {
        match statement {
            PlannedStatement::Execute(sql) => {
                tx.execute(sql, &[])?;
            }
            PlannedStatement::AssertZero { query, message } => {
                let count = tx.execute(query, &[])?.scalar_i64().unwrap_or(0);
                if count != 0 {
                    return Err(LabelGraphError::execution(query.as_str(), message.as_str()));
                }
            }
        }
    }
    Ok(())
}
