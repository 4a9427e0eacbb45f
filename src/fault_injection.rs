//! Deterministic failure points for exercising rollback and cleanup paths.
//!
//! Every [`FaultPoint`] owns a schedule: the first `skip` visits pass, the next
//! `failures` visits fail, and every visit is counted.

use parking_lot::{Mutex, const_mutex};

use crate::errors::LabelGraphError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// After all staging tables are filled, before the move into permanent storage.
    LoadBeforeCommit,
    /// While dropping staging tables on the failure path.
    StagingCleanup,
    /// While snapshotting tables before a migration applies.
    MigrationBackup,
    /// After every migration step ran, before the catalog is rewritten.
    MigrationBeforeCommit,
}

impl FaultPoint {
    pub const ALL: [FaultPoint; 4] = [
        FaultPoint::LoadBeforeCommit,
        FaultPoint::StagingCleanup,
        FaultPoint::MigrationBackup,
        FaultPoint::MigrationBeforeCommit,
    ];

    const fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Clone, Copy, Debug)]
struct Schedule {
    skip: usize,
    failures: usize,
    visits: usize,
}

impl Schedule {
    const IDLE: Schedule = Schedule {
        skip: 0,
        failures: 0,
        visits: 0,
    };
}

static SCHEDULES: Mutex<[Schedule; FaultPoint::ALL.len()]> = const_mutex([Schedule::IDLE; FaultPoint::ALL.len()]);

/// Disarms every point and clears the visit counters.
pub fn reset_faults() {
    *SCHEDULES.lock() = [Schedule::IDLE; FaultPoint::ALL.len()];
}

/// Makes the next `failures` visits of `point` fail.
pub fn configure_fault(point: FaultPoint, failures: usize) {
    configure_fault_after(point, 0, failures);
}

/// Lets `skip` visits of `point` pass, then fails the `failures` after them.
pub fn configure_fault_after(point: FaultPoint, skip: usize, failures: usize) {
    SCHEDULES.lock()[point.slot()] = Schedule {
        skip,
        failures,
        visits: 0,
    };
}

/// Visits of `point` since it was last configured or reset.
pub fn fault_visits(point: FaultPoint) -> usize {
    SCHEDULES.lock()[point.slot()].visits
}

pub(crate) fn check_fault(point: FaultPoint) -> Result<(), LabelGraphError> {
    let mut schedules = SCHEDULES.lock();
    let schedule = &mut schedules[point.slot()];
    schedule.visits += 1;
    if schedule.skip > 0 {
        schedule.skip -= 1;
        return Ok(());
    }
    if schedule.failures == 0 {
        return Ok(());
    }
    schedule.failures -= 1;
    Err(LabelGraphError::fault_injection(format!(
        "{point:?} (visit {})",
        schedule.visits
    )))
}
