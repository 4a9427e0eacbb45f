use std::{
    fmt,
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::config::{LoaderConfig, ProgressCallback};

/// Linear state machine of one load.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderState {
    /// No load has run yet.
    #[default]
    Idle,
    Validating,
    StagingVertices,
    StagingEdges,
    Committing,
    Done,
    Failed,
}

impl fmt::Display for LoaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoaderState::Idle => "idle",
            LoaderState::Validating => "validating",
            LoaderState::StagingVertices => "staging vertices",
            LoaderState::StagingEdges => "staging edges",
            LoaderState::Committing => "committing",
            LoaderState::Done => "done",
            LoaderState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot passed to [`LoaderConfig::progress_callback`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadProgress {
    pub phase: LoaderState,
    pub label: String,
    /// Rows of `label` processed so far in this phase.
    pub current: usize,
    pub total: usize,
    /// Time since the load started.
    pub elapsed: Duration,
}

impl LoadProgress {
    pub fn is_label_complete(&self) -> bool {
        self.current == self.total
    }
}

pub(crate) struct ProgressTracker<'c> {
    callback: Option<&'c ProgressCallback>,
    interval: usize,
    started: Instant,
}

impl<'c> ProgressTracker<'c> {
    pub(crate) fn new(config: &'c LoaderConfig, started: Instant) -> Self {
        Self {
            callback: config.progress_callback.as_ref(),
            interval: config.progress_interval,
            started,
        }
    }

    /// Reports every `interval` rows and when the label's last row was processed.
    pub(crate) fn row(&self, phase: LoaderState, label: &str, current: usize, total: usize) {
        let Some(callback) = self.callback else {
            return;
        };
        let on_interval = self.interval > 0 && current % self.interval == 0;
        if on_interval || current == total {
            callback(&LoadProgress {
                phase,
                label: label.to_string(),
                current,
                total,
                elapsed: self.started.elapsed(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn reports_on_interval_and_completion() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let config = LoaderConfig {
            progress_interval: 2,
            ..LoaderConfig::default()
        }
        .with_progress(move |p| sink.lock().unwrap().push((p.current, p.is_label_complete())));
        let tracker = ProgressTracker::new(&config, Instant::now());
        for current in 1..=5 {
            tracker.row(LoaderState::StagingVertices, "Person", current, 5);
        }
        assert_eq!(*seen.lock().unwrap(), vec![(2, false), (4, false), (5, true)]);
    }
}
