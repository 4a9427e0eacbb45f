//! Configuration for the bundled SQLite executor, the batch loader and migrations.
//!
//! All three structures have conservative defaults; callers normally start from
//! `Default::default()` and override individual fields.

use std::{fmt, path::PathBuf, time::Duration};

use crate::loader::LoadProgress;

/// Where the bundled executor keeps its database.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Private in-memory database, discarded when the executor is dropped.
    #[default]
    InMemory,
    /// Database file, created if missing.
    File(PathBuf),
}

/// Options for [`crate::SqliteExecutor`].
///
/// # Default Configuration
///
/// ```rust
/// use labelgraph::SqliteConfig;
/// let config = SqliteConfig::default();
/// assert_eq!(config.statement_cache_capacity, 128);
/// assert!(config.pragma_settings.is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct SqliteConfig {
    pub location: DatabaseLocation,

    /// How long a statement waits on a locked database before failing.
    ///
    /// **Default:** 5 seconds
    ///
    /// Only one writer may hold the database at a time; a load or migration running
    /// on another connection makes `BEGIN IMMEDIATE` wait up to this long.
    pub busy_timeout: Duration,

    /// Capacity of the prepared statement cache.
    ///
    /// **Default:** 128
    ///
    /// Staging inserts reuse a handful of statement shapes, so a small cache is
    /// enough to avoid recompiling them for every chunk.
    pub statement_cache_capacity: usize,

    /// Additional PRAGMA settings applied after opening, in order.
    ///
    /// ```rust
    /// use labelgraph::SqliteConfig;
    ///
    /// let mut cfg = SqliteConfig::default();
    /// cfg.pragma_settings.push(("synchronous".into(), "NORMAL".into()));
    /// ```
    pub pragma_settings: Vec<(String, String)>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            location: DatabaseLocation::InMemory,
            busy_timeout: Duration::from_secs(5),
            statement_cache_capacity: 128,
            pragma_settings: Vec::new(),
        }
    }
}

impl SqliteConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            location: DatabaseLocation::File(path.into()),
            ..Self::default()
        }
    }
}

/// Callback receiving loader progress.
pub type ProgressCallback = Box<dyn Fn(&LoadProgress) + Send + Sync>;

/// Batch loader configuration.
pub struct LoaderConfig {
    /// Rows per multi-row staging insert. Capped by the backend's bound-parameter
    /// limit for wide labels.
    pub batch_size: usize,
    /// Report progress every this many rows within a label (0 disables row-level
    /// reports; label completion is always reported).
    pub progress_interval: usize,
    pub progress_callback: Option<ProgressCallback>,
}

impl fmt::Debug for LoaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderConfig")
            .field("batch_size", &self.batch_size)
            .field("progress_interval", &self.progress_interval)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            progress_interval: 10_000,
            progress_callback: None,
        }
    }
}

impl LoaderConfig {
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&LoadProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }
}

/// Options for [`crate::migrate_schema`].
///
/// The default is a dry run: the plan is computed and validated but the backend is
/// never touched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MigrationOptions {
    /// Permit destructive steps.
    pub allow_data_loss: bool,
    /// Apply the plan. When `false`, only plan and validate.
    pub execute: bool,
    /// Copy tables touched by destructive steps before applying them.
    pub create_backup: bool,
    /// Log every state transition and step at `info` instead of `debug`.
    pub log_migration: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            allow_data_loss: false,
            execute: false,
            create_backup: true,
            log_migration: false,
        }
    }
}

impl MigrationOptions {
    /// Defaults with `execute` set.
    pub fn apply() -> Self {
        Self {
            execute: true,
            ..Self::default()
        }
    }

    pub fn allow_data_loss(mut self) -> Self {
        self.allow_data_loss = true;
        self
    }

    pub fn without_backup(mut self) -> Self {
        self.create_backup = false;
        self
    }

    pub fn logged(mut self) -> Self {
        self.log_migration = true;
        self
    }
}
