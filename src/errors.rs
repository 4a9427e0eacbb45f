use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::types::PropertyType;

/// Phase of a batch load an error is attributed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPhase {
    Validation,
    Vertices,
    Edges,
    Transaction,
    Cleanup,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadPhase::Validation => "validation",
            LoadPhase::Vertices => "vertices",
            LoadPhase::Edges => "edges",
            LoadPhase::Transaction => "transaction",
            LoadPhase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// One structured problem found while validating a record or a schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    /// Dotted path to the offending value, e.g. `Person[2].age`.
    pub path: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Discriminant of [`LabelGraphError`], convenient for matching in callers and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    TypeMismatch,
    OutOfRange,
    InvalidIdentifier,
    InvalidLiteral,
    InvalidSchema,
    DataLoss,
    Backup,
    Migration,
    BatchLoader,
    Execution,
    Cancelled,
    FaultInjected,
    Io,
}

/// Error type for every labelgraph operation.
#[derive(Debug, Error)]
pub enum LabelGraphError {
    #[error("validation error: {}", join_issues(.issues))]
    Validation { issues: Vec<ValidationIssue> },
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: PropertyType,
        found: String,
    },
    #[error("value {value} out of range for {target}")]
    OutOfRange { value: String, target: PropertyType },
    #[error("invalid identifier {name:?}: {reason}")]
    InvalidIdentifier { name: String, reason: String },
    #[error("invalid literal: {0}")]
    InvalidLiteral(String),
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("migration would lose data in {} step(s): {}", .steps.len(), .steps.join("; "))]
    DataLoss { steps: Vec<String> },
    #[error("backup failed: {source}")]
    Backup {
        #[source]
        source: Box<LabelGraphError>,
    },
    #[error("migration failed{}: {source}", describe_step(*.step, .change))]
    Migration {
        step: Option<usize>,
        change: Option<String>,
        #[source]
        source: Box<LabelGraphError>,
    },
    #[error(
        "batch load failed in {phase} phase{}{}{}",
        describe_label(.label),
        describe_index(*.index),
        describe_cause(.issues, .source)
    )]
    Load {
        phase: LoadPhase,
        label: Option<String>,
        index: Option<usize>,
        issues: Vec<ValidationIssue>,
        source: Option<Box<LabelGraphError>>,
    },
    #[error("execution error: {message} (statement: {statement})")]
    Execution { statement: String, message: String },
    #[error("operation cancelled: {0}")]
    Cancelled(String),
    #[error("fault injected: {0}")]
    FaultInjected(String),
    #[error("io error: {0}")]
    Io(String),
}

impl LabelGraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LabelGraphError::Validation { .. } => ErrorKind::Validation,
            LabelGraphError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            LabelGraphError::OutOfRange { .. } => ErrorKind::OutOfRange,
            LabelGraphError::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            LabelGraphError::InvalidLiteral(_) => ErrorKind::InvalidLiteral,
            LabelGraphError::InvalidSchema(_) => ErrorKind::InvalidSchema,
            LabelGraphError::DataLoss { .. } => ErrorKind::DataLoss,
            LabelGraphError::Backup { .. } => ErrorKind::Backup,
            LabelGraphError::Migration { .. } => ErrorKind::Migration,
            LabelGraphError::Load { .. } => ErrorKind::BatchLoader,
            LabelGraphError::Execution { .. } => ErrorKind::Execution,
            LabelGraphError::Cancelled(_) => ErrorKind::Cancelled,
            LabelGraphError::FaultInjected(_) => ErrorKind::FaultInjected,
            LabelGraphError::Io(_) => ErrorKind::Io,
        }
    }

    pub fn validation<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        LabelGraphError::Validation {
            issues: vec![ValidationIssue {
                path: path.into(),
                message: message.into(),
            }],
        }
    }

    pub fn type_mismatch<T: Into<String>>(expected: PropertyType, found: T) -> Self {
        LabelGraphError::TypeMismatch {
            expected,
            found: found.into(),
        }
    }

    pub fn out_of_range<T: Into<String>>(value: T, target: PropertyType) -> Self {
        LabelGraphError::OutOfRange {
            value: value.into(),
            target,
        }
    }

    pub fn invalid_identifier<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        LabelGraphError::InvalidIdentifier {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_literal<T: Into<String>>(msg: T) -> Self {
        LabelGraphError::InvalidLiteral(msg.into())
    }

    pub fn invalid_schema<T: Into<String>>(msg: T) -> Self {
        LabelGraphError::InvalidSchema(msg.into())
    }

    pub fn backup(source: LabelGraphError) -> Self {
        LabelGraphError::Backup {
            source: Box::new(source),
        }
    }

    pub fn migration(step: Option<usize>, change: Option<String>, source: LabelGraphError) -> Self {
        LabelGraphError::Migration {
            step,
            change,
            source: Box::new(source),
        }
    }

    pub fn execution<S: Into<String>, M: Into<String>>(statement: S, message: M) -> Self {
        LabelGraphError::Execution {
            statement: statement.into(),
            message: message.into(),
        }
    }

    pub fn cancelled<T: Into<String>>(msg: T) -> Self {
        LabelGraphError::Cancelled(msg.into())
    }

    pub fn fault_injection<T: Into<String>>(msg: T) -> Self {
        LabelGraphError::FaultInjected(msg.into())
    }

    pub fn io<T: Into<String>>(msg: T) -> Self {
        LabelGraphError::Io(msg.into())
    }

    /// Phase tag of a batch load error, `None` for every other kind.
    pub fn load_phase(&self) -> Option<LoadPhase> {
        match self {
            LabelGraphError::Load { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Record index of a batch load error, when the failure points at one record.
    pub fn load_index(&self) -> Option<usize> {
        match self {
            LabelGraphError::Load { index, .. } => *index,
            _ => None,
        }
    }

    /// Whether this error or any error it wraps is a cancellation. Cleanup and
    /// migration errors keep the original cancellation as their source.
    pub fn is_cancelled(&self) -> bool {
        match self {
            LabelGraphError::Cancelled(_) => true,
            LabelGraphError::Backup { source } | LabelGraphError::Migration { source, .. } => source.is_cancelled(),
            LabelGraphError::Load {
                source: Some(source), ..
            } => source.is_cancelled(),
            _ => false,
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn describe_step(step: Option<usize>, change: &Option<String>) -> String {
    match (step, change) {
        (Some(step), Some(change)) => format!(" at step {step} ({change})"),
        (Some(step), None) => format!(" at step {step}"),
        (None, Some(change)) => format!(" ({change})"),
        (None, None) => String::new(),
    }
}

fn describe_label(label: &Option<String>) -> String {
    label
        .as_ref()
        .map(|label| format!(" for label {label}"))
        .unwrap_or_default()
}

fn describe_index(index: Option<usize>) -> String {
    index
        .map(|index| format!(" at record {index}"))
        .unwrap_or_default()
}

fn describe_cause(issues: &[ValidationIssue], source: &Option<Box<LabelGraphError>>) -> String {
    match (issues.is_empty(), source) {
        (false, _) => format!(": {}", join_issues(issues)),
        (true, Some(source)) => format!(": {source}"),
        (true, None) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_error_message_names_phase_label_and_index() {
        let err = LabelGraphError::Load {
            phase: LoadPhase::Edges,
            label: Some("KNOWS".into()),
            index: Some(1),
            issues: vec![ValidationIssue {
                path: "KNOWS[1].to".into(),
                message: "staged Person index 5 does not exist".into(),
            }],
            source: None,
        };
        let text = err.to_string();
        assert!(text.contains("edges phase"), "{text}");
        assert!(text.contains("label KNOWS"), "{text}");
        assert!(text.contains("record 1"), "{text}");
        assert_eq!(err.kind(), ErrorKind::BatchLoader);
        assert_eq!(err.load_phase(), Some(LoadPhase::Edges));
        assert_eq!(err.load_index(), Some(1));
    }

    #[test]
    fn cancellation_is_visible_through_cleanup_errors() {
        let original = LabelGraphError::Load {
            phase: LoadPhase::Vertices,
            label: Some("Person".into()),
            index: None,
            issues: Vec::new(),
            source: Some(Box::new(LabelGraphError::cancelled("interrupted"))),
        };
        let cleanup = LabelGraphError::Load {
            phase: LoadPhase::Cleanup,
            label: None,
            index: None,
            issues: Vec::new(),
            source: Some(Box::new(original)),
        };
        assert!(cleanup.is_cancelled());
        assert!(!LabelGraphError::io("disk full").is_cancelled());
    }

    #[test]
    fn migration_error_keeps_cause_as_source() {
        let err = LabelGraphError::migration(
            Some(2),
            Some("remove property Person.age".into()),
            LabelGraphError::execution("ALTER TABLE", "no such column"),
        );
        assert!(err.to_string().contains("step 2"));
        let source = std::error::Error::source(&err).expect("source");
        assert!(source.to_string().contains("no such column"));
    }
}
