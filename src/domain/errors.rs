//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into `TargetError`; everything the
//! caller can see is classified by `ErrorKind`.

use crate::domain::entities::EntityKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One offending request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub problem: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
        }
    }
}

/// Every invalid field of a request, not just the first.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid request: {}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

fn summarize(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{} {}", i.field, i.problem))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts and temporary unavailability. Retried with backoff.
    Transient,
    /// Anything else. Triggers rollback-or-needs-review.
    Fatal,
}

/// Classified failure reported by a target-system adapter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TargetError {
    pub class: ErrorClass,
    /// The call may have taken effect on the platform even though it failed.
    pub partially_applied: bool,
    pub message: String,
}

impl TargetError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            partially_applied: false,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Fatal,
            partially_applied: false,
            message: message.into(),
        }
    }

    /// No response in time: retryable, but the platform may have applied it.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Transient,
            partially_applied: true,
            message: message.into(),
        }
    }

    pub fn applied(mut self) -> Self {
        self.partially_applied = true;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.class == ErrorClass::Transient
    }

    /// Turn an exhausted transient error into the fatal error reported upstream.
    pub fn escalate(self, attempts: u32) -> Self {
        Self {
            class: ErrorClass::Fatal,
            partially_applied: self.partially_applied,
            message: format!("gave up after {} attempts: {}", attempts, self.message),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.class {
            ErrorClass::Transient => ErrorKind::TransientTarget,
            ErrorClass::Fatal => ErrorKind::FatalTarget,
        }
    }
}

/// Error taxonomy as delivered to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "UnresolvedDependencyError")]
    UnresolvedDependency,
    #[serde(rename = "TransientTargetError")]
    TransientTarget,
    #[serde(rename = "FatalTargetError")]
    FatalTarget,
    #[serde(rename = "PartialBatchFailure")]
    PartialBatchFailure,
    #[serde(rename = "Cancelled")]
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::UnresolvedDependency => "UnresolvedDependencyError",
            ErrorKind::TransientTarget => "TransientTargetError",
            ErrorKind::FatalTarget => "FatalTargetError",
            ErrorKind::PartialBatchFailure => "PartialBatchFailure",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Pre-flight check: the parent must already exist. Never created implicitly.
    #[error("{kind} '{reference}' does not exist; create it first")]
    UnresolvedDependency { kind: EntityKind, reference: String },

    #[error("Target system error: {0}")]
    Target(#[from] TargetError),

    #[error("Session pool error: {0}")]
    Session(String),

    #[error("Review journal error: {0}")]
    Journal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) => ErrorKind::Validation,
            DomainError::UnresolvedDependency { .. } => ErrorKind::UnresolvedDependency,
            DomainError::Target(e) => e.kind(),
            DomainError::Session(_) | DomainError::Journal(_) | DomainError::Config(_) => {
                ErrorKind::FatalTarget
            }
        }
    }
}
