//! Response contract delivered to the presentation layer.

use crate::domain::entities::{CreatedEntity, EntityId};
use crate::domain::errors::{ErrorKind, FieldIssue};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Success,
    /// Batch only: some items succeeded, others did not.
    Partial,
    Failure,
    NeedsReview,
}

/// `{ status, id?, errorKind?, message? }` plus remediation detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created: Vec<CreatedEntity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<FieldIssue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSuccess {
    pub item: String,
    pub id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub item: String,
    pub error_kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCounts {
    pub succeeded: usize,
    pub failed: usize,
    pub needs_review: usize,
}

/// `{ status, succeeded, failed, needsReview }`. Never collapsed to pass/fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub counts: BatchCounts,
    pub succeeded: Vec<BatchSuccess>,
    pub failed: Vec<BatchFailure>,
    pub needs_review: Vec<BatchFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Batch(BatchResponse),
    Single(SingleResponse),
}

impl Response {
    pub fn status(&self) -> Status {
        match self {
            Response::Single(r) => r.status,
            Response::Batch(r) => r.status,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Response::Single(r) => r.error_kind,
            Response::Batch(r) => r.error_kind,
        }
    }
}
