//! Results of running an operation plan, before they are shaped into responses.

use crate::domain::entities::{CreatedEntity, EntityId, EntityKind};
use crate::domain::errors::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What went wrong, with enough detail for manual remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub kind: ErrorKind,
    pub entity: EntityKind,
    pub step: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every step applied. `id` is the root entity of the plan.
    Created {
        id: EntityId,
        created: Vec<CreatedEntity>,
    },
    /// Nothing is left behind on the platform: either no step applied or
    /// every applied step was rolled back.
    Failed {
        failure: Failure,
        rolled_back: Vec<CreatedEntity>,
    },
    /// Platform state could not be restored automatically.
    NeedsReview {
        failure: Failure,
        note: String,
        left_applied: Vec<CreatedEntity>,
    },
}

impl Outcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Outcome::Created { .. })
    }
}

/// Outcome of one batch item (one student of an enrollment batch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    pub item: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Single(Outcome),
    Batch(Vec<ItemOutcome>),
}

/// Persisted record of an operation that needs operator follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEntry {
    pub recorded_at: DateTime<Utc>,
    pub operation: String,
    pub item: Option<String>,
    pub failure: Failure,
    pub note: String,
    pub left_applied: Vec<CreatedEntity>,
}
