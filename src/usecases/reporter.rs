//! Result reporter: shapes outcomes and errors into the response contract.

use crate::domain::{
    BatchCounts, BatchFailure, BatchResponse, BatchSuccess, DomainError, ErrorKind,
    ExecutionResult, Failure, ItemOutcome, Outcome, Response, SingleResponse, Status,
};

pub fn report(result: ExecutionResult) -> Response {
    match result {
        ExecutionResult::Single(outcome) => Response::Single(single(outcome)),
        ExecutionResult::Batch(items) => Response::Batch(batch(items)),
    }
}

/// A request that was rejected before any step ran.
pub fn report_error(err: &DomainError) -> Response {
    let issues = match err {
        DomainError::Validation(v) => v.issues.clone(),
        _ => Vec::new(),
    };
    Response::Single(SingleResponse {
        status: Status::Failure,
        id: None,
        error_kind: Some(err.kind()),
        message: Some(err.to_string()),
        failed_step: None,
        created: Vec::new(),
        issues,
    })
}

fn single(outcome: Outcome) -> SingleResponse {
    match outcome {
        Outcome::Created { id, created } => SingleResponse {
            status: Status::Success,
            id: Some(id),
            error_kind: None,
            message: None,
            failed_step: None,
            created,
            issues: Vec::new(),
        },
        Outcome::Failed { failure, .. } => SingleResponse {
            status: Status::Failure,
            id: None,
            error_kind: Some(failure.kind),
            message: Some(failure.message),
            failed_step: Some(failure.step),
            created: Vec::new(),
            issues: Vec::new(),
        },
        Outcome::NeedsReview {
            failure,
            note,
            left_applied,
        } => SingleResponse {
            status: Status::NeedsReview,
            id: None,
            error_kind: Some(failure.kind),
            message: Some(review_message(&failure, &note)),
            failed_step: Some(failure.step),
            created: left_applied,
            issues: Vec::new(),
        },
    }
}

fn review_message(failure: &Failure, note: &str) -> String {
    format!("{}; {}", failure.message, note)
}

fn batch(items: Vec<ItemOutcome>) -> BatchResponse {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    let mut needs_review = Vec::new();

    for ItemOutcome { item, outcome } in items {
        match outcome {
            Outcome::Created { id, .. } => succeeded.push(BatchSuccess { item, id }),
            Outcome::Failed { failure, .. } => failed.push(BatchFailure {
                item,
                error_kind: failure.kind,
                message: failure.message,
                failed_step: Some(failure.step),
            }),
            Outcome::NeedsReview { failure, note, .. } => needs_review.push(BatchFailure {
                item,
                error_kind: failure.kind,
                message: review_message(&failure, &note),
                failed_step: Some(failure.step),
            }),
        }
    }

    let counts = BatchCounts {
        succeeded: succeeded.len(),
        failed: failed.len(),
        needs_review: needs_review.len(),
    };
    let unsuccessful = counts.failed + counts.needs_review;
    let (status, error_kind) = match (counts.succeeded, unsuccessful) {
        (_, 0) => (Status::Success, None),
        // Nothing succeeded, so the batch is not partial: report the items'
        // own kind when they all agree.
        (0, _) => (Status::Failure, shared_kind(failed.iter().chain(&needs_review))),
        _ => (Status::Partial, Some(ErrorKind::PartialBatchFailure)),
    };

    BatchResponse {
        status,
        error_kind,
        counts,
        succeeded,
        failed,
        needs_review,
    }
}

fn shared_kind<'a>(mut items: impl Iterator<Item = &'a BatchFailure>) -> Option<ErrorKind> {
    let first = items.next()?.error_kind;
    items.all(|i| i.error_kind == first).then_some(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        CreatedEntity, EntityId, EntityKind, FieldIssue, ValidationError,
    };

    fn failure(kind: ErrorKind, message: &str) -> Failure {
        Failure {
            kind,
            entity: EntityKind::Enrollment,
            step: "enroll 'B' in activity A-5".into(),
            message: message.into(),
        }
    }

    #[test]
    fn test_created_is_success_with_id() {
        let response = report(ExecutionResult::Single(Outcome::Created {
            id: EntityId::new("C-100"),
            created: vec![CreatedEntity {
                kind: EntityKind::Course,
                id: EntityId::new("C-100"),
                name: "Excel Basics".into(),
            }],
        }));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["id"], "C-100");
        assert!(json.get("errorKind").is_none());
    }

    #[test]
    fn test_validation_error_lists_issues() {
        let err = DomainError::from(ValidationError {
            issues: vec![
                FieldIssue::new("name", "is required"),
                FieldIssue::new("description", "is required"),
            ],
        });
        let json = serde_json::to_value(report_error(&err)).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["errorKind"], "ValidationError");
        assert_eq!(json["issues"].as_array().unwrap().len(), 2);
        assert_eq!(json["issues"][1]["field"], "description");
    }

    #[test]
    fn test_unresolved_dependency_names_reference() {
        let err = DomainError::UnresolvedDependency {
            kind: EntityKind::Course,
            reference: "Excel for Everyone".into(),
        };
        let response = report_error(&err);
        assert_eq!(response.error_kind(), Some(ErrorKind::UnresolvedDependency));
        let Response::Single(single) = response else {
            panic!("expected single response");
        };
        assert!(single.message.unwrap().contains("Excel for Everyone"));
    }

    #[test]
    fn test_mixed_batch_is_partial() {
        let response = report(ExecutionResult::Batch(vec![
            ItemOutcome {
                item: "A".into(),
                outcome: Outcome::Created {
                    id: EntityId::new("R-1"),
                    created: Vec::new(),
                },
            },
            ItemOutcome {
                item: "B".into(),
                outcome: Outcome::NeedsReview {
                    failure: failure(ErrorKind::FatalTarget, "gave up after 3 attempts"),
                    note: "rollback is not supported for enrollment".into(),
                    left_applied: Vec::new(),
                },
            },
            ItemOutcome {
                item: "C".into(),
                outcome: Outcome::Created {
                    id: EntityId::new("R-2"),
                    created: Vec::new(),
                },
            },
        ]));
        let Response::Batch(batch) = response else {
            panic!("expected batch response");
        };
        assert_eq!(batch.status, Status::Partial);
        assert_eq!(batch.error_kind, Some(ErrorKind::PartialBatchFailure));
        assert_eq!(
            batch.counts,
            BatchCounts {
                succeeded: 2,
                failed: 0,
                needs_review: 1
            }
        );
        assert_eq!(batch.needs_review[0].item, "B");
        assert_eq!(
            batch.needs_review[0].message,
            "gave up after 3 attempts; rollback is not supported for enrollment"
        );
    }

    #[test]
    fn test_all_failed_batch_is_failure() {
        let response = report(ExecutionResult::Batch(vec![ItemOutcome {
            item: "A".into(),
            outcome: Outcome::Failed {
                failure: failure(ErrorKind::FatalTarget, "rejected"),
                rolled_back: Vec::new(),
            },
        }]));
        assert_eq!(response.status(), Status::Failure);
        assert_eq!(response.error_kind(), Some(ErrorKind::FatalTarget));
    }

    #[test]
    fn test_all_failed_batch_is_never_partial() {
        let response = report(ExecutionResult::Batch(vec![
            ItemOutcome {
                item: "A".into(),
                outcome: Outcome::Failed {
                    failure: failure(ErrorKind::FatalTarget, "rejected"),
                    rolled_back: Vec::new(),
                },
            },
            ItemOutcome {
                item: "B".into(),
                outcome: Outcome::Failed {
                    failure: failure(ErrorKind::Cancelled, "cancelled"),
                    rolled_back: Vec::new(),
                },
            },
        ]));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "failure");
        assert!(json.get("errorKind").is_none());
        assert_eq!(json["counts"]["failed"], 2);
    }
}
