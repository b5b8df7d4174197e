//! Request engine: validate -> resolve -> plan -> sequence -> report.
//!
//! - Validation and resolution happen before any platform write
//! - A single plan runs on one pooled session for its whole duration
//! - Batch items run concurrently, each on its own session; one item's
//!   failure never affects another
//! - Needs-review outcomes are written to the review journal when configured

use crate::domain::{
    DomainError, EntityKind, ErrorKind, ExecutionResult, Failure, ItemOutcome, Outcome,
    RawRequest, Response, ReviewEntry,
};
use crate::ports::{AutomationPort, ReviewJournalPort, TargetSystem};
use crate::shared::cancel::CancellationToken;
use crate::shared::config::EngineSettings;
use crate::usecases::plan::{BatchItem, Plan, Work, plan};
use crate::usecases::reporter::{report, report_error};
use crate::usecases::resolver::Resolver;
use crate::usecases::sequencer::Sequencer;
use crate::usecases::session_pool::SessionPool;
use crate::usecases::validator::validate;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Automation service. Implements the inbound port.
pub struct AutomationService {
    pool: Arc<SessionPool>,
    resolver: Arc<Resolver>,
    sequencer: Sequencer,
    journal: Option<Arc<dyn ReviewJournalPort>>,
}

impl AutomationService {
    pub fn new(
        target: Arc<dyn TargetSystem>,
        pool: Arc<SessionPool>,
        settings: &EngineSettings,
        journal: Option<Arc<dyn ReviewJournalPort>>,
    ) -> Self {
        Self {
            pool,
            resolver: Arc::new(Resolver::new(
                Arc::clone(&target),
                settings.retry,
                settings.step_timeout,
            )),
            sequencer: Sequencer::new(target, settings.retry, settings.step_timeout),
            journal,
        }
    }

    /// Parse the envelope, then run it like `execute`.
    pub async fn execute_json(&self, request: Value, cancel: &CancellationToken) -> Response {
        match RawRequest::from_json(request) {
            Ok(request) => self.execute(request, cancel).await,
            Err(e) => {
                warn!(issues = e.issues.len(), "malformed request envelope");
                report_error(&DomainError::from(e))
            }
        }
    }

    pub async fn execute(&self, request: RawRequest, cancel: &CancellationToken) -> Response {
        let validated = match validate(&request) {
            Ok(v) => v,
            Err(e) => {
                warn!(kind = %request.kind, issues = e.issues.len(), "request rejected");
                return report_error(&DomainError::from(e));
            }
        };
        let operation = validated.kind();

        let mut session = match self.pool.acquire().await {
            Ok(s) => s,
            Err(e) => return report_error(&e),
        };
        let resolved = match self.resolver.resolve_request(&mut session, validated).await {
            Ok(r) => r,
            Err(e) => {
                warn!(operation = %operation, error = %e, "request not resolved");
                return report_error(&e);
            }
        };

        let result = match plan(&resolved) {
            Work::Single(plan) => {
                info!(
                    operation = %operation,
                    session = session.id,
                    steps = plan.len(),
                    "running operation"
                );
                let outcome = self.sequencer.run(&mut session, &plan, cancel).await;
                drop(session);
                self.settle(operation, None, &outcome).await;
                ExecutionResult::Single(outcome)
            }
            Work::Batch(items) => {
                drop(session);
                ExecutionResult::Batch(self.run_batch(operation, items, cancel).await)
            }
        };
        report(result)
    }

    /// One task per item; results are collected in request order.
    async fn run_batch(
        &self,
        operation: EntityKind,
        items: Vec<BatchItem>,
        cancel: &CancellationToken,
    ) -> Vec<ItemOutcome> {
        info!(
            operation = %operation,
            items = items.len(),
            pool = self.pool.size(),
            "running batch"
        );
        let mut handles = Vec::with_capacity(items.len());
        for BatchItem { item, plan } in items {
            let (entity, step) = first_step(&plan);
            let context = (entity, step.clone());
            let pool = Arc::clone(&self.pool);
            let sequencer = self.sequencer.clone();
            let cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                match pool.acquire().await {
                    Ok(mut session) => sequencer.run(&mut session, &plan, &cancel).await,
                    Err(e) => Outcome::Failed {
                        failure: Failure {
                            kind: e.kind(),
                            entity,
                            step,
                            message: e.to_string(),
                        },
                        rolled_back: Vec::new(),
                    },
                }
            });
            handles.push((item, context, handle));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (item, (entity, step), handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(item = %item, error = %e, "batch worker stopped");
                    // Nothing is known about how far the worker got.
                    Outcome::NeedsReview {
                        failure: Failure {
                            kind: ErrorKind::FatalTarget,
                            entity,
                            step,
                            message: format!("worker stopped: {}", e),
                        },
                        note: "the item may have been applied".to_string(),
                        left_applied: Vec::new(),
                    }
                }
            };
            self.settle(operation, Some(&item), &outcome).await;
            outcomes.push(ItemOutcome { item, outcome });
        }
        outcomes
    }

    /// Keep the reference cache in line with the platform and journal what needs review.
    async fn settle(&self, operation: EntityKind, item: Option<&str>, outcome: &Outcome) {
        match outcome {
            Outcome::Created { created, .. } => {
                for entity in created.iter().filter(|e| e.kind != EntityKind::Enrollment) {
                    self.resolver.remember(entity.kind, &entity.name, &entity.id).await;
                }
            }
            Outcome::Failed { rolled_back, .. } => {
                for entity in rolled_back {
                    self.resolver.forget(entity.kind, &entity.id).await;
                }
            }
            Outcome::NeedsReview {
                failure,
                note,
                left_applied,
            } => {
                warn!(
                    operation = %operation,
                    item = item.unwrap_or("-"),
                    step = %failure.step,
                    note = %note,
                    "needs review"
                );
                let Some(journal) = &self.journal else {
                    return;
                };
                let entry = ReviewEntry {
                    recorded_at: Utc::now(),
                    operation: operation.to_string(),
                    item: item.map(str::to_string),
                    failure: failure.clone(),
                    note: note.clone(),
                    left_applied: left_applied.clone(),
                };
                if let Err(e) = journal.record(&entry).await {
                    error!(error = %e, "failed to write review journal");
                }
            }
        }
    }
}

/// Entity kind and label of the plan's first step, for failures reported
/// before the plan could start.
fn first_step(plan: &Plan) -> (EntityKind, String) {
    plan.steps()
        .first()
        .map(|s| (s.kind(), s.label()))
        .unwrap_or((EntityKind::Enrollment, "plan".to_string()))
}

#[async_trait::async_trait]
impl AutomationPort for AutomationService {
    async fn submit(&self, request: RawRequest, cancel: CancellationToken) -> Response {
        self.execute(request, &cancel).await
    }

    async fn submit_json(&self, request: Value, cancel: CancellationToken) -> Response {
        self.execute_json(request, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::platform::fake::{FakePlatform, Fault};
    use crate::domain::{EntityId, Notifications, Status};
    use crate::shared::retry::RetryPolicy;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn idle_token() -> CancellationToken {
        CancellationToken::new()
    }

    fn settings(pool_size: usize) -> EngineSettings {
        EngineSettings {
            pool_size,
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4)),
            step_timeout: Duration::from_secs(1),
        }
    }

    async fn service(
        fake: &Arc<FakePlatform>,
        pool_size: usize,
        journal: Option<Arc<dyn ReviewJournalPort>>,
    ) -> AutomationService {
        let pool = SessionPool::connect(fake.as_ref(), &FakePlatform::credentials(), pool_size)
            .await
            .unwrap();
        AutomationService::new(fake.clone(), pool, &settings(pool_size), journal)
    }

    fn request(value: Value) -> RawRequest {
        serde_json::from_value(value).unwrap()
    }

    fn json_of(response: &Response) -> Value {
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn test_create_course_returns_identifier() {
        let fake = Arc::new(FakePlatform::new());
        let svc = service(&fake, 1, None).await;

        let response = svc
            .execute(
                request(json!({
                    "kind": "course",
                    "fields": {"name": "Excel Basics", "description": "Intro"}
                })),
                &idle_token(),
            )
            .await;
        let json = json_of(&response);
        assert_eq!(json["status"], "success");
        assert_eq!(json["id"], "C-100");
        assert_eq!(fake.live_count(EntityKind::Course, "Excel Basics"), 1);
    }

    #[tokio::test]
    async fn test_edition_for_missing_course_creates_nothing() {
        let fake = Arc::new(FakePlatform::new());
        let svc = service(&fake, 1, None).await;

        let response = svc
            .execute(
                request(json!({
                    "kind": "edition",
                    "fields": {
                        "courseRef": "Excel for Everyone",
                        "startDate": "2025-11-05",
                        "durationDays": 2
                    }
                })),
                &idle_token(),
            )
            .await;
        assert_eq!(response.status(), Status::Failure);
        assert_eq!(
            response.error_kind(),
            Some(ErrorKind::UnresolvedDependency)
        );
        assert!(json_of(&response)["message"]
            .as_str()
            .unwrap()
            .contains("Excel for Everyone"));
        assert_eq!(fake.total_create_attempts(), 0);
    }

    #[tokio::test]
    async fn test_activity_for_missing_edition_creates_nothing() {
        let fake = Arc::new(FakePlatform::new());
        let svc = service(&fake, 1, None).await;

        let response = svc
            .execute(
                request(json!({
                    "kind": "activity",
                    "fields": {
                        "editionRef": "Excel-05/11/2025",
                        "name": "Lab",
                        "schedule": {"date": "2025-11-05", "startTime": "09:00", "endTime": "13:00"}
                    }
                })),
                &idle_token(),
            )
            .await;
        assert_eq!(
            response.error_kind(),
            Some(ErrorKind::UnresolvedDependency)
        );
        assert!(json_of(&response)["message"]
            .as_str()
            .unwrap()
            .contains("Excel-05/11/2025"));
        assert_eq!(fake.total_create_attempts(), 0);
    }

    #[tokio::test]
    async fn test_enrollment_for_missing_activity_creates_nothing() {
        let fake = Arc::new(FakePlatform::new());
        let svc = service(&fake, 1, None).await;

        let response = svc
            .execute(
                request(json!({
                    "kind": "enrollment",
                    "fields": {"activityRef": "Lab 9", "students": ["Mario Rossi", "Anna Bianchi"]}
                })),
                &idle_token(),
            )
            .await;
        assert_eq!(response.status(), Status::Failure);
        assert_eq!(
            response.error_kind(),
            Some(ErrorKind::UnresolvedDependency)
        );
        assert_eq!(fake.total_create_attempts(), 0);
    }

    #[tokio::test]
    async fn test_envelope_without_kind_gets_validation_response() {
        let fake = Arc::new(FakePlatform::new());
        let svc = service(&fake, 1, None).await;

        let missing_kind = svc
            .execute_json(json!({"fields": {"name": "Excel"}}), &idle_token())
            .await;
        let json = json_of(&missing_kind);
        assert_eq!(json["errorKind"], "ValidationError");
        assert_eq!(json["issues"][0]["field"], "kind");
        assert_eq!(json["issues"][0]["problem"], "is required");

        let not_an_object = svc.execute_json(json!("course"), &idle_token()).await;
        assert_eq!(json_of(&not_an_object)["issues"][0]["field"], "request");

        let valid = svc
            .execute_json(
                json!({
                    "kind": "course",
                    "fields": {"name": "Excel Basics", "description": "Intro"}
                }),
                &idle_token(),
            )
            .await;
        assert_eq!(valid.status(), Status::Success);
        assert_eq!(fake.total_create_attempts(), 1);
    }

    #[tokio::test]
    async fn test_convocation_channels_reach_platform() {
        let fake = Arc::new(FakePlatform::new());
        fake.seed(EntityKind::Activity, "A-5", "Lab 1");
        let svc = service(&fake, 1, None).await;

        let response = svc
            .execute(
                request(json!({
                    "kind": "enrollment",
                    "fields": {
                        "activityRef": "A-5",
                        "students": ["Mario Rossi"],
                        "notifyOnline": false
                    }
                })),
                &idle_token(),
            )
            .await;
        let Response::Batch(batch) = response else {
            panic!("expected batch response");
        };
        assert_eq!(
            fake.notifications_of(&batch.succeeded[0].id),
            Some(Notifications {
                online: false,
                in_person: true
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_request_lists_every_field_and_skips_platform() {
        let fake = Arc::new(FakePlatform::new());
        let svc = service(&fake, 1, None).await;

        let response = svc
            .execute(request(json!({"kind": "course", "fields": {}})), &idle_token())
            .await;
        let json = json_of(&response);
        assert_eq!(json["errorKind"], "ValidationError");
        let fields: Vec<&str> = json["issues"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["field"].as_str().unwrap())
            .collect();
        assert_eq!(fields, vec!["name", "description"]);
        assert_eq!(fake.lookups(), 0);
        assert_eq!(fake.total_create_attempts(), 0);
    }

    #[tokio::test]
    async fn test_created_course_is_resolvable_without_lookup() {
        let fake = Arc::new(FakePlatform::new());
        let svc = service(&fake, 1, None).await;
        let cancel = CancellationToken::new();

        svc.execute(
            request(json!({
                "kind": "course",
                "fields": {"name": "Excel Basics", "description": "Intro"}
            })),
            &cancel,
        )
        .await;
        let response = svc
            .execute(
                request(json!({
                    "kind": "edition",
                    "fields": {
                        "courseRef": "excel basics",
                        "startDate": "2025-11-05",
                        "durationDays": 2,
                        "activities": [
                            {
                                "name": "Day 1",
                                "schedule": {
                                    "date": "2025-11-05",
                                    "startTime": "09:00",
                                    "endTime": "13:00"
                                }
                            }
                        ]
                    }
                })),
                &cancel,
            )
            .await;
        let json = json_of(&response);
        assert_eq!(json["status"], "success", "{}", json);
        assert_eq!(json["id"], "E-100");
        assert_eq!(json["created"].as_array().unwrap().len(), 2);
        assert_eq!(fake.lookups(), 0);
        assert_eq!(
            fake.parent_of(&EntityId::new("E-100")),
            Some(EntityId::new("C-100"))
        );
    }

    #[tokio::test]
    async fn test_batch_reports_each_student_separately() {
        let fake = Arc::new(FakePlatform::new());
        fake.seed(EntityKind::Activity, "A-5", "Lab 1");
        fake.inject("Anna Bianchi", Fault::Timeout, 3);
        let svc = service(&fake, 2, None).await;

        let response = svc
            .execute(
                request(json!({
                    "kind": "enrollment",
                    "fields": {
                        "activityRef": "A-5",
                        "students": ["Mario Rossi", "Anna Bianchi", "Luca Verdi"]
                    }
                })),
                &idle_token(),
            )
            .await;
        let Response::Batch(batch) = response else {
            panic!("expected batch response");
        };
        assert_eq!(batch.status, Status::Partial);
        let ok: Vec<&str> = batch.succeeded.iter().map(|s| s.item.as_str()).collect();
        assert_eq!(ok, vec!["Mario Rossi", "Luca Verdi"]);
        assert!(batch.failed.is_empty());
        assert_eq!(batch.needs_review.len(), 1);
        assert_eq!(batch.needs_review[0].item, "Anna Bianchi");
        assert_eq!(fake.create_attempts("Anna Bianchi"), 3);
    }

    #[tokio::test]
    async fn test_one_rejected_student_does_not_stop_the_rest() {
        let fake = Arc::new(FakePlatform::new());
        fake.seed(EntityKind::Activity, "A-5", "Lab 1");
        fake.inject("S3", Fault::Fatal, 1);
        let svc = service(&fake, 3, None).await;

        let students: Vec<String> = (1..=6).map(|i| format!("S{}", i)).collect();
        let response = svc
            .execute(
                request(json!({
                    "kind": "enrollment",
                    "fields": {"activityRef": "A-5", "students": students}
                })),
                &idle_token(),
            )
            .await;
        let Response::Batch(batch) = response else {
            panic!("expected batch response");
        };
        assert_eq!(batch.counts.succeeded, 5);
        assert_eq!(batch.counts.failed, 1);
        assert_eq!(batch.failed[0].item, "S3");
        assert_eq!(batch.failed[0].error_kind, ErrorKind::FatalTarget);
    }

    #[tokio::test]
    async fn test_batch_never_shares_a_session() {
        let fake = Arc::new(FakePlatform::new());
        fake.seed(EntityKind::Activity, "A-5", "Lab 1");
        let students: Vec<String> = (1..=8).map(|i| format!("S{}", i)).collect();
        for s in &students {
            fake.inject(s, Fault::Hang(Duration::from_millis(15)), 1);
        }
        let svc = service(&fake, 2, None).await;

        let response = svc
            .execute(
                request(json!({
                    "kind": "enrollment",
                    "fields": {"activityRef": "A-5", "students": students}
                })),
                &idle_token(),
            )
            .await;
        assert_eq!(response.status(), Status::Success);
        assert!(!fake.session_overlap_detected());
        assert!(fake.max_concurrency() <= 2);
    }

    #[tokio::test]
    async fn test_needs_review_is_journaled() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Arc::new(crate::adapters::persistence::JsonReviewJournal::new(
            dir.path().join("review.json"),
        ));
        journal.load().await.unwrap();

        let fake = Arc::new(FakePlatform::new());
        fake.seed(EntityKind::Activity, "A-5", "Lab 1");
        fake.inject("Anna Bianchi", Fault::TimeoutAfterApply, 3);
        let svc = service(&fake, 1, Some(journal.clone())).await;

        svc.execute(
            request(json!({
                "kind": "enrollment",
                "fields": {"activityRef": "A-5", "students": ["Anna Bianchi"]}
            })),
            &idle_token(),
        )
        .await;

        let entries = journal.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "enrollment");
        assert_eq!(entries[0].item.as_deref(), Some("Anna Bianchi"));
        assert_eq!(entries[0].failure.entity, EntityKind::Enrollment);
        assert_eq!(fake.live_count(EntityKind::Enrollment, "Anna Bianchi"), 1);
    }

    #[tokio::test]
    async fn test_cancelled_request_applies_nothing() {
        let fake = Arc::new(FakePlatform::new());
        let svc = service(&fake, 1, None).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let response = svc
            .submit(
                request(json!({
                    "kind": "course",
                    "fields": {"name": "Excel Basics", "description": "Intro"}
                })),
                cancel,
            )
            .await;
        assert_eq!(response.error_kind(), Some(ErrorKind::Cancelled));
        assert_eq!(fake.total_create_attempts(), 0);
    }
}
