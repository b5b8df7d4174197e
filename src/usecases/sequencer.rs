//! Action sequencer: applies a plan step by step against the target system.
//!
//! - Transient errors are retried with exponential backoff up to the policy limit,
//!   then escalated once to a fatal error
//! - A fatal error (or cancellation) after something was applied triggers
//!   rollback in reverse order when the target supports it; otherwise the
//!   outcome is needs-review
//! - Cancellation is checked between steps and during backoff only

use crate::domain::{
    CreatedEntity, EntityId, EntityKind, ErrorKind, Failure, Outcome, PlatformSession,
    RequestKey, TargetError,
};
use crate::ports::TargetSystem;
use crate::shared::cancel::{CancellationToken, cancellable_sleep};
use crate::shared::retry::{RetryPolicy, within};
use crate::usecases::plan::{ParentSlot, Plan, Step};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A step that took effect on the platform.
#[derive(Debug, Clone)]
struct Applied {
    kind: EntityKind,
    key: RequestKey,
    id: EntityId,
    name: String,
}

impl Applied {
    fn entity(&self) -> CreatedEntity {
        CreatedEntity {
            kind: self.kind,
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// Something to compensate. `id` is `None` for a step whose result is unknown.
#[derive(Debug, Clone)]
struct Undo {
    kind: EntityKind,
    key: RequestKey,
    id: Option<EntityId>,
    name: String,
}

enum StepError {
    Target(TargetError),
    /// Cancelled before the step could finish. `in_doubt` when an earlier
    /// attempt timed out and may have been applied.
    Cancelled { in_doubt: bool },
}

/// Sequencer. Cheap to clone; batch workers each hold a copy.
#[derive(Clone)]
pub struct Sequencer {
    target: Arc<dyn TargetSystem>,
    policy: RetryPolicy,
    step_timeout: Duration,
}

impl Sequencer {
    pub fn new(target: Arc<dyn TargetSystem>, policy: RetryPolicy, step_timeout: Duration) -> Self {
        Self {
            target,
            policy,
            step_timeout,
        }
    }

    /// Run every step of `plan` on `session`. The session is held exclusively
    /// for the whole sequence.
    pub async fn run(
        &self,
        session: &mut PlatformSession,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Outcome {
        let mut applied: Vec<Applied> = Vec::with_capacity(plan.len());

        for step in plan.steps() {
            match self.run_step(session, step, &applied, cancel).await {
                Ok(id) => {
                    debug!(session = session.id, step = %step.label(), id = %id, "step applied");
                    applied.push(Applied {
                        kind: step.kind(),
                        key: step.key().clone(),
                        id,
                        name: step.name().to_string(),
                    });
                }
                Err(err) => return self.compensate(session, step, applied, err).await,
            }
        }

        match applied.first() {
            Some(root) => {
                info!(
                    session = session.id,
                    kind = %root.kind,
                    id = %root.id,
                    steps = applied.len(),
                    "operation applied"
                );
                Outcome::Created {
                    id: root.id.clone(),
                    created: applied.iter().map(Applied::entity).collect(),
                }
            }
            None => Outcome::Failed {
                failure: Failure {
                    kind: ErrorKind::FatalTarget,
                    entity: EntityKind::Course,
                    step: "plan".to_string(),
                    message: "operation plan has no steps".to_string(),
                },
                rolled_back: Vec::new(),
            },
        }
    }

    /// One step with bounded retry. Returns the escalated error once the
    /// attempts are exhausted.
    async fn run_step(
        &self,
        session: &mut PlatformSession,
        step: &Step,
        applied: &[Applied],
        cancel: &CancellationToken,
    ) -> Result<EntityId, StepError> {
        let mut in_doubt = false;
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(StepError::Cancelled { in_doubt });
            }
            attempt += 1;
            let label = step.label();
            let result =
                within(self.step_timeout, &label, self.dispatch(session, step, applied)).await;
            match result {
                Ok(id) => return Ok(id),
                Err(mut e) if e.is_transient() => {
                    in_doubt |= e.partially_applied;
                    if attempt >= self.policy.max_attempts {
                        e.partially_applied = in_doubt;
                        let escalated = e.escalate(attempt);
                        error!(
                            session = session.id,
                            step = %label,
                            attempt,
                            error = %escalated,
                            "retry limit reached"
                        );
                        return Err(StepError::Target(escalated));
                    }
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        session = session.id,
                        step = %label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    if cancellable_sleep(cancel, delay).await {
                        return Err(StepError::Cancelled { in_doubt });
                    }
                }
                Err(mut e) => {
                    e.partially_applied |= in_doubt;
                    error!(
                        session = session.id,
                        step = %label,
                        attempt,
                        error = %e,
                        "fatal failure"
                    );
                    return Err(StepError::Target(e));
                }
            }
        }
    }

    async fn dispatch(
        &self,
        session: &mut PlatformSession,
        step: &Step,
        applied: &[Applied],
    ) -> Result<EntityId, TargetError> {
        match step {
            Step::CreateCourse { key, fields } => {
                self.target.create_course(session, key, fields).await
            }
            Step::CreateEdition {
                key,
                course,
                fields,
            } => self.target.create_edition(session, key, course, fields).await,
            Step::CreateActivity {
                key,
                edition,
                fields,
            } => {
                let edition = match edition {
                    ParentSlot::Known(id) => id.clone(),
                    ParentSlot::Step(index) => applied
                        .get(*index)
                        .map(|a| a.id.clone())
                        .ok_or_else(|| {
                            TargetError::fatal(format!(
                                "parent step {} has not been applied",
                                index
                            ))
                        })?,
                };
                self.target.create_activity(session, key, &edition, fields).await
            }
            Step::EnrollStudent {
                key,
                activity,
                student,
                notifications,
            } => {
                self.target
                    .enroll_student(session, key, activity, student, *notifications)
                    .await
            }
        }
    }

    /// Fatal error or cancellation at `failed`: undo what was applied, or hand
    /// the operation over for manual review.
    async fn compensate(
        &self,
        session: &mut PlatformSession,
        failed: &Step,
        applied: Vec<Applied>,
        err: StepError,
    ) -> Outcome {
        let (kind, message, in_doubt) = match err {
            StepError::Target(e) => (ErrorKind::FatalTarget, e.message, e.partially_applied),
            StepError::Cancelled { in_doubt } => (
                ErrorKind::Cancelled,
                format!("cancelled before '{}' completed", failed.label()),
                in_doubt,
            ),
        };
        let failure = Failure {
            kind,
            entity: failed.kind(),
            step: failed.label(),
            message,
        };

        let mut undo: Vec<Undo> = applied
            .iter()
            .map(|a| Undo {
                kind: a.kind,
                key: a.key.clone(),
                id: Some(a.id.clone()),
                name: a.name.clone(),
            })
            .collect();
        if in_doubt {
            undo.push(Undo {
                kind: failed.kind(),
                key: failed.key().clone(),
                id: None,
                name: failed.name().to_string(),
            });
        }

        if undo.is_empty() {
            return Outcome::Failed {
                failure,
                rolled_back: Vec::new(),
            };
        }

        if let Some(blocked) = undo.iter().find(|u| !self.target.supports_rollback(u.kind)) {
            let note = if blocked.id.is_none() {
                format!(
                    "{} '{}' may have been applied; rollback is not supported for {}",
                    blocked.kind, blocked.name, blocked.kind
                )
            } else {
                format!("rollback is not supported for {}", blocked.kind)
            };
            warn!(
                session = session.id,
                step = %failure.step,
                note = %note,
                "operation needs review"
            );
            return Outcome::NeedsReview {
                failure,
                note,
                left_applied: applied.iter().map(Applied::entity).collect(),
            };
        }

        let mut rolled_back: Vec<Undo> = Vec::new();
        while let Some(next) = undo.pop() {
            if let Err(e) = self.rollback_one(session, &next).await {
                error!(
                    session = session.id,
                    kind = %next.kind,
                    key = %next.key,
                    error = %e,
                    "rollback failed"
                );
                let rolled: Vec<&RequestKey> = rolled_back.iter().map(|u| &u.key).collect();
                let left_applied = applied
                    .iter()
                    .filter(|a| !rolled.contains(&&a.key))
                    .map(Applied::entity)
                    .collect();
                return Outcome::NeedsReview {
                    failure,
                    note: format!("rollback of {} '{}' failed: {}", next.kind, next.name, e),
                    left_applied,
                };
            }
            info!(session = session.id, kind = %next.kind, key = %next.key, "rolled back");
            rolled_back.push(next);
        }

        Outcome::Failed {
            failure,
            rolled_back: rolled_back
                .into_iter()
                .filter_map(|u| {
                    u.id.map(|id| CreatedEntity {
                        kind: u.kind,
                        id,
                        name: u.name,
                    })
                })
                .collect(),
        }
    }

    /// Rollback runs to completion even when cancelled; transient errors are retried.
    async fn rollback_one(
        &self,
        session: &mut PlatformSession,
        undo: &Undo,
    ) -> Result<(), TargetError> {
        let what = format!("rollback {} '{}'", undo.kind, undo.name);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let call = self
                .target
                .rollback(session, undo.kind, &undo.key, undo.id.as_ref());
            match within(self.step_timeout, &what, call).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    warn!(
                        session = session.id,
                        attempt,
                        error = %e,
                        "transient rollback failure, retrying"
                    );
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                }
                Err(e) if e.is_transient() => return Err(e.escalate(attempt)),
                Err(e) => return Err(e),
            }
        }
    }
}
