//! Operation plans: the ordered, typed steps that realize one resolved request.
//!
//! Every workflow is expressed as a list of `Step`s so the sequencer applies
//! the same retry and rollback rules to all four of them.

use crate::domain::{
    ActivityFields, CourseFields, EditionFields, EntityId, EntityKind, Notifications,
    RequestKey, ResolvedRequest, StudentIdentity,
};

/// Where a step finds its parent identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentSlot {
    /// Resolved before the plan started.
    Known(EntityId),
    /// Issued by an earlier step of the same plan (by index).
    Step(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    CreateCourse {
        key: RequestKey,
        fields: CourseFields,
    },
    CreateEdition {
        key: RequestKey,
        course: EntityId,
        fields: EditionFields,
    },
    CreateActivity {
        key: RequestKey,
        edition: ParentSlot,
        fields: ActivityFields,
    },
    EnrollStudent {
        key: RequestKey,
        activity: EntityId,
        student: StudentIdentity,
        notifications: Notifications,
    },
}

impl Step {
    pub fn kind(&self) -> EntityKind {
        match self {
            Step::CreateCourse { .. } => EntityKind::Course,
            Step::CreateEdition { .. } => EntityKind::Edition,
            Step::CreateActivity { .. } => EntityKind::Activity,
            Step::EnrollStudent { .. } => EntityKind::Enrollment,
        }
    }

    pub fn key(&self) -> &RequestKey {
        match self {
            Step::CreateCourse { key, .. }
            | Step::CreateEdition { key, .. }
            | Step::CreateActivity { key, .. }
            | Step::EnrollStudent { key, .. } => key,
        }
    }

    /// Business name of the entity this step creates; used for later lookups.
    pub fn name(&self) -> &str {
        match self {
            Step::CreateCourse { fields, .. } => &fields.name,
            Step::CreateEdition { fields, .. } => &fields.title,
            Step::CreateActivity { fields, .. } => &fields.name,
            Step::EnrollStudent { student, .. } => student.as_str(),
        }
    }

    /// Human-readable step description for logs and failure reports.
    pub fn label(&self) -> String {
        match self {
            Step::EnrollStudent {
                student, activity, ..
            } => format!("enroll '{}' in activity {}", student, activity),
            other => format!("create {} '{}'", other.kind(), other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// One independently executed item of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub item: String,
    pub plan: Plan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Work {
    Single(Plan),
    Batch(Vec<BatchItem>),
}

/// Build the work for a resolved request.
pub fn plan(request: &ResolvedRequest) -> Work {
    match request {
        ResolvedRequest::Course(fields) => Work::Single(Plan::new(vec![Step::CreateCourse {
            key: RequestKey::derive(EntityKind::Course, &[&fields.name]),
            fields: fields.clone(),
        }])),
        ResolvedRequest::Edition {
            course,
            fields,
            activities,
        } => {
            let edition_key = RequestKey::derive(
                EntityKind::Edition,
                &[
                    course.as_str(),
                    &fields.start_date.to_string(),
                    &fields.duration_days.to_string(),
                    &fields.title,
                ],
            );
            let mut steps = vec![Step::CreateEdition {
                key: edition_key.clone(),
                course: course.clone(),
                fields: fields.clone(),
            }];
            steps.extend(activities.iter().map(|a| Step::CreateActivity {
                key: activity_key(edition_key.as_str(), a),
                edition: ParentSlot::Step(0),
                fields: a.clone(),
            }));
            Work::Single(Plan::new(steps))
        }
        ResolvedRequest::Activity { edition, fields } => {
            Work::Single(Plan::new(vec![Step::CreateActivity {
                key: activity_key(edition.as_str(), fields),
                edition: ParentSlot::Known(edition.clone()),
                fields: fields.clone(),
            }]))
        }
        ResolvedRequest::Enrollment {
            activity,
            students,
            notifications,
        } => Work::Batch(
            students
                .iter()
                .map(|student| BatchItem {
                    item: student.to_string(),
                    plan: Plan::new(vec![Step::EnrollStudent {
                        key: RequestKey::derive(
                            EntityKind::Enrollment,
                            &[activity.as_str(), student.as_str()],
                        ),
                        activity: activity.clone(),
                        student: student.clone(),
                        notifications: *notifications,
                    }]),
                })
                .collect(),
        ),
    }
}

fn activity_key(parent: &str, fields: &ActivityFields) -> RequestKey {
    RequestKey::derive(
        EntityKind::Activity,
        &[
            parent,
            &fields.name,
            &fields.schedule.date.to_string(),
            &fields.schedule.start_time.format("%H:%M").to_string(),
        ],
    )
}
