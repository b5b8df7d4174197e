//! Request envelope and its validated / resolved forms.

use crate::domain::entities::{
    ActivityFields, CourseFields, EditionFields, EntityId, EntityKind, Notifications,
    StudentIdentity,
};
use crate::domain::errors::{FieldIssue, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope received from the presentation layer: `{ kind, fields, batch? }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRequest {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Vec<Value>>,
}

impl RawRequest {
    /// Lenient envelope parsing. Shape problems come back as field issues so a
    /// malformed request gets its own validation response.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut map) = value else {
            return Err(ValidationError {
                issues: vec![FieldIssue::new("request", "must be an object")],
            });
        };
        let mut issues = Vec::new();

        let kind = match map.remove("kind") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(kind)) => kind,
            Some(_) => {
                issues.push(FieldIssue::new("kind", "must be a string"));
                String::new()
            }
        };
        let fields = match map.remove("fields") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(fields)) => fields,
            Some(_) => {
                issues.push(FieldIssue::new("fields", "must be an object"));
                Map::new()
            }
        };
        let batch = match map.remove("batch") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(items),
            Some(_) => {
                issues.push(FieldIssue::new("batch", "must be an array"));
                None
            }
        };

        if issues.is_empty() {
            Ok(Self {
                kind,
                fields,
                batch,
            })
        } else {
            Err(ValidationError { issues })
        }
    }
}

/// Request whose shape and field constraints have been checked.
/// Parent references are still human-provided names.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedRequest {
    Course(CourseFields),
    Edition {
        course_ref: String,
        fields: EditionFields,
        activities: Vec<ActivityFields>,
    },
    Activity {
        edition_ref: String,
        fields: ActivityFields,
    },
    Enrollment {
        activity_ref: String,
        students: Vec<StudentIdentity>,
        notifications: Notifications,
    },
}

impl ValidatedRequest {
    pub fn kind(&self) -> EntityKind {
        match self {
            ValidatedRequest::Course(_) => EntityKind::Course,
            ValidatedRequest::Edition { .. } => EntityKind::Edition,
            ValidatedRequest::Activity { .. } => EntityKind::Activity,
            ValidatedRequest::Enrollment { .. } => EntityKind::Enrollment,
        }
    }
}

/// Request with every parent reference replaced by the platform identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedRequest {
    Course(CourseFields),
    Edition {
        course: EntityId,
        fields: EditionFields,
        activities: Vec<ActivityFields>,
    },
    Activity {
        edition: EntityId,
        fields: ActivityFields,
    },
    Enrollment {
        activity: EntityId,
        students: Vec<StudentIdentity>,
        notifications: Notifications,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_kind_still_parses() {
        let request: RawRequest =
            serde_json::from_value(json!({"fields": {"name": "Excel"}})).unwrap();
        assert_eq!(request.kind, "");
        assert_eq!(request.fields["name"], "Excel");
    }

    #[test]
    fn test_from_json_reports_envelope_shape() {
        let err = RawRequest::from_json(json!({"kind": 7, "fields": "Excel", "batch": {}}))
            .unwrap_err();
        let fields: Vec<&str> = err.issues.iter().map(|i| i.field.as_str()).collect();
        assert_eq!(fields, vec!["kind", "fields", "batch"]);

        let err = RawRequest::from_json(json!(["course"])).unwrap_err();
        assert_eq!(err.issues[0].field, "request");
    }

    #[test]
    fn test_from_json_keeps_enrollment_batch() {
        let request = RawRequest::from_json(json!({
            "kind": "enrollment",
            "fields": {"activityRef": "A-5"},
            "batch": ["Mario Rossi"]
        }))
        .unwrap();
        assert_eq!(request.batch.map(|b| b.len()), Some(1));
    }
}
