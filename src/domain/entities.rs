//! Domain entities. Pure data structures for the core business.
//!
//! No HTTP/platform types here; adapters map their payloads to these.

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The four levels of the course-offering hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Course,
    Edition,
    Activity,
    Enrollment,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Course => "course",
            EntityKind::Edition => "edition",
            EntityKind::Activity => "activity",
            EntityKind::Enrollment => "enrollment",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier issued by the target system. Never generated client-side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deterministic key for one logical creation. Replaying the same request
/// yields the same key, which adapters use to avoid duplicate entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    /// Build a key from the entity kind and its identifying parts.
    /// Parts are canonicalized, so case and spacing do not change the key.
    pub fn derive(kind: EntityKind, parts: &[&str]) -> Self {
        let mut key = kind.as_str().to_string();
        for part in parts {
            key.push('|');
            key.push_str(&canonical_name(part));
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical form used for name lookups: trimmed, single-spaced, lowercase.
pub fn canonical_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Course template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseFields {
    pub name: String,
    pub description: String,
    pub programme: Option<String>,
    pub publication_date: Option<NaiveDate>,
}

/// Scheduled instance of a course. Dates past `start_date` are derived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditionFields {
    pub title: String,
    pub start_date: NaiveDate,
    pub duration_days: u32,
    pub end_date: NaiveDate,
    pub publication_start: NaiveDate,
    pub publication_end: NaiveDate,
    pub description: Option<String>,
    pub location: Option<String>,
    pub supplier: Option<String>,
    pub price: Option<String>,
    pub language: Option<String>,
}

/// Date and time slot of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// Scheduled session within an edition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityFields {
    pub name: String,
    pub schedule: Schedule,
    pub description: Option<String>,
    pub expected_hours: Option<u32>,
}

/// Student as identified by the operator (name, badge or email).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentIdentity(String);

impl StudentIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Convocation channels for an enrollment. At least one is set once validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notifications {
    pub online: bool,
    pub in_person: bool,
}

impl Default for Notifications {
    fn default() -> Self {
        Self {
            online: true,
            in_person: true,
        }
    }
}

/// An entity this engine created, as reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEntity {
    pub kind: EntityKind,
    pub id: EntityId,
    pub name: String,
}

/// Handle to one authenticated session on the target platform.
///
/// Intermediate record state lives in the session, so a session is only ever
/// used by one operation sequence at a time (see `SessionPool`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformSession {
    pub id: u32,
    pub token: String,
}

/// Login material supplied by the configuration layer.
#[derive(Clone)]
pub struct Credentials {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_name_collapses_case_and_spacing() {
        assert_eq!(canonical_name("  Excel   for Everyone "), "excel for everyone");
    }

    #[test]
    fn test_request_key_ignores_case_and_spacing() {
        let a = RequestKey::derive(EntityKind::Course, &["Excel  Basics"]);
        let b = RequestKey::derive(EntityKind::Course, &["excel basics "]);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "course|excel basics");
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            url: "https://lms.example".into(),
            username: "ops".into(),
            password: "hunter2".into(),
        };
        let out = format!("{:?}", creds);
        assert!(!out.contains("hunter2"));
        assert!(out.contains("<redacted>"));
    }
}
