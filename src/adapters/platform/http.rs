//! REST adapter. Implements TargetSystem against the platform's HTTP API.
//!
//! Every create is sent with an `Idempotency-Key` header carrying the
//! `RequestKey`; the platform answers a replayed key with the existing entity.

use crate::domain::{
    ActivityFields, CourseFields, Credentials, EditionFields, EntityId, EntityKind,
    Notifications, PlatformSession, RequestKey, StudentIdentity, TargetError, canonical_name,
};
use crate::ports::TargetSystem;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Debug, Deserialize)]
struct SessionBody {
    token: String,
}

#[derive(Debug, Deserialize)]
struct IdBody {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    name: String,
}

/// Platform REST adapter.
pub struct HttpPlatform {
    client: Client,
    base_url: String,
    next_session: AtomicU32,
}

impl HttpPlatform {
    /// Create a new adapter.
    ///
    /// # Arguments
    /// * `base_url` - API root, e.g. `https://lms.example.com/api`
    /// * `request_timeout` - client-side timeout per HTTP call
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, TargetError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TargetError::fatal(format!("HTTP client setup failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            next_session: AtomicU32::new(1),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authed(&self, builder: RequestBuilder, session: &PlatformSession) -> RequestBuilder {
        builder.bearer_auth(&session.token)
    }

    async fn post_create(
        &self,
        session: &PlatformSession,
        path: &str,
        key: &RequestKey,
        body: serde_json::Value,
    ) -> Result<EntityId, TargetError> {
        let url = self.url(path);
        debug!(url = %url, key = %key, "POST create");
        let res = self
            .authed(self.client.post(&url), session)
            .header(IDEMPOTENCY_HEADER, key.as_str())
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_send(e, true))?;

        // 409: the key was already used; the body names the existing entity.
        if res.status().is_success() || res.status() == StatusCode::CONFLICT {
            let status = res.status();
            return match res.json::<IdBody>().await {
                Ok(b) => Ok(EntityId::new(b.id)),
                Err(e) if status == StatusCode::CONFLICT => Err(TargetError::fatal(format!(
                    "platform reported a conflict without an identifier: {}",
                    e
                ))),
                Err(e) => Err(TargetError::fatal(format!(
                    "unreadable create response: {}",
                    e
                ))
                .applied()),
            };
        }
        Err(classify_status(res).await)
    }

    async fn remove(
        &self,
        session: &PlatformSession,
        path: &str,
        key: &RequestKey,
    ) -> Result<(), TargetError> {
        let res = self
            .authed(self.client.delete(self.url(path)), session)
            .query(&[("idempotencyKey", key.as_str())])
            .send()
            .await
            .map_err(|e| classify_send(e, false))?;
        if res.status().is_success() || res.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(classify_status(res).await)
    }
}

fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Course => "courses",
        EntityKind::Edition => "editions",
        EntityKind::Activity => "activities",
        EntityKind::Enrollment => "enrollments",
    }
}

fn enrollment_body(student: &StudentIdentity, notifications: Notifications) -> serde_json::Value {
    json!({
        "student": student,
        "notifyOnline": notifications.online,
        "notifyInPerson": notifications.in_person,
    })
}

/// How a call failed before any status came back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendFailure {
    /// No connection was made; nothing reached the platform.
    Unreachable,
    /// Timed out or broke after the request left.
    Interrupted,
    Other,
}

impl SendFailure {
    fn of(e: &reqwest::Error) -> Self {
        // Connect errors are also request errors; check them first.
        if e.is_connect() {
            SendFailure::Unreachable
        } else if e.is_timeout() || e.is_request() {
            SendFailure::Interrupted
        } else {
            SendFailure::Other
        }
    }
}

/// Transport errors. An interrupted write may still have been applied.
fn classify_send(e: reqwest::Error, is_write: bool) -> TargetError {
    transport_error(SendFailure::of(&e), is_write, &e.to_string())
}

fn transport_error(failure: SendFailure, is_write: bool, detail: &str) -> TargetError {
    match failure {
        SendFailure::Unreachable => {
            TargetError::transient(format!("platform unreachable: {}", detail))
        }
        SendFailure::Interrupted => {
            let err = TargetError::transient(format!("request interrupted: {}", detail));
            if is_write { err.applied() } else { err }
        }
        SendFailure::Other => TargetError::fatal(format!("request failed: {}", detail)),
    }
}

/// 408/425/429/5xx are transient; everything else is fatal.
async fn classify_status(res: Response) -> TargetError {
    let status = res.status();
    let text = res.text().await.unwrap_or_else(|_| "unknown".to_string());
    let message = format!("platform API error {}: {}", status, text);
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_EARLY | StatusCode::TOO_MANY_REQUESTS => {
            TargetError::transient(message)
        }
        s if s.is_server_error() => TargetError::transient(message),
        _ => TargetError::fatal(message),
    }
}

#[async_trait::async_trait]
impl TargetSystem for HttpPlatform {
    async fn open_session(
        &self,
        credentials: &Credentials,
    ) -> Result<PlatformSession, TargetError> {
        let res = self
            .client
            .post(self.url("sessions"))
            .json(&json!({
                "username": credentials.username,
                "password": credentials.password,
            }))
            .send()
            .await
            .map_err(|e| classify_send(e, false))?;
        if !res.status().is_success() {
            return Err(classify_status(res).await);
        }
        let body: SessionBody = res
            .json()
            .await
            .map_err(|e| TargetError::fatal(format!("unreadable login response: {}", e)))?;
        Ok(PlatformSession {
            id: self.next_session.fetch_add(1, Ordering::Relaxed),
            token: body.token,
        })
    }

    async fn find(
        &self,
        session: &mut PlatformSession,
        kind: EntityKind,
        reference: &str,
    ) -> Result<Option<EntityId>, TargetError> {
        let res = self
            .authed(self.client.get(self.url(collection(kind))), session)
            .query(&[("q", reference.trim())])
            .send()
            .await
            .map_err(|e| classify_send(e, false))?;
        if !res.status().is_success() {
            return Err(classify_status(res).await);
        }
        let hits: Vec<SearchHit> = res
            .json()
            .await
            .map_err(|e| TargetError::fatal(format!("unreadable search response: {}", e)))?;
        // The search is fuzzy; only an exact (case-insensitive) name or id match counts.
        let wanted = canonical_name(reference);
        Ok(hits
            .into_iter()
            .find(|h| canonical_name(&h.name) == wanted || canonical_name(&h.id) == wanted)
            .map(|h| EntityId::new(h.id)))
    }

    async fn create_course(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        fields: &CourseFields,
    ) -> Result<EntityId, TargetError> {
        let body = serde_json::to_value(fields)
            .map_err(|e| TargetError::fatal(format!("encode course: {}", e)))?;
        self.post_create(session, "courses", key, body).await
    }

    async fn create_edition(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        course: &EntityId,
        fields: &EditionFields,
    ) -> Result<EntityId, TargetError> {
        let body = serde_json::to_value(fields)
            .map_err(|e| TargetError::fatal(format!("encode edition: {}", e)))?;
        self.post_create(session, &format!("courses/{}/editions", course), key, body)
            .await
    }

    async fn create_activity(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        edition: &EntityId,
        fields: &ActivityFields,
    ) -> Result<EntityId, TargetError> {
        let body = serde_json::to_value(fields)
            .map_err(|e| TargetError::fatal(format!("encode activity: {}", e)))?;
        self.post_create(session, &format!("editions/{}/activities", edition), key, body)
            .await
    }

    async fn enroll_student(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        activity: &EntityId,
        student: &StudentIdentity,
        notifications: Notifications,
    ) -> Result<EntityId, TargetError> {
        let body = enrollment_body(student, notifications);
        self.post_create(session, &format!("activities/{}/enrollments", activity), key, body)
            .await
    }

    /// The platform has no unenroll endpoint.
    fn supports_rollback(&self, kind: EntityKind) -> bool {
        kind != EntityKind::Enrollment
    }

    async fn rollback(
        &self,
        session: &mut PlatformSession,
        kind: EntityKind,
        key: &RequestKey,
        id: Option<&EntityId>,
    ) -> Result<(), TargetError> {
        if !self.supports_rollback(kind) {
            return Err(TargetError::fatal(format!("{} cannot be removed", kind)));
        }
        let path = match id {
            Some(id) => format!("{}/{}", collection(kind), id),
            None => collection(kind).to_string(),
        };
        self.remove(session, &path, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let platform =
            HttpPlatform::new("https://lms.example/api/", Duration::from_secs(5)).unwrap();
        assert_eq!(platform.url("/courses"), "https://lms.example/api/courses");
        assert_eq!(
            platform.url("courses/C-1/editions"),
            "https://lms.example/api/courses/C-1/editions"
        );
    }

    #[test]
    fn test_enrollments_cannot_be_rolled_back() {
        let platform = HttpPlatform::new("https://lms.example", Duration::from_secs(5)).unwrap();
        assert!(platform.supports_rollback(EntityKind::Edition));
        assert!(!platform.supports_rollback(EntityKind::Enrollment));
    }

    #[test]
    fn test_interrupted_write_may_be_applied() {
        let write = transport_error(SendFailure::Interrupted, true, "connection reset");
        assert!(write.is_transient());
        assert!(write.partially_applied);

        let read = transport_error(SendFailure::Interrupted, false, "connection reset");
        assert!(!read.partially_applied);

        let refused = transport_error(SendFailure::Unreachable, true, "connection refused");
        assert!(refused.is_transient());
        assert!(!refused.partially_applied);
    }

    #[test]
    fn test_enrollment_body_carries_both_channels() {
        let body = enrollment_body(
            &StudentIdentity::new("Mario Rossi"),
            Notifications {
                online: false,
                in_person: true,
            },
        );
        assert_eq!(body["student"], "Mario Rossi");
        assert_eq!(body["notifyOnline"], false);
        assert_eq!(body["notifyInPerson"], true);
    }

    #[tokio::test]
    async fn test_unreachable_platform_is_transient() {
        // Port 9 (discard) on localhost is closed in test environments.
        let platform = HttpPlatform::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let creds = Credentials {
            url: "http://127.0.0.1:9".into(),
            username: "ops".into(),
            password: "secret".into(),
        };
        let err = platform.open_session(&creds).await.unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }
}
