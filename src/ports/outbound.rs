//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{
    ActivityFields, CourseFields, Credentials, DomainError, EditionFields, EntityId, EntityKind,
    Notifications, PlatformSession, RequestKey, ReviewEntry, StudentIdentity, TargetError,
};

/// The external course-management platform. The only component allowed to
/// perform externally visible actions.
///
/// Every creation carries a `RequestKey`; a create with a key whose entity is
/// still live must return the existing identifier instead of a new one.
#[async_trait::async_trait]
pub trait TargetSystem: Send + Sync {
    /// Log in and return a fresh session handle.
    async fn open_session(&self, credentials: &Credentials)
    -> Result<PlatformSession, TargetError>;

    /// Look up an existing entity by name (or identifier). `Ok(None)` when absent.
    async fn find(
        &self,
        session: &mut PlatformSession,
        kind: EntityKind,
        reference: &str,
    ) -> Result<Option<EntityId>, TargetError>;

    async fn create_course(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        fields: &CourseFields,
    ) -> Result<EntityId, TargetError>;

    async fn create_edition(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        course: &EntityId,
        fields: &EditionFields,
    ) -> Result<EntityId, TargetError>;

    async fn create_activity(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        edition: &EntityId,
        fields: &ActivityFields,
    ) -> Result<EntityId, TargetError>;

    async fn enroll_student(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        activity: &EntityId,
        student: &StudentIdentity,
        notifications: Notifications,
    ) -> Result<EntityId, TargetError>;

    /// Whether a created entity of this kind can be removed again.
    fn supports_rollback(&self, kind: EntityKind) -> bool;

    /// Compensate a creation. `id` is `None` when the create never answered
    /// and only the key is known. Removing something already absent is `Ok`.
    async fn rollback(
        &self,
        session: &mut PlatformSession,
        kind: EntityKind,
        key: &RequestKey,
        id: Option<&EntityId>,
    ) -> Result<(), TargetError>;
}

/// Review journal port. Keeps operations that need manual follow-up.
#[async_trait::async_trait]
pub trait ReviewJournalPort: Send + Sync {
    async fn record(&self, entry: &ReviewEntry) -> Result<(), DomainError>;

    async fn entries(&self) -> Result<Vec<ReviewEntry>, DomainError>;
}
