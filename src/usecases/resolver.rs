//! Dependency resolver: turns human-provided parent references into platform ids.
//!
//! Looks in the session-scoped cache first, then asks the platform. A missing
//! parent is reported as `UnresolvedDependency`; it is never created here.

use crate::domain::{
    DomainError, EntityId, EntityKind, PlatformSession, ResolvedRequest, TargetError,
    ValidatedRequest, canonical_name,
};
use crate::ports::TargetSystem;
use crate::shared::retry::{RetryPolicy, within};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct Resolver {
    target: Arc<dyn TargetSystem>,
    /// (kind, canonical name or id) -> id
    cache: RwLock<HashMap<(EntityKind, String), EntityId>>,
    policy: RetryPolicy,
    lookup_timeout: Duration,
}

impl Resolver {
    pub fn new(
        target: Arc<dyn TargetSystem>,
        policy: RetryPolicy,
        lookup_timeout: Duration,
    ) -> Self {
        Self {
            target,
            cache: RwLock::new(HashMap::new()),
            policy,
            lookup_timeout,
        }
    }

    /// Record an entity this process created or found, under its name and its id.
    pub async fn remember(&self, kind: EntityKind, name: &str, id: &EntityId) {
        let mut cache = self.cache.write().await;
        cache.insert((kind, canonical_name(name)), id.clone());
        cache.insert((kind, canonical_name(id.as_str())), id.clone());
    }

    /// Forget an entity, e.g. after it was rolled back.
    pub async fn forget(&self, kind: EntityKind, id: &EntityId) {
        self.cache
            .write()
            .await
            .retain(|(k, _), cached| !(*k == kind && cached == id));
    }

    pub async fn resolve(
        &self,
        session: &mut PlatformSession,
        kind: EntityKind,
        reference: &str,
    ) -> Result<EntityId, DomainError> {
        let cache_key = (kind, canonical_name(reference));
        if let Some(id) = self.cache.read().await.get(&cache_key) {
            debug!(kind = %kind, reference, id = %id, "resolved from cache");
            return Ok(id.clone());
        }

        match self.lookup(session, kind, reference).await? {
            Some(id) => {
                info!(kind = %kind, reference, id = %id, "resolved on platform");
                self.remember(kind, reference, &id).await;
                Ok(id)
            }
            None => Err(DomainError::UnresolvedDependency {
                kind,
                reference: reference.trim().to_string(),
            }),
        }
    }

    async fn lookup(
        &self,
        session: &mut PlatformSession,
        kind: EntityKind,
        reference: &str,
    ) -> Result<Option<EntityId>, TargetError> {
        let what = format!("lookup {} '{}'", kind, reference);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let call = self.target.find(session, kind, reference);
            match within(self.lookup_timeout, &what, call).await {
                Ok(found) => return Ok(found),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    warn!(kind = %kind, reference, attempt, error = %e, "lookup failed, retrying");
                    tokio::time::sleep(self.policy.backoff(attempt)).await;
                }
                // A read never changes platform state.
                Err(e) if e.is_transient() => return Err(e.escalate(attempt)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve every parent reference of a validated request.
    pub async fn resolve_request(
        &self,
        session: &mut PlatformSession,
        request: ValidatedRequest,
    ) -> Result<ResolvedRequest, DomainError> {
        Ok(match request {
            ValidatedRequest::Course(fields) => ResolvedRequest::Course(fields),
            ValidatedRequest::Edition {
                course_ref,
                fields,
                activities,
            } => ResolvedRequest::Edition {
                course: self.resolve(session, EntityKind::Course, &course_ref).await?,
                fields,
                activities,
            },
            ValidatedRequest::Activity { edition_ref, fields } => ResolvedRequest::Activity {
                edition: self.resolve(session, EntityKind::Edition, &edition_ref).await?,
                fields,
            },
            ValidatedRequest::Enrollment {
                activity_ref,
                students,
                notifications,
            } => ResolvedRequest::Enrollment {
                activity: self
                    .resolve(session, EntityKind::Activity, &activity_ref)
                    .await?,
                students,
                notifications,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::platform::fake::FakePlatform;

    fn resolver(fake: &Arc<FakePlatform>) -> Resolver {
        Resolver::new(
            fake.clone(),
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4)),
            Duration::from_secs(1),
        )
    }

    async fn session(fake: &FakePlatform) -> PlatformSession {
        fake.open_session(&FakePlatform::credentials()).await.unwrap()
    }

    #[tokio::test]
    async fn test_missing_parent_is_unresolved_and_nothing_created() {
        let fake = Arc::new(FakePlatform::new());
        let resolver = resolver(&fake);
        let mut s = session(&fake).await;

        let err = resolver
            .resolve(&mut s, EntityKind::Course, "Excel for Everyone")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::UnresolvedDependency { kind: EntityKind::Course, ref reference }
                if reference == "Excel for Everyone"
        ));
        assert_eq!(fake.total_create_attempts(), 0);
    }

    #[tokio::test]
    async fn test_cache_is_consulted_before_platform() {
        let fake = Arc::new(FakePlatform::new());
        fake.seed(EntityKind::Activity, "A-5", "Lab 1");
        let resolver = resolver(&fake);
        let mut s = session(&fake).await;

        let first = resolver.resolve(&mut s, EntityKind::Activity, "lab 1").await.unwrap();
        let again = resolver.resolve(&mut s, EntityKind::Activity, "Lab  1").await.unwrap();
        assert_eq!(first, EntityId::new("A-5"));
        assert_eq!(again, first);
        assert_eq!(fake.lookups(), 1);

        // The id itself is a valid reference once known.
        let by_id = resolver.resolve(&mut s, EntityKind::Activity, "A-5").await.unwrap();
        assert_eq!(by_id, first);
        assert_eq!(fake.lookups(), 1);
    }

    #[tokio::test]
    async fn test_remembered_entities_skip_lookup() {
        let fake = Arc::new(FakePlatform::new());
        let resolver = resolver(&fake);
        let mut s = session(&fake).await;

        resolver
            .remember(EntityKind::Course, "Excel Basics", &EntityId::new("C-100"))
            .await;
        let id = resolver.resolve(&mut s, EntityKind::Course, "excel basics").await.unwrap();
        assert_eq!(id, EntityId::new("C-100"));
        assert_eq!(fake.lookups(), 0);

        resolver.forget(EntityKind::Course, &id).await;
        assert!(resolver.resolve(&mut s, EntityKind::Course, "Excel Basics").await.is_err());
    }

    #[tokio::test]
    async fn test_kinds_do_not_share_cache_entries() {
        let fake = Arc::new(FakePlatform::new());
        let resolver = resolver(&fake);
        let mut s = session(&fake).await;
        resolver
            .remember(EntityKind::Course, "Excel", &EntityId::new("C-1"))
            .await;
        assert!(resolver.resolve(&mut s, EntityKind::Edition, "Excel").await.is_err());
    }
}
