//! In-memory fake platform for tests and sandbox runs.
//!
//! Deterministic: identifiers come from per-kind counters (`C-100`, `E-100`,
//! `A-100`, `R-100`), faults are scripted per entity name, and every call is
//! counted so tests can assert on what reached the "platform".

use crate::domain::{
    ActivityFields, CourseFields, Credentials, EditionFields, EntityId, EntityKind,
    Notifications, PlatformSession, RequestKey, StudentIdentity, TargetError, canonical_name,
};
use crate::ports::TargetSystem;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

/// First number issued for every kind.
const FIRST_ID: u32 = 100;

/// Scripted misbehaviour for create/enroll calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Temporary unavailability; nothing applied.
    Transient,
    /// No answer; nothing applied.
    Timeout,
    /// Applied, but the answer was lost.
    TimeoutAfterApply,
    /// Rejected; nothing applied.
    Fatal,
    /// Applied, then failed.
    FatalAfterApply,
    /// Sleep before answering (exercises the caller's own timeout).
    Hang(Duration),
}

#[derive(Debug, Clone)]
struct Record {
    kind: EntityKind,
    id: EntityId,
    name: String,
    parent: Option<EntityId>,
    key: Option<RequestKey>,
}

#[derive(Debug, Default)]
struct State {
    records: Vec<Record>,
    next_id: HashMap<EntityKind, u32>,
    /// canonical name -> (fault, remaining uses)
    faults: HashMap<String, (Fault, u32)>,
    /// canonical name -> create/enroll calls received
    attempts: HashMap<String, u32>,
    /// enrollment id -> convocation channels it was created with
    notifications: HashMap<EntityId, Notifications>,
    lookups: u32,
    rollbacks: u32,
    fail_rollbacks: bool,
    sessions: u32,
    /// session id -> calls in flight
    in_flight: HashMap<u32, u32>,
    total_in_flight: u32,
    max_in_flight: u32,
    session_overlap: bool,
}

impl State {
    fn issue_id(&mut self, kind: EntityKind) -> EntityId {
        let next = self.next_id.entry(kind).or_insert(FIRST_ID);
        let id = EntityId::new(format!("{}-{}", prefix(kind), next));
        *next += 1;
        id
    }

    fn live(&self, kind: EntityKind, id: &EntityId) -> bool {
        self.records.iter().any(|r| r.kind == kind && &r.id == id)
    }
}

fn prefix(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Course => "C",
        EntityKind::Edition => "E",
        EntityKind::Activity => "A",
        EntityKind::Enrollment => "R",
    }
}

/// Fake target system.
pub struct FakePlatform {
    state: Mutex<State>,
    rollback_kinds: HashSet<EntityKind>,
}

impl FakePlatform {
    /// Empty platform. Rollback is supported for everything except enrollments.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            rollback_kinds: [EntityKind::Course, EntityKind::Edition, EntityKind::Activity]
                .into_iter()
                .collect(),
        }
    }

    pub fn with_rollback(mut self, kind: EntityKind, supported: bool) -> Self {
        if supported {
            self.rollback_kinds.insert(kind);
        } else {
            self.rollback_kinds.remove(&kind);
        }
        self
    }

    /// Placeholder login for sandbox runs.
    pub fn credentials() -> Credentials {
        Credentials {
            url: "sandbox://".to_string(),
            username: "sandbox".to_string(),
            password: String::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert an existing entity with a fixed identifier.
    pub fn seed(&self, kind: EntityKind, id: &str, name: &str) -> EntityId {
        let id = EntityId::new(id);
        self.lock().records.push(Record {
            kind,
            id: id.clone(),
            name: name.to_string(),
            parent: None,
            key: None,
        });
        id
    }

    /// Make the next `times` create/enroll calls for `name` misbehave.
    pub fn inject(&self, name: &str, fault: Fault, times: u32) {
        self.lock()
            .faults
            .insert(canonical_name(name), (fault, times));
    }

    pub fn fail_rollbacks(&self, fail: bool) {
        self.lock().fail_rollbacks = fail;
    }

    /// Create/enroll calls received for `name`, including failed ones.
    pub fn create_attempts(&self, name: &str) -> u32 {
        self.lock()
            .attempts
            .get(&canonical_name(name))
            .copied()
            .unwrap_or(0)
    }

    /// Create/enroll calls received in total.
    pub fn total_create_attempts(&self) -> u32 {
        self.lock().attempts.values().sum()
    }

    /// Entities of `kind` named `name` that currently exist.
    pub fn live_count(&self, kind: EntityKind, name: &str) -> usize {
        let name = canonical_name(name);
        self.lock()
            .records
            .iter()
            .filter(|r| r.kind == kind && canonical_name(&r.name) == name)
            .count()
    }

    pub fn parent_of(&self, id: &EntityId) -> Option<EntityId> {
        self.lock()
            .records
            .iter()
            .find(|r| &r.id == id)
            .and_then(|r| r.parent.clone())
    }

    /// Convocation channels an enrollment was created with.
    pub fn notifications_of(&self, enrollment: &EntityId) -> Option<Notifications> {
        self.lock().notifications.get(enrollment).copied()
    }

    pub fn lookups(&self) -> u32 {
        self.lock().lookups
    }

    pub fn rollbacks(&self) -> u32 {
        self.lock().rollbacks
    }

    pub fn max_concurrency(&self) -> u32 {
        self.lock().max_in_flight
    }

    /// True if two calls ever ran on the same session at the same time.
    pub fn session_overlap_detected(&self) -> bool {
        self.lock().session_overlap
    }

    fn enter(&self, session: &PlatformSession, name: &str) -> Option<Fault> {
        let mut state = self.lock();
        let n = state.in_flight.entry(session.id).or_insert(0);
        *n += 1;
        if *n > 1 {
            state.session_overlap = true;
        }
        state.total_in_flight += 1;
        state.max_in_flight = state.max_in_flight.max(state.total_in_flight);

        let name = canonical_name(name);
        *state.attempts.entry(name.clone()).or_insert(0) += 1;
        match state.faults.get_mut(&name) {
            Some((fault, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                Some(*fault)
            }
            _ => None,
        }
    }

    fn leave(&self, session_id: u32) {
        let mut state = self.lock();
        if let Some(n) = state.in_flight.get_mut(&session_id) {
            *n = n.saturating_sub(1);
        }
        state.total_in_flight = state.total_in_flight.saturating_sub(1);
    }

    /// Existing live entity for `key`, or a new one.
    fn insert(
        &self,
        kind: EntityKind,
        key: &RequestKey,
        name: &str,
        parent: Option<&EntityId>,
    ) -> Result<EntityId, TargetError> {
        let mut state = self.lock();
        if let Some(existing) = state
            .records
            .iter()
            .find(|r| r.kind == kind && r.key.as_ref() == Some(key))
        {
            return Ok(existing.id.clone());
        }
        if let Some(parent) = parent {
            let parent_kind = match kind {
                EntityKind::Edition => EntityKind::Course,
                EntityKind::Activity => EntityKind::Edition,
                _ => EntityKind::Activity,
            };
            if !state.live(parent_kind, parent) {
                return Err(TargetError::fatal(format!(
                    "{} {} does not exist",
                    parent_kind, parent
                )));
            }
        }
        let id = state.issue_id(kind);
        state.records.push(Record {
            kind,
            id: id.clone(),
            name: name.to_string(),
            parent: parent.cloned(),
            key: Some(key.clone()),
        });
        Ok(id)
    }

    async fn create(
        &self,
        session: &PlatformSession,
        kind: EntityKind,
        key: &RequestKey,
        name: &str,
        parent: Option<&EntityId>,
    ) -> Result<EntityId, TargetError> {
        let fault = self.enter(session, name);
        let _guard = InFlight {
            platform: self,
            session_id: session.id,
        };
        match fault {
            None => self.insert(kind, key, name, parent),
            Some(Fault::Transient) => Err(TargetError::transient(format!(
                "platform temporarily unavailable while creating {} '{}'",
                kind, name
            ))),
            Some(Fault::Timeout) => Err(TargetError::timed_out(format!(
                "no response while creating {} '{}'",
                kind, name
            ))),
            Some(Fault::TimeoutAfterApply) => {
                self.insert(kind, key, name, parent)?;
                Err(TargetError::timed_out(format!(
                    "no response while creating {} '{}'",
                    kind, name
                )))
            }
            Some(Fault::Fatal) => Err(TargetError::fatal(format!(
                "platform rejected {} '{}'",
                kind, name
            ))),
            Some(Fault::FatalAfterApply) => {
                self.insert(kind, key, name, parent)?;
                Err(TargetError::fatal(format!(
                    "platform failed after saving {} '{}'",
                    kind, name
                ))
                .applied())
            }
            Some(Fault::Hang(delay)) => {
                tokio::time::sleep(delay).await;
                self.insert(kind, key, name, parent)
            }
        }
    }
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counters even when the caller drops the call on timeout.
struct InFlight<'a> {
    platform: &'a FakePlatform,
    session_id: u32,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.platform.leave(self.session_id);
    }
}

#[async_trait::async_trait]
impl TargetSystem for FakePlatform {
    async fn open_session(
        &self,
        credentials: &Credentials,
    ) -> Result<PlatformSession, TargetError> {
        let mut state = self.lock();
        state.sessions += 1;
        let id = state.sessions;
        info!(session = id, user = %credentials.username, "[FAKE] session opened");
        Ok(PlatformSession {
            id,
            token: format!("fake-{}", id),
        })
    }

    async fn find(
        &self,
        _session: &mut PlatformSession,
        kind: EntityKind,
        reference: &str,
    ) -> Result<Option<EntityId>, TargetError> {
        let wanted = canonical_name(reference);
        let mut state = self.lock();
        state.lookups += 1;
        Ok(state
            .records
            .iter()
            .find(|r| {
                r.kind == kind
                    && (canonical_name(&r.name) == wanted
                        || canonical_name(r.id.as_str()) == wanted)
            })
            .map(|r| r.id.clone()))
    }

    async fn create_course(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        fields: &CourseFields,
    ) -> Result<EntityId, TargetError> {
        self.create(session, EntityKind::Course, key, &fields.name, None)
            .await
    }

    async fn create_edition(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        course: &EntityId,
        fields: &EditionFields,
    ) -> Result<EntityId, TargetError> {
        self.create(session, EntityKind::Edition, key, &fields.title, Some(course))
            .await
    }

    async fn create_activity(
        &self,
        session: &mut PlatformSession,
        key: &RequestKey,
        edition: &EntityId,
        fields: &ActivityFields,
    ) -> Result<EntityId, TargetError> {
        self.create(session, EntityKind::Activity, key, &fields.name, Some(edition))
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
        let id = self
            .create(
                session,
                EntityKind::Enrollment,
                key,
                student.as_str(),
                Some(activity),
            )
            .await?;
        self.lock().notifications.insert(id.clone(), notifications);
        Ok(id)
    }

    fn supports_rollback(&self, kind: EntityKind) -> bool {
        self.rollback_kinds.contains(&kind)
    }

    async fn rollback(
        &self,
        _session: &mut PlatformSession,
        kind: EntityKind,
        key: &RequestKey,
        id: Option<&EntityId>,
    ) -> Result<(), TargetError> {
        if !self.supports_rollback(kind) {
            return Err(TargetError::fatal(format!("{} cannot be removed", kind)));
        }
        let mut state = self.lock();
        if state.fail_rollbacks {
            return Err(TargetError::fatal(format!("platform refused to remove {}", key)));
        }
        state.rollbacks += 1;
        state.records.retain(|r| {
            !(r.kind == kind && (r.key.as_ref() == Some(key) || Some(&r.id) == id))
        });
        Ok(())
    }
}
