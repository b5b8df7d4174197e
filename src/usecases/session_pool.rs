//! Pool of authenticated platform sessions.
//!
//! One session serves exactly one in-flight sequence. Acquiring waits for a
//! free session; the guard returns it when dropped.

use crate::domain::{Credentials, DomainError, PlatformSession};
use crate::ports::TargetSystem;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::info;

pub struct SessionPool {
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<PlatformSession>>,
    size: usize,
}

impl SessionPool {
    /// Log in `size` times up front.
    pub async fn connect(
        target: &dyn TargetSystem,
        credentials: &Credentials,
        size: usize,
    ) -> Result<Arc<Self>, DomainError> {
        let mut sessions = Vec::with_capacity(size);
        for _ in 0..size.max(1) {
            let session = target
                .open_session(credentials)
                .await
                .map_err(|e| DomainError::Session(format!("login failed: {}", e)))?;
            sessions.push(session);
        }
        info!(size = sessions.len(), user = %credentials.username, "session pool ready");
        Ok(Self::from_sessions(sessions))
    }

    pub fn from_sessions(sessions: Vec<PlatformSession>) -> Arc<Self> {
        let size = sessions.len();
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(size)),
            idle: Mutex::new(sessions),
            size,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Wait for a free session.
    pub async fn acquire(self: &Arc<Self>) -> Result<SessionGuard, DomainError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DomainError::Session("session pool is closed".to_string()))?;
        let session = self
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .ok_or_else(|| {
                DomainError::Session("no idle session despite free permit".to_string())
            })?;
        Ok(SessionGuard {
            pool: Arc::clone(self),
            session,
            _permit: permit,
        })
    }
}

/// Exclusive use of one session. Returned to the pool on drop.
pub struct SessionGuard {
    pool: Arc<SessionPool>,
    session: PlatformSession,
    // Released after the session is back in the idle list (fields drop after `drop`).
    _permit: OwnedSemaphorePermit,
}

impl Deref for SessionGuard {
    type Target = PlatformSession;

    fn deref(&self) -> &PlatformSession {
        &self.session
    }
}

impl DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut PlatformSession {
        &mut self.session
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.pool
            .idle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.session.clone());
    }
}
