use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use crate::errors::{AppError, Result};

/// Per-principal failure tracking
#[derive(Debug, Clone, Default)]
struct PrincipalFailures {
    /// Consecutive failed logins since the last success or lock
    failed_attempts: u32,
    /// Lock expiration if the principal is locked
    lock_expires: Option<DateTime<Utc>>,
    /// When the most recent failure was counted
    last_failure: Option<DateTime<Utc>>,
}

impl PrincipalFailures {
    fn is_stale(&self, now: DateTime<Utc>, idle: Duration) -> bool {
        let locked = self.lock_expires.map_or(false, |expires| expires > now);
        let recent = self.last_failure.map_or(false, |at| now - at < idle);
        !locked && !recent
    }
}

/// Outcome of recording a failed login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still below the limit
    Counted { failed_attempts: u32 },
    /// This failure reached the limit; the principal is locked until the given time
    Locked { until: DateTime<Utc> },
    /// The principal was already locked; nothing was counted
    AlreadyLocked { until: DateTime<Utc> },
}

/// Consecutive-failure counter that locks principals out for a while
#[derive(Debug, Default)]
pub struct LoginAttemptTracker {
    principals: RwLock<HashMap<String, PrincipalFailures>>,
}

impl LoginAttemptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left on the principal's lock, if any. An elapsed lock drops the entry.
    pub fn locked_for(&self, principal: &str, now: DateTime<Utc>) -> Result<Option<Duration>> {
        {
            let principals = self
                .principals
                .read()
                .map_err(|_| AppError::storage("lockout table lock poisoned"))?;
            match principals.get(principal).and_then(|p| p.lock_expires) {
                Some(expires) if expires > now => return Ok(Some(expires - now)),
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Lock has run out
        let mut principals = self
            .principals
            .write()
            .map_err(|_| AppError::storage("lockout table lock poisoned"))?;
        let lapsed = principals
            .get(principal)
            .and_then(|entry| entry.lock_expires)
            .map_or(false, |expires| expires <= now);
        if lapsed {
            principals.remove(principal);
        }
        Ok(None)
    }

    /// Count a failed login. Reaching `max_attempts` locks the principal for `lockout`.
    pub fn record_failure(
        &self,
        principal: &str,
        max_attempts: u32,
        lockout: Duration,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome> {
        let mut principals = self
            .principals
            .write()
            .map_err(|_| AppError::storage("lockout table lock poisoned"))?;
        let entry = principals.entry(principal.to_string()).or_default();

        if let Some(until) = entry.lock_expires.filter(|expires| *expires > now) {
            return Ok(FailureOutcome::AlreadyLocked { until });
        }

        entry.lock_expires = None;
        entry.last_failure = Some(now);
        entry.failed_attempts += 1;
        if entry.failed_attempts >= max_attempts.max(1) {
            let until = now + lockout;
            entry.failed_attempts = 0;
            entry.lock_expires = Some(until);
            tracing::warn!(principal = %principal, until = %until, "Principal locked after repeated login failures");
            return Ok(FailureOutcome::Locked { until });
        }

        Ok(FailureOutcome::Counted { failed_attempts: entry.failed_attempts })
    }

    /// Forget a principal's failures after a successful login
    pub fn record_success(&self, principal: &str) -> Result<()> {
        self.principals
            .write()
            .map_err(|_| AppError::storage("lockout table lock poisoned"))?
            .remove(principal);
        Ok(())
    }

    /// Drop principals that are not locked and have not failed within `idle`
    pub fn prune(&self, now: DateTime<Utc>, idle: Duration) -> Result<usize> {
        let mut principals = self
            .principals
            .write()
            .map_err(|_| AppError::storage("lockout table lock poisoned"))?;
        let before = principals.len();
        principals.retain(|_, entry| !entry.is_stale(now, idle));
        Ok(before - principals.len())
    }

    /// Number of principals currently tracked
    pub fn len(&self) -> usize {
        self.principals.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
