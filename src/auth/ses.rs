use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use serde_json::json;

use crate::auth::audit::{AuditEventType, AuditLog};
use crate::auth::policy::PolicyEngine;
use crate::auth::token::{TokenGenerator, SESSION_TOKEN_BYTES};
use crate::auth::utils::Clock;
use crate::errors::{AppError, Result};
use crate::models::ses::{OriginContext, Session, SessionSummary};

/// A session slot. `None` once the session has been destroyed or expired.
type Slot = Arc<Mutex<Option<Session>>>;

fn poisoned<T>(_: T) -> AppError {
    AppError::storage("session lock poisoned")
}

/// Authoritative in-memory session map.
///
/// Lookups take the map lock only long enough to clone the slot handle, then
/// lock the slot on its own. No path holds both locks at once, so operations
/// on different sessions never wait on each other beyond the map lookup.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Slot>>,
    tokens: TokenGenerator,
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(policy: Arc<PolicyEngine>, audit: Arc<AuditLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            tokens: TokenGenerator::new(),
            policy,
            audit,
            clock,
        }
    }

    /// Create a session for an already authenticated principal.
    ///
    /// An empty permission set falls back to the policy defaults.
    pub fn create(
        &self,
        principal: &str,
        permissions: BTreeSet<String>,
        origin: OriginContext,
    ) -> Result<Session> {
        let policy = self.policy.get();
        let permissions: BTreeSet<String> = if permissions.is_empty() {
            policy
                .default_permissions
                .iter()
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .collect()
        } else {
            permissions
        };
        if permissions.is_empty() {
            return Err(AppError::validation("a session needs at least one permission"));
        }

        let now = self.clock.now();
        let session = {
            let mut sessions = self.sessions.write().map_err(poisoned)?;
            let id = loop {
                let candidate = self.tokens.generate(SESSION_TOKEN_BYTES)?;
                if !sessions.contains_key(&candidate) {
                    break candidate;
                }
            };
            let session = Session::new(
                id.clone(),
                principal.to_string(),
                permissions,
                origin,
                now,
                policy.session_timeout(),
            );
            sessions.insert(id, Arc::new(Mutex::new(Some(session.clone()))));
            session
        };

        let recorded = self.audit.append(
            AuditEventType::SessionCreated,
            json!({
                "principal": session.principal,
                "permissions": session.permissions,
                "expires_at": session.expires_at,
                "policy_version": policy.version,
            }),
            session.origin.clone(),
        );
        if let Err(e) = recorded {
            // An unaudited session must not stay usable
            self.sessions.write().map_err(poisoned)?.remove(&session.id);
            return Err(e);
        }

        tracing::info!(
            principal = %session.principal,
            expires_at = %session.expires_at,
            "Session created"
        );
        Ok(session)
    }

    /// Resolve a session id, recording activity on success.
    ///
    /// An expired session is deleted on this access and reported as expired.
    pub fn validate(&self, id: &str) -> Result<Session> {
        let slot = self
            .slot(id)?
            .ok_or_else(|| AppError::SessionInvalid("unknown session".to_string()))?;
        let now = self.clock.now();

        let expired = {
            let mut entry = slot.lock().map_err(poisoned)?;
            let Some(session) = entry.as_mut() else {
                return Err(AppError::SessionInvalid("session already ended".to_string()));
            };
            if !session.is_expired_at(now) {
                session.touch(now);
                return Ok(session.clone());
            }
            entry.take()
        };

        self.unlink(id, &slot)?;
        if let Some(session) = expired {
            tracing::warn!(principal = %session.principal, "Access with expired session");
            self.audit.append(
                AuditEventType::SessionExpired,
                json!({
                    "principal": session.principal,
                    "expired_at": session.expires_at,
                    "reason": "expired_on_access",
                }),
                session.origin.clone(),
            )?;
        }
        Err(AppError::SessionExpired("session deadline passed".to_string()))
    }

    /// Whether the session is live and grants `required`. Errors count as "no".
    pub fn has_permission(&self, id: &str, required: &str) -> bool {
        match self.validate(id) {
            Ok(session) => session.grants(required),
            Err(e) => {
                tracing::debug!("Permission check failed: {}", e);
                false
            }
        }
    }

    /// End a session. Returns whether anything was removed; repeating is harmless.
    pub fn destroy(&self, id: &str, origin: OriginContext) -> Result<bool> {
        let slot = self.sessions.write().map_err(poisoned)?.remove(id);
        let Some(slot) = slot else {
            return Ok(false);
        };

        let ended = slot.lock().map_err(poisoned)?.take();
        let Some(session) = ended else {
            return Ok(false);
        };

        self.audit.append(
            AuditEventType::SessionDestroyed,
            json!({ "principal": session.principal }),
            origin,
        )?;
        tracing::info!(principal = %session.principal, "Session destroyed");
        Ok(true)
    }

    /// Live sessions, oldest first. Sessions past their deadline are skipped but left for
    /// lazy expiry or the sweep.
    pub fn list_active(&self) -> Result<Vec<SessionSummary>> {
        let now = self.clock.now();
        let slots: Vec<Slot> = self
            .sessions
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect();

        let mut active = Vec::with_capacity(slots.len());
        for slot in slots {
            let entry = slot.lock().map_err(poisoned)?;
            if let Some(session) = entry.as_ref().filter(|s| !s.is_expired_at(now)) {
                active.push(session.summary());
            }
        }
        active.sort_by_key(|s| s.created_at);
        Ok(active)
    }

    /// Number of stored sessions, expired-but-unswept included
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every session past its deadline. Returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now();
        let slots: Vec<(String, Slot)> = self
            .sessions
            .read()
            .map_err(poisoned)?
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect();

        let mut purged = 0;
        for (id, slot) in slots {
            let expired = {
                let mut entry = slot.lock().map_err(poisoned)?;
                if entry.as_ref().map_or(false, |s| s.is_expired_at(now)) {
                    entry.take()
                } else {
                    None
                }
            };
            let Some(session) = expired else {
                continue;
            };

            self.unlink(&id, &slot)?;
            self.audit.append(
                AuditEventType::SessionExpired,
                json!({
                    "principal": session.principal,
                    "expired_at": session.expires_at,
                    "reason": "sweep",
                }),
                OriginContext::internal(),
            )?;
            purged += 1;
        }

        if purged > 0 {
            tracing::info!(purged, "Expired sessions swept");
        }
        Ok(purged)
    }

    fn slot(&self, id: &str) -> Result<Option<Slot>> {
        Ok(self.sessions.read().map_err(poisoned)?.get(id).cloned())
    }

    /// Drop the map entry for `id` if it still points at `slot`
    fn unlink(&self, id: &str, slot: &Slot) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if sessions.get(id).map_or(false, |current| Arc::ptr_eq(current, slot)) {
            sessions.remove(id);
        }
        Ok(())
    }
}
