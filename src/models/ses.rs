use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Capability tag that satisfies every permission check
pub const ADMIN_PERMISSION: &str = "admin";

/// Network and client metadata supplied by the calling transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginContext {
    /// Client network address, if the transport knows it
    pub ip_address: Option<IpAddr>,
    /// Client identifier (User-Agent for HTTP callers)
    pub user_agent: Option<String>,
}

impl OriginContext {
    pub fn new(ip_address: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self { ip_address, user_agent }
    }

    /// Origin for calls that did not come through a transport (sweeps, startup)
    pub fn internal() -> Self {
        Self {
            ip_address: None,
            user_agent: Some("veilguard-trust/internal".to_string()),
        }
    }
}

/// One authenticated principal's time-bounded grant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque bearer identifier
    pub id: String,
    /// Authenticated subject
    pub principal: String,
    /// Capability tags granted to this session
    pub permissions: BTreeSet<String>,
    /// Session creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last successful validation
    pub last_activity_at: DateTime<Utc>,
    /// Hard deadline, fixed at creation
    pub expires_at: DateTime<Utc>,
    /// Caller context captured at creation
    pub origin: OriginContext,
}

impl Session {
    pub fn new(
        id: String,
        principal: String,
        permissions: BTreeSet<String>,
        origin: OriginContext,
        now: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> Self {
        Self {
            id,
            principal,
            permissions,
            created_at: now,
            last_activity_at: now,
            expires_at: now + lifetime,
            origin,
        }
    }

    /// A session is expired strictly after its deadline
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Record activity; the deadline never moves
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    pub fn grants(&self, required: &str) -> bool {
        self.permissions.contains(required) || self.permissions.contains(ADMIN_PERMISSION)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            principal: self.principal.clone(),
            permissions: self.permissions.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at,
            expires_at: self.expires_at,
            ip_address: self.origin.ip_address,
        }
    }
}

/// Session listing entry for administrative views. The bearer id is left out.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub principal: String,
    pub permissions: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn session(perms: &[&str]) -> Session {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        Session::new(
            "abc".to_string(),
            "alice".to_string(),
            perms.iter().map(|p| p.to_string()).collect(),
            OriginContext::default(),
            now,
            Duration::seconds(60),
        )
    }

    #[test]
    fn test_touch_does_not_move_deadline() {
        let mut s = session(&["read"]);
        let deadline = s.expires_at;
        s.touch(s.created_at + Duration::seconds(30));
        assert_eq!(s.expires_at, deadline);
        assert_eq!(s.last_activity_at, s.created_at + Duration::seconds(30));
    }

    #[test]
    fn test_expiry_is_strict() {
        let s = session(&["read"]);
        assert!(!s.is_expired_at(s.expires_at));
        assert!(s.is_expired_at(s.expires_at + Duration::milliseconds(1)));
    }

    #[test]
    fn test_admin_grants_everything() {
        assert!(session(&["admin"]).grants("delete_everything"));
        assert!(session(&["read"]).grants("read"));
        assert!(!session(&["read"]).grants("write"));
    }
}
