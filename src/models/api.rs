use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use crate::auth::audit::AuditEvent;
use crate::auth::cipher::SealedData;
use crate::models::security::{ComplianceReport, SecurityPolicy, ThreatVerdict};
use crate::models::ses::{Session, SessionSummary};

// =============================================================================
// REQUESTS
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

/// Missing fields are a bad request. Empty ones go to the service and are audited.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub second_factor: Option<String>,
}

/// Body for logout and validate; the id may come from the Authorization header instead
#[derive(Debug, Default, Deserialize)]
pub struct SessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EncryptRequest {
    pub data: String,
    /// Associated data bound to the ciphertext
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DecryptRequest {
    pub sealed: SealedData,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ComplianceRequest {
    pub data_type: String,
    pub operation: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
    #[serde(rename = "type")]
    pub event_type: Option<String>,
}

// =============================================================================
// RESPONSES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub session_id: String,
    pub expires_at: DateTime<Utc>,
    pub permissions: BTreeSet<String>,
}

impl From<Session> for LoginResponse {
    fn from(session: Session) -> Self {
        Self {
            success: true,
            session_id: session.id,
            expires_at: session.expires_at,
            permissions: session.permissions,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub user_id: String,
    pub permissions: BTreeSet<String>,
    pub expires_at: DateTime<Utc>,
}

impl From<Session> for ValidateResponse {
    fn from(session: Session) -> Self {
        Self {
            valid: true,
            user_id: session.principal,
            permissions: session.permissions,
            expires_at: session.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ThreatScanResponse {
    pub success: bool,
    pub analysis: ThreatVerdict,
}

#[derive(Debug, Serialize)]
pub struct EncryptResponse {
    pub success: bool,
    pub result: SealedData,
}

#[derive(Debug, Serialize)]
pub struct DecryptResponse {
    pub success: bool,
    pub data: String,
}

#[derive(Debug, Serialize)]
pub struct ComplianceResponse {
    pub success: bool,
    pub compliance: ComplianceReport,
}

#[derive(Debug, Serialize)]
pub struct AuditEventsResponse {
    pub success: bool,
    pub total_events: usize,
    pub returned_events: usize,
    pub events: Vec<AuditEvent>,
}

#[derive(Debug, Serialize)]
pub struct PolicyResponse {
    pub success: bool,
    pub policies: SecurityPolicy,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub success: bool,
    pub total_sessions: usize,
    pub sessions: Vec<SessionSummary>,
}
