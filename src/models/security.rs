use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// POLICY
// =============================================================================

/// Upper bound for policy durations (one year)
const MAX_DURATION_SECS: u64 = 31_536_000;

/// Process-wide security parameters. Read-only while requests are handled;
/// replaced wholesale through `PolicyEngine::reload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityPolicy {
    /// Snapshot version, assigned by the policy engine
    pub version: u64,
    /// Minimum accepted secret length, in characters
    pub password_min_length: usize,
    /// Session lifetime in seconds
    pub session_timeout_secs: u64,
    /// Consecutive failed logins before the principal is locked
    pub max_login_attempts: u32,
    /// Whether a second factor is required at login
    pub require_2fa: bool,
    /// Scores above this are monitored
    pub monitor_threshold: u32,
    /// Scores above this are blocked
    pub block_threshold: u32,
    /// Payloads longer than this trip the oversized signal
    pub max_payload_bytes: usize,
    /// How long a locked principal stays locked, in seconds
    pub lockout_secs: u64,
    /// Granted when a login requests no permissions
    pub default_permissions: Vec<String>,
    /// Principals allowed to request the admin permission
    pub admin_principals: Vec<String>,
    /// Name of the bound authenticated-encryption primitive
    pub encryption_algorithm: String,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            version: 0,
            password_min_length: 8,
            session_timeout_secs: 3600, // 1 hour
            max_login_attempts: 5,
            require_2fa: false,
            monitor_threshold: 30,
            block_threshold: 70,
            max_payload_bytes: 10_000,
            lockout_secs: 900, // 15 minutes
            default_permissions: vec!["read".to_string(), "write".to_string()],
            admin_principals: Vec::new(),
            encryption_algorithm: "AES-256-GCM".to_string(),
        }
    }
}

impl SecurityPolicy {
    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_timeout_secs.min(MAX_DURATION_SECS) as i64)
    }

    pub fn lockout_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lockout_secs.min(MAX_DURATION_SECS) as i64)
    }

    pub fn may_hold_admin(&self, principal: &str) -> bool {
        self.admin_principals.iter().any(|p| p == principal)
    }

    /// Map a risk score onto an action using this policy's thresholds
    pub fn classify(&self, risk_score: u32) -> ThreatAction {
        if risk_score > self.block_threshold {
            ThreatAction::Block
        } else if risk_score > self.monitor_threshold {
            ThreatAction::Monitor
        } else {
            ThreatAction::Allow
        }
    }

    /// Check internal consistency, returning every problem found
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.password_min_length == 0 {
            problems.push("password_min_length must be at least 1".to_string());
        }
        if self.session_timeout_secs == 0 {
            problems.push("session_timeout_secs must be at least 1".to_string());
        }
        if self.session_timeout_secs > MAX_DURATION_SECS {
            problems.push("session_timeout_secs must not exceed one year".to_string());
        }
        if self.max_login_attempts == 0 {
            problems.push("max_login_attempts must be at least 1".to_string());
        }
        if self.monitor_threshold >= self.block_threshold {
            problems.push("monitor_threshold must be below block_threshold".to_string());
        }
        if self.max_payload_bytes == 0 {
            problems.push("max_payload_bytes must be at least 1".to_string());
        }
        if self.default_permissions.iter().all(|p| p.trim().is_empty()) {
            problems.push("default_permissions must name at least one permission".to_string());
        }
        problems
    }
}

// =============================================================================
// CREDENTIALS
// =============================================================================

/// Key derivation used for a stored credential
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[serde(rename = "PBKDF2-SHA256")]
    Pbkdf2Sha256,
    #[serde(rename = "Argon2id")]
    Argon2id,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HashAlgorithm::Pbkdf2Sha256 => write!(f, "PBKDF2-SHA256"),
            HashAlgorithm::Argon2id => write!(f, "Argon2id"),
        }
    }
}

/// Everything needed to re-verify a secret. Never holds the secret itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Hex-encoded derived key
    pub hash: String,
    pub salt: String,
    pub algorithm: HashAlgorithm,
    /// PBKDF2 rounds, or the Argon2 time cost
    pub iterations: u32,
}

// =============================================================================
// THREAT SCORING
// =============================================================================

/// What the gateway should do with a scored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatAction {
    Allow,
    Monitor,
    Block,
}

impl fmt::Display for ThreatAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ThreatAction::Allow => write!(f, "allow"),
            ThreatAction::Monitor => write!(f, "monitor"),
            ThreatAction::Block => write!(f, "block"),
        }
    }
}

/// Result of scoring one payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatVerdict {
    /// Names of the detectors that fired, in registry order
    pub detected_signals: Vec<String>,
    /// Sum of the weights of the detectors that fired
    pub risk_score: u32,
    pub action: ThreatAction,
}

// =============================================================================
// COMPLIANCE
// =============================================================================

/// Outcome of a compliance rule lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub gdpr_compliant: bool,
    pub ccpa_compliant: bool,
    pub soc2_compliant: bool,
    /// Obligations the caller must satisfy, in rule-table order
    pub requirements: Vec<String>,
}
