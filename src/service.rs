use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::auth::audit::{AuditEvent, AuditEventType, AuditLog, AuditSink, ChainBreak};
use crate::auth::cipher::{AeadCipher, SealedData};
use crate::auth::credentials::CredentialStore;
use crate::auth::lockout::{FailureOutcome, LoginAttemptTracker};
use crate::auth::policy::PolicyEngine;
use crate::auth::pw::CredentialHasher;
use crate::auth::ses::SessionStore;
use crate::auth::threat::ThreatScorer;
use crate::auth::utils::{sanitize_for_logging, Clock, SystemClock};
use crate::errors::{AppError, Result};
use crate::models::security::{
    ComplianceReport, CredentialRecord, SecurityPolicy, ThreatAction, ThreatVerdict,
};
use crate::models::ses::{OriginContext, Session, SessionSummary, ADMIN_PERMISSION};

/// Default number of events returned by an audit listing
pub const DEFAULT_AUDIT_LIMIT: usize = 100;

/// Login attempt as handed over by a transport
#[derive(Debug)]
pub struct AuthRequest {
    pub principal: String,
    pub secret: SecretString,
    /// Requested capability tags; empty means the policy defaults
    pub permissions: BTreeSet<String>,
    /// One-time code, checked only when the policy requires a second factor
    pub second_factor: Option<String>,
}

impl AuthRequest {
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: SecretString::from(secret.into()),
            permissions: BTreeSet::new(),
            second_factor: None,
        }
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_second_factor(mut self, code: impl Into<String>) -> Self {
        self.second_factor = Some(code.into());
        self
    }
}

/// Second-factor check plugged in by the deployment
pub trait SecondFactorVerifier: Send + Sync {
    fn verify(&self, principal: &str, code: &str) -> bool;
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: &'static str,
    pub timestamp: DateTime<Utc>,
    pub policy_version: u64,
    pub active_sessions: usize,
    pub registered_credentials: usize,
    pub audit_events: usize,
    pub audit_chain_intact: bool,
    pub encryption_algorithm: Option<&'static str>,
}

/// Wires the trust components together and exposes the service operations
pub struct TrustService {
    policy: Arc<PolicyEngine>,
    audit: Arc<AuditLog>,
    sessions: SessionStore,
    credentials: CredentialStore,
    attempts: LoginAttemptTracker,
    hasher: CredentialHasher,
    /// Verified against when the principal is unknown
    placeholder: CredentialRecord,
    scorer: ThreatScorer,
    cipher: Option<Arc<dyn AeadCipher>>,
    second_factor: Option<Arc<dyn SecondFactorVerifier>>,
    clock: Arc<dyn Clock>,
}

pub struct TrustServiceBuilder {
    policy: SecurityPolicy,
    clock: Arc<dyn Clock>,
    audit_key: Option<Vec<u8>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    hasher: CredentialHasher,
    scorer: ThreatScorer,
    cipher: Option<Arc<dyn AeadCipher>>,
    second_factor: Option<Arc<dyn SecondFactorVerifier>>,
}

impl TrustServiceBuilder {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Key for the audit hash chain. A random key is drawn when unset.
    pub fn with_audit_key(mut self, key: Vec<u8>) -> Self {
        self.audit_key = Some(key);
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn with_hasher(mut self, hasher: CredentialHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_scorer(mut self, scorer: ThreatScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn AeadCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    pub fn with_second_factor(mut self, verifier: Arc<dyn SecondFactorVerifier>) -> Self {
        self.second_factor = Some(verifier);
        self
    }

    pub fn build(self) -> Result<TrustService> {
        let policy = Arc::new(PolicyEngine::new(self.policy)?);

        let mut audit = match self.audit_key {
            Some(key) if !key.is_empty() => AuditLog::with_key(key, self.clock.clone()),
            Some(_) => return Err(AppError::configuration("audit chain key must not be empty")),
            None => AuditLog::new(self.clock.clone())?,
        };
        if let Some(sink) = self.audit_sink {
            audit = audit.with_sink(sink);
        }
        let audit = Arc::new(audit);
        let placeholder = self.hasher.placeholder_record()?;

        Ok(TrustService {
            sessions: SessionStore::new(policy.clone(), audit.clone(), self.clock.clone()),
            policy,
            audit,
            credentials: CredentialStore::new(),
            attempts: LoginAttemptTracker::new(),
            hasher: self.hasher,
            placeholder,
            scorer: self.scorer,
            cipher: self.cipher,
            second_factor: self.second_factor,
            clock: self.clock,
        })
    }
}

impl TrustService {
    pub fn builder(policy: SecurityPolicy) -> TrustServiceBuilder {
        TrustServiceBuilder {
            policy,
            clock: Arc::new(SystemClock),
            audit_key: None,
            audit_sink: None,
            hasher: CredentialHasher::default(),
            scorer: ThreatScorer::new(),
            cipher: None,
            second_factor: None,
        }
    }

    // =========================================================================
    // CREDENTIALS AND SESSIONS
    // =========================================================================

    /// Self-service registration for a principal that has no credential yet.
    ///
    /// Admin principals are refused here; they are provisioned out of band.
    pub fn register_credential(
        &self,
        principal: &str,
        secret: &SecretString,
        origin: OriginContext,
    ) -> Result<()> {
        if self.policy.get().may_hold_admin(principal.trim()) {
            tracing::warn!(
                principal = %sanitize_for_logging(principal),
                ip = ?origin.ip_address,
                "Self-registration refused for admin principal"
            );
            return Err(AppError::Forbidden);
        }
        self.store_credential(principal, secret, origin, false)
    }

    /// Store a credential through a trusted channel (startup config or an admin session)
    pub fn provision_credential(
        &self,
        principal: &str,
        secret: &SecretString,
        origin: OriginContext,
    ) -> Result<()> {
        self.store_credential(principal, secret, origin, true)
    }

    fn store_credential(
        &self,
        principal: &str,
        secret: &SecretString,
        origin: OriginContext,
        provisioned: bool,
    ) -> Result<()> {
        let principal = principal.trim();
        if principal.is_empty() {
            return Err(AppError::validation("principal must not be empty"));
        }

        let policy = self.policy.get();
        if secret.expose_secret().chars().count() < policy.password_min_length {
            return Err(AppError::validation(format!(
                "secret must be at least {} characters",
                policy.password_min_length
            )));
        }

        if self.credentials.get(principal)?.is_some() {
            return Err(AppError::validation("principal is already registered"));
        }
        let record = self.hasher.hash(secret, None)?;
        let algorithm = record.algorithm;
        self.credentials.register(principal, record)?;

        self.audit.append(
            AuditEventType::CredentialRegistered,
            json!({
                "principal": principal,
                "algorithm": algorithm,
                "provisioned": provisioned,
            }),
            origin,
        )?;
        tracing::info!(principal = %sanitize_for_logging(principal), "Credential registered");
        Ok(())
    }

    /// Verify a login attempt and open a session for it.
    ///
    /// Every rejection is audited as `login_failed` and surfaces as `AuthFailure`.
    pub fn authenticate(&self, request: AuthRequest, origin: OriginContext) -> Result<Session> {
        let policy = self.policy.get();
        let principal = request.principal.trim();

        if principal.is_empty() {
            return Err(self.fail_login(principal, "missing_principal", &origin, None));
        }

        if let Some(remaining) = self.attempts.locked_for(principal, self.clock.now())? {
            tracing::debug!(remaining_secs = remaining.num_seconds(), "Login refused for locked principal");
            return Err(self.fail_login(principal, "account_locked", &origin, None));
        }

        if request.secret.expose_secret().chars().count() < policy.password_min_length {
            return Err(self.fail_login(principal, "weak_password", &origin, Some(&policy)));
        }

        // Unknown principals pay for a derivation too and share the reason
        let verified = match self.credentials.get(principal)? {
            Some(record) => self.hasher.verify(&request.secret, &record),
            None => {
                self.hasher.verify(&request.secret, &self.placeholder);
                false
            }
        };
        if !verified {
            return Err(self.fail_login(principal, "invalid_credentials", &origin, Some(&policy)));
        }

        if request.permissions.contains(ADMIN_PERMISSION) && !policy.may_hold_admin(principal) {
            return Err(self.fail_login(principal, "admin_not_permitted", &origin, None));
        }

        if policy.require_2fa {
            let outcome = match (&self.second_factor, request.second_factor.as_deref()) {
                (None, _) => Some("second_factor_unavailable"),
                (Some(_), None) => Some("second_factor_required"),
                (Some(verifier), Some(code)) if !verifier.verify(principal, code) => {
                    Some("second_factor_invalid")
                }
                _ => None,
            };
            if let Some(reason) = outcome {
                return Err(self.fail_login(principal, reason, &origin, Some(&policy)));
            }
        }

        self.attempts.record_success(principal)?;
        self.sessions.create(principal, request.permissions, origin)
    }

    pub fn logout(&self, session_id: &str, origin: OriginContext) -> Result<bool> {
        self.sessions.destroy(session_id, origin)
    }

    pub fn validate_session(&self, session_id: &str) -> Result<Session> {
        self.sessions.validate(session_id)
    }

    pub fn has_permission(&self, session_id: &str, required: &str) -> bool {
        self.sessions.has_permission(session_id, required)
    }

    /// Validate a session and insist it grants `required`
    pub fn require_permission(&self, session_id: &str, required: &str) -> Result<Session> {
        let session = self.sessions.validate(session_id)?;
        if !session.grants(required) {
            tracing::warn!(
                principal = %session.principal,
                required,
                "Session lacks required permission"
            );
            return Err(AppError::Forbidden);
        }
        Ok(session)
    }

    pub fn active_sessions(&self) -> Result<Vec<SessionSummary>> {
        self.sessions.list_active()
    }

    pub fn purge_expired_sessions(&self) -> Result<usize> {
        self.sessions.purge_expired()
    }

    /// Forget failure counters that are neither locked nor recent.
    /// Counters idle for one lockout window are dropped.
    pub fn prune_login_failures(&self) -> Result<usize> {
        let policy = self.policy.get();
        let pruned = self
            .attempts
            .prune(self.clock.now(), policy.lockout_duration())?;
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned idle login failure counters");
        }
        Ok(pruned)
    }

    pub fn tracked_login_failures(&self) -> usize {
        self.attempts.len()
    }

    // =========================================================================
    // THREATS AND COMPLIANCE
    // =========================================================================

    pub fn scan_payload(&self, payload: &Value, origin: OriginContext) -> Result<ThreatVerdict> {
        let policy = self.policy.get();
        let verdict = self.scorer.score(payload, &policy);

        if verdict.action == ThreatAction::Block {
            tracing::warn!(
                risk_score = verdict.risk_score,
                signals = ?verdict.detected_signals,
                "Payload blocked"
            );
        }

        self.audit.append(
            AuditEventType::ThreatScan,
            json!({
                "risk_score": verdict.risk_score,
                "action": verdict.action,
                "detected_signals": verdict.detected_signals,
                "policy_version": policy.version,
            }),
            origin,
        )?;
        Ok(verdict)
    }

    pub fn check_compliance(&self, data_category: &str, operation: &str) -> ComplianceReport {
        self.policy.check_compliance(data_category, operation)
    }

    // =========================================================================
    // AUDIT AND POLICY
    // =========================================================================

    pub fn list_audit_events(
        &self,
        type_filter: Option<AuditEventType>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>> {
        self.audit.query(type_filter, limit)
    }

    pub fn audit_event_count(&self) -> usize {
        self.audit.len()
    }

    pub fn verify_audit_chain(&self) -> Result<std::result::Result<(), ChainBreak>> {
        self.audit.verify_chain()
    }

    pub fn current_policy(&self) -> Arc<SecurityPolicy> {
        self.policy.get()
    }

    pub fn reload_policy(&self, policy: SecurityPolicy, origin: OriginContext) -> Result<Arc<SecurityPolicy>> {
        let previous = self.policy.get().version;
        let installed = self.policy.reload(policy)?;
        self.audit_policy_change(previous, &installed, origin)?;
        Ok(installed)
    }

    /// Overlay the fields present in `patch` onto the current policy
    pub fn patch_policy(&self, patch: &Value, origin: OriginContext) -> Result<Arc<SecurityPolicy>> {
        let previous = self.policy.get().version;
        let installed = self.policy.patch(patch)?;
        self.audit_policy_change(previous, &installed, origin)?;
        Ok(installed)
    }

    fn audit_policy_change(
        &self,
        previous: u64,
        installed: &SecurityPolicy,
        origin: OriginContext,
    ) -> Result<()> {
        self.audit.append(
            AuditEventType::PolicyReloaded,
            json!({
                "previous_version": previous,
                "version": installed.version,
            }),
            origin,
        )?;
        Ok(())
    }

    // =========================================================================
    // ENCRYPTION
    // =========================================================================

    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<SealedData> {
        self.cipher()?.encrypt(plaintext, aad)
    }

    pub fn decrypt(&self, sealed: &SealedData, aad: &[u8]) -> Result<Vec<u8>> {
        self.cipher()?.decrypt(sealed, aad)
    }

    fn cipher(&self) -> Result<&Arc<dyn AeadCipher>> {
        self.cipher
            .as_ref()
            .ok_or_else(|| AppError::crypto("no cipher configured"))
    }

    pub fn health(&self) -> Result<HealthReport> {
        Ok(HealthReport {
            status: "healthy",
            service: "veilguard-trust",
            timestamp: self.clock.now(),
            policy_version: self.policy.get().version,
            active_sessions: self.sessions.list_active()?.len(),
            registered_credentials: self.credentials.len(),
            audit_events: self.audit.len(),
            audit_chain_intact: self.audit.verify_chain()?.is_ok(),
            encryption_algorithm: self.cipher.as_ref().map(|c| c.algorithm()),
        })
    }

    /// Audit a rejected login and count it toward the lockout when `policy` is given
    fn fail_login(
        &self,
        principal: &str,
        reason: &'static str,
        origin: &OriginContext,
        policy: Option<&SecurityPolicy>,
    ) -> AppError {
        match self.record_login_failure(principal, reason, origin, policy) {
            Ok(()) => AppError::auth_failure(reason),
            Err(e) => e,
        }
    }

    fn record_login_failure(
        &self,
        principal: &str,
        reason: &'static str,
        origin: &OriginContext,
        policy: Option<&SecurityPolicy>,
    ) -> Result<()> {
        tracing::warn!(
            principal = %sanitize_for_logging(principal),
            reason,
            ip = ?origin.ip_address,
            "Login failed"
        );
        self.audit.append(
            AuditEventType::LoginFailed,
            json!({ "principal": principal, "reason": reason }),
            origin.clone(),
        )?;

        let Some(policy) = policy else {
            return Ok(());
        };
        let outcome = self.attempts.record_failure(
            principal,
            policy.max_login_attempts,
            policy.lockout_duration(),
            self.clock.now(),
        )?;
        if let FailureOutcome::Locked { until } = outcome {
            self.audit.append(
                AuditEventType::AccountLocked,
                json!({
                    "principal": principal,
                    "locked_until": until,
                    "failed_attempts": policy.max_login_attempts,
                }),
                origin.clone(),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::utils::ManualClock;
    use crate::auth::cipher::Aes256GcmCipher;
    use chrono::{Duration, TimeZone};

    struct Fixed(&'static str);

    impl SecondFactorVerifier for Fixed {
        fn verify(&self, _principal: &str, code: &str) -> bool {
            code == self.0
        }
    }

    fn service_with(policy: SecurityPolicy) -> (TrustService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap()));
        let service = TrustService::builder(policy)
            .with_clock(clock.clone())
            .with_audit_key(b"service-test".to_vec())
            .build()
            .unwrap();
        (service, clock)
    }

    fn service() -> (TrustService, Arc<ManualClock>) {
        service_with(SecurityPolicy::default())
    }

    fn register(service: &TrustService, principal: &str, secret: &str) {
        service
            .register_credential(principal, &SecretString::from(secret.to_string()), OriginContext::default())
            .unwrap();
    }

    fn failures(service: &TrustService) -> Vec<AuditEvent> {
        service
            .list_audit_events(Some(AuditEventType::LoginFailed), DEFAULT_AUDIT_LIMIT)
            .unwrap()
    }

    #[test]
    fn test_short_secret_rejected_and_audited() {
        let (service, _) = service();
        let err = service
            .authenticate(AuthRequest::new("alice", "short"), OriginContext::default())
            .unwrap_err();

        assert!(matches!(err, AppError::AuthFailure(ref r) if r == "weak_password"));
        let events = failures(&service);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].details["principal"], "alice");
        assert_eq!(events[0].details["reason"], "weak_password");
    }

    #[test]
    fn test_login_creates_session_with_defaults() {
        let (service, _) = service();
        register(&service, "alice", "correct-horse");

        let session = service
            .authenticate(AuthRequest::new("alice", "correct-horse"), OriginContext::default())
            .unwrap();
        assert_eq!(session.principal, "alice");
        assert!(session.permissions.contains("read") && session.permissions.contains("write"));
        assert!(service.validate_session(&session.id).is_ok());
        assert!(failures(&service).is_empty());
    }

    #[test]
    fn test_requested_permissions_are_kept() {
        let (service, _) = service();
        register(&service, "alice", "correct-horse");

        let session = service
            .authenticate(
                AuthRequest::new("alice", "correct-horse").with_permissions(["read", "reports"]),
                OriginContext::default(),
            )
            .unwrap();
        assert!(service.has_permission(&session.id, "reports"));
        assert!(!service.has_permission(&session.id, "write"));
    }

    #[test]
    fn test_admin_only_for_listed_principals() {
        let (service, _) = service_with(SecurityPolicy {
            admin_principals: vec!["root".to_string()],
            ..SecurityPolicy::default()
        });
        register(&service, "alice", "correct-horse");
        service
            .provision_credential("root", &SecretString::from("correct-horse".to_string()), OriginContext::internal())
            .unwrap();

        let err = service
            .authenticate(
                AuthRequest::new("alice", "correct-horse").with_permissions(["admin"]),
                OriginContext::default(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::AuthFailure(ref r) if r == "admin_not_permitted"));

        let session = service
            .authenticate(
                AuthRequest::new("root", "correct-horse").with_permissions(["admin"]),
                OriginContext::default(),
            )
            .unwrap();
        assert!(service.has_permission(&session.id, "anything"));
    }

    #[test]
    fn test_admin_principal_cannot_self_register() {
        let (service, _) = service_with(SecurityPolicy {
            admin_principals: vec!["root".to_string()],
            ..SecurityPolicy::default()
        });

        let err = service
            .register_credential(" root ", &SecretString::from("squatter-secret".to_string()), OriginContext::default())
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden));
        assert_eq!(service.health().unwrap().registered_credentials, 0);

        service
            .provision_credential("root", &SecretString::from("correct-horse".to_string()), OriginContext::internal())
            .unwrap();
        let registered = service
            .list_audit_events(Some(AuditEventType::CredentialRegistered), 10)
            .unwrap();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].details["provisioned"], true);
    }

    #[test]
    fn test_unknown_principal_costs_a_derivation() {
        let (service, _) = service();
        register(&service, "alice", "correct-horse");

        let before = crate::auth::pw::derivations_on_this_thread();
        let _ = service.authenticate(AuthRequest::new("alice", "wrong-horse!"), OriginContext::default());
        let known = crate::auth::pw::derivations_on_this_thread() - before;

        let before = crate::auth::pw::derivations_on_this_thread();
        let _ = service.authenticate(AuthRequest::new("nobody", "wrong-horse!"), OriginContext::default());
        let unknown = crate::auth::pw::derivations_on_this_thread() - before;

        assert_eq!(known, 1);
        assert_eq!(unknown, known);
    }

    #[test]
    fn test_failure_counters_for_sprayed_names_are_pruned() {
        let (service, clock) = service_with(SecurityPolicy {
            lockout_secs: 600,
            ..SecurityPolicy::default()
        });
        for n in 0..20 {
            let _ = service.authenticate(
                AuthRequest::new(format!("spray-{}", n), "wrong-horse!"),
                OriginContext::default(),
            );
        }
        assert_eq!(service.tracked_login_failures(), 20);
        assert_eq!(service.prune_login_failures().unwrap(), 0);

        clock.advance(Duration::seconds(600));
        assert_eq!(service.prune_login_failures().unwrap(), 20);
        assert_eq!(service.tracked_login_failures(), 0);
    }

    #[test]
    fn test_patch_policy_keeps_admins() {
        let (service, _) = service_with(SecurityPolicy {
            admin_principals: vec!["root".to_string()],
            ..SecurityPolicy::default()
        });
        let installed = service
            .patch_policy(&json!({ "password_min_length": 12 }), OriginContext::internal())
            .unwrap();
        assert_eq!(installed.password_min_length, 12);
        assert!(installed.may_hold_admin("root"));

        let reloads = service.list_audit_events(Some(AuditEventType::PolicyReloaded), 10).unwrap();
        assert_eq!(reloads.len(), 1);
    }

    #[test]
    fn test_unknown_principal_and_wrong_secret_look_alike() {
        let (service, _) = service();
        register(&service, "alice", "correct-horse");

        let unknown = service
            .authenticate(AuthRequest::new("mallory", "correct-horse"), OriginContext::default())
            .unwrap_err();
        let wrong = service
            .authenticate(AuthRequest::new("alice", "wrong-horse!"), OriginContext::default())
            .unwrap_err();
        assert_eq!(unknown.to_string(), wrong.to_string());
        assert_eq!(failures(&service).len(), 2);
    }

    #[test]
    fn test_lockout_refuses_correct_secret_until_it_lapses() {
        let (service, clock) = service_with(SecurityPolicy {
            max_login_attempts: 3,
            lockout_secs: 600,
            ..SecurityPolicy::default()
        });
        register(&service, "alice", "correct-horse");

        for _ in 0..3 {
            assert!(service
                .authenticate(AuthRequest::new("alice", "wrong-horse!"), OriginContext::default())
                .is_err());
        }
        let locked = service
            .list_audit_events(Some(AuditEventType::AccountLocked), 10)
            .unwrap();
        assert_eq!(locked.len(), 1);

        let err = service
            .authenticate(AuthRequest::new("alice", "correct-horse"), OriginContext::default())
            .unwrap_err();
        assert!(matches!(err, AppError::AuthFailure(ref r) if r == "account_locked"));

        clock.advance(Duration::seconds(600));
        assert!(service
            .authenticate(AuthRequest::new("alice", "correct-horse"), OriginContext::default())
            .is_ok());
    }

    #[test]
    fn test_second_factor() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 4, 1, 10, 0, 0).unwrap()));
        let service = TrustService::builder(SecurityPolicy {
            require_2fa: true,
            ..SecurityPolicy::default()
        })
        .with_clock(clock)
        .with_second_factor(Arc::new(Fixed("123456")))
        .build()
        .unwrap();
        register(&service, "alice", "correct-horse");

        let missing = service
            .authenticate(AuthRequest::new("alice", "correct-horse"), OriginContext::default())
            .unwrap_err();
        assert!(matches!(missing, AppError::AuthFailure(ref r) if r == "second_factor_required"));

        let wrong = service
            .authenticate(
                AuthRequest::new("alice", "correct-horse").with_second_factor("000000"),
                OriginContext::default(),
            )
            .unwrap_err();
        assert!(matches!(wrong, AppError::AuthFailure(ref r) if r == "second_factor_invalid"));

        assert!(service
            .authenticate(
                AuthRequest::new("alice", "correct-horse").with_second_factor("123456"),
                OriginContext::default(),
            )
            .is_ok());
    }

    #[test]
    fn test_second_factor_without_verifier_fails_closed() {
        let (service, _) = service_with(SecurityPolicy {
            require_2fa: true,
            ..SecurityPolicy::default()
        });
        register(&service, "alice", "correct-horse");
        let err = service
            .authenticate(
                AuthRequest::new("alice", "correct-horse").with_second_factor("123456"),
                OriginContext::default(),
            )
            .unwrap_err();
        assert!(matches!(err, AppError::AuthFailure(ref r) if r == "second_factor_unavailable"));
    }

    #[test]
    fn test_logout_then_validate() {
        let (service, _) = service();
        register(&service, "alice", "correct-horse");
        let session = service
            .authenticate(AuthRequest::new("alice", "correct-horse"), OriginContext::default())
            .unwrap();

        assert!(service.logout(&session.id, OriginContext::default()).unwrap());
        assert!(matches!(
            service.validate_session(&session.id),
            Err(AppError::SessionInvalid(_))
        ));
        assert!(!service.logout(&session.id, OriginContext::default()).unwrap());
    }

    #[test]
    fn test_require_permission() {
        let (service, _) = service();
        register(&service, "alice", "correct-horse");
        let session = service
            .authenticate(AuthRequest::new("alice", "correct-horse"), OriginContext::default())
            .unwrap();

        assert!(service.require_permission(&session.id, "read").is_ok());
        assert!(matches!(
            service.require_permission(&session.id, "admin"),
            Err(AppError::Forbidden)
        ));
        assert!(service.require_permission("bogus", "read").unwrap_err().is_session_error());
    }

    #[test]
    fn test_scan_payload_is_audited() {
        let (service, _) = service();
        let verdict = service
            .scan_payload(&json!("<script>alert(1)</script>"), OriginContext::default())
            .unwrap();
        assert_eq!(verdict.action, ThreatAction::Monitor);

        let scans = service.list_audit_events(Some(AuditEventType::ThreatScan), 10).unwrap();
        assert_eq!(scans.len(), 1);
        assert_eq!(scans[0].details["risk_score"], 40);
        assert_eq!(scans[0].details["action"], "monitor");
    }

    #[test]
    fn test_reload_policy_is_audited_and_applies() {
        let (service, _) = service();
        let installed = service
            .reload_policy(
                SecurityPolicy {
                    password_min_length: 12,
                    ..SecurityPolicy::default()
                },
                OriginContext::internal(),
            )
            .unwrap();
        assert_eq!(installed.version, 2);

        let err = service
            .authenticate(AuthRequest::new("alice", "elevenchars"), OriginContext::default())
            .unwrap_err();
        assert!(matches!(err, AppError::AuthFailure(ref r) if r == "weak_password"));

        let reloads = service.list_audit_events(Some(AuditEventType::PolicyReloaded), 10).unwrap();
        assert_eq!(reloads[0].details["previous_version"], 1);
        assert_eq!(reloads[0].details["version"], 2);
    }

    #[test]
    fn test_encrypt_requires_cipher() {
        let (service, _) = service();
        assert!(matches!(service.encrypt(b"x", b""), Err(AppError::CryptoError(_))));

        let service = TrustService::builder(SecurityPolicy::default())
            .with_cipher(Arc::new(Aes256GcmCipher::generate()))
            .build()
            .unwrap();
        let sealed = service.encrypt(b"ssn 000-00-0000", b"alice").unwrap();
        assert_eq!(service.decrypt(&sealed, b"alice").unwrap(), b"ssn 000-00-0000");
    }

    #[test]
    fn test_health_and_chain() {
        let (service, _) = service();
        register(&service, "alice", "correct-horse");
        service
            .authenticate(AuthRequest::new("alice", "correct-horse"), OriginContext::default())
            .unwrap();
        let _ = service.authenticate(AuthRequest::new("alice", "nope"), OriginContext::default());

        let health = service.health().unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.active_sessions, 1);
        assert_eq!(health.registered_credentials, 1);
        assert_eq!(health.audit_events, 3);
        assert!(health.audit_chain_intact);
        assert_eq!(health.encryption_algorithm, None);
    }

    #[test]
    fn test_short_registration_rejected() {
        let (service, _) = service();
        let err = service
            .register_credential("alice", &SecretString::from("short".to_string()), OriginContext::default())
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(service.list_audit_events(None, 10).unwrap().is_empty());
    }

    #[test]
    fn test_registration_cannot_take_over_principal() {
        let (service, _) = service();
        register(&service, "alice", "correct-horse");
        let err = service
            .register_credential("alice", &SecretString::from("attacker-secret".to_string()), OriginContext::default())
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
        assert!(service
            .authenticate(AuthRequest::new("alice", "correct-horse"), OriginContext::default())
            .is_ok());
    }
}
