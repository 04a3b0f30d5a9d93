use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use crate::auth::token::random_bytes;
use crate::auth::utils::Clock;
use crate::errors::{AppError, Result};
use crate::models::ses::OriginContext;

type HmacSha256 = Hmac<Sha256>;

/// `prev_hash` of the first event in a log
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit event for security logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: String,
    /// Position in the log, starting at 0
    pub sequence: u64,
    /// Timestamp when event occurred
    pub timestamp: DateTime<Utc>,
    /// Event type
    pub event_type: AuditEventType,
    /// Structured event payload
    pub details: Value,
    /// Caller context
    pub origin: OriginContext,
    /// Hash of the preceding event
    pub prev_hash: String,
    /// Keyed hash over this event and `prev_hash`
    pub hash: String,
}

/// Types of audit events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    SessionCreated,
    SessionDestroyed,
    SessionExpired,
    LoginFailed,
    AccountLocked,
    CredentialRegistered,
    ThreatScan,
    PolicyReloaded,
}

impl AuditEventType {
    pub const ALL: [AuditEventType; 8] = [
        AuditEventType::SessionCreated,
        AuditEventType::SessionDestroyed,
        AuditEventType::SessionExpired,
        AuditEventType::LoginFailed,
        AuditEventType::AccountLocked,
        AuditEventType::CredentialRegistered,
        AuditEventType::ThreatScan,
        AuditEventType::PolicyReloaded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::SessionCreated => "session_created",
            AuditEventType::SessionDestroyed => "session_destroyed",
            AuditEventType::SessionExpired => "session_expired",
            AuditEventType::LoginFailed => "login_failed",
            AuditEventType::AccountLocked => "account_locked",
            AuditEventType::CredentialRegistered => "credential_registered",
            AuditEventType::ThreatScan => "threat_scan",
            AuditEventType::PolicyReloaded => "policy_reloaded",
        }
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditEventType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        AuditEventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::bad_request(format!("Unknown audit event type: {}", s)))
    }
}

/// First event whose stored hash does not match its contents or predecessor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainBreak {
    pub sequence: u64,
    pub reason: &'static str,
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "audit chain broken at event {}: {}", self.sequence, self.reason)
    }
}

/// Durable mirror for audit events
pub trait AuditSink: Send + Sync {
    fn write(&self, event: &AuditEvent) -> Result<()>;
}

/// Appends one JSON object per line to a file
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::storage(format!("Failed to create audit log directory {}: {}", parent.display(), e))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::storage(format!("Failed to open audit log file {}: {}", path.display(), e)))?;
        Ok(Self { path, file: Mutex::new(file) })
    }
}

impl AuditSink for JsonLinesSink {
    fn write(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| AppError::storage("audit file lock poisoned"))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| AppError::storage(format!("Failed to write audit log {}: {}", self.path.display(), e)))
    }
}

/// Append-only, hash-chained record of security events
pub struct AuditLog {
    events: RwLock<Vec<AuditEvent>>,
    chain_key: Vec<u8>,
    sink: Option<Arc<dyn AuditSink>>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    /// In-memory log keyed with a fresh random chain key
    pub fn new(clock: Arc<dyn Clock>) -> Result<Self> {
        Ok(Self::with_key(random_bytes(32)?, clock))
    }

    pub fn with_key(chain_key: Vec<u8>, clock: Arc<dyn Clock>) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            chain_key,
            sink: None,
            clock,
        }
    }

    /// Mirror every appended event to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Append an event. Fails only when the events cannot be stored.
    pub fn append(&self, event_type: AuditEventType, details: Value, origin: OriginContext) -> Result<AuditEvent> {
        let mut events = self
            .events
            .write()
            .map_err(|_| AppError::storage("audit log lock poisoned"))?;

        let sequence = events.len() as u64;
        let prev_hash = events
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());

        let mut event = AuditEvent {
            id: uuid::Uuid::new_v4().to_string(),
            sequence,
            timestamp: self.clock.now(),
            event_type,
            details,
            origin,
            prev_hash,
            hash: String::new(),
        };
        event.hash = self.compute_hash(&event)?;

        if let Some(sink) = &self.sink {
            sink.write(&event)?;
        }

        tracing::info!(
            target: "audit",
            sequence = event.sequence,
            event_type = %event.event_type,
            details = %event.details,
            "Security event"
        );

        events.push(event.clone());
        Ok(event)
    }

    /// The most recent `limit` events, optionally of one type, oldest first
    pub fn query(&self, type_filter: Option<AuditEventType>, limit: usize) -> Result<Vec<AuditEvent>> {
        let events = self
            .events
            .read()
            .map_err(|_| AppError::storage("audit log lock poisoned"))?;

        let mut selected: Vec<AuditEvent> = events
            .iter()
            .rev()
            .filter(|e| type_filter.map_or(true, |t| e.event_type == t))
            .take(limit)
            .cloned()
            .collect();
        selected.reverse();
        Ok(selected)
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute every link of the chain
    pub fn verify_chain(&self) -> Result<std::result::Result<(), ChainBreak>> {
        let events = self
            .events
            .read()
            .map_err(|_| AppError::storage("audit log lock poisoned"))?;
        Ok(self.verify_events(&events))
    }

    fn verify_events(&self, events: &[AuditEvent]) -> std::result::Result<(), ChainBreak> {
        let mut expected_prev = GENESIS_HASH.to_string();
        for (index, event) in events.iter().enumerate() {
            let sequence = index as u64;
            if event.sequence != sequence {
                return Err(ChainBreak { sequence, reason: "sequence gap" });
            }
            if event.prev_hash != expected_prev {
                return Err(ChainBreak { sequence, reason: "prev_hash mismatch" });
            }
            match self.compute_hash(event) {
                Ok(hash) if hash == event.hash => {}
                _ => return Err(ChainBreak { sequence, reason: "content hash mismatch" }),
            }
            expected_prev = event.hash.clone();
        }
        Ok(())
    }

    fn compute_hash(&self, event: &AuditEvent) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.chain_key)
            .map_err(|e| AppError::storage(format!("audit chain key error: {}", e)))?;

        mac.update(event.prev_hash.as_bytes());
        mac.update(&event.sequence.to_be_bytes());
        mac.update(event.id.as_bytes());
        mac.update(event.timestamp.to_rfc3339().as_bytes());
        mac.update(event.event_type.as_str().as_bytes());
        mac.update(serde_json::to_string(&event.details)?.as_bytes());
        mac.update(serde_json::to_string(&event.origin)?.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::utils::SystemClock;
    use serde_json::json;

    fn log() -> AuditLog {
        AuditLog::with_key(b"test-chain-key".to_vec(), Arc::new(SystemClock))
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn write(&self, _event: &AuditEvent) -> Result<()> {
            Err(AppError::storage("disk full"))
        }
    }

    #[test]
    fn test_append_then_query_round_trip() {
        let log = log();
        for i in 0..5 {
            log.append(AuditEventType::ThreatScan, json!({ "n": i }), OriginContext::default())
                .unwrap();
        }

        let events = log.query(None, 5).unwrap();
        assert_eq!(events.len(), 5);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.sequence, i as u64);
            assert_eq!(event.details["n"], i);
        }
    }

    #[test]
    fn test_query_returns_most_recent_in_order() {
        let log = log();
        for i in 0..10 {
            log.append(AuditEventType::ThreatScan, json!({ "n": i }), OriginContext::default())
                .unwrap();
        }

        let events = log.query(None, 3).unwrap();
        let ns: Vec<i64> = events.iter().map(|e| e.details["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, vec![7, 8, 9]);
    }

    #[test]
    fn test_query_filters_before_limiting() {
        let log = log();
        log.append(AuditEventType::LoginFailed, json!({ "n": 0 }), OriginContext::default()).unwrap();
        log.append(AuditEventType::ThreatScan, json!({ "n": 1 }), OriginContext::default()).unwrap();
        log.append(AuditEventType::LoginFailed, json!({ "n": 2 }), OriginContext::default()).unwrap();
        log.append(AuditEventType::ThreatScan, json!({ "n": 3 }), OriginContext::default()).unwrap();

        let failed = log.query(Some(AuditEventType::LoginFailed), 10).unwrap();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|e| e.event_type == AuditEventType::LoginFailed));
        assert_eq!(failed[1].details["n"], 2);
    }

    #[test]
    fn test_query_is_a_snapshot() {
        let log = log();
        log.append(AuditEventType::ThreatScan, json!({}), OriginContext::default()).unwrap();
        let snapshot = log.query(None, 10).unwrap();
        log.append(AuditEventType::ThreatScan, json!({}), OriginContext::default()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_chain_links_and_verifies() {
        let log = log();
        let first = log.append(AuditEventType::SessionCreated, json!({}), OriginContext::default()).unwrap();
        let second = log.append(AuditEventType::SessionDestroyed, json!({}), OriginContext::default()).unwrap();

        assert_eq!(first.prev_hash, GENESIS_HASH);
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(log.verify_chain().unwrap(), Ok(()));
    }

    #[test]
    fn test_tampering_is_detected() {
        let log = log();
        for i in 0..3 {
            log.append(AuditEventType::LoginFailed, json!({ "principal": format!("user{}", i) }), OriginContext::default())
                .unwrap();
        }

        log.events.write().unwrap()[1].details = json!({ "principal": "someone-else" });

        let result = log.verify_chain().unwrap();
        assert_eq!(result, Err(ChainBreak { sequence: 1, reason: "content hash mismatch" }));
    }

    #[test]
    fn test_removal_is_detected() {
        let log = log();
        for _ in 0..3 {
            log.append(AuditEventType::ThreatScan, json!({}), OriginContext::default()).unwrap();
        }
        log.events.write().unwrap().remove(1);
        assert!(log.verify_chain().unwrap().is_err());
    }

    #[test]
    fn test_sink_failure_is_reported_and_not_appended() {
        let log = log().with_sink(Arc::new(FailingSink));
        let err = log
            .append(AuditEventType::ThreatScan, json!({}), OriginContext::default())
            .unwrap_err();
        assert!(matches!(err, AppError::StorageFault(_)));
        assert!(log.is_empty());
    }

    #[test]
    fn test_json_lines_sink_writes_each_event() {
        let path = std::env::temp_dir().join(format!("veilguard-audit-{}.jsonl", uuid::Uuid::new_v4()));
        let sink = Arc::new(JsonLinesSink::open(&path).unwrap());
        let log = log().with_sink(sink);

        log.append(AuditEventType::SessionCreated, json!({ "principal": "alice" }), OriginContext::default()).unwrap();
        log.append(AuditEventType::SessionDestroyed, json!({ "principal": "alice" }), OriginContext::default()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditEvent = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.event_type, AuditEventType::SessionDestroyed);
        assert_eq!(parsed.sequence, 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_event_type_parsing() {
        for t in AuditEventType::ALL {
            assert_eq!(t.as_str().parse::<AuditEventType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), json!(t.as_str()));
        }
        assert!("nope".parse::<AuditEventType>().is_err());
    }
}
