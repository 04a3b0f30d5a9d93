use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;
use crate::models::security::{SecurityPolicy, ThreatVerdict};

/// One independent heuristic in the scoring registry
pub trait SignalDetector: Send + Sync {
    /// Signal name reported in verdicts
    fn name(&self) -> &str;

    /// Score contribution when the signal fires
    fn weight(&self) -> u32;

    fn matches(&self, text: &str, policy: &SecurityPolicy) -> bool;
}

static XSS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)<\s*/?\s*script\b|javascript\s*:").expect("xss regex is valid")
});

static SCRIPT_EXECUTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\balert\s*\(|\beval\s*\(|document\s*\.\s*cookie|\bon[a-z]+\s*=\s*["']?"#)
        .expect("script execution regex is valid")
});

static UNION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bunion\b").expect("union regex is valid"));

static SELECT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bselect\b").expect("select regex is valid"));

/// Markup script tags and `javascript:` URIs
pub struct PotentialXss;

impl SignalDetector for PotentialXss {
    fn name(&self) -> &str {
        "potential_xss"
    }

    fn weight(&self) -> u32 {
        30
    }

    fn matches(&self, text: &str, _policy: &SecurityPolicy) -> bool {
        XSS_PATTERN.is_match(text)
    }
}

/// Common JavaScript execution sinks
pub struct ScriptExecution;

impl SignalDetector for ScriptExecution {
    fn name(&self) -> &str {
        "script_execution"
    }

    fn weight(&self) -> u32 {
        10
    }

    fn matches(&self, text: &str, _policy: &SecurityPolicy) -> bool {
        SCRIPT_EXECUTION_PATTERN.is_match(text)
    }
}

/// `union` and `select` keywords in the same payload
pub struct PotentialSqlInjection;

impl SignalDetector for PotentialSqlInjection {
    fn name(&self) -> &str {
        "potential_sql_injection"
    }

    fn weight(&self) -> u32 {
        50
    }

    fn matches(&self, text: &str, _policy: &SecurityPolicy) -> bool {
        UNION_PATTERN.is_match(text) && SELECT_PATTERN.is_match(text)
    }
}

/// Payloads longer than the policy allows
pub struct OversizedRequest;

impl SignalDetector for OversizedRequest {
    fn name(&self) -> &str {
        "oversized_request"
    }

    fn weight(&self) -> u32 {
        20
    }

    fn matches(&self, text: &str, policy: &SecurityPolicy) -> bool {
        text.len() > policy.max_payload_bytes
    }
}

/// Ordered registry of signal detectors
#[derive(Clone)]
pub struct ThreatScorer {
    detectors: Vec<Arc<dyn SignalDetector>>,
}

impl Default for ThreatScorer {
    fn default() -> Self {
        Self {
            detectors: vec![
                Arc::new(PotentialXss),
                Arc::new(ScriptExecution),
                Arc::new(PotentialSqlInjection),
                Arc::new(OversizedRequest),
            ],
        }
    }
}

impl ThreatScorer {
    /// Scorer with the built-in detectors
    pub fn new() -> Self {
        Self::default()
    }

    /// Scorer with no detectors at all
    pub fn empty() -> Self {
        Self { detectors: Vec::new() }
    }

    /// Append a detector to the end of the registry
    pub fn with_detector(mut self, detector: Arc<dyn SignalDetector>) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Score a payload against the policy. Pure: same input, same verdict.
    pub fn score(&self, payload: &Value, policy: &SecurityPolicy) -> ThreatVerdict {
        let text = canonical_text(payload);

        let mut detected_signals = Vec::new();
        let mut risk_score: u32 = 0;
        for detector in &self.detectors {
            if detector.matches(&text, policy) {
                detected_signals.push(detector.name().to_string());
                risk_score = risk_score.saturating_add(detector.weight());
            }
        }

        ThreatVerdict {
            detected_signals,
            risk_score,
            action: policy.classify(risk_score),
        }
    }
}

/// Text the detectors see: raw contents for a JSON string, compact JSON otherwise
pub fn canonical_text(payload: &Value) -> Cow<'_, str> {
    match payload {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}
