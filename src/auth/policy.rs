//! Security policy snapshots and compliance rule lookups.
//!
//! Readers take an `Arc` to the current snapshot and keep it for the rest of
//! the request, so a reload never changes a policy mid-evaluation. Reloads
//! swap the pointer atomically via `arc-swap`.

use arc_swap::ArcSwap;
use serde_json::{Map, Value};
use std::sync::Arc;
use crate::errors::{AppError, Result};
use crate::models::security::{ComplianceReport, SecurityPolicy};

/// Rule table: (match on, key, requirements)
const COMPLIANCE_RULES: &[(RuleScope, &str, &[&str])] = &[
    (
        RuleScope::DataCategory,
        "personal_data",
        &["user_consent_required", "data_retention_policy", "right_to_deletion"],
    ),
    (RuleScope::Operation, "data_export", &["data_portability"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleScope {
    DataCategory,
    Operation,
}

pub struct PolicyEngine {
    current: ArcSwap<SecurityPolicy>,
}

impl PolicyEngine {
    /// Install the initial policy as version 1
    pub fn new(initial: SecurityPolicy) -> Result<Self> {
        let initial = validated(initial, 1)?;
        Ok(Self {
            current: ArcSwap::from_pointee(initial),
        })
    }

    /// Current immutable snapshot
    pub fn get(&self) -> Arc<SecurityPolicy> {
        self.current.load_full()
    }

    /// Replace the policy. The incoming `version` is ignored and reassigned.
    ///
    /// An invalid policy leaves the current snapshot in place.
    pub fn reload(&self, policy: SecurityPolicy) -> Result<Arc<SecurityPolicy>> {
        self.swap_with(|_| Ok(policy.clone()))
    }

    /// Overlay the fields named in `patch` onto the current snapshot.
    ///
    /// Omitted fields keep their current values. Unknown fields are rejected.
    pub fn patch(&self, patch: &Value) -> Result<Arc<SecurityPolicy>> {
        let fields = patch
            .as_object()
            .ok_or_else(|| AppError::validation("policy update must be a JSON object"))?;
        self.swap_with(|previous| merged(previous, fields))
    }

    fn swap_with<F>(&self, next: F) -> Result<Arc<SecurityPolicy>>
    where
        F: Fn(&SecurityPolicy) -> Result<SecurityPolicy>,
    {
        let mut installed = None;
        let mut failure = None;

        self.current.rcu(|previous| {
            match next(previous).and_then(|policy| validated(policy, previous.version + 1)) {
                Ok(policy) => {
                    let policy = Arc::new(policy);
                    installed = Some(policy.clone());
                    failure = None;
                    policy
                }
                Err(e) => {
                    installed = None;
                    failure = Some(e);
                    previous.clone()
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        let installed = installed.ok_or_else(|| AppError::configuration("policy swap produced no snapshot"))?;
        tracing::info!(version = installed.version, "Security policy reloaded");
        Ok(installed)
    }

    /// Requirements that apply to `operation` on `data_category`
    pub fn check_compliance(&self, data_category: &str, operation: &str) -> ComplianceReport {
        let requirements = COMPLIANCE_RULES
            .iter()
            .filter(|(scope, key, _)| match scope {
                RuleScope::DataCategory => *key == data_category,
                RuleScope::Operation => *key == operation,
            })
            .flat_map(|(_, _, reqs)| reqs.iter().map(|r| r.to_string()))
            .collect();

        ComplianceReport {
            gdpr_compliant: true,
            ccpa_compliant: true,
            soc2_compliant: true,
            requirements,
        }
    }
}

fn merged(current: &SecurityPolicy, fields: &Map<String, Value>) -> Result<SecurityPolicy> {
    let mut merged = serde_json::to_value(current)?;
    let target = merged
        .as_object_mut()
        .ok_or_else(|| AppError::configuration("policy did not serialize to an object"))?;

    for (key, value) in fields {
        if key == "version" {
            continue;
        }
        match target.get_mut(key) {
            Some(slot) => *slot = value.clone(),
            None => return Err(AppError::validation(format!("unknown policy field: {}", key))),
        }
    }

    serde_json::from_value(merged)
        .map_err(|e| AppError::validation(format!("invalid policy update: {}", e)))
}

fn validated(mut policy: SecurityPolicy, version: u64) -> Result<SecurityPolicy> {
    let problems = policy.problems();
    if !problems.is_empty() {
        return Err(AppError::validation(problems.join("; ")));
    }
    policy.version = version;
    Ok(policy)
}
