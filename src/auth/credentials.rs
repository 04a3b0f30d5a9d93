use std::collections::HashMap;
use std::sync::RwLock;
use crate::errors::{AppError, Result};
use crate::models::security::CredentialRecord;

/// In-memory credential records keyed by principal
#[derive(Debug, Default)]
pub struct CredentialStore {
    records: RwLock<HashMap<String, CredentialRecord>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the record for a new principal. An existing record is never overwritten.
    pub fn register(&self, principal: &str, record: CredentialRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| AppError::storage("credential store lock poisoned"))?;
        if records.contains_key(principal) {
            return Err(AppError::validation("principal is already registered"));
        }
        records.insert(principal.to_string(), record);
        Ok(())
    }

    pub fn get(&self, principal: &str) -> Result<Option<CredentialRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| AppError::storage("credential store lock poisoned"))?;
        Ok(records.get(principal).cloned())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
