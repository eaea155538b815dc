//! Consent record lookup

use chrono::{DateTime, Utc};
use consentry_core::{AcceptedCategories, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::record::ConsentRecord;

/// Read access to stored consent records
pub trait ConsentStore: Send + Sync {
    /// Fetch the record stored under `consent_id`
    fn get(&self, consent_id: &str) -> Option<ConsentRecord>;
}

impl<S: ConsentStore + ?Sized> ConsentStore for Arc<S> {
    fn get(&self, consent_id: &str) -> Option<ConsentRecord> {
        (**self).get(consent_id)
    }
}

/// Records held in memory, keyed by consent id
#[derive(Debug, Clone, Default)]
pub struct MemoryConsentStore {
    records: HashMap<String, ConsentRecord>,
}

impl MemoryConsentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from records; later duplicates replace earlier ones
    pub fn from_records(records: impl IntoIterator<Item = ConsentRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    /// Load a JSON array of records.
    ///
    /// Entries carry either an absolute `expiry` or an `issued_at` timestamp,
    /// which is extended by `lifetime_days`. Entries with neither are skipped.
    pub fn from_json_file(path: impl AsRef<Path>, lifetime_days: i64) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<StoredRecord> = serde_json::from_str(&content)?;

        let records = entries
            .into_iter()
            .filter_map(|entry| entry.into_record(lifetime_days));
        let store = Self::from_records(records);
        info!(path = %path.display(), records = store.len(), "Loaded consent records");
        Ok(store)
    }

    /// Add or replace a record
    pub fn insert(&mut self, record: ConsentRecord) {
        self.records.insert(record.consent_id.clone(), record);
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Record layout accepted in record files
#[derive(Debug, Deserialize)]
struct StoredRecord {
    consent_id: String,
    version_hash: String,
    #[serde(default)]
    accepted_categories: AcceptedCategories,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    issued_at: Option<DateTime<Utc>>,
}

impl StoredRecord {
    fn into_record(self, lifetime_days: i64) -> Option<ConsentRecord> {
        match (self.expiry, self.issued_at) {
            (Some(expiry), _) => Some(ConsentRecord {
                consent_id: self.consent_id,
                version_hash: self.version_hash,
                accepted_categories: self.accepted_categories,
                expiry,
            }),
            (None, Some(issued_at)) => {
                let record = ConsentRecord::try_new(
                    self.consent_id.clone(),
                    self.version_hash,
                    self.accepted_categories,
                    issued_at,
                    lifetime_days,
                );
                if record.is_none() {
                    warn!(
                        consent_id = %self.consent_id,
                        lifetime_days,
                        "Consent lifetime out of range, record skipped"
                    );
                }
                record
            }
            (None, None) => {
                warn!(consent_id = %self.consent_id, "Consent record has no expiry or issue date, skipped");
                None
            }
        }
    }
}

impl ConsentStore for MemoryConsentStore {
    fn get(&self, consent_id: &str) -> Option<ConsentRecord> {
        self.records.get(consent_id).cloned()
    }
}
