//! Stored consent decisions

use chrono::{DateTime, TimeDelta, Utc};
use consentry_core::AcceptedCategories;
use serde::{Deserialize, Serialize};

/// Default lifetime of a consent decision
pub const DEFAULT_LIFETIME_DAYS: i64 = 365;

/// A consent decision persisted by the consent-submission path.
///
/// The engine only reads records; it never creates or updates them on behalf
/// of a visitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Opaque unique identifier
    pub consent_id: String,

    /// Configuration fingerprint in effect when consent was given
    pub version_hash: String,

    /// Categories the visitor accepted
    #[serde(default)]
    pub accepted_categories: AcceptedCategories,

    /// Absolute expiry
    pub expiry: DateTime<Utc>,
}

impl ConsentRecord {
    /// Create a record issued at `issued_at` that lasts `lifetime_days`.
    ///
    /// A lifetime past the representable range never expires.
    pub fn new(
        consent_id: impl Into<String>,
        version_hash: impl Into<String>,
        accepted_categories: AcceptedCategories,
        issued_at: DateTime<Utc>,
        lifetime_days: i64,
    ) -> Self {
        Self {
            consent_id: consent_id.into(),
            version_hash: version_hash.into(),
            accepted_categories,
            expiry: expiry_after(issued_at, lifetime_days).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Like [`ConsentRecord::new`], but `None` when the expiry is out of range
    pub fn try_new(
        consent_id: impl Into<String>,
        version_hash: impl Into<String>,
        accepted_categories: AcceptedCategories,
        issued_at: DateTime<Utc>,
        lifetime_days: i64,
    ) -> Option<Self> {
        Some(Self {
            consent_id: consent_id.into(),
            version_hash: version_hash.into(),
            accepted_categories,
            expiry: expiry_after(issued_at, lifetime_days)?,
        })
    }

    /// Whether the record has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry <= now
    }

    /// Whether the record is valid for the configuration `version_hash` at `now`
    pub fn is_valid_at(&self, version_hash: &str, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && self.version_hash == version_hash
    }
}

fn expiry_after(issued_at: DateTime<Utc>, lifetime_days: i64) -> Option<DateTime<Utc>> {
    let lifetime = TimeDelta::try_days(lifetime_days.max(0))?;
    issued_at.checked_add_signed(lifetime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(expiry_days: i64) -> ConsentRecord {
        ConsentRecord::new(
            "c1",
            "hash-a",
            AcceptedCategories::from_iter(["analytics"]),
            Utc::now(),
            expiry_days,
        )
    }

    #[test]
    fn test_validity() {
        let now = Utc::now();
        let r = record(DEFAULT_LIFETIME_DAYS);
        assert!(r.is_valid_at("hash-a", now));
        assert!(!r.is_valid_at("hash-b", now));
        assert!(!r.is_valid_at("hash-a", now + Duration::days(400)));
    }

    #[test]
    fn test_zero_lifetime_is_expired() {
        let r = record(0);
        assert!(r.is_expired_at(r.expiry));
    }

    #[test]
    fn test_record_json() {
        let json = r#"{
            "consent_id": "abc",
            "version_hash": "h",
            "accepted_categories": ["marketing"],
            "expiry": "2030-01-01T00:00:00Z"
        }"#;
        let r: ConsentRecord = serde_json::from_str(json).unwrap();
        assert!(r.accepted_categories.is_accepted("marketing"));
        assert!(!r.is_expired_at("2029-12-31T23:59:59Z".parse().unwrap()));
    }

    #[test]
    fn test_out_of_range_lifetime() {
        let now = Utc::now();
        let categories = AcceptedCategories::from_iter(["analytics"]);
        assert!(ConsentRecord::try_new("c1", "h", categories.clone(), now, 1_000_000_000_000_000).is_none());
        assert!(ConsentRecord::try_new("c1", "h", categories.clone(), now, 30).is_some());

        let forever = ConsentRecord::new("c1", "h", categories, now, i64::MAX);
        assert!(!forever.is_expired_at(now));
    }
}
