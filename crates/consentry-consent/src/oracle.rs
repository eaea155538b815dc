//! Consent-state oracle

use chrono::{DateTime, Utc};
use consentry_core::types::category;
use consentry_core::AcceptedCategories;
use tracing::debug;

use crate::record::ConsentRecord;
use crate::store::ConsentStore;
use crate::token::ConsentToken;

/// Answers consent questions for one configuration fingerprint.
///
/// Every query degrades to "no consent" when the token is malformed, carries
/// no identifier, or points at a missing, expired or outdated record.
#[derive(Debug, Clone)]
pub struct ConsentOracle<S> {
    store: S,
    version_hash: String,
}

impl<S: ConsentStore> ConsentOracle<S> {
    /// Create an oracle over `store` for the active configuration hash
    pub fn new(store: S, version_hash: impl Into<String>) -> Self {
        Self {
            store,
            version_hash: version_hash.into(),
        }
    }

    /// Active configuration fingerprint
    pub fn version_hash(&self) -> &str {
        &self.version_hash
    }

    /// Whether `token` refers to a stored, unexpired record for the active
    /// configuration
    pub fn has_valid_consent(&self, token: &ConsentToken) -> bool {
        self.has_valid_consent_at(token, Utc::now())
    }

    /// [`Self::has_valid_consent`] evaluated at `now`
    pub fn has_valid_consent_at(&self, token: &ConsentToken, now: DateTime<Utc>) -> bool {
        self.valid_record(token, now).is_some()
    }

    /// Categories the visitor accepted; empty without valid consent.
    ///
    /// `necessary` is accepted implicitly by [`AcceptedCategories`] whatever
    /// the record holds. Categories the browser cookie lists as rejected are
    /// removed from the stored set.
    pub fn accepted_categories(&self, token: &ConsentToken) -> AcceptedCategories {
        self.accepted_categories_at(token, Utc::now())
    }

    /// [`Self::accepted_categories`] evaluated at `now`
    pub fn accepted_categories_at(
        &self,
        token: &ConsentToken,
        now: DateTime<Utc>,
    ) -> AcceptedCategories {
        let Some(record) = self.valid_record(token, now) else {
            return AcceptedCategories::none();
        };

        let mut accepted = record.accepted_categories;
        if let Some(prefs) = token.preferences() {
            for rejected in &prefs.rejected {
                accepted.remove(rejected);
            }
        }
        accepted
    }

    /// Whether `name` is accepted for `token`
    pub fn is_category_accepted(&self, token: &ConsentToken, name: &str) -> bool {
        name == category::NECESSARY || self.accepted_categories(token).is_accepted(name)
    }

    fn valid_record(&self, token: &ConsentToken, now: DateTime<Utc>) -> Option<ConsentRecord> {
        if token.is_malformed() {
            debug!("Consent token malformed, treating as no consent");
            return None;
        }

        let consent_id = token.consent_id()?;
        let record = self.store.get(consent_id)?;

        if record.is_expired_at(now) {
            debug!(consent_id = %consent_id, "Consent record expired");
            return None;
        }
        if record.version_hash != self.version_hash {
            debug!(consent_id = %consent_id, "Consent record predates configuration change");
            return None;
        }
        Some(record)
    }
}
