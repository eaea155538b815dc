//! Configuration fingerprint
//!
//! Stored consent is only honoured while the rule and category configuration
//! it was given for is still in effect. The fingerprint changes whenever any
//! active rule or the set of configured categories changes.

use sha2::{Digest, Sha256};

use crate::rule::Rule;

/// Compute the version hash of a rule list and category configuration.
///
/// Rule order is significant (first match wins), category order is not.
/// Inactive rules do not contribute.
pub fn version_hash(rules: &[Rule], categories: &[String]) -> String {
    let mut hasher = Sha256::new();

    for rule in rules.iter().filter(|rule| rule.active) {
        // serializing a plain record cannot fail
        let record = serde_json::to_string(&rule.to_record()).unwrap_or_default();
        hasher.update(record.as_bytes());
        hasher.update(b"\n");
    }

    let mut sorted: Vec<&str> = categories.iter().map(|c| c.trim()).collect();
    sorted.sort_unstable();
    sorted.dedup();

    hasher.update(b"--categories--\n");
    for category in sorted {
        hasher.update(category.as_bytes());
        hasher.update(b"\n");
    }

    format!("{:x}", hasher.finalize())
}
