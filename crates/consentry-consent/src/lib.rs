//! Consentry Consent
//!
//! Determines what a visitor has agreed to.
//!
//! Provides:
//! - Lenient parsing of the consent cookie and request cookie headers
//! - Stored consent records with expiry and configuration fingerprint
//! - The [`ConsentOracle`], which answers "is there valid consent" and
//!   "which categories are accepted" and degrades to "no consent" on any
//!   malformed input

pub mod cookie;
pub mod oracle;
pub mod record;
pub mod store;
pub mod token;

pub use cookie::CookieJar;
pub use oracle::ConsentOracle;
pub use record::ConsentRecord;
pub use store::{ConsentStore, MemoryConsentStore};
pub use token::{ClientPreferences, ConsentToken};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::cookie::CookieJar;
    pub use crate::oracle::ConsentOracle;
    pub use crate::record::ConsentRecord;
    pub use crate::store::{ConsentStore, MemoryConsentStore};
    pub use crate::token::ConsentToken;
}
