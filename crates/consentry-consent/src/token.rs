//! Consent tokens carried by requests

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use tracing::debug;

use crate::cookie::CookieJar;

/// Decision the browser stored in the consent cookie.
///
/// Expected shape: `{"accepted": [...], "rejected": [...], "timestamp": "..."}`
/// with an optional `consent_id`. A bare JSON array is read as the accepted
/// list. Category identifiers may be strings or numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPreferences {
    /// Categories the visitor switched on
    pub accepted: Vec<String>,

    /// Categories the visitor switched off
    pub rejected: Vec<String>,

    /// When the decision was made, if the cookie carried a valid timestamp
    pub timestamp: Option<DateTime<Utc>>,

    /// Identifier of the server-side consent record
    pub consent_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PreferencesShape {
    Object {
        #[serde(default, deserialize_with = "category_list")]
        accepted: Vec<String>,
        #[serde(default, deserialize_with = "category_list")]
        rejected: Vec<String>,
        #[serde(default)]
        timestamp: Option<String>,
        #[serde(default)]
        consent_id: Option<String>,
    },
    List(#[serde(deserialize_with = "category_list")] Vec<String>),
}

impl ClientPreferences {
    /// Parse the cookie value. Returns `None` for anything that is not one of
    /// the accepted shapes.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        // some CMS layers escape quotes before storing the cookie
        let unescaped;
        let raw = if raw.contains("\\\"") {
            unescaped = raw.replace("\\\"", "\"");
            unescaped.as_str()
        } else {
            raw
        };

        match serde_json::from_str::<PreferencesShape>(raw) {
            Ok(PreferencesShape::Object {
                accepted,
                rejected,
                timestamp,
                consent_id,
            }) => Some(Self {
                accepted,
                rejected,
                timestamp: timestamp.as_deref().and_then(parse_timestamp),
                consent_id: consent_id.filter(|id| !id.trim().is_empty()),
            }),
            Ok(PreferencesShape::List(accepted)) => Some(Self {
                accepted,
                ..Self::default()
            }),
            Err(e) => {
                debug!(error = %e, "Ignoring malformed consent cookie");
                None
            }
        }
    }
}

/// Consent information extracted from one request.
///
/// A token never fails to build: malformed input yields a token that the
/// oracle treats as "no consent".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsentToken {
    preferences: Option<ClientPreferences>,
    consent_id: Option<String>,
    malformed: bool,
}

impl ConsentToken {
    /// Token for a request that carried no consent information
    pub fn absent() -> Self {
        Self::default()
    }

    /// Parse a raw consent cookie value
    pub fn parse(raw: &str) -> Self {
        let preferences = ClientPreferences::parse(raw);
        Self {
            malformed: preferences.is_none() && !raw.trim().is_empty(),
            preferences,
            consent_id: None,
        }
    }

    /// Build a token from request cookies.
    ///
    /// `preferences_cookie` holds the JSON decision, `id_cookie` the identifier
    /// of the stored record.
    pub fn from_cookies(jar: &CookieJar, preferences_cookie: &str, id_cookie: &str) -> Self {
        let mut token = jar
            .get(preferences_cookie)
            .map(Self::parse)
            .unwrap_or_default();

        if let Some(id) = jar.get(id_cookie).map(str::trim).filter(|id| !id.is_empty()) {
            token.consent_id = Some(id.to_string());
        }
        token
    }

    /// Attach an explicit consent record identifier
    pub fn with_consent_id(mut self, id: impl Into<String>) -> Self {
        self.consent_id = Some(id.into());
        self
    }

    /// Identifier of the stored consent record.
    ///
    /// The dedicated id cookie takes precedence over an id embedded in the
    /// preferences cookie.
    pub fn consent_id(&self) -> Option<&str> {
        self.consent_id
            .as_deref()
            .or_else(|| self.preferences.as_ref()?.consent_id.as_deref())
    }

    /// Parsed browser-side decision, if any
    pub fn preferences(&self) -> Option<&ClientPreferences> {
        self.preferences.as_ref()
    }

    /// Whether a consent cookie was present but unreadable
    pub fn is_malformed(&self) -> bool {
        self.malformed
    }

    /// Whether the request carried any consent information at all
    pub fn is_absent(&self) -> bool {
        self.preferences.is_none() && self.consent_id.is_none() && !self.malformed
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn category_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    let ids = Vec::<Id>::deserialize(deserializer)?;
    Ok(ids
        .into_iter()
        .map(|id| match id {
            Id::Text(s) => s.trim().to_string(),
            Id::Number(n) => n.to_string(),
        })
        .filter(|s| !s.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_cookie() {
        let token = ConsentToken::parse(
            r#"{"accepted":["necessary","analytics"],"rejected":["marketing"],"timestamp":"2026-01-02T03:04:05.000Z"}"#,
        );
        let prefs = token.preferences().unwrap();
        assert_eq!(prefs.accepted, vec!["necessary", "analytics"]);
        assert_eq!(prefs.rejected, vec!["marketing"]);
        assert!(prefs.timestamp.is_some());
        assert!(!token.is_malformed());
    }

    #[test]
    fn test_not_json_is_malformed() {
        let token = ConsentToken::parse("not-json");
        assert!(token.is_malformed());
        assert!(token.preferences().is_none());
        assert!(token.consent_id().is_none());
    }

    #[test]
    fn test_wrong_shape_is_malformed() {
        assert!(ConsentToken::parse(r#"{"accepted": "analytics"}"#).is_malformed());
        assert!(ConsentToken::parse("42").is_malformed());
        assert!(ConsentToken::parse("null").is_malformed());
    }

    #[test]
    fn test_list_and_numeric_ids() {
        let token = ConsentToken::parse("[1, \"marketing\"]");
        assert_eq!(token.preferences().unwrap().accepted, vec!["1", "marketing"]);
    }

    #[test]
    fn test_escaped_quotes() {
        let token = ConsentToken::parse(r#"{\"accepted\":[\"analytics\"]}"#);
        assert_eq!(token.preferences().unwrap().accepted, vec!["analytics"]);
    }

    #[test]
    fn test_bad_timestamp_is_dropped() {
        let token = ConsentToken::parse(r#"{"accepted":[],"timestamp":"yesterday"}"#);
        assert!(token.preferences().unwrap().timestamp.is_none());
    }

    #[test]
    fn test_consent_id_sources() {
        let token = ConsentToken::parse(r#"{"accepted":[],"consent_id":"from-json"}"#);
        assert_eq!(token.consent_id(), Some("from-json"));

        let jar = CookieJar::parse([
            r#"cookie_consent={"accepted":[],"consent_id":"from-json"}; dcc_consent_id=from-cookie"#,
        ]);
        let token = ConsentToken::from_cookies(&jar, "cookie_consent", "dcc_consent_id");
        assert_eq!(token.consent_id(), Some("from-cookie"));
    }

    #[test]
    fn test_absent_token() {
        let jar = CookieJar::parse(["other=1"]);
        let token = ConsentToken::from_cookies(&jar, "cookie_consent", "dcc_consent_id");
        assert!(token.is_absent());
        assert!(!token.is_malformed());
    }
}
