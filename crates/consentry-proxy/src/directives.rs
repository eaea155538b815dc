//! Cache and cookie directives for visitors without valid consent

use axum::http::{header, HeaderMap, HeaderValue};
use consentry_consent::CookieJar;
use regex::Regex;
use tracing::{debug, warn};

use crate::config::ConsentConfig;

const CACHE_CONTROL: &str = "no-store, no-cache, must-revalidate, max-age=0";
const PRAGMA: &str = "no-cache";
const EXPIRES: &str = "Sat, 01 Jan 2000 00:00:00 GMT";

/// Cookies a visitor keeps even without consent
#[derive(Debug, Clone)]
pub struct EssentialCookies {
    patterns: Vec<Regex>,
    names: Vec<String>,
}

impl EssentialCookies {
    /// Compile the configured patterns. The consent cookies themselves are
    /// always essential. Invalid patterns are skipped.
    pub fn new(config: &ConsentConfig) -> Self {
        let patterns = config
            .essential_cookie_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid essential cookie pattern, ignored");
                    None
                }
            })
            .collect();

        Self {
            patterns,
            names: vec![config.cookie_name.clone(), config.consent_id_cookie_name.clone()],
        }
    }

    pub fn is_essential(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name) || self.patterns.iter().any(|p| p.is_match(name))
    }
}

/// Headers added to a page served to a visitor without valid consent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseDirectives {
    no_store: bool,
    expire: Vec<String>,
}

impl ResponseDirectives {
    /// Leave the response headers alone
    pub fn none() -> Self {
        Self::default()
    }

    /// Disable caching and expire every non-essential request cookie
    pub fn without_consent(cookies: &CookieJar, essential: &EssentialCookies) -> Self {
        let expire = cookies
            .names()
            .filter(|name| !essential.is_essential(name))
            .map(str::to_string)
            .collect();

        Self {
            no_store: true,
            expire,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.no_store && self.expire.is_empty()
    }

    /// Names of cookies that will be expired
    pub fn expired_cookies(&self) -> &[String] {
        &self.expire
    }

    pub fn apply(&self, headers: &mut HeaderMap) {
        if self.no_store {
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
            headers.insert(header::PRAGMA, HeaderValue::from_static(PRAGMA));
            headers.insert(header::EXPIRES, HeaderValue::from_static(EXPIRES));
        }

        for name in &self.expire {
            match HeaderValue::from_str(&expire_cookie(name)) {
                Ok(value) => {
                    headers.append(header::SET_COOKIE, value);
                }
                Err(_) => debug!(cookie = %name, "Cookie name not representable in a header"),
            }
        }
    }
}

fn expire_cookie(name: &str) -> String {
    format!("{name}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT")
}
