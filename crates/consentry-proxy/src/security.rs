//! Upstream URL validation
//!
//! The proxy forwards every request to one configured upstream site. That URL
//! is checked once at startup so a misconfiguration cannot turn the proxy
//! into a relay for cloud metadata or internal services.

use std::net::IpAddr;
use thiserror::Error;
use url::Url;

use crate::config::SecurityConfig;

/// Environment variable that relaxes validation for local development
pub const DEV_MODE_ENV: &str = "CONSENTRY_DEV_MODE";

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Invalid upstream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Upstream scheme '{0}' is not allowed (set security.allow_http for plain HTTP)")]
    InvalidScheme(String),

    #[error("Upstream host '{0}' is not allowed")]
    BlockedHost(String),

    #[error("Upstream URL must have a host")]
    MissingHost,
}

/// Hosts that are never a legitimate upstream outside development
const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
    "metadata.google.internal",
    "metadata.goog",
];

#[derive(Debug, Clone, Default)]
pub struct UrlValidationConfig {
    pub allow_http: bool,
    pub allow_local: bool,
    pub allowed_domains: Option<Vec<String>>,
}

impl UrlValidationConfig {
    /// Anything reachable, for a site running next to the proxy
    pub fn development() -> Self {
        Self {
            allow_http: true,
            allow_local: true,
            allowed_domains: None,
        }
    }

    /// Rules from the `security` section, or development rules when
    /// `CONSENTRY_DEV_MODE` is set
    pub fn from_config(config: &SecurityConfig) -> Self {
        if std::env::var(DEV_MODE_ENV).is_ok() {
            return Self::development();
        }
        Self {
            allow_http: config.allow_http,
            allow_local: config.allow_private_backend,
            allowed_domains: config.allowed_domains.clone(),
        }
    }
}

/// Validate the upstream site URL.
///
/// Link-local addresses (cloud metadata endpoints) are rejected even when
/// local upstreams are allowed.
pub fn validate_backend_url(raw: &str, config: &UrlValidationConfig) -> Result<Url, SecurityError> {
    let url = Url::parse(raw)?;

    match url.scheme() {
        "https" => {}
        "http" if config.allow_http => {}
        scheme => return Err(SecurityError::InvalidScheme(scheme.to_string())),
    }

    let host = url.host_str().ok_or(SecurityError::MissingHost)?;
    let host_lower = host.trim_start_matches('[').trim_end_matches(']').to_lowercase();

    if !config.allow_local
        && BLOCKED_HOSTNAMES
            .iter()
            .any(|blocked| host_lower == *blocked || host_lower.ends_with(&format!(".{blocked}")))
    {
        return Err(SecurityError::BlockedHost(host.to_string()));
    }

    if let Ok(ip) = host_lower.parse::<IpAddr>() {
        if is_link_local(&ip) || (!config.allow_local && (ip.is_loopback() || is_private(&ip))) {
            return Err(SecurityError::BlockedHost(host.to_string()));
        }
    }

    if let Some(allowed) = &config.allowed_domains {
        let permitted = allowed.iter().any(|domain| {
            let domain = domain.to_lowercase();
            host_lower == domain || host_lower.ends_with(&format!(".{domain}"))
        });
        if !permitted {
            return Err(SecurityError::BlockedHost(format!(
                "{host} is not in the allowed domains list"
            )));
        }
    }

    Ok(url)
}

fn is_private(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            // RFC 1918, carrier-grade NAT, "this" network
            v4.is_private() || (a == 100 && (b & 0xc0) == 64) || a == 0
        }
        // fc00::/7
        IpAddr::V6(v6) => (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> UrlValidationConfig {
        UrlValidationConfig::default()
    }

    #[test]
    fn test_public_https_site() {
        let url = validate_backend_url("https://www.example.org/blog", &strict()).unwrap();
        assert_eq!(url.path(), "/blog");
    }

    #[test]
    fn test_http_requires_opt_in() {
        assert!(matches!(
            validate_backend_url("http://www.example.org", &strict()),
            Err(SecurityError::InvalidScheme(_))
        ));

        let config = UrlValidationConfig {
            allow_http: true,
            ..Default::default()
        };
        assert!(validate_backend_url("http://www.example.org", &config).is_ok());
    }

    #[test]
    fn test_local_upstreams_blocked_by_default() {
        for url in [
            "https://localhost:8080",
            "https://127.0.0.1",
            "https://10.0.0.5",
            "https://192.168.1.10",
            "https://172.16.0.1",
            "https://[fd00::1]",
        ] {
            assert!(
                matches!(validate_backend_url(url, &strict()), Err(SecurityError::BlockedHost(_))),
                "{url} should be blocked"
            );
        }
    }

    #[test]
    fn test_metadata_always_blocked() {
        let dev = UrlValidationConfig::development();
        assert!(validate_backend_url("http://169.254.169.254/latest/meta-data/", &dev).is_err());
        assert!(validate_backend_url("http://[fe80::1]/", &dev).is_err());
        assert!(validate_backend_url("http://metadata.google.internal", &strict()).is_err());
    }

    #[test]
    fn test_development_allows_local_site() {
        let dev = UrlValidationConfig::development();
        assert!(validate_backend_url("http://localhost:8000", &dev).is_ok());
        assert!(validate_backend_url("http://10.0.0.5:8080", &dev).is_ok());
    }

    #[test]
    fn test_allowlist() {
        let config = UrlValidationConfig {
            allowed_domains: Some(vec!["example.org".to_string()]),
            ..Default::default()
        };
        assert!(validate_backend_url("https://example.org", &config).is_ok());
        assert!(validate_backend_url("https://shop.example.org", &config).is_ok());
        assert!(matches!(
            validate_backend_url("https://example.net", &config),
            Err(SecurityError::BlockedHost(_))
        ));
    }

    #[test]
    fn test_from_config_private_backend() {
        let config = SecurityConfig {
            allow_http: true,
            allow_private_backend: true,
            allowed_domains: None,
        };
        let validation = UrlValidationConfig::from_config(&config);
        assert!(validate_backend_url("http://192.168.1.10", &validation).is_ok());
    }
}
