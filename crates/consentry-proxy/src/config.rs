//! Proxy configuration

use consentry_html::PlaceholderNotice;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "CONSENTRY";

/// Proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Upstream site the proxy fronts
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Blocking rules file (YAML or JSON)
    #[serde(default)]
    pub rules_path: Option<String>,

    /// Stored consent records (JSON array)
    #[serde(default)]
    pub records_path: Option<String>,

    /// Configured consent category ids
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// How long a loaded rule set is reused before the file is read again
    #[serde(default = "default_rules_cache_ttl")]
    pub rules_cache_ttl_secs: u64,

    #[serde(default)]
    pub blocking: BlockingConfig,

    #[serde(default)]
    pub consent: ConsentConfig,

    /// Text of the blocked-iframe placeholder
    #[serde(default)]
    pub placeholder: PlaceholderNotice,

    #[serde(default)]
    pub security: SecurityConfig,
}

/// Values given on the command line, applied last
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub backend: Option<String>,
    pub rules: Option<String>,
    pub records: Option<String>,
}

impl ProxyConfig {
    /// Load configuration from an optional YAML file and `CONSENTRY__*`
    /// environment variables, then apply CLI overrides
    pub fn load(config_path: &str, overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let env = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true);

        let mut config = Self::from_sources(config_path, env)?;
        config.apply_overrides(overrides);
        Ok(config)
    }

    fn from_sources(config_path: &str, env: config::Environment) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(Path::new(config_path)).required(false))
            .add_source(env)
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Apply CLI overrides on top of file and environment values
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(backend) = &overrides.backend {
            self.backend_url = backend.clone();
        }

        if let Some(rules) = &overrides.rules {
            self.rules_path = Some(rules.clone());
        }

        if let Some(records) = &overrides.records {
            self.records_path = Some(records.clone());
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            rules_path: None,
            records_path: None,
            categories: default_categories(),
            rules_cache_ttl_secs: default_rules_cache_ttl(),
            blocking: BlockingConfig::default(),
            consent: ConsentConfig::default(),
            placeholder: PlaceholderNotice::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// Whether and where blocking applies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingConfig {
    #[serde(default)]
    pub method: BlockingMethod,

    /// Request paths that belong to the site's administration area
    #[serde(default = "default_admin_paths")]
    pub admin_path_prefixes: Vec<String>,

    /// Query parameters that mark page-builder or customizer previews.
    /// `key=value` requires that value, a bare `key` matches any value.
    #[serde(default = "default_editor_params")]
    pub editor_query_params: Vec<String>,

    /// Cookie name prefixes that identify a logged-in editor
    #[serde(default)]
    pub editor_cookie_prefixes: Vec<String>,

    /// Larger bodies are passed through unmodified
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            method: BlockingMethod::default(),
            admin_path_prefixes: default_admin_paths(),
            editor_query_params: default_editor_params(),
            editor_cookie_prefixes: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockingMethod {
    /// Rewrite pages for visitors without valid consent
    #[default]
    Auto,
    /// Blocking administratively disabled
    None,
}

/// Consent cookie names and record handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentConfig {
    /// Cookie holding the client's preference JSON
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Cookie holding the consent identifier
    #[serde(default = "default_consent_id_cookie")]
    pub consent_id_cookie_name: String,

    /// Lifetime applied to records that only carry an issue date
    #[serde(default = "default_lifetime_days")]
    pub lifetime_days: i64,

    /// Cookies matching these patterns survive a visit without consent
    #[serde(default = "default_essential_patterns")]
    pub essential_cookie_patterns: Vec<String>,

    /// Fixed configuration hash; computed from rules and categories when unset
    #[serde(default)]
    pub version_hash: Option<String>,
}

impl Default for ConsentConfig {
    fn default() -> Self {
        Self {
            cookie_name: default_cookie_name(),
            consent_id_cookie_name: default_consent_id_cookie(),
            lifetime_days: default_lifetime_days(),
            essential_cookie_patterns: default_essential_patterns(),
            version_hash: None,
        }
    }
}

/// Which upstream URLs are acceptable
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Allow a plain-HTTP upstream
    #[serde(default)]
    pub allow_http: bool,

    /// Allow loopback and private-network upstreams
    #[serde(default)]
    pub allow_private_backend: bool,

    /// Restrict upstream hosts to these domains and their subdomains
    #[serde(default)]
    pub allowed_domains: Option<Vec<String>>,
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_categories() -> Vec<String> {
    ["necessary", "analytics", "marketing", "functional"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_rules_cache_ttl() -> u64 {
    30
}

fn default_admin_paths() -> Vec<String> {
    vec!["/wp-admin".to_string(), "/wp-login.php".to_string()]
}

fn default_editor_params() -> Vec<String> {
    ["et_fb=1", "et_pb_preview=true", "customize_changeset_uuid", "customize_theme"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_body_bytes() -> usize {
    8 * 1024 * 1024
}

fn default_cookie_name() -> String {
    "cookie_consent".to_string()
}

fn default_consent_id_cookie() -> String {
    "dcc_consent_id".to_string()
}

fn default_lifetime_days() -> i64 {
    consentry_consent::record::DEFAULT_LIFETIME_DAYS
}

fn default_essential_patterns() -> Vec<String> {
    vec!["^wordpress_".to_string(), "^wp-".to_string(), "^PHPSESSID$".to_string()]
}
