//! Application state and the rule cache

use anyhow::{Context, Result};
use consentry_consent::{ConsentOracle, ConsentStore, MemoryConsentStore};
use consentry_rules::{FileRuleSource, RuleSet, RuleSource, StaticRuleSource};
use consentry_telemetry::MetricsCollector;
use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use url::Url;

use crate::config::ProxyConfig;
use crate::pipeline::OutputPipeline;
use crate::security::{validate_backend_url, UrlValidationConfig};

/// Consent store shared by every pipeline
pub type SharedStore = Arc<dyn ConsentStore>;

/// Pipeline type served by the proxy
pub type SitePipeline = OutputPipeline<SharedStore>;

/// Builds output pipelines and reuses each one for a short time.
///
/// Rules belong to the configuration backend and may change at any moment;
/// a pipeline older than the TTL is rebuilt from the rule source on next use.
/// One caller rebuilds at a time, outside the read lock; others keep serving
/// the stale pipeline until the new one is swapped in.
pub struct PipelineCache {
    source: Arc<dyn RuleSource>,
    store: SharedStore,
    config: Arc<ProxyConfig>,
    metrics: MetricsCollector,
    ttl: Duration,
    current: RwLock<Option<(Instant, Arc<SitePipeline>)>>,
    reload: Mutex<()>,
}

impl PipelineCache {
    pub fn new(
        source: Arc<dyn RuleSource>,
        store: SharedStore,
        config: Arc<ProxyConfig>,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            ttl: Duration::from_secs(config.rules_cache_ttl_secs),
            source,
            store,
            config,
            metrics,
            current: RwLock::new(None),
            reload: Mutex::new(()),
        }
    }

    /// Pipeline for the current rule set
    pub fn current(&self) -> Arc<SitePipeline> {
        let cached = self.cached();
        if let Some((loaded_at, pipeline)) = &cached {
            if loaded_at.elapsed() < self.ttl {
                return Arc::clone(pipeline);
            }
        }

        let _reloading = match (self.reload.try_lock(), cached) {
            (Some(guard), _) => guard,
            (None, Some((_, stale))) => return stale,
            (None, None) => self.reload.lock(),
        };

        // another caller may have finished a reload while we waited
        let previous = match self.cached() {
            Some((loaded_at, pipeline)) if loaded_at.elapsed() < self.ttl => return pipeline,
            Some((_, pipeline)) => Some(pipeline),
            None => None,
        };

        let pipeline = match self.source.active_rules() {
            Ok(rules) => Arc::new(self.build(rules)),
            Err(e) => match previous {
                Some(previous) => {
                    warn!(error = %e, "Failed to reload rules, keeping previous rule set");
                    previous
                }
                None => {
                    warn!(error = %e, "Failed to load rules, pages are served unmodified");
                    Arc::new(self.build(RuleSet::default()))
                }
            },
        };

        *self.current.write() = Some((Instant::now(), Arc::clone(&pipeline)));
        pipeline
    }

    fn cached(&self) -> Option<(Instant, Arc<SitePipeline>)> {
        self.current
            .read()
            .as_ref()
            .map(|(loaded_at, pipeline)| (*loaded_at, Arc::clone(pipeline)))
    }

    /// Drop the cached pipeline so the next request reloads the rules
    pub fn invalidate(&self) {
        *self.current.write() = None;
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    fn build(&self, rules: RuleSet) -> SitePipeline {
        let version_hash = self
            .config
            .consent
            .version_hash
            .clone()
            .unwrap_or_else(|| rules.version_hash(&self.config.categories));
        info!(rules = rules.len(), version_hash = %version_hash, "Rule set loaded");

        let oracle = ConsentOracle::new(Arc::clone(&self.store), version_hash);
        OutputPipeline::new(Arc::new(rules), oracle, Arc::clone(&self.config))
            .with_metrics(self.metrics.clone())
    }
}

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    /// Loaded configuration
    pub config: Arc<ProxyConfig>,

    /// Validated upstream base URL
    pub backend: Url,

    /// Output pipelines keyed to the current rule set
    pub pipelines: Arc<PipelineCache>,

    /// HTTP client for upstream requests
    pub http_client: reqwest::Client,

    /// Prometheus metrics handle for rendering
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    /// Initialize application state from configuration
    pub fn new(config: ProxyConfig, metrics_handle: PrometheusHandle) -> Result<Self> {
        let source: Arc<dyn RuleSource> = match &config.rules_path {
            Some(path) => {
                info!(path = %path, "Reading rules from file");
                Arc::new(FileRuleSource::new(path))
            }
            None => {
                warn!("No rules file configured, pages are served unmodified");
                Arc::new(StaticRuleSource::default())
            }
        };

        let store = match &config.records_path {
            Some(path) => MemoryConsentStore::from_json_file(path, config.consent.lifetime_days)
                .with_context(|| format!("Failed to load consent records from {path}"))?,
            None => {
                warn!("No consent records configured, every visitor is treated as without consent");
                MemoryConsentStore::new()
            }
        };

        Self::from_parts(config, source, Arc::new(store), metrics_handle)
    }

    /// Assemble state from an explicit rule source and consent store
    pub fn from_parts(
        config: ProxyConfig,
        source: Arc<dyn RuleSource>,
        store: SharedStore,
        metrics_handle: PrometheusHandle,
    ) -> Result<Self> {
        let validation = UrlValidationConfig::from_config(&config.security);
        let backend = validate_backend_url(&config.backend_url, &validation).with_context(|| {
            format!(
                "Upstream URL {} rejected (set CONSENTRY_DEV_MODE=1 for a local site)",
                config.backend_url
            )
        })?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;

        let config = Arc::new(config);
        let pipelines = Arc::new(PipelineCache::new(
            source,
            store,
            Arc::clone(&config),
            MetricsCollector::new(),
        ));

        Ok(Self {
            config,
            backend,
            pipelines,
            http_client,
            metrics_handle,
        })
    }
}
