//! Output pipeline
//!
//! Decides per request whether the page has to be rewritten and runs the
//! buffer transformer over the complete body when it does.

use bytes::Bytes;
use consentry_consent::{ConsentOracle, ConsentStore};
use consentry_core::types::category;
use consentry_core::{AcceptedCategories, ElementKind};
use consentry_html::BufferTransformer;
use consentry_rules::RuleSet;
use consentry_telemetry::MetricsCollector;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::{BlockingMethod, ProxyConfig};
use crate::context::RequestContext;
use crate::directives::{EssentialCookies, ResponseDirectives};

/// Why a response is served unmodified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Blocking administratively disabled
    Disabled,
    /// No active rules
    NoRules,
    /// Administration or editing request
    EditorContext,
    /// Visitor holds valid consent
    ValidConsent,
    /// Body already rewritten for this request
    AlreadyTransformed,
    /// Response is not an HTML document
    NotHtml,
    /// Response body is content-encoded
    Encoded,
    /// Body exceeds the capture limit
    TooLarge,
    /// Body is not valid UTF-8
    InvalidUtf8,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::NoRules => "no_rules",
            SkipReason::EditorContext => "editor_context",
            SkipReason::ValidConsent => "valid_consent",
            SkipReason::AlreadyTransformed => "already_transformed",
            SkipReason::NotHtml => "not_html",
            SkipReason::Encoded => "encoded",
            SkipReason::TooLarge => "too_large",
            SkipReason::InvalidUtf8 => "invalid_utf8",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Integrates the buffer transformer into the response path.
///
/// A pipeline is immutable once built: it owns one loaded rule set and the
/// oracle keyed to that rule set's version hash. Per-request state lives in
/// [`RequestContext`].
pub struct OutputPipeline<S> {
    rules: Arc<RuleSet>,
    oracle: ConsentOracle<S>,
    transformer: BufferTransformer,
    config: Arc<ProxyConfig>,
    essential: EssentialCookies,
    metrics: MetricsCollector,
}

impl<S: ConsentStore> OutputPipeline<S> {
    /// Create a pipeline
    ///
    /// # Arguments
    /// * `rules` - Active rules in evaluation order
    /// * `oracle` - Consent oracle for the current configuration hash
    /// * `config` - Proxy configuration
    pub fn new(rules: Arc<RuleSet>, oracle: ConsentOracle<S>, config: Arc<ProxyConfig>) -> Self {
        Self {
            rules,
            oracle,
            transformer: BufferTransformer::with_notice(config.placeholder.clone()),
            essential: EssentialCookies::new(&config.consent),
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Record into a shared collector
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn oracle(&self) -> &ConsentOracle<S> {
        &self.oracle
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Why this request's response must not be rewritten, if it must not
    pub fn skip_reason(&self, ctx: &RequestContext) -> Option<SkipReason> {
        if self.config.blocking.method == BlockingMethod::None {
            return Some(SkipReason::Disabled);
        }
        if self.rules.is_empty() {
            return Some(SkipReason::NoRules);
        }
        if ctx.is_editor_context(&self.config.blocking) {
            return Some(SkipReason::EditorContext);
        }
        if ctx.is_transformed() {
            return Some(SkipReason::AlreadyTransformed);
        }
        if self.oracle.has_valid_consent(&ctx.token(&self.config.consent)) {
            return Some(SkipReason::ValidConsent);
        }
        None
    }

    /// Whether the response for this request has to be rewritten
    pub fn should_intercept(&self, ctx: &RequestContext) -> bool {
        self.skip_reason(ctx).is_none()
    }

    /// Categories whose elements stay untouched. `necessary` is always included.
    pub fn accepted(&self, ctx: &RequestContext) -> AcceptedCategories {
        let mut accepted = self
            .oracle
            .accepted_categories(&ctx.token(&self.config.consent));
        accepted.insert(category::NECESSARY);
        accepted
    }

    /// Record a response served unmodified
    pub fn pass_through(&self, reason: SkipReason) {
        debug!(reason = %reason, "Response passed through");
        self.metrics.record_pass_through(reason.as_str());
    }

    /// Produce the final body for `raw`.
    ///
    /// Rewrites at most once per request. A failure inside the transformer
    /// yields `raw` unmodified.
    pub fn run(&self, raw: String, ctx: &mut RequestContext) -> String {
        if let Some(reason) = self.skip_reason(ctx) {
            self.pass_through(reason);
            return raw;
        }

        let accepted = self.accepted(ctx);
        let start = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transformer
                .transform_with_report(&raw, &self.rules, &accepted)
        }));
        ctx.mark_transformed();

        match outcome {
            Ok(transformed) => {
                let latency_us = start.elapsed().as_micros() as u64;
                self.metrics.record_intercept();
                self.metrics.record_latency(latency_us);
                for kind in ElementKind::ALL {
                    self.metrics
                        .record_blocked(kind, transformed.report.count(kind) as u64);
                }

                debug!(
                    request_id = %ctx.request_id(),
                    path = %ctx.path(),
                    blocked = transformed.report.total(),
                    allowed = transformed.report.allowed,
                    latency_us,
                    "Page rewritten"
                );
                transformed.html
            }
            Err(_) => {
                warn!(
                    request_id = %ctx.request_id(),
                    path = %ctx.path(),
                    "Transform failed, serving original body"
                );
                self.metrics.record_failure("transform");
                raw
            }
        }
    }

    /// Produce the final body from a complete body. Non-UTF-8 bodies are
    /// returned as received.
    pub fn run_bytes(&self, body: Bytes, ctx: &mut RequestContext) -> Bytes {
        match std::str::from_utf8(&body) {
            Ok(text) => Bytes::from(self.run(text.to_owned(), ctx)),
            Err(e) => {
                debug!(error = %e, "Response body is not valid UTF-8");
                self.pass_through(SkipReason::InvalidUtf8);
                body
            }
        }
    }

    /// Cache and cookie headers for this request's page
    pub fn directives(&self, ctx: &RequestContext) -> ResponseDirectives {
        if self.config.blocking.method == BlockingMethod::None
            || ctx.is_editor_context(&self.config.blocking)
            || self.oracle.has_valid_consent(&ctx.token(&self.config.consent))
        {
            return ResponseDirectives::none();
        }
        ResponseDirectives::without_consent(ctx.cookies(), &self.essential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use consentry_consent::{ConsentRecord, CookieJar, MemoryConsentStore};
    use consentry_rules::{MatchType, Rule};

    const PAGE: &str = r#"<html><head><script src="https://x.com/ga.js"></script></head><body>hi</body></html>"#;
    const HASH: &str = "v1";

    fn rules() -> Arc<RuleSet> {
        Arc::new(RuleSet::new(vec![
            Rule::script(MatchType::Contains, "ga.js", "analytics"),
            Rule::script(MatchType::Contains, "session.js", "necessary"),
        ]))
    }

    fn store() -> MemoryConsentStore {
        MemoryConsentStore::from_records([
            ConsentRecord::new("valid", HASH, ["analytics"].into_iter().collect(), Utc::now(), 365),
            ConsentRecord {
                consent_id: "stale".into(),
                version_hash: "v0".into(),
                accepted_categories: ["analytics"].into_iter().collect(),
                expiry: Utc::now() + Duration::days(30),
            },
        ])
    }

    fn pipeline_with(rules: Arc<RuleSet>, config: ProxyConfig) -> OutputPipeline<MemoryConsentStore> {
        OutputPipeline::new(rules, ConsentOracle::new(store(), HASH), Arc::new(config))
    }

    fn pipeline() -> OutputPipeline<MemoryConsentStore> {
        pipeline_with(rules(), ProxyConfig::default())
    }

    fn visitor(cookies: &str) -> RequestContext {
        RequestContext::new("/").with_cookies(CookieJar::parse([cookies]))
    }

    #[test]
    fn test_visitor_without_consent_is_intercepted() {
        let pipeline = pipeline();
        let mut ctx = visitor("_ga=1");
        assert!(pipeline.should_intercept(&ctx));

        let out = pipeline.run(PAGE.to_string(), &mut ctx);
        assert!(out.contains(r#"type="text/plain""#));
        assert!(out.contains(r#"data-cookiecategory="analytics""#));
        assert!(ctx.is_transformed());

        let snapshot = pipeline.metrics().snapshot();
        assert_eq!(snapshot.intercepted, 1);
        assert_eq!(snapshot.scripts_blocked, 1);
    }

    #[test]
    fn test_empty_rules_pass_through() {
        let pipeline = pipeline_with(Arc::new(RuleSet::default()), ProxyConfig::default());
        let mut ctx = visitor("");

        assert!(!pipeline.should_intercept(&ctx));
        assert_eq!(pipeline.skip_reason(&ctx), Some(SkipReason::NoRules));
        assert_eq!(pipeline.run(PAGE.to_string(), &mut ctx), PAGE);
        assert!(!ctx.is_transformed());
        assert_eq!(pipeline.metrics().snapshot().passed_through, 1);
    }

    #[test]
    fn test_valid_consent_pass_through() {
        let pipeline = pipeline();
        let mut ctx = visitor("dcc_consent_id=valid");

        assert_eq!(pipeline.skip_reason(&ctx), Some(SkipReason::ValidConsent));
        assert_eq!(pipeline.run(PAGE.to_string(), &mut ctx), PAGE);
        assert!(pipeline.directives(&ctx).is_empty());
    }

    #[test]
    fn test_stale_or_malformed_consent_intercepted() {
        let pipeline = pipeline();
        assert!(pipeline.should_intercept(&visitor("dcc_consent_id=stale")));
        assert!(pipeline.should_intercept(&visitor("cookie_consent=not-json")));
        assert!(pipeline.should_intercept(&visitor("dcc_consent_id=unknown")));
    }

    #[test]
    fn test_disabled_and_editor_pass_through() {
        let mut config = ProxyConfig::default();
        config.blocking.method = BlockingMethod::None;
        let disabled = pipeline_with(rules(), config);
        assert_eq!(disabled.skip_reason(&visitor("")), Some(SkipReason::Disabled));

        let pipeline = pipeline();
        let editor = RequestContext::new("/").with_query("et_pb_preview=true");
        assert_eq!(pipeline.skip_reason(&editor), Some(SkipReason::EditorContext));
        assert!(pipeline.directives(&editor).is_empty());
    }

    #[test]
    fn test_transforms_once_per_request() {
        let pipeline = pipeline();
        let mut ctx = visitor("");

        let first = pipeline.run(PAGE.to_string(), &mut ctx);
        assert_eq!(pipeline.skip_reason(&ctx), Some(SkipReason::AlreadyTransformed));
        let second = pipeline.run(first.clone(), &mut ctx);
        assert_eq!(first, second);
        assert_eq!(pipeline.metrics().snapshot().intercepted, 1);
    }

    #[test]
    fn test_necessary_always_accepted() {
        let pipeline = pipeline();
        let accepted = pipeline.accepted(&visitor(""));
        assert!(accepted.is_accepted("necessary"));
        assert!(!accepted.is_accepted("analytics"));

        let page = r#"<script src="/session.js"></script>"#;
        assert_eq!(pipeline.run(page.to_string(), &mut visitor("")), page);
    }

    #[test]
    fn test_run_bytes_fallbacks() {
        let pipeline = pipeline();

        let binary = Bytes::from_static(&[0xff, 0x00, 0xfe]);
        let out = pipeline.run_bytes(binary.clone(), &mut visitor(""));
        assert_eq!(out, binary);

        let out = pipeline.run_bytes(Bytes::from_static(PAGE.as_bytes()), &mut visitor(""));
        assert!(std::str::from_utf8(&out).unwrap().contains("text/plain"));

        assert_eq!(pipeline.metrics().snapshot().passed_through, 1);
    }

    #[test]
    fn test_directives_without_consent() {
        let pipeline = pipeline();
        let directives = pipeline.directives(&visitor("_ga=1; wordpress_sec=x"));
        assert_eq!(directives.expired_cookies(), ["_ga"]);
    }
}
