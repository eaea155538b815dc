//! Metrics collection and reporting

use consentry_core::ElementKind;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const REQUESTS_TOTAL: &str = "consentry_requests_total";
pub const INTERCEPTS_TOTAL: &str = "consentry_intercepts_total";
pub const ELEMENTS_BLOCKED_TOTAL: &str = "consentry_elements_blocked_total";
pub const TRANSFORM_LATENCY_US: &str = "consentry_transform_latency_us";
pub const TRANSFORM_FAILURES_TOTAL: &str = "consentry_transform_failures_total";

/// Register descriptions with the installed recorder
pub fn describe_metrics() {
    metrics::describe_counter!(REQUESTS_TOTAL, "Total number of proxied requests");
    metrics::describe_counter!(
        INTERCEPTS_TOTAL,
        "Interception decisions by reason (transformed or why the body passed through)"
    );
    metrics::describe_counter!(
        ELEMENTS_BLOCKED_TOTAL,
        "Elements neutralized by kind (script, inline, iframe, link)"
    );
    metrics::describe_histogram!(
        TRANSFORM_LATENCY_US,
        metrics::Unit::Microseconds,
        "Buffer transform latency in microseconds"
    );
    metrics::describe_counter!(
        TRANSFORM_FAILURES_TOTAL,
        "Transforms abandoned in favour of the original body"
    );
}

/// Metrics collector for the consent pipeline.
///
/// Cheap to clone; all clones share the same counters.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    total_requests: AtomicU64,
    intercepted: AtomicU64,
    passed_through: AtomicU64,
    failures: AtomicU64,
    blocked: [AtomicU64; 4],
    transform_latency_us: AtomicU64,
}

fn kind_index(kind: ElementKind) -> usize {
    match kind {
        ElementKind::Script => 0,
        ElementKind::Inline => 1,
        ElementKind::Iframe => 2,
        ElementKind::Link => 3,
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    /// Record a request
    pub fn record_request(&self) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(REQUESTS_TOTAL).increment(1);
    }

    /// Record a body that went through the transformer
    pub fn record_intercept(&self) {
        self.inner.intercepted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(INTERCEPTS_TOTAL, "reason" => "transformed").increment(1);
    }

    /// Record a body passed through unmodified, labelled with why
    pub fn record_pass_through(&self, reason: &'static str) {
        self.inner.passed_through.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(INTERCEPTS_TOTAL, "reason" => reason).increment(1);
    }

    /// Record elements of `kind` neutralized by one transform
    pub fn record_blocked(&self, kind: ElementKind, count: u64) {
        if count == 0 {
            return;
        }
        self.inner.blocked[kind_index(kind)].fetch_add(count, Ordering::Relaxed);
        metrics::counter!(ELEMENTS_BLOCKED_TOTAL, "kind" => kind.as_str()).increment(count);
    }

    /// Record transform latency
    pub fn record_latency(&self, latency_us: u64) {
        self.inner
            .transform_latency_us
            .fetch_add(latency_us, Ordering::Relaxed);
        metrics::histogram!(TRANSFORM_LATENCY_US).record(latency_us as f64);
    }

    /// Record a transform that failed and fell back to the original body
    pub fn record_failure(&self, stage: &'static str) {
        self.inner.failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(TRANSFORM_FAILURES_TOTAL, "stage" => stage).increment(1);
        debug!(stage, "Transform failure recorded");
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let blocked = |kind| self.inner.blocked[kind_index(kind)].load(Ordering::Relaxed);
        MetricsSnapshot {
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            intercepted: self.inner.intercepted.load(Ordering::Relaxed),
            passed_through: self.inner.passed_through.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            scripts_blocked: blocked(ElementKind::Script),
            inline_scripts_blocked: blocked(ElementKind::Inline),
            iframes_blocked: blocked(ElementKind::Iframe),
            links_blocked: blocked(ElementKind::Link),
            transform_latency_us: self.inner.transform_latency_us.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of current metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub intercepted: u64,
    pub passed_through: u64,
    pub failures: u64,
    pub scripts_blocked: u64,
    pub inline_scripts_blocked: u64,
    pub iframes_blocked: u64,
    pub links_blocked: u64,
    pub transform_latency_us: u64,
}

impl MetricsSnapshot {
    /// Elements neutralized across all kinds
    pub fn total_blocked(&self) -> u64 {
        self.scripts_blocked + self.inline_scripts_blocked + self.iframes_blocked + self.links_blocked
    }

    /// Average transform latency per intercepted body
    pub fn avg_latency_us(&self) -> u64 {
        if self.intercepted == 0 {
            0
        } else {
            self.transform_latency_us / self.intercepted
        }
    }

    /// Share of requests whose body was transformed
    pub fn intercept_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.intercepted as f64 / self.total_requests as f64
        }
    }
}
