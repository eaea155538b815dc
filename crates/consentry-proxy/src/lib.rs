//! Consentry Proxy
//!
//! Reverse proxy that sits in front of a CMS and rewrites its pages so that
//! scripts, iframes and tracking links in consent categories a visitor has
//! not accepted cannot run.
//!
//! The [`OutputPipeline`] decides per request whether a page must be
//! rewritten, captures the complete HTML body and runs the buffer
//! transformer over it. [`middleware::consent_middleware`] plugs the
//! pipeline into any axum router.

use std::sync::atomic::{AtomicBool, Ordering};

pub mod config;
pub mod context;
pub mod directives;
pub mod middleware;
pub mod pipeline;
pub mod proxy;
pub mod routes;
pub mod security;

pub use config::{ConfigOverrides, ProxyConfig};
pub use context::RequestContext;
pub use directives::{EssentialCookies, ResponseDirectives};
pub use pipeline::{OutputPipeline, SkipReason};
pub use proxy::{AppState, PipelineCache};

/// Global shutdown flag
static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Check if shutdown has been requested
pub fn is_shutting_down() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Flag the process as shutting down; health checks start failing
pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::SeqCst);
}
