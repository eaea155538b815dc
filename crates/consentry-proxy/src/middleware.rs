//! Response rewriting middleware
//!
//! Runs after the inner service has produced the complete response, captures
//! HTML bodies and hands them to the output pipeline. The rewrite itself is
//! CPU-bound and runs on the blocking thread pool.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, response::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use consentry_core::ResponseBuffer;
use futures_util::{stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::pipeline::SkipReason;
use crate::proxy::{PipelineCache, SitePipeline};

/// Marks a response whose body was already rewritten
#[derive(Debug, Clone, Copy)]
pub struct Rewritten;

/// Rewrite HTML responses for visitors without valid consent.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn consent_middleware(
    State(pipelines): State<Arc<PipelineCache>>,
    request: Request,
    next: Next,
) -> Response {
    let pipeline = pipelines.current();
    pipeline.metrics().record_request();

    let ctx = RequestContext::from_parts(request.uri(), request.headers());
    let response = next.run(request).await;

    if let Some(reason) = rewritable(response.headers()) {
        pipeline.pass_through(reason);
        return response;
    }
    if response.extensions().get::<Rewritten>().is_some() {
        pipeline.pass_through(SkipReason::AlreadyTransformed);
        return response;
    }

    let directives = pipeline.directives(&ctx);
    let (mut parts, body) = response.into_parts();
    directives.apply(&mut parts.headers);
    if !directives.is_empty() {
        debug!(
            request_id = %ctx.request_id(),
            expired = directives.expired_cookies().len(),
            "Applied no-consent directives"
        );
    }

    if let Some(reason) = pipeline.skip_reason(&ctx) {
        pipeline.pass_through(reason);
        return Response::from_parts(parts, body);
    }

    rewrite(pipeline, parts, body, ctx).await
}

/// Why a response with these headers cannot be rewritten
fn rewritable(headers: &HeaderMap) -> Option<SkipReason> {
    let is_html = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/html"))
        });
    if !is_html {
        return Some(SkipReason::NotHtml);
    }

    let encoded = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| !value.trim().eq_ignore_ascii_case("identity"));
    if encoded {
        return Some(SkipReason::Encoded);
    }
    None
}

async fn rewrite(
    pipeline: Arc<SitePipeline>,
    mut parts: Parts,
    body: Body,
    mut ctx: RequestContext,
) -> Response {
    let mut buffer = ResponseBuffer::new(pipeline.config().blocking.max_body_bytes);
    let mut chunks = body.into_data_stream();

    while let Some(chunk) = chunks.next().await {
        match chunk {
            Ok(bytes) => {
                if buffer.push(&bytes).is_err() {
                    pipeline.pass_through(SkipReason::TooLarge);
                    let captured = buffer.into_bytes();
                    let replay = stream::once(async move { Ok::<Bytes, axum::Error>(captured) });
                    return Response::from_parts(parts, Body::from_stream(replay.chain(chunks)));
                }
            }
            Err(e) => {
                warn!(request_id = %ctx.request_id(), error = %e, "Upstream body failed, serving captured prefix");
                pipeline.metrics().record_failure("body");
                parts.headers.remove(header::CONTENT_LENGTH);
                return Response::from_parts(parts, Body::from(buffer.into_bytes()));
            }
        }
    }

    let captured = buffer.into_bytes();
    let original = captured.clone();
    let worker = Arc::clone(&pipeline);
    let joined = tokio::task::spawn_blocking(move || {
        let body = worker.run_bytes(captured, &mut ctx);
        (body, ctx)
    })
    .await;

    match joined {
        Ok((body, ctx)) => {
            if ctx.is_transformed() {
                parts.headers.remove(header::CONTENT_LENGTH);
                parts.extensions.insert(Rewritten);
            }
            Response::from_parts(parts, Body::from(body))
        }
        Err(e) => {
            warn!(error = %e, "Rewrite task failed, serving original body");
            pipeline.metrics().record_failure("transform");
            Response::from_parts(parts, Body::from(original))
        }
    }
}
