//! Rewrites series submissions in flight.

use crate::codec::{self, CodecError};
use crate::mutation::{self, MutationSummary, HOST_OVERRIDE};
use crate::rule::RuleSet;
use axum::body::Body;
use axum::http::{header, HeaderValue, Request};
use axum::http::request::Parts;
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Datadog series intake path.
pub const SERIES_ENDPOINT: &str = "/api/v1/series";

/// `Content-Encoding` value of a submission the interceptor can rewrite.
pub const DEFLATE_ENCODING: &str = "deflate";

/// How a request left the interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The request is forwarded exactly as received.
    Unmodified,
    /// The body was rewritten and `Content-Length` updated.
    Mutated,
}

/// A request ready for forwarding.
pub struct Intercepted {
    pub request: Request<Body>,
    pub disposition: Disposition,
}

/// Snapshot of the interceptor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterceptorStats {
    pub requests_total: u64,
    pub requests_mutated: u64,
    pub pipeline_errors: u64,
    pub metrics_removed: u64,
}

/// Rewrites series submissions according to a shared rule set.
pub struct Interceptor {
    /// Process-wide rules; `None` when no configuration was given
    rules: Option<Arc<RuleSet>>,
    /// Host written by host overrides
    host_override: String,
    /// Bodies larger than this are streamed through without rewriting
    max_body_size: usize,
    /// Series bodies inflating past this are forwarded as received
    max_inflated_size: usize,
    requests_total: AtomicU64,
    requests_mutated: AtomicU64,
    pipeline_errors: AtomicU64,
    metrics_removed: AtomicU64,
}

impl Interceptor {
    pub fn new(rules: Option<Arc<RuleSet>>, max_body_size: usize) -> Self {
        if rules.is_none() {
            warn!("No rule set configured; series will be re-encoded without changes");
        }

        Self {
            rules,
            host_override: HOST_OVERRIDE.to_string(),
            max_body_size,
            max_inflated_size: codec::DEFAULT_MAX_INFLATED_SIZE,
            requests_total: AtomicU64::new(0),
            requests_mutated: AtomicU64::new(0),
            pipeline_errors: AtomicU64::new(0),
            metrics_removed: AtomicU64::new(0),
        }
    }

    /// Use a different host override literal.
    pub fn with_host_override(mut self, host_override: impl Into<String>) -> Self {
        self.host_override = host_override.into();
        self
    }

    /// Limit the size a series body may inflate to.
    pub fn with_max_inflated_size(mut self, max_inflated_size: usize) -> Self {
        self.max_inflated_size = max_inflated_size;
        self
    }

    pub fn rules(&self) -> Option<&RuleSet> {
        self.rules.as_deref()
    }

    pub fn stats(&self) -> InterceptorStats {
        InterceptorStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_mutated: self.requests_mutated.load(Ordering::Relaxed),
            pipeline_errors: self.pipeline_errors.load(Ordering::Relaxed),
            metrics_removed: self.metrics_removed.load(Ordering::Relaxed),
        }
    }

    /// Whether the request is a deflated series submission within size limits.
    fn should_intercept(&self, request: &Request<Body>) -> bool {
        if request.uri().path() != SERIES_ENDPOINT {
            return false;
        }

        let encoding = request.headers().get(header::CONTENT_ENCODING);
        if encoding.map(HeaderValue::as_bytes) != Some(DEFLATE_ENCODING.as_bytes()) {
            return false;
        }

        let declared = request
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(length) = declared {
            if length > self.max_body_size {
                debug!(
                    content_length = length,
                    max_body_size = self.max_body_size,
                    "Series body too large to rewrite"
                );
                return false;
            }
        }

        true
    }

    /// Rewrite the request body if it is a series submission.
    ///
    /// Any failure forwards the request as it arrived.
    pub async fn intercept(&self, request: Request<Body>) -> Intercepted {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if !self.should_intercept(&request) {
            trace!(path = %request.uri().path(), "Request passed through");
            return Intercepted {
                request,
                disposition: Disposition::Unmodified,
            };
        }

        let (mut parts, body) = request.into_parts();

        let original = match buffer_body(body, self.max_body_size).await {
            Ok(BufferedBody::Complete(bytes)) => bytes,
            Ok(BufferedBody::Oversized(body)) => {
                debug!(
                    max_body_size = self.max_body_size,
                    "Series body too large to rewrite, streaming it through"
                );
                return Intercepted {
                    request: Request::from_parts(parts, body),
                    disposition: Disposition::Unmodified,
                };
            }
            Err(e) => {
                return self.fail_open(parts, Bytes::new(), InterceptError::BodyRead(e));
            }
        };

        match self.rewrite(&original) {
            Ok((rewritten, summary)) => {
                debug!(
                    original_size = original.len(),
                    rewritten_size = rewritten.len(),
                    removed_metrics = summary.removed_metrics,
                    removed_tags = summary.removed_tags,
                    hosts_overridden = summary.hosts_overridden,
                    "Rewrote series submission"
                );
                self.requests_mutated.fetch_add(1, Ordering::Relaxed);
                self.metrics_removed
                    .fetch_add(summary.removed_metrics as u64, Ordering::Relaxed);

                parts
                    .headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
                Intercepted {
                    request: Request::from_parts(parts, Body::from(rewritten)),
                    disposition: Disposition::Mutated,
                }
            }
            Err(e) => self.fail_open(parts, original, e),
        }
    }

    /// Forward `body` without rewriting it.
    fn fail_open(&self, mut parts: Parts, body: Bytes, error: InterceptError) -> Intercepted {
        self.pipeline_errors.fetch_add(1, Ordering::Relaxed);

        if let InterceptError::BodyRead(_) = error {
            // What was read is incomplete; the origin gets an empty request.
            warn!(error = %error, "Forwarding series submission with an empty body");
            parts.headers.remove(header::TRANSFER_ENCODING);
            parts
                .headers
                .insert(header::CONTENT_LENGTH, HeaderValue::from(0usize));
        } else {
            warn!(error = %error, "Forwarding series submission unmodified");
        }

        Intercepted {
            request: Request::from_parts(parts, Body::from(body)),
            disposition: Disposition::Unmodified,
        }
    }

    /// Decode, mutate and re-encode a deflated series body.
    pub fn rewrite(&self, body: &[u8]) -> Result<(Vec<u8>, MutationSummary), InterceptError> {
        let payload = codec::decode_with_limit(body, self.max_inflated_size)?;

        let (payload, summary) = match self.rules.as_deref() {
            Some(rules) => mutation::apply(payload, rules, &self.host_override),
            None => (payload, MutationSummary::default()),
        };

        let encoded = codec::encode(&payload)?;
        Ok((encoded, summary))
    }
}

/// A request body read under a size limit.
enum BufferedBody {
    /// The whole body, within the limit
    Complete(Bytes),
    /// The body outgrew the limit; what was read is replayed ahead of the rest
    Oversized(Body),
}

async fn buffer_body(body: Body, limit: usize) -> Result<BufferedBody, axum::Error> {
    let mut chunks = body.into_data_stream();
    let mut buffered = BytesMut::new();

    while let Some(chunk) = chunks.next().await {
        buffered.extend_from_slice(&chunk?);
        if buffered.len() > limit {
            let head = stream::once(future::ready(Ok(buffered.freeze())));
            return Ok(BufferedBody::Oversized(Body::from_stream(head.chain(chunks))));
        }
    }

    Ok(BufferedBody::Complete(buffered.freeze()))
}

/// Reasons a series submission is forwarded unmodified.
#[derive(Debug, thiserror::Error)]
pub enum InterceptError {
    #[error("failed to read request body: {0}")]
    BodyRead(#[source] axum::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
