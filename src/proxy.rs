//! HTTP front end and forwarding to the origin.

use crate::context::RequestInfo;
use crate::interceptor::Interceptor;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, info_span, Instrument};
use url::Url;

/// Headers that describe a single connection and must not be relayed.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Sends a request upstream and returns the response to relay.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, request: Request) -> Result<Response, ForwardError>;
}

/// Forwards every request to a single fixed origin.
pub struct OriginForwarder {
    client: reqwest::Client,
    origin: Url,
}

impl OriginForwarder {
    pub fn new(origin: &str) -> Result<Self, ForwardError> {
        let origin = Url::parse(origin)?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, origin })
    }

    /// Origin URL with the request's path and query.
    pub fn upstream_url(&self, uri: &Uri) -> Url {
        let mut url = self.origin.clone();
        let base = self.origin.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", base, uri.path()));
        url.set_query(uri.query());
        url
    }
}

#[async_trait]
impl Forwarder for OriginForwarder {
    async fn forward(&self, request: Request) -> Result<Response, ForwardError> {
        let (parts, body) = request.into_parts();
        let body = reqwest::Body::wrap_stream(body.into_data_stream());

        let url = self.upstream_url(&parts.uri);
        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        // Content-Length stays so the streamed body is not sent chunked.

        let upstream = self
            .client
            .request(parts.method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// Append `client` to `X-Forwarded-For`, keeping any earlier hops.
fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let value = match headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        Some(prior) => format!("{}, {}", prior, client),
        None => client.to_string(),
    };

    match HeaderValue::from_str(&value) {
        Ok(value) => {
            headers.insert(X_FORWARDED_FOR, value);
        }
        Err(e) => debug!(error = %e, "Leaving X-Forwarded-For unchanged"),
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Shared state of the proxy server.
#[derive(Clone)]
pub struct ProxyState {
    pub interceptor: Arc<Interceptor>,
    pub forwarder: Arc<dyn Forwarder>,
}

impl ProxyState {
    pub fn new(interceptor: Arc<Interceptor>, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            interceptor,
            forwarder,
        }
    }
}

/// Router that intercepts and forwards every method on every path.
pub fn router(state: ProxyState) -> Router {
    Router::new().fallback(handle).with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    state: ProxyState,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}

async fn handle(State(state): State<ProxyState>, mut request: Request) -> Response {
    let info = RequestInfo::from_request(&request);
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    if let Some(client) = client {
        append_forwarded_for(request.headers_mut(), client);
    }

    let span = info_span!(
        "request",
        method = %info.method,
        path = %info.path,
        raw_query = info.query_string.as_deref().unwrap_or(""),
        host = info.host.as_deref().unwrap_or(""),
        content_encoding = info.content_encoding(),
        x_forwarded_for = info.forwarded_for(),
        accept_encoding = info.accept_encoding(),
        content_type = info.content_type(),
        dd_agent_version = info.agent_version(),
        user_agent = info.user_agent(),
    );

    async move {
        info!("request received");

        let intercepted = state.interceptor.intercept(request).await;
        let disposition = intercepted.disposition;

        match state.forwarder.forward(intercepted.request).await {
            Ok(response) => {
                debug!(
                    status = %response.status(),
                    ?disposition,
                    "Relayed upstream response"
                );
                response
            }
            Err(e) => {
                error!(error = %e, ?disposition, "Upstream request failed");
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// Forwarding errors.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("invalid origin URL: {0}")]
    InvalidOrigin(#[from] url::ParseError),

    #[error("failed to read request body: {0}")]
    RequestBody(#[source] axum::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}
