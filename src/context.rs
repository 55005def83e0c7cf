//! Request details captured for logging before the body is touched.

use axum::http::{HeaderMap, Request};

/// Header carrying the Datadog agent version.
pub const DD_AGENT_VERSION: &str = "dd-agent-version";

/// Request information for logging.
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    /// HTTP method
    pub method: String,
    /// Request path (without query string)
    pub path: String,
    /// Query string (without leading ?)
    pub query_string: Option<String>,
    /// Authority the request was addressed to
    pub host: Option<String>,
    /// Request headers, names lowercased
    headers: HeaderMap,
}

impl RequestInfo {
    /// Capture the loggable parts of a request.
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let uri = request.uri();
        let headers = request.headers().clone();

        let host = uri.host().map(str::to_string).or_else(|| {
            headers
                .get(axum::http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

        Self {
            method: request.method().to_string(),
            path: uri.path().to_string(),
            query_string: uri.query().map(str::to_string),
            host,
            headers,
        }
    }

    /// Get a single header value. Non UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_encoding(&self) -> &str {
        self.header("content-encoding").unwrap_or("")
    }

    pub fn forwarded_for(&self) -> &str {
        self.header("x-forwarded-for").unwrap_or("")
    }

    pub fn accept_encoding(&self) -> &str {
        self.header("accept-encoding").unwrap_or("")
    }

    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or("")
    }

    pub fn agent_version(&self) -> &str {
        self.header(DD_AGENT_VERSION).unwrap_or("")
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or("")
    }
}
