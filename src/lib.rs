//! Metric redaction proxy for the Datadog series intake.
//!
//! The proxy sits between an agent and `https://app.datadoghq.com` and
//! rewrites deflated `/api/v1/series` submissions before forwarding them:
//!
//! - drop whole series by metric name
//! - strip individual tags from a series
//! - replace the reporting host of one series or of all of them
//!
//! Every other request, and every submission that cannot be decoded, is
//! forwarded exactly as received.
//!
//! ## Configuration Example
//!
//! ```yaml
//! port: 9000
//! remove_all_host: false
//! metrics:
//!   - name: "request.200"
//!     remove_tags: ["status:200"]
//!     remove_host: true
//! ```

pub mod codec;
pub mod config;
pub mod context;
pub mod interceptor;
pub mod mutation;
pub mod proxy;
pub mod rule;
pub mod series;

pub use codec::CodecError;
pub use config::{ConfigError, MetricRule, SiftConfig};
pub use interceptor::{Disposition, InterceptError, Interceptor, InterceptorStats};
pub use mutation::HOST_OVERRIDE;
pub use proxy::{ForwardError, Forwarder, OriginForwarder, ProxyState};
pub use rule::{Rule, RuleSet};
pub use series::{DataPoint, Metric, SeriesPayload};
