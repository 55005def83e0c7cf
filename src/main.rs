//! dogstatsd-sift CLI entry point.
//!
//! Reverse proxy in front of the Datadog intake that redacts series
//! submissions according to a static rule file.

use anyhow::{Context, Result};
use clap::Parser;
use dogstatsd_sift::proxy::{self, ProxyState};
use dogstatsd_sift::{Interceptor, OriginForwarder, RuleSet, SiftConfig};
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "dogstatsd-sift")]
#[command(
    author,
    version,
    about = "Redacts Datadog metric submissions before they reach the origin"
)]
struct Args {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long = "config-file")]
    config_file: Option<PathBuf>,

    /// Upstream origin, overriding the configuration file
    #[arg(long, env = "SIFT_ORIGIN")]
    origin: Option<String>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,
}

fn print_example_config() {
    let example = r#"# dogstatsd-sift configuration example

# Port to listen on
port: 9000
# Upstream the proxy forwards every request to
origin: "https://app.datadoghq.com"
# Series bodies larger than this are streamed through without rewriting (bytes)
max_body_size: 10485760  # 10MB
# Series bodies inflating past this are forwarded as received (bytes)
max_inflated_size: 67108864  # 64MB
# Replace the host of every metric with "dogstatsd-sift"
remove_all_host: false

metrics:
  # Drop a series entirely
  - name: "kubernetes.cpu.usage.total"
    remove_metric: true

  # Strip tags and the reporting host from a series
  - name: "request.200"
    remove_tags:
      - "status:200"
      - "pod_name:web-1"
    remove_host: true
"#;
    println!("{}", example);
}

fn init_logging(args: &Args) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let file = args
        .log_file
        .as_deref()
        .map(open_log_file)
        .transpose()?
        .map(Arc::new);

    if args.json_logs {
        let file_layer = file.map(|f| fmt::layer().json().with_ansi(false).with_writer(f));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .with(file_layer)
            .init();
    } else {
        let file_layer = file.map(|f| fmt::layer().with_ansi(false).with_writer(f));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .with(file_layer)
            .init();
    }

    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining connections");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    // Print example config if requested
    if args.example_config {
        print_example_config();
        return Ok(());
    }

    // Load configuration
    let mut config = if let Some(config_path) = &args.config_file {
        let config = SiftConfig::load(config_path).with_context(|| {
            format!("Failed to load config file: {}", config_path.display())
        })?;
        info!(path = %config_path.display(), "Configuration parsed successfully");
        config
    } else {
        warn!("No config file given; series will be forwarded without rules");
        SiftConfig::default()
    };

    if let Some(origin) = args.origin {
        config.origin = origin;
        config.validate().context("Invalid --origin")?;
    }

    let rules = args
        .config_file
        .is_some()
        .then(|| Arc::new(RuleSet::from_config(&config)));

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let interceptor = Arc::new(
        Interceptor::new(rules, config.max_body_size)
            .with_max_inflated_size(config.max_inflated_size),
    );
    let forwarder = Arc::new(
        OriginForwarder::new(&config.origin).context("Failed to create upstream client")?,
    );
    let state = ProxyState::new(interceptor.clone(), forwarder);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        address = %addr,
        origin = %config.origin,
        "Starting dogstatsd-sift"
    );

    proxy::serve(listener, state, shutdown_signal())
        .await
        .context("Proxy server failed")?;

    let stats = interceptor.stats();
    info!(
        requests_total = stats.requests_total,
        requests_mutated = stats.requests_mutated,
        pipeline_errors = stats.pipeline_errors,
        metrics_removed = stats.metrics_removed,
        "dogstatsd-sift stopped"
    );

    Ok(())
}
