//! pulsewatch server
//!
//! Run with: cargo run
//!
//! Environment variables:
//! - PULSEWATCH_CONFIG: Path to a JSON config file (default: none, empty config)
//! - PULSEWATCH_HOST: Bind address (default: 0.0.0.0)
//! - PULSEWATCH_PORT: Port number (default: 8080)
//! - PULSEWATCH_INSTANCE_NAME: Suffix for service keys (default: none)
//! - PULSEWATCH_STALE_THRESHOLD_SECS: Inactivity threshold (default: 60)
//! - PULSEWATCH_RETENTION_HOURS: Interval retention (default: 168)
//! - RUST_LOG: Log level (default: info)

use pulsewatch::api::run_server;
use pulsewatch::config::MonitorConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulsewatch=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::from_env()?;

    tracing::info!("pulsewatch configuration:");
    tracing::info!("  Host: {}:{}", config.server.host, config.server.port);
    tracing::info!(
        "  Instance: {}",
        config.instance_name.as_deref().unwrap_or("(none)")
    );
    tracing::info!("  Checks: {}", config.checks.len());
    tracing::info!("  Transports: {}", config.transports.len());
    tracing::info!(
        "  Stale threshold: {} seconds",
        config.stale_threshold.as_secs()
    );
    tracing::info!(
        "  Retention: {} hours (sweep every {} seconds)",
        config.retention.as_secs() / 3600,
        config.retention_sweep_interval.as_secs()
    );

    println!(
        r#"
 pulsewatch
 Service health monitoring and alerting
 Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(config).await
}
