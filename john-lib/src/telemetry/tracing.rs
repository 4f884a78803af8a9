//! Structured logging setup. No OpenTelemetry or Prometheus export — just
//! `tracing-subscriber`'s fmt layer, filtered by `RUST_LOG` or a default.

use tracing_subscriber::EnvFilter;

pub fn init_tracing(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}
