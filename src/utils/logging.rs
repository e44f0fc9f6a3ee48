use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LEVEL: &str = "info";

/// Initialize the tracing subscriber.
///
/// An explicit `--log-level` wins; otherwise `RUST_LOG`, then `LOG_LEVEL`,
/// then `info`.
pub fn init_tracing(cli_level: Option<&str>) {
    let filter = match cli_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_env("RUST_LOG")
            .or_else(|_| EnvFilter::try_from_env("LOG_LEVEL"))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL)),
    };

    fmt().with_env_filter(filter).with_target(false).init();
}
