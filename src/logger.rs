//! Logging setup.
//!
//! Events carry ids and roles only. Patient data, scope contents and IP
//! addresses are never written to the log stream; the audit trail is the
//! place for those.

use tracing_subscriber::EnvFilter;

use crate::config::{Config, LogFormat};

/// `RUST_LOG` wins over the configured level.
pub fn init_logger(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.log_format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {}", e))
}
