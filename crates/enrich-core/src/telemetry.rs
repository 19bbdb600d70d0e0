use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::config_manager::LoggingConfig;
use crate::error::{EnrichError, Result};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Fails instead of panicking when
/// a subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = Registry::default().with(env_filter);
    let installed = match config.format.as_str() {
        "compact" => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().compact().with_target(false)),
        ),
        "full" => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
        _ => tracing::subscriber::set_global_default(registry.with(fmt::layer().pretty())),
    };

    installed.map_err(|e| EnrichError::Configuration(format!("tracing already initialised: {e}")))
}
