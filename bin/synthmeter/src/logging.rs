use anyhow::anyhow;
use synthmeter_generator::GenericError;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

/// Initializes the global logger.
///
/// `directives` is used as the filter unless `RUST_LOG` is set, in which case `RUST_LOG` wins. Unparsable directives
/// are ignored, falling back to `info`.
///
/// # Errors
///
/// If a global logger was already installed, an error is returned.
pub fn initialize_logging(directives: &str, json: bool) -> Result<(), GenericError> {
    let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
    let filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(from_env) if !from_env.trim().is_empty() => builder.parse_lossy(from_env),
        _ => builder.parse_lossy(directives),
    };

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(filter)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(filter)
            .with_ansi(true)
            .with_target(true)
            .try_init()
    };

    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}
