//! Tracing subscriber setup for hosts embedding the plugin manager

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "GMACS_LOG";

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Filter used when `GMACS_LOG` is unset
    pub default_filter: String,
    pub format: LogFormat,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Install a global subscriber writing to stderr.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(options: LogOptions) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&options.default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match options.format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    result.is_ok()
}
