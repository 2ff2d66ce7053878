//! Structured logging and tracing for the switchyard proxy.
//!
//! Console output with uptime timestamps and module paths, plus optional JSON
//! file logging for post-mortem analysis. The log level comes from `RUST_LOG`
//! when set, otherwise from the configuration.

use std::fs::File;
use std::path::Path;

use switchyard_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config sets a level.
const DEFAULT_FILTER: &str = "info";

/// File name of the JSON log inside the log directory.
pub const LOG_FILE_NAME: &str = "switchyard.log";

/// Initialize the global tracing subscriber.
///
/// Sets up:
/// - Console output with uptime, targets and severity levels
/// - JSON file logging to `<log_dir>/switchyard.log` when
///   `config.debug.json_log_file` is set
/// - Environment-based filtering (respects RUST_LOG)
///
/// # Examples
///
/// ```no_run
/// use switchyard_config::Config;
/// use switchyard_log::init_logging;
///
/// let config = Config::default();
/// init_logging(std::path::Path::new("./logs"), &config);
/// ```
pub fn init_logging(log_dir: &Path, config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if config.debug.json_log_file
        && let Some(log_file) = create_log_file(log_dir)
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// Create an `EnvFilter` with the default filter string.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

/// Filter directive taken from the config, falling back to `info`.
fn filter_directive(config: &Config) -> &str {
    let level = config.debug.log_level.trim();
    if level.is_empty() { DEFAULT_FILTER } else { level }
}

fn create_log_file(log_dir: &Path) -> Option<File> {
    std::fs::create_dir_all(log_dir).ok()?;
    File::create(log_dir.join(LOG_FILE_NAME)).ok()
}
