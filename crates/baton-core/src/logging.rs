//! Tracing subscriber bootstrap.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Build the filter for a logging config. `RUST_LOG` wins when set.
pub fn build_filter(config: &LoggingConfig, verbose: bool) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = config
        .level
        .clone()
        .unwrap_or_else(|| if verbose { "debug".into() } else { "info".into() });
    let mut directives = vec![level];
    directives.extend(config.filters.iter().cloned());
    EnvFilter::new(directives.join(","))
}

/// Install the global subscriber. Returns `false` if one was already set.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> bool {
    let filter = build_filter(config, verbose);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let json = config.format == "json";
    let stdout = config.output == "stdout";

    let result = match (json, stdout) {
        (true, true) => builder.json().with_writer(std::io::stdout).try_init(),
        (true, false) => builder.json().with_writer(std::io::stderr).try_init(),
        (false, true) => builder.with_writer(std::io::stdout).try_init(),
        (false, false) => builder.with_writer(std::io::stderr).try_init(),
    };
    result.is_ok()
}
