//! Subscriber setup for binaries.

use std::str::FromStr;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Builds the filter directive string. A bare level (e.g. "debug") keeps the
/// HTTP stack at info; strings with ',' or '=' are used as given.
pub fn filter_directives(log_level: &str) -> String {
    let level = log_level.trim();
    if level.contains(',') || level.contains('=') {
        level.to_string()
    } else {
        format!("{},hyper=info,hyper_util=info,reqwest=info,h2=info", level)
    }
}

/// Installs the global subscriber. `RUST_LOG` wins over `log_level` when set.
pub fn setup_logging(log_level: &str, json_format: bool) {
    let directives = filter_directives(log_level);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&directives))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);

    if json_format {
        subscriber.with(fmt::layer().json().with_target(false).with_current_span(false)).init();
    } else {
        subscriber.with(fmt::layer().with_target(true).compact()).init();
    }
    tracing::info!(filter = %directives, json = json_format, "logging initialized");
}
