//! Logging bootstrap: line-per-object JSON by default, pretty for local
//! work, level from config unless `RUST_LOG` overrides it.

use tracing_subscriber::EnvFilter;

use crate::config::LogSettings;

pub fn init_logging(settings: &LogSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    let result = if settings.format == "pretty" {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true)
            .try_init()
    };

    // A second init (tests, embedders with their own subscriber) is fine.
    if let Err(err) = result {
        tracing::debug!("logging already initialized: {err}");
    }
}
