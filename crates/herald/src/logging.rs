use crate::config::LoggingSettings;
use std::io::IsTerminal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter from `RUST_LOG` when set, otherwise the configured level.
fn filter_for(level: &str) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(level)?),
    }
}

/// Installs the global subscriber on stderr; stdout belongs to the bridge.
pub fn setup_logging(settings: &LoggingSettings) -> anyhow::Result<()> {
    let output = if settings.json_format {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(false)
            .with_thread_names(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .with_thread_names(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter_for(&settings.level)?)
        .try_init()?;

    info!(
        "🔧 Logging at {} ({})",
        settings.level,
        if settings.json_format { "json" } else { "text" }
    );
    Ok(())
}
