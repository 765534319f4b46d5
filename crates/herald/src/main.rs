//! # Herald Node
//!
//! Standalone process that runs herald next to a proxy or backend host. The
//! host plugin forwards connection callbacks and plugin-channel frames as
//! JSON lines on stdin and executes the deliver/channel lines printed on
//! stdout. Logs go to stderr.
//!
//! ## Usage
//!
//! ```bash
//! herald --config proxy.toml --process-id proxy --peer survival --peer creative
//! ```

mod bridge;
mod cli;
mod config;
mod lanes;
mod logging;
mod node;
mod signals;

use anyhow::anyhow;
use cli::CliArgs;
use config::AppConfig;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path).await?;
    args.apply(&mut config);
    config
        .validate()
        .map_err(|e| anyhow!("Configuration validation failed: {}", e))?;

    logging::setup_logging(&config.logging)?;

    info!(
        "📢 Herald v{} starting as {} ({} platform, {} mode)",
        env!("CARGO_PKG_VERSION"),
        config.node.process_id,
        config.node.platform,
        config.herald().effective_mode()
    );
    info!("📂 Config: {}", args.config_path.display());

    node::run(config, args.config_path).await
}
