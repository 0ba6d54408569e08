//! Trade execution bot - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Trade execution bot
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "TB_CONFIG", default_value = "config/default.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tb_telemetry::init_logging()?;

    info!("Starting tb-bot v{}", env!("CARGO_PKG_VERSION"));
    info!(config_path = %args.config, "Loading configuration");

    let config = tb_bot::AppConfig::from_file(&args.config)?;
    info!(
        mode = ?config.mode,
        state_dir = %config.state.dir.display(),
        "Configuration loaded"
    );

    let app = tb_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
