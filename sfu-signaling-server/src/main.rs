mod error;
mod logging;
mod server;
mod ws;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use sfu_signaling::{Config, MemoryEngine, SignalingOrchestrator};

use server::SignalingServer;

/// WebRTC SFU signaling server
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "SFU_CONFIG_PATH")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = Config::load(args.config.as_deref())?;

    // 1.5. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("SFU signaling server starting...");
    info!("Signaling address: {}", config.listen_address());
    info!(
        listen_ip = %config.engine.listen_ip,
        announced_ip = %config.engine.public_ip(),
        codecs = config.engine.media_codecs.len(),
        "Media engine configured"
    );

    // 3. Media engine and orchestrator
    let engine = Arc::new(MemoryEngine::new(config.engine.clone()));
    let orchestrator = SignalingOrchestrator::new(engine, config.sfu.clone());

    // 4. Serve until shutdown
    SignalingServer::new(config, orchestrator).start().await?;

    info!("SFU signaling server stopped");
    Ok(())
}
