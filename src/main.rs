use anyhow::Result;
use std::path::PathBuf;
use tracing::{error, info};
use triton::bridge::Bridge;
use triton::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional explicit config path as the first argument
    let config_path: Option<PathBuf> = std::env::args().nth(1).map(PathBuf::from);

    let config = Config::load_with_override(config_path.as_ref())
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    triton::logging::init_logging(&config.log.app)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let bridge = Bridge::new(config, config_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to assemble bridge: {}", e))?;
    let handle = bridge.handle();

    info!("Triton pool bridge starting up");

    // Ctrl-C begins the orderly teardown
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            handle.request_shutdown();
        }
    });

    match bridge.run().await {
        Ok(()) => {
            info!("Bridge shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Bridge failed with error: {}", e);
            Err(anyhow::anyhow!("Bridge error: {}", e))
        }
    }
}
