use anyhow::Result;
use sandpit_engine::Engine;
use std::path::PathBuf;
use tracing::info;

pub async fn execute(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
    workspace: Option<PathBuf>,
) -> Result<()> {
    let mut config = super::load_config(config_path)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(workspace) = workspace {
        config.workspace.root = workspace;
    }

    let engine = Engine::new(config)?;
    info!("Serving workspace {}", engine.workspace().root().display());

    engine.run().await?;
    Ok(())
}
