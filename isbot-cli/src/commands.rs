//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use isbot_core::{IsbotConfig, RagPipeline};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

pub async fn handle_command(
    command: Commands,
    config: IsbotConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, config, workspace),
        Commands::Serve { port, host } => handle_serve(config, port, host).await,
    }
}

fn handle_config(action: ConfigAction, config: IsbotConfig, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".isbot");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&IsbotConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            for warning in config.validate() {
                eprintln!("warning: {}", warning);
            }
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn handle_serve(
    mut config: IsbotConfig,
    port: Option<u16>,
    host: Option<String>,
) -> anyhow::Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    let pipeline = Arc::new(RagPipeline::from_config(config)?);
    println!("ISbot API listening on http://{}", addr);
    isbot_core::server::serve(pipeline, addr).await?;
    Ok(())
}
