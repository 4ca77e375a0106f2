//! ISbot CLI: terminal interface for the IS MU helpdesk assistant.
//!
//! Provides single-query, interactive REPL and HTTP server modes.

mod commands;
mod repl;

use clap::Parser;
use isbot_core::IsbotConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// ISbot: answers questions about the Masaryk University information system
#[derive(Parser, Debug)]
#[command(name = "isbot", version, about, long_about = None)]
struct Cli {
    /// Question to answer (starts interactive mode if omitted)
    query: Option<String>,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Workspace directory (holds `.isbot/config.toml`, the dataset and session logs)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (replaces the user and workspace config files)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the whole answer at once instead of streaming it
    #[arg(long)]
    no_stream: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Serve the JSON chat API over HTTP
    Serve {
        /// Port to listen on (defaults to `server.port`)
        #[arg(short, long)]
        port: Option<u16>,
        /// Address to bind (defaults to `server.host`)
        #[arg(long)]
        host: Option<String>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show effective configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    // Human-readable layer for stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("cz", "muni", "isbot")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "isbot.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = match &cli.config {
        Some(path) => isbot_core::config::load_config_file(path)
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?,
        None => isbot_core::load_config(Some(&workspace), None)
            .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?,
    };
    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }
    if cli.no_stream {
        config.llm.use_streaming = false;
    }
    resolve_paths(&mut config, &workspace);

    if let Some(command) = cli.command {
        commands::handle_command(command, config, &workspace).await?;
        return Ok(ExitCode::SUCCESS);
    }

    // `_guard` must drop before the process exits or buffered log lines are lost.
    match cli.query {
        Some(query) => repl::run_single_query(&query, config).await,
        None => {
            repl::run_interactive(config, cli.quiet).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Anchor relative dataset and session-log paths at the workspace.
fn resolve_paths(config: &mut IsbotConfig, workspace: &Path) {
    if config.index.dataset_path.is_relative() {
        config.index.dataset_path = workspace.join(&config.index.dataset_path);
    }
    if config.recorder.directory.is_relative() {
        config.recorder.directory = workspace.join(&config.recorder.directory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_parses_query_and_flags() {
        let cli = Cli::parse_from(["isbot", "-vv", "--no-stream", "--model", "gemma3", "Kde je rozvrh?"]);
        assert_eq!(cli.query.as_deref(), Some("Kde je rozvrh?"));
        assert_eq!(cli.verbose, 2);
        assert!(cli.no_stream);
        assert_eq!(cli.model.as_deref(), Some("gemma3"));
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parses_serve() {
        let cli = Cli::parse_from(["isbot", "serve", "--port", "8080"]);
        assert!(matches!(
            cli.command,
            Some(Commands::Serve {
                port: Some(8080),
                host: None
            })
        ));
    }

    #[test]
    fn test_resolve_paths_anchors_relative() {
        let mut config = IsbotConfig::default();
        config.recorder.directory = PathBuf::from("/var/log/isbot");
        resolve_paths(&mut config, Path::new("/srv/isbot"));
        assert_eq!(
            config.index.dataset_path,
            PathBuf::from("/srv/isbot/dataset/transformed_for_llamaindex.json")
        );
        assert_eq!(config.recorder.directory, PathBuf::from("/var/log/isbot"));
    }
}
