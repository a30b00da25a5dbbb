//! kai-relay - streaming chat relay for AI pair programming

use clap::{Parser, Subcommand};
use kai_relay::{
    config::ConfigManager,
    llm::LlmProviderFactory,
    server::{self, AppState},
    utils::{
        config::ApiKeyResolver,
        errors::{ConfigError, KaiError},
    },
    Result, APP_NAME, VERSION,
};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// kai-relay: conversation streaming and context optimization server
#[derive(Parser)]
#[command(name = "kai-relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone)]
enum Commands {
    /// Run the HTTP server (default)
    Serve {
        /// Listen address, overrides `server.addr`
        #[arg(long)]
        addr: Option<String>,
    },
    /// Print the effective configuration
    Config,
    /// List known providers and whether an API key is available
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::from_path(path.clone())?,
        None => ConfigManager::new()?,
    };

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config_manager.config().logging.level.clone());
    init_logging(&log_level)?;

    match cli.command.clone().unwrap_or(Commands::Serve { addr: None }) {
        Commands::Serve { addr } => run_server(config_manager, addr).await,
        Commands::Config => show_config(&config_manager),
        Commands::Providers => list_providers(&config_manager),
    }
}

/// Initialize logging
fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .map_err(|e| KaiError::unknown(format!("Invalid log level: {}", e)))?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| KaiError::unknown(format!("Failed to set logger: {}", e)))?;

    Ok(())
}

async fn run_server(config_manager: ConfigManager, addr: Option<String>) -> Result<()> {
    let config = config_manager.config().clone();
    let addr = addr.unwrap_or_else(|| config.server.addr.clone());

    info!("Starting {} v{}", APP_NAME, VERSION);
    info!("Configuration: {}", config_manager.config_path().display());
    info!(
        "Defaults: provider '{}', model '{}', {} response segment(s)",
        config.default_provider, config.default_model, config.pipeline.max_response_segments
    );

    server::serve(AppState::new(config), &addr).await
}

fn show_config(config_manager: &ConfigManager) -> Result<()> {
    let content = toml::to_string_pretty(config_manager.config())
        .map_err(|e| ConfigError::SerializeError { source: e })?;

    println!("# {}", config_manager.config_path().display());
    println!("{}", content);
    Ok(())
}

fn list_providers(config_manager: &ConfigManager) -> Result<()> {
    let config = config_manager.config();
    let no_cookies = HashMap::new();

    println!("Available providers:");
    for provider in LlmProviderFactory::list_providers() {
        let config_key = config
            .provider_config(provider)
            .and_then(|p| p.api_key.as_deref());
        let has_key =
            ApiKeyResolver::resolve_api_key(provider, &no_cookies, config_key).is_some();
        let marker = if provider == config.default_provider { "*" } else { " " };

        println!(
            "{} {:<12} {:<40} {}",
            marker,
            provider,
            config.base_url_for(provider).unwrap_or_default(),
            if has_key {
                "key available".to_string()
            } else {
                format!("set {}", ApiKeyResolver::env_key_name(provider))
            }
        );
    }

    Ok(())
}
