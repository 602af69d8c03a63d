pub mod cli;
pub mod core;
pub mod providers;

use anyhow::Result;
use std::path::PathBuf;
use tracing::debug;

use crate::core::config::AppConfig;
use crate::providers::yahoo_finance::YahooHistoryProvider;

const DEFAULT_YAHOO_BASE_URL: &str = "https://query1.finance.yahoo.com";

/// Commands the application can execute once configuration is loaded.
pub enum AppCommand {
    Run { output: Option<PathBuf> },
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let base_url = config
        .providers
        .yahoo
        .as_ref()
        .map(|p| p.base_url.as_str())
        .unwrap_or(DEFAULT_YAHOO_BASE_URL);
    let provider = YahooHistoryProvider::new(base_url);

    match command {
        AppCommand::Run { output } => cli::run::run(&config, &provider, output.as_deref()).await,
    }
}
