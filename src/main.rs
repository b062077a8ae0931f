use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use llm_serve::LlmServeApp;
use serve_config::ConfigManager;

/// Serve sleep-mode LLMs over HTTP
#[derive(Parser, Debug)]
#[command(name = "llm-serve", version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML or YAML)
    #[arg(short, long, env = "LLM_SERVE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_manager = Arc::new(ConfigManager::new(args.config.as_deref())?);
    let _log_guard = logging::init(&config_manager.settings().logging)?;

    info!("Starting LLM Serve {}", env!("CARGO_PKG_VERSION"));

    let app = LlmServeApp::new(config_manager).await?;
    app.run().await
}
