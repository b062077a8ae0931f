use anyhow::Result;
use clap::Parser;

use deploy_applier::cli::{self, DeployArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let args = DeployArgs::parse();
    logging::init_cli(args.verbose)?;
    cli::run(args).await
}
