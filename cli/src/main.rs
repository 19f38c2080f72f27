mod cli;
mod serve;
mod services;

use crate::cli::TailrelayArguments;
use anyhow::Result;
use clap::Parser;
use log::{LevelFilter, info, trace};
use tailrelay::AppConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let args = TailrelayArguments::parse();
    pretty_env_logger::env_logger::builder()
        .format_timestamp(None)
        .filter_level(if args.verbose { LevelFilter::Trace } else { LevelFilter::Info })
        .init();

    trace!("Arguments: {:#?}", args);

    let effective_config_path = AppConfig::resolve_config_path(args.config_path.clone());
    let mut config = AppConfig::try_load(&effective_config_path).await?;

    if !args.is_serve() {
        // One-shot management command
        return args.handle_arguments(&mut config).await;
    }

    info!("Starting tailrelay");
    serve::serve(&config).await
}
