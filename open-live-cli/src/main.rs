mod cli;
mod config;
mod error;
mod logging;
mod output;

use std::process;
use std::sync::Arc;

use clap::Parser;
use open_live::OpenLiveListener;
use tracing::{error, info};

use crate::{cli::Args, config::AppConfig, error::Result, logging::init_logging, output::JsonLinesHandler};

#[tokio::main]
async fn main() {
    // Load .env before parsing so env fallbacks see it
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let guard = match init_logging(args.verbose, args.quiet, args.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let code = match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Application error: {}", e);
            eprintln!("Error: {}", e);
            1
        }
    };

    // Flush file logs before exiting.
    drop(guard);
    process::exit(code);
}

async fn run(args: Args) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?.into_listener_config(&args);
    let handler = Arc::new(JsonLinesHandler::stdout(args.pretty));
    let listener = Arc::new(OpenLiveListener::new(config, handler)?);

    let mut task = tokio::spawn({
        let listener = listener.clone();
        async move { listener.run().await }
    });

    tokio::select! {
        result = &mut task => {
            // Only returns on its own for fatal errors.
            result??;
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received Ctrl-C, shutting down");
        }
    }

    listener.stop().await;
    task.await??;
    Ok(())
}
