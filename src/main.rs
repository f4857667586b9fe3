use localstage::cli::{handle_download, handle_stage, CliArgs, Commands};
use localstage::util::logging::{init_logging, LoggingConfig};
use localstage::{StagerConfig, VERSION};

use clap::Parser;
use std::env;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("localstage v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Stage(stage_args) => handle_stage(stage_args, args.quiet).await,
        Commands::Download(download_args) => handle_download(download_args, args.quiet).await,
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let level = args.log_level_for(&StagerConfig::default());

    let use_json = env::var("LOCALSTAGE_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    init_logging(LoggingConfig {
        level,
        use_json,
        include_target: args.verbose,
        ..Default::default()
    });
}
