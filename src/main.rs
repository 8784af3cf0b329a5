mod api;
mod auth;
mod cli;
mod engine;
mod error;
mod metrics;
mod model;
mod text_summary;

use clap::Parser;
use error::ToolError;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("wandb_run_tools={level},warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    init_tracing(args.verbose, args.quiet);

    match cli::run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("error: {e:#}");
            let code = e
                .downcast_ref::<ToolError>()
                .map(ToolError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}
