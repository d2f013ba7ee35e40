use std::process::ExitCode;

use clap::Parser;
use polyquery::cli::{self, Cli};
use polyquery::config::AppConfig;
use polyquery::observability::{self, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = observability::with_startup_logging(AppConfig::load);
    observability::init_tracing(&LogConfig::from(&config));

    match cli::run(cli, config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
