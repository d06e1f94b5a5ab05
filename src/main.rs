use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use lanekeeper::api::AutomationApi;
use lanekeeper::config::Config;
use lanekeeper::{log, Result};

/// Lanekeeper - work package lifecycle and merge orchestration
#[derive(Parser, Debug)]
#[command(name = "lanekeeper")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    LANEKEEPER_DEBUG=1     Enable debug logging (alternative to --debug)\n    LANEKEEPER_LOG=<filter>  Override the log filter")]
pub struct Cli {
    /// Repository to operate on
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub repo: PathBuf,

    /// Config file (default: ~/.lanekeeper/lanekeeper.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (writes to ~/.lanekeeper/lanekeeper.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run one automation API request and print the JSON response
    Api {
        /// Request JSON; `-` or omitted reads it from stdin
        request: Option<String>,
    },
}

fn read_request(arg: Option<String>) -> Result<String> {
    match arg {
        Some(text) if text != "-" => Ok(text),
        _ => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            Ok(text)
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    log::init_with_debug(cli.debug);

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Command::Api { request } => {
            let text = read_request(request)?;
            info!("api request in {}", cli.repo.display());

            let rt = tokio::runtime::Runtime::new()?;
            let response = rt.block_on(async {
                match AutomationApi::open(&cli.repo, config) {
                    Ok(api) => api.handle_json(&text).await,
                    Err(e) => lanekeeper::api::ApiResponse::from_error(
                        &lanekeeper::api::request::raw_command_name(&text),
                        &e,
                    ),
                }
            });

            println!("{}", response.to_json());
            if !response.success {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}
