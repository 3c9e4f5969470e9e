pub(crate) mod ai;
pub(crate) mod classify;
mod cli;
pub(crate) mod config;
pub(crate) mod document;
mod error;
pub(crate) mod io_utils;
mod logging;
pub(crate) mod plot;
pub(crate) mod serde_helpers;

pub(crate) use error::{AppError, AppResult};

use std::process::exit;

use clap::Parser;
use tracing::{error, warn};

use crate::cli::{Cli, GetVerbosity};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::setup_logger(cli.cmd.get_verbosity().tracing_level(), cli.color);

    tokio::select! {
        result = cli.cmd.run() => {
            if let Err(e) = result {
                error!("{}", e);
                exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; nothing was written");
            exit(130);
        }
    }
}
