//! Subcommand dispatch and execution.
//!
//! The [`dispatch`] function routes the parsed CLI to the appropriate
//! subcommand handler: [`run`], [`init`], [`validate`], [`health`], or
//! [`switch`]. Each handler lives in its own submodule; [`client`] holds
//! the HTTP client the remote-control subcommands share.

pub mod client;
pub mod health;
pub mod init;
pub mod run;
pub mod switch;
pub mod validate;

use crate::cli::{Cli, Commands};
use crate::error::RelayError;

pub async fn dispatch(cli: Cli) -> Result<(), RelayError> {
    match cli.command {
        Some(Commands::Run(args)) => run::execute(*args).await,
        Some(Commands::Init(ref args)) => init::execute(args),
        Some(Commands::Validate(ref args)) => validate::execute(args),
        Some(Commands::Health(args)) => health::execute(args).await,
        Some(Commands::Switch(args)) => switch::execute(args).await,
        None => {
            print_welcome();
            Ok(())
        }
    }
}

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        "\n  wsrelay v{version} \u{2014} WebSocket relay for generative-AI API calls\n\n  \
         No command provided. To get started:\n\n    \
         wsrelay init                  Generate a starter config\n    \
         wsrelay run                   Start the relay (auto-detects ./wsrelay.yaml)\n    \
         wsrelay health                Check a running instance\n    \
         wsrelay --help                See all commands and options\n"
    );
}
