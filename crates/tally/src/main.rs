use clap::Parser;
use eyre::Result;

use tally::cli::{Cli, Commands};
use tally::commands::{Command, ask::AskCommand, chat::ChatCommand, config::ConfigCommand};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // Before parsing, so `.env` values reach the clap env fallbacks
    tally::cli::config::load_env()?;

    let cli = Cli::parse();

    tally_core::utils::tracing::init_tracing()?;

    let command = cli.command.clone().unwrap_or(Commands::Chat);
    let load_config = || tally::load_client_config(cli.config.as_deref(), cli.base_url.as_deref());

    match command {
        Commands::Config { action } => {
            ConfigCommand {
                action,
                config_path: cli.config.clone(),
                base_url: cli.base_url.clone(),
            }
            .execute()
            .await
        }
        Commands::Ask { query } => {
            let config = load_config()?;
            AskCommand {
                query: query.join(" "),
                config,
                credentials: tally::credential_provider(cli.token.as_deref()),
                json: cli.json,
            }
            .execute()
            .await
        }
        Commands::Chat => {
            let config = load_config()?;
            ChatCommand {
                config,
                credentials: tally::credential_provider(cli.token.as_deref()),
                json: cli.json,
            }
            .execute()
            .await
        }
    }
}
