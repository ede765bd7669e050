use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ask the Tally finance assistant questions from the terminal.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, author)]
pub struct Cli {
    /// Assistant service base URL (overrides the config file)
    #[arg(long, env = "TALLY_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Bearer token for the assistant service
    #[arg(long, env = "TALLY_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Path to a config file (TOML). Defaults to the user config file
    #[arg(long, env = "TALLY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Print session events as JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Ask a single question and stream the reply
    Ask {
        /// The question; multiple words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Start an interactive session (default)
    Chat,
    /// Inspect or create the config file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the user config file location
    Path,
    /// Write the default configuration to the user config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
