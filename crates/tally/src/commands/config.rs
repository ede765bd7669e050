use async_trait::async_trait;
use eyre::{Result, eyre};
use std::io::Write;
use std::path::PathBuf;

use super::Command;
use crate::cli::ConfigCommands;
use tally_core::config::ClientConfig;
use tally_core::utils::AppPaths;

pub struct ConfigCommand {
    pub action: ConfigCommands,
    /// `--config`, when given; otherwise the user config file.
    pub config_path: Option<PathBuf>,
    pub base_url: Option<String>,
}

impl ConfigCommand {
    fn target_path(&self) -> Result<PathBuf> {
        self.config_path
            .clone()
            .or_else(AppPaths::user_config_file)
            .ok_or_else(|| eyre!("Could not determine the user config directory"))
    }
}

#[async_trait]
impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        let mut stdout = std::io::stdout();
        match &self.action {
            ConfigCommands::Show => {
                let config = crate::load_client_config(
                    self.config_path.as_deref(),
                    self.base_url.as_deref(),
                )?;
                write!(stdout, "{}", config.to_toml_string()?)?;
            }
            ConfigCommands::Path => {
                writeln!(stdout, "{}", self.target_path()?.display())?;
            }
            ConfigCommands::Init { force } => {
                let path = self.target_path()?;
                if path.exists() && !force {
                    return Err(eyre!(
                        "{} already exists; pass --force to overwrite",
                        path.display()
                    ));
                }
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&path, ClientConfig::default().to_toml_string()?)?;
                writeln!(stdout, "Wrote {}", path.display())?;
            }
        }
        Ok(())
    }
}
