use std::path::{Path, PathBuf};

use crate::core::{set_key_in_file, ClientConfig, IpfsError, Result};

enum ConfigAction {
    Get(String),
    Set(String, String),
    Show,
}

/// Implements `config get`, `config set` and `config show`
pub struct ConfigCommand {
    path: PathBuf,
    action: ConfigAction,
}

impl ConfigCommand {
    pub fn get(path: &Path, key: String) -> Self {
        Self::with(path, ConfigAction::Get(key))
    }

    pub fn set(path: &Path, key: String, value: String) -> Self {
        Self::with(path, ConfigAction::Set(key, value))
    }

    pub fn show(path: &Path) -> Self {
        Self::with(path, ConfigAction::Show)
    }

    fn with(path: &Path, action: ConfigAction) -> Self {
        Self {
            path: path.to_path_buf(),
            action,
        }
    }

    /// Reads go through the layered configuration; writes edit the file only
    pub fn execute(&self) -> Result<()> {
        match &self.action {
            ConfigAction::Get(key) => {
                let config = ClientConfig::load(Some(&self.path))?;
                match config.get_key(key)? {
                    toml::Value::String(s) => println!("{}", s),
                    toml::Value::Table(table) => print!("{}", render(&table)?),
                    other => println!("{}", other),
                }
            }
            ConfigAction::Set(key, value) => {
                set_key_in_file(&self.path, key, value)?;
                println!("{} = {}", key, value);
            }
            ConfigAction::Show => {
                let config = ClientConfig::load(Some(&self.path))?;
                print!("{}", render(&config)?);
            }
        }
        Ok(())
    }
}

fn render<T: serde::Serialize>(value: &T) -> Result<String> {
    toml::to_string_pretty(value)
        .map_err(|e| IpfsError::Validation(format!("failed to render configuration: {}", e)))
}
