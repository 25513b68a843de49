use std::io::Write;
use std::path::PathBuf;

use crate::core::{ContentAddress, Result};
use crate::ipfs::IpfsClient;
use crate::utils;

/// Implements the `get` command
pub struct GetCommand {
    address: String,
    /// Write here instead of stdout
    output: Option<PathBuf>,
    /// Read through the gateway only
    gateway: bool,
}

impl GetCommand {
    pub fn new(address: String, output: Option<PathBuf>, gateway: bool) -> Self {
        Self {
            address,
            output,
            gateway,
        }
    }

    pub async fn execute(&self, client: &IpfsClient) -> Result<()> {
        let address = ContentAddress::parse(&self.address)?;
        let data = if self.gateway {
            client.get_via_gateway(&address).await?
        } else {
            client.get(&address).await?
        };

        match &self.output {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    utils::ensure_dir_exists(parent).await?;
                }
                tokio::fs::write(path, &data).await?;
                eprintln!(
                    "Saved {} ({}) to {}",
                    address,
                    utils::format_bytes(data.len() as u64),
                    path.display()
                );
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&data)?;
                stdout.flush()?;
            }
        }
        Ok(())
    }
}
