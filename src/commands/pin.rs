use crate::core::{ContentAddress, Result};
use crate::ipfs::IpfsClient;

enum PinAction {
    Pin(String),
    Unpin(String),
    List,
}

/// Implements the `pin`, `unpin` and `list-pins` commands
pub struct PinCommand {
    action: PinAction,
}

impl PinCommand {
    pub fn pin(address: String) -> Self {
        Self {
            action: PinAction::Pin(address),
        }
    }

    pub fn unpin(address: String) -> Self {
        Self {
            action: PinAction::Unpin(address),
        }
    }

    pub fn list() -> Self {
        Self {
            action: PinAction::List,
        }
    }

    pub async fn execute(&self, client: &IpfsClient) -> Result<()> {
        match &self.action {
            PinAction::Pin(raw) => {
                let address = ContentAddress::parse(raw)?;
                client.pin(&address).await?;
                println!("pinned {}", address);
            }
            PinAction::Unpin(raw) => {
                let address = ContentAddress::parse(raw)?;
                client.unpin(&address).await?;
                println!("unpinned {}", address);
            }
            PinAction::List => {
                for address in client.list_pins().await? {
                    println!("{}", address);
                }
            }
        }
        Ok(())
    }
}
