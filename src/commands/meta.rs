use crate::core::{ContentAddress, IpfsError, Metadata, Result};
use crate::ipfs::IpfsClient;

enum MetaAction {
    Get,
    Set(Vec<String>),
}

/// Implements `meta get` and `meta set`
pub struct MetaCommand {
    address: String,
    action: MetaAction,
}

impl MetaCommand {
    pub fn get(address: String) -> Self {
        Self {
            address,
            action: MetaAction::Get,
        }
    }

    /// Replace the metadata of `address` with `pairs` (`key=value`)
    pub fn set(address: String, pairs: Vec<String>) -> Self {
        Self {
            address,
            action: MetaAction::Set(pairs),
        }
    }

    pub async fn execute(&self, client: &IpfsClient) -> Result<()> {
        let address = ContentAddress::parse(&self.address)?;
        match &self.action {
            MetaAction::Get => {
                let metadata = client
                    .get_metadata(&address)
                    .await?
                    .ok_or_else(|| IpfsError::NotFound(format!("no metadata recorded for {}", address)))?;
                println!("{}", serde_json::to_string_pretty(&metadata)?);
            }
            MetaAction::Set(pairs) => {
                if pairs.is_empty() {
                    return Err(IpfsError::Validation("no key=value pairs given".to_string()));
                }
                let metadata = Metadata::from_pairs(pairs)?;
                client.set_metadata(&address, &metadata).await?;
                println!("recorded {} entries for {}", metadata.len(), address);
            }
        }
        Ok(())
    }
}
