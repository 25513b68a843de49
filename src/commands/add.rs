use std::path::{Path, PathBuf};

use crate::core::{ContentAddress, IpfsError, Metadata, Result};
use crate::ipfs::IpfsClient;

/// Implements the `add` command
pub struct AddCommand {
    /// Files or directories to store
    paths: Vec<PathBuf>,
    /// Metadata recorded for every stored file
    metadata: Option<Metadata>,
}

impl AddCommand {
    pub fn new(paths: Vec<PathBuf>, metadata: Option<Metadata>) -> Self {
        Self { paths, metadata }
    }

    /// Store every path, printing `<address>  <path>` per stored file.
    ///
    /// Keeps going after a failed file and returns the first failure once
    /// all paths were processed.
    pub async fn execute(&self, client: &IpfsClient) -> Result<()> {
        if self.paths.is_empty() {
            return Err(IpfsError::Validation("no paths given".to_string()));
        }

        let mut first_error = None;
        for path in &self.paths {
            let is_dir = tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false);
            if is_dir {
                for (file, outcome) in client.add_directory(path).await? {
                    self.report(client, &file, outcome, &mut first_error).await;
                }
            } else {
                let outcome = client.add_file(path).await;
                self.report(client, path, outcome, &mut first_error).await;
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn report(
        &self,
        client: &IpfsClient,
        path: &Path,
        outcome: Result<ContentAddress>,
        first_error: &mut Option<IpfsError>,
    ) {
        match self.attach_metadata(client, outcome).await {
            Ok(address) => println!("{}  {}", address, path.display()),
            Err(e) => {
                eprintln!("failed  {}: {}", path.display(), e);
                first_error.get_or_insert(e);
            }
        }
    }

    async fn attach_metadata(
        &self,
        client: &IpfsClient,
        outcome: Result<ContentAddress>,
    ) -> Result<ContentAddress> {
        let address = outcome?;
        if let Some(metadata) = &self.metadata {
            client.set_metadata(&address, metadata).await?;
        }
        Ok(address)
    }
}
