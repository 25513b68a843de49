use crate::core::Result;
use crate::ipfs::IpfsClient;
use crate::utils;

/// Implements the `status` command
pub struct StatusCommand;

impl StatusCommand {
    pub fn new() -> Self {
        Self
    }

    /// Print node identity and bandwidth counters
    pub async fn execute(&self, client: &IpfsClient) -> Result<()> {
        let info = client.node_info().await?;
        let stats = client.stats().await?;

        println!("Node:      {}", utils::redact_url(&client.config().api_url));
        println!("Peer ID:   {}", info.id);
        println!("Agent:     {}", info.agent_version);
        println!("Protocol:  {}", info.protocol_version);
        if info.addresses.is_empty() {
            println!("Addresses: (none)");
        } else {
            println!("Addresses:");
            for address in &info.addresses {
                println!("  {}", address);
            }
        }
        println!(
            "Traffic:   in {} / out {} (rate {:.1} B/s in, {:.1} B/s out)",
            utils::format_bytes(stats.total_in),
            utils::format_bytes(stats.total_out),
            stats.rate_in,
            stats.rate_out
        );
        Ok(())
    }
}

impl Default for StatusCommand {
    fn default() -> Self {
        Self::new()
    }
}
