//! Command handlers behind the `kova-ipfs` binary

mod add;
mod config;
mod get;
mod meta;
mod pin;
mod status;

pub use add::AddCommand;
pub use config::ConfigCommand;
pub use get::GetCommand;
pub use meta::MetaCommand;
pub use pin::PinCommand;
pub use status::StatusCommand;
