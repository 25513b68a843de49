use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use kova_ipfs_client::commands::{
    AddCommand, ConfigCommand, GetCommand, MetaCommand, PinCommand, StatusCommand,
};
use kova_ipfs_client::progress::CmdProgress;
use kova_ipfs_client::{utils, ClientConfig, IpfsClient, Metadata, Result};

#[derive(Parser)]
#[command(name = "kova-ipfs")]
#[command(author = "Kova Systems")]
#[command(version)]
#[command(about = "Resilient client for an IPFS node's HTTP API", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print transfer progress to stderr
    #[arg(long, global = true, default_value_t = false)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store files or directories on the node
    Add {
        /// Files or directories to add
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Do not pin the added content
        #[arg(long, default_value_t = false)]
        no_pin: bool,

        /// Metadata recorded for each added file, as key=value
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Retrieve content by address
    Get {
        address: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Read through the configured gateway
        #[arg(long, default_value_t = false)]
        gateway: bool,
    },

    /// Pin content on the node
    Pin { address: String },

    /// Remove a pin
    Unpin { address: String },

    /// List recursively pinned addresses
    ListPins,

    /// Show node identity and traffic counters
    Status,

    /// Read or write client-side metadata
    Meta {
        #[command(subcommand)]
        action: MetaAction,
    },

    /// Read or write configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum MetaAction {
    /// Print the metadata recorded for an address
    Get { address: String },

    /// Replace the metadata of an address
    Set {
        address: String,
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print one setting, e.g. `retry.max_attempts`
    Get { key: String },

    /// Write one setting to the configuration file
    Set { key: String, value: String },

    /// Print the effective configuration
    Show,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    utils::init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("error: {}: {}", e.kind(), e);
        process::exit(e.kind().exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(ClientConfig::default_location);

    if let Commands::Config { action } = cli.command {
        let command = match action {
            ConfigAction::Get { key } => ConfigCommand::get(&config_path, key),
            ConfigAction::Set { key, value } => ConfigCommand::set(&config_path, key, value),
            ConfigAction::Show => ConfigCommand::show(&config_path),
        };
        return command.execute();
    }

    let mut config = ClientConfig::load(Some(&config_path))?;
    if let Commands::Add { no_pin: true, .. } = &cli.command {
        config.pin_on_add = false;
    }

    let mut builder = IpfsClient::builder(config);
    if cli.progress {
        builder = builder.observer(Arc::new(CmdProgress));
    }
    let client = builder.build()?;

    let result = match cli.command {
        Commands::Add { paths, meta, .. } => {
            let metadata = if meta.is_empty() {
                None
            } else {
                Some(Metadata::from_pairs(&meta)?)
            };
            AddCommand::new(paths, metadata).execute(&client).await
        }
        Commands::Get {
            address,
            output,
            gateway,
        } => GetCommand::new(address, output, gateway).execute(&client).await,
        Commands::Pin { address } => PinCommand::pin(address).execute(&client).await,
        Commands::Unpin { address } => PinCommand::unpin(address).execute(&client).await,
        Commands::ListPins => PinCommand::list().execute(&client).await,
        Commands::Status => StatusCommand::new().execute(&client).await,
        Commands::Meta { action } => match action {
            MetaAction::Get { address } => MetaCommand::get(address).execute(&client).await,
            MetaAction::Set { address, pairs } => MetaCommand::set(address, pairs).execute(&client).await,
        },
        Commands::Config { .. } => Ok(()),
    };

    client.close().await;
    result
}
