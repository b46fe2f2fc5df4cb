use clap::{Parser, Subcommand};

pub mod config;
pub mod inventory;
pub mod keygen;
pub mod node_info;
pub mod passphrase;
pub mod run;
pub mod version;

#[derive(Parser)]
#[command(name = "tessera")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Data-availability validator node", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the node service
    Run {
        /// Path to config file (default: <data-dir>/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Node data directory (default: ~/.local/share/tessera)
        #[arg(long)]
        data_dir: Option<String>,

        /// Path to file containing the node mnemonic
        /// Default: <data-dir>/passphrase.txt
        #[arg(long)]
        passphrase_file: Option<String>,
    },

    /// Generate a node key mnemonic
    Keygen {
        /// Write the mnemonic to this file (mode 0600) instead of stderr
        #[arg(long)]
        output: Option<String>,
    },

    /// Summarize stored chunks per quorum
    Inventory {
        /// Path to config file (default: <data-dir>/config.toml)
        #[arg(long)]
        config: Option<String>,

        /// Node data directory (default: ~/.local/share/tessera)
        #[arg(long)]
        data_dir: Option<String>,
    },

    /// Print host information reported to dispersers
    NodeInfo {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display version information
    Version,
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Run {
            config,
            data_dir,
            passphrase_file,
        } => run::execute(config, data_dir, passphrase_file).await,
        Commands::Keygen { output } => keygen::execute(output),
        Commands::Inventory { config, data_dir } => inventory::execute(config, data_dir).await,
        Commands::NodeInfo { json } => node_info::execute(json),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}
