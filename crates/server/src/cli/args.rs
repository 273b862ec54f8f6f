pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "charm-server")]
#[command(about = "SSH-keyed identity, key linking and encrypted data server")]
pub struct Args {
    /// Path to the server data directory (defaults to ./data)
    #[arg(long, global = true, env = "CHARM_SERVER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
