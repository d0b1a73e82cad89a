use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{DEFAULT_ENDPOINT, MAX_UPLOAD_CONCURRENCY};

#[derive(Parser, Debug)]
#[command(name = "shdwfs", version, about = "Mount a Shadow Drive bucket as a filesystem")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Mount a bucket and serve it until interrupted
    Mount(MountArgs),
}

#[derive(clap::Args, Debug)]
pub struct MountArgs {
    /// Storage account (bucket) address
    pub bucket: String,

    /// Keypair file: JSON array of 64 bytes
    pub keypair: PathBuf,

    /// Empty directory to mount on
    pub mountpoint: PathBuf,

    /// Storage API endpoint
    #[arg(long, env = "SHDW_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,

    /// Maximum concurrent part uploads
    #[arg(long, default_value_t = MAX_UPLOAD_CONCURRENCY)]
    pub max_concurrency: usize,

    /// Let other users access the mount
    #[arg(long)]
    pub allow_other: bool,
}
