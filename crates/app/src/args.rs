pub use clap::Parser;

use std::path::PathBuf;

use tracing::Level;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "swarm-id")]
#[command(about = "Store and fetch data on Swarm through a Swarm ID session")]
pub struct Args {
    /// Node API to talk to (defaults to the broker's configured network url)
    #[arg(long, global = true)]
    pub remote: Option<Url>,

    /// Path to the swarm-id config directory (defaults to ~/.swarm-id)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Default log level, overridable with RUST_LOG
    #[arg(long, global = true, default_value_t = Level::WARN)]
    pub log_level: Level,

    /// Also write daily rolling logs to this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
