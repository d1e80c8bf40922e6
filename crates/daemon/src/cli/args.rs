pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "casevault")]
#[command(about = "Sealed attachment storage for case records")]
pub struct Args {
    /// Path to the vault directory (defaults to ~/.casevault)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
