//! Command-line interface.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "ezchat-server")]
#[command(version, about = "ezchat-server", long_about = None)]
pub struct Cli {
    /// Config file path (supports .yaml/.yml/.json/.toml)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}
