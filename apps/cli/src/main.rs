//! Scriptorium CLI: manage SWORD module stores and extract module text.
//!
//! Installs modules from remote repositories, verifies what is on disk, and
//! turns a module into structured book/chapter/verse JSON.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
