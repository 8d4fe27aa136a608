mod cli;
mod config;
mod depth;
mod filter;
mod merge;
mod process;

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

use anyhow::Context;

fn main() -> anyhow::Result<()> {
    let cfg = cli::handle_cli().with_context(|| "Error processing command line arguments")?;
    process::run_pipeline(&cfg)?;
    Ok(())
}
