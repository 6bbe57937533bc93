//! dockwatch - Inspect and control a local Docker or Colima engine
//!
//! This is the binary entry point. All logic lives in the library.

use clap::Parser;

use dockwatch::Cli;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // stdout carries events, so a logging failure is reported on stderr only
    if let Err(e) = dockwatch_core::logging::init() {
        eprintln!("warning: file logging disabled: {e}");
    }

    if dockwatch::run(cli).await.is_err() {
        // Already reported as a fatal `error` event
        std::process::exit(1);
    }
    Ok(())
}
