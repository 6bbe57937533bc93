//! dockwatch library
//!
//! Command-line front end over the dockwatch crates. Every command prints
//! NDJSON events; see [`headless`] for the event format.

// Module declarations
pub mod cli;
pub mod headless;

// Re-export main entry points
pub use cli::Cli;
pub use headless::run;
