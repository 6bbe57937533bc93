//! Configuration file handling for dockwatch
//!
//! Supports:
//! - `<config_dir>/dockwatch/settings.toml` - Backend preference and custom socket

pub mod settings;
pub mod types;

pub use settings::{default_config_dir, load_settings, save_settings, settings_path};
pub use types::*;
