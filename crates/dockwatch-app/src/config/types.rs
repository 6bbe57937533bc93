//! Configuration types for dockwatch
//!
//! Defines:
//! - `Settings` - Persisted user settings
//! - `BackendSettings` - Which engine socket to use

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use dockwatch_core::BackendPreference;

/// Persisted user settings (`settings.toml`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub backend: BackendSettings,
}

/// Socket selection settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendSettings {
    /// Restricts which candidate sockets are probed.
    #[serde(default)]
    pub preference: BackendPreference,

    /// Socket to use ahead of every other candidate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_socket: Option<PathBuf>,
}
