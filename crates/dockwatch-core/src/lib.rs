//! # dockwatch-core - Core Domain Types
//!
//! Foundation crate for dockwatch. Provides domain types, error handling and
//! logging setup.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`Backend`], [`BackendPreference`] - Which runtime services requests, and the user's restriction
//! - [`SocketCandidate`], [`ResolvedEndpoint`] - Socket discovery results
//! - [`Container`], [`ContainerDetails`], [`PortMapping`], [`EnvVar`] - Container views
//! - [`Image`], [`Volume`], [`Network`] - Simple collection records
//! - [`EngineInfo`], [`EngineVersion`] - Engine metadata
//! - [`LogChunk`], [`LogStreamKind`] - Decoded log output
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Error taxonomy: socket unavailable, transport, HTTP, decode
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use dockwatch_core::prelude::*;
//! ```

pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    Backend, BackendPreference, Container, ContainerDetails, ContainerState, EngineInfo,
    EngineVersion, EnvVar, Image, LogChunk, LogStreamKind, MountInfo, Network, NetworkAttachment,
    PortMapping, ResolvedEndpoint, SocketCandidate, Volume,
};
