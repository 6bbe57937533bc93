//! # dockwatch-engine - Docker Engine API Access
//!
//! Finds the engine socket, speaks HTTP/1.1 over it, decodes responses and
//! follows container logs.
//!
//! Depends on [`dockwatch_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Socket Discovery
//! - [`SocketResolver`] - Probe Colima and Docker socket locations
//! - [`EndpointSlot`] - The shared, currently resolved endpoint
//!
//! ### HTTP Transport
//! - [`EngineClient`] - One connection per request, typed operations in [`api`]
//! - [`ByteStream`] - An open streaming response
//!
//! ### Decoding
//! - [`decode`] - JSON bodies to domain records
//! - [`LogDecoder`] - Multiplexed / raw log framing
//!
//! ### Log Following
//! - [`LogSubscription`] - Reconnecting follow-mode log stream

pub mod api;
pub mod client;
pub mod decode;
pub mod follow;
pub mod log_stream;
pub mod socket;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use api::{encode_segment, logs_path, ContainerAction, LogOptions};
pub use client::{ByteStream, EngineClient, EngineResponse, CONNECT_TIMEOUT, REQUEST_TIMEOUT};
pub use decode::{port_summary, PruneReport};
pub use follow::{
    FollowEvent, FollowOptions, LogSubscription, SubscriptionState, DEFAULT_RECONNECT_BACKOFF,
};
pub use log_stream::{Framing, LogDecoder};
pub use socket::{
    docker_host_from_env, parse_unix_host, validate_socket, EndpointSlot, ResolverEnv,
    SocketResolver,
};
