//! dockwatch-app - Published engine state and orchestration for dockwatch
//!
//! This crate owns the state front ends read from. [`DockerService`] is the
//! single writer of [`EngineSnapshot`]s, [`ActionDispatcher`] runs mutations
//! followed by a refresh, and [`DetailView`] ties log subscriptions to the
//! lifetime of a container view. Settings persistence lives in [`config`].

pub mod actions;
pub mod config;
pub mod detail;
pub mod service;
pub mod state;

// Re-export primary types
pub use actions::{Action, ActionDispatcher, ActionOutcome};
pub use config::{BackendSettings, Settings};
pub use detail::DetailView;
pub use service::DockerService;
pub use state::{Collection, EngineSnapshot};

// Re-export engine types front ends need
pub use dockwatch_engine::{
    ContainerAction, FollowEvent, FollowOptions, LogOptions, LogSubscription, PruneReport,
    SubscriptionState,
};
