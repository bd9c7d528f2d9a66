//! Drive combinatorial fuzz campaigns against a simulated vehicle.
//!
//! A campaign compiles a [spec::Specification] into the full set of test
//! [spec::Combination]s and then runs missions one at a time against a live vehicle
//! that is only observable through asynchronous status events. While a mission is
//! in flight, each status update may trigger one untested combination (a mode switch,
//! a throttle change, a geofence action). Every combination is dispatched at most once
//! across restarts and the campaign ends when the executed set covers the whole space.
//!
//! # Architecture
//!
//! The [mission::Engine] is an actor: ready signals, status updates, watchdog expiries
//! and publish acknowledgements all arrive in its [mission::Mailbox] and are handled
//! sequentially. This sequential handling is the single critical section that
//! guarantees at-most-once dispatch and a single mission in flight.
//!
//! The vehicle itself is reached through three collaborators:
//! - [Runtime] starts, stops and restarts the simulated vehicle (and locates flight logs).
//! - [Adapter] sends commands to the vehicle.
//! - [Channel] publishes missions and broadcasts aborts.
//!
//! # Status
//!
//! `commonware-campaign` is **ALPHA** software and is not yet recommended for production use. Developers should
//! expect breaking changes and occasional instability.

#![doc(
    html_logo_url = "https://commonware.xyz/imgs/rustdoc_logo.svg",
    html_favicon_url = "https://commonware.xyz/favicon.ico"
)]

use std::{future::Future, path::PathBuf};
use thiserror::Error;

pub mod command;
pub mod config;
pub mod mission;
#[cfg(test)]
pub mod mocks;
pub mod process;
pub mod results;
pub mod spec;
pub mod store;
pub mod transport;

/// Errors that can occur while running a campaign.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid spec: {0}")]
    InvalidSpec(String),
    #[error("malformed combination: {0}")]
    MalformedCombination(String),
    #[error("unsupported store version: {0}")]
    UnsupportedVersion(u32),
    #[error("collaborator failed: {0}")]
    Collaborator(String),
    #[error("closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Lifecycle of the simulated vehicle (autopilot, state machine and supporting services).
pub trait Runtime: Clone + Send + 'static {
    /// Start the vehicle runtime.
    fn start(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Stop the vehicle runtime.
    fn stop(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Restart the services the vehicle runtime depends on.
    fn restart(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Path of the most recently written flight log, if any.
    fn latest_artifact(&mut self) -> impl Future<Output = Option<PathBuf>> + Send;
}

/// Issues commands to the vehicle.
pub trait Adapter: Clone + Send + 'static {
    /// Send every [command::Action] of `command` to the vehicle.
    fn send_command(
        &mut self,
        command: command::Command,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Set the geofence radius (a radius of zero disables the geofence).
    fn toggle_geofence(&mut self, radius: f64) -> impl Future<Output = Result<(), Error>> + Send;

    /// Return the vehicle to a safe state (land, zero throttle).
    fn cleanup(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}

/// Outbound side of the mission channel.
pub trait Channel: Clone + Send + 'static {
    /// Publish a mission description for `vehicle`.
    fn publish_mission(
        &mut self,
        vehicle: &str,
        mission: serde_json::Value,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Tell every vehicle to halt.
    fn broadcast_abort(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
}
