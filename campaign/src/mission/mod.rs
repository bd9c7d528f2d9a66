//! Dispatch missions to the vehicle and monitor them.
//!
//! # Lifecycle
//!
//! The [Engine] enqueues a mission with the publish worker, which waits for the vehicle to
//! signal readiness, publishes the mission and acknowledges it back to the engine. The
//! engine then arms the mission's [Watchdog] and starts reacting to status updates:
//!
//! - The first update naming a context with an untested combination dispatches that
//!   combination (marking it executed before its command is sent). Later updates in the
//!   same mission are dropped.
//! - A success update records the result, returns the vehicle to a safe state and
//!   enqueues the next mission.
//! - If the watchdog fires first, the engine aborts the mission, restarts the vehicle
//!   runtime and enqueues the next mission once the vehicle is ready again.
//!
//! The campaign completes once every combination of the specification has been dispatched.

use crate::spec::Specification;
use std::{path::PathBuf, time::Duration};

mod dispatcher;
pub use dispatcher::{Dispatcher, Phase, Request, Worker};
mod engine;
pub use engine::Engine;
mod ingress;
pub use ingress::{Mailbox, Message, Status};
mod metrics;
pub use metrics::Metrics;
mod session;
pub use session::Session;
mod watchdog;
pub use watchdog::Watchdog;

/// Default maximum duration of a mission.
pub const DEFAULT_MISSION_TIMEOUT: Duration = Duration::from_secs(74);

/// Default delay between the vehicle signalling readiness and publishing a mission.
pub const DEFAULT_PUBLISH_DELAY: Duration = Duration::from_secs(2);

/// Default geofence radius for geofence-scoped campaigns.
pub const DEFAULT_GEOFENCE_RADIUS: f64 = 20.0;

/// How a campaign ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Every combination was dispatched.
    Completed,
    /// The campaign was asked to stop.
    Shutdown,
}

/// Configuration for the [Engine].
pub struct Config<R, A, C> {
    /// Lifecycle of the simulated vehicle.
    pub runtime: R,

    /// Sends test commands to the vehicle.
    pub adapter: A,

    /// Publishes missions and aborts.
    pub channel: C,

    /// The campaign to run.
    pub spec: Specification,

    /// Mission description published at the start of every mission.
    pub mission: serde_json::Value,

    /// File tracking executed combinations.
    pub store: PathBuf,

    /// File mission results are appended to.
    pub results: PathBuf,

    /// Maximum duration of a mission before it is aborted.
    pub mission_timeout: Duration,

    /// Delay between the vehicle signalling readiness and publishing a mission.
    pub publish_delay: Duration,

    /// Geofence radius used by geofence-scoped campaigns.
    pub geofence_radius: f64,

    /// The maximum size of the mailbox backlog.
    pub mailbox_size: usize,
}
