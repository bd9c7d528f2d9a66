//! Mock collaborators for testing.

use crate::{command::Command, Adapter, Channel, Error, Runtime};
use futures::channel::mpsc;
use std::path::PathBuf;

/// A call made on a [Vehicle].
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Start,
    Stop,
    Restart,
    LatestArtifact,
    Command(Command),
    ToggleGeofence(f64),
    Cleanup,
    Publish {
        vehicle: String,
        mission: serde_json::Value,
    },
    Abort,
}

/// A vehicle that records every call made on it.
///
/// Implements [Runtime], [Adapter] and [Channel], so a single instance (and its clones)
/// can stand in for every collaborator of a campaign.
#[derive(Clone)]
pub struct Vehicle {
    sender: mpsc::UnboundedSender<Call>,
    artifact: Option<PathBuf>,
    offline: bool,
}

impl Vehicle {
    /// Create a new vehicle.
    ///
    /// Returns the vehicle and a receiver of the calls made on it (in order).
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Call>) {
        let (sender, receiver) = mpsc::unbounded();
        (
            Self {
                sender,
                artifact: None,
                offline: false,
            },
            receiver,
        )
    }

    /// Report `artifact` as the latest flight log.
    pub fn with_artifact(mut self, artifact: impl Into<PathBuf>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    /// Fail every command, runtime and channel operation (calls are still recorded).
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    fn call(&self, call: Call) -> Result<(), Error> {
        let _ = self.sender.unbounded_send(call);
        if self.offline {
            return Err(Error::Collaborator("vehicle offline".into()));
        }
        Ok(())
    }
}

impl Runtime for Vehicle {
    async fn start(&mut self) -> Result<(), Error> {
        self.call(Call::Start)
    }

    async fn stop(&mut self) -> Result<(), Error> {
        self.call(Call::Stop)
    }

    async fn restart(&mut self) -> Result<(), Error> {
        self.call(Call::Restart)
    }

    async fn latest_artifact(&mut self) -> Option<PathBuf> {
        self.call(Call::LatestArtifact).ok()?;
        self.artifact.clone()
    }
}

impl Adapter for Vehicle {
    async fn send_command(&mut self, command: Command) -> Result<(), Error> {
        self.call(Call::Command(command))
    }

    async fn toggle_geofence(&mut self, radius: f64) -> Result<(), Error> {
        self.call(Call::ToggleGeofence(radius))
    }

    async fn cleanup(&mut self) -> Result<(), Error> {
        self.call(Call::Cleanup)
    }
}

impl Channel for Vehicle {
    async fn publish_mission(
        &mut self,
        vehicle: &str,
        mission: serde_json::Value,
    ) -> Result<(), Error> {
        self.call(Call::Publish {
            vehicle: vehicle.to_string(),
            mission,
        })
    }

    async fn broadcast_abort(&mut self) -> Result<(), Error> {
        self.call(Call::Abort)
    }
}
