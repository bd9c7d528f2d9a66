//! Drive the simulated vehicle with shell commands.
//!
//! Every lifecycle step of the [Runtime] maps to an optional command run with `sh -c`
//! (typically a `docker start`/`docker stop`/`docker restart` of the autopilot and
//! state machine containers). A step without a command succeeds without doing anything.

use crate::{Error, Runtime};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc};
use tokio::process::Command;
use tracing::{debug, warn};

/// Commands run for each lifecycle step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Commands {
    /// Start the vehicle (autopilot and state machine).
    pub start: Option<String>,
    /// Stop the vehicle.
    pub stop: Option<String>,
    /// Restart the services the vehicle depends on.
    pub restart: Option<String>,
    /// Print the path of the most recent flight log on the last line of stdout.
    pub latest_artifact: Option<String>,
}

/// A [Runtime] backed by shell commands.
#[derive(Clone, Debug)]
pub struct Shell {
    commands: Arc<Commands>,
}

impl Shell {
    pub fn new(commands: Commands) -> Self {
        Self {
            commands: Arc::new(commands),
        }
    }

    async fn execute(&self, step: &str, command: Option<&str>) -> Result<(), Error> {
        let Some(command) = command else {
            debug!(step, "no command configured");
            return Ok(());
        };
        let output = Command::new("sh").arg("-c").arg(command).output().await?;
        if !output.status.success() {
            return Err(Error::Collaborator(format!(
                "{step} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        debug!(step, command, "ran command");
        Ok(())
    }
}

impl Runtime for Shell {
    async fn start(&mut self) -> Result<(), Error> {
        self.execute("start", self.commands.start.as_deref()).await
    }

    async fn stop(&mut self) -> Result<(), Error> {
        self.execute("stop", self.commands.stop.as_deref()).await
    }

    async fn restart(&mut self) -> Result<(), Error> {
        self.execute("restart", self.commands.restart.as_deref()).await
    }

    async fn latest_artifact(&mut self) -> Option<PathBuf> {
        let command = self.commands.latest_artifact.as_deref()?;
        let output = match Command::new("sh").arg("-c").arg(command).output().await {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                warn!(status = %output.status, "failed to locate latest artifact");
                return None;
            }
            Err(err) => {
                warn!(?err, "failed to locate latest artifact");
                return None;
            }
        };
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(PathBuf::from)
    }
}
