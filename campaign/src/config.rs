//! Configuration file of the `campaign` binary.
//!
//! ```yaml
//! spec:
//!   drone: Polkadot
//!   modes: [ALTCTL, STABILIZED]
//!   throttle: [1, 2, 3]
//!   states: [Takeoff, BriarWaypoint]
//! mission: mission.json
//! store: executed_tests.json
//! results: results.jsonl
//! broker: 127.0.0.1:1883
//! timing:
//!   mission_timeout_ms: 74000
//! runtime:
//!   start: docker start px4
//!   stop: docker stop px4
//! ```
//!
//! Relative paths are resolved against the directory holding the configuration file.

use crate::{
    mission::{DEFAULT_GEOFENCE_RADIUS, DEFAULT_MISSION_TIMEOUT, DEFAULT_PUBLISH_DELAY},
    process::Commands,
    spec::Specification,
    transport::DEFAULT_RECONNECT_DELAY,
    Error,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

/// Default broker address.
pub const DEFAULT_BROKER: &str = "127.0.0.1:1883";

/// Default size of internal mailboxes.
pub const DEFAULT_MAILBOX_SIZE: usize = 1024;

fn default_store() -> PathBuf {
    PathBuf::from("executed_tests.json")
}

fn default_results() -> PathBuf {
    PathBuf::from("results.jsonl")
}

fn default_broker() -> String {
    DEFAULT_BROKER.to_string()
}

fn default_geofence_radius() -> f64 {
    DEFAULT_GEOFENCE_RADIUS
}

fn default_mailbox_size() -> usize {
    DEFAULT_MAILBOX_SIZE
}

/// Timing of a campaign, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub mission_timeout_ms: u64,
    pub publish_delay_ms: u64,
    pub reconnect_delay_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            mission_timeout_ms: DEFAULT_MISSION_TIMEOUT.as_millis() as u64,
            publish_delay_ms: DEFAULT_PUBLISH_DELAY.as_millis() as u64,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
        }
    }
}

impl Timing {
    pub fn mission_timeout(&self) -> Duration {
        Duration::from_millis(self.mission_timeout_ms)
    }

    pub fn publish_delay(&self) -> Duration {
        Duration::from_millis(self.publish_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Campaign configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Scenario to fuzz.
    pub spec: Specification,

    /// JSON mission description published at the start of every mission.
    pub mission: PathBuf,

    /// File tracking executed combinations.
    #[serde(default = "default_store")]
    pub store: PathBuf,

    /// File mission results are appended to.
    #[serde(default = "default_results")]
    pub results: PathBuf,

    /// Message broker address (`host:port`).
    #[serde(default = "default_broker")]
    pub broker: String,

    #[serde(default)]
    pub timing: Timing,

    /// Geofence radius used by geofence-scoped campaigns.
    #[serde(default = "default_geofence_radius")]
    pub geofence_radius: f64,

    /// Shell commands driving the simulated vehicle.
    #[serde(default)]
    pub runtime: Commands,

    /// The maximum size of internal mailboxes.
    #[serde(default = "default_mailbox_size")]
    pub mailbox_size: usize,
}

impl Config {
    /// Read the configuration at `path`.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&contents)?;
        if let Some(base) = path.parent() {
            for file in [&mut config.mission, &mut config.store, &mut config.results] {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        Ok(config)
    }

    /// Read the mission description.
    pub fn mission(&self) -> Result<serde_json::Value, Error> {
        let contents = fs::read_to_string(&self.mission)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::Mode;

    fn directory(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "campaign_config_{}_{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_defaults() {
        let dir = directory("defaults");
        let path = dir.join("campaign.yaml");
        fs::write(
            &path,
            "spec:\n  drone: Polkadot\n  modes: [ALTCTL]\n  states: [Takeoff]\nmission: mission.json\n",
        )
        .unwrap();
        fs::write(dir.join("mission.json"), r#"{"waypoints": [1, 2]}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.spec.modes(), &[Mode::Altctl]);
        assert_eq!(config.store, dir.join("executed_tests.json"));
        assert_eq!(config.results, dir.join("results.jsonl"));
        assert_eq!(config.broker, DEFAULT_BROKER);
        assert_eq!(config.timing.mission_timeout(), DEFAULT_MISSION_TIMEOUT);
        assert_eq!(config.timing.publish_delay(), DEFAULT_PUBLISH_DELAY);
        assert_eq!(config.timing.reconnect_delay(), DEFAULT_RECONNECT_DELAY);
        assert_eq!(config.geofence_radius, DEFAULT_GEOFENCE_RADIUS);
        assert_eq!(config.runtime, Commands::default());
        assert_eq!(config.mailbox_size, DEFAULT_MAILBOX_SIZE);
        assert_eq!(
            config.mission().unwrap(),
            serde_json::json!({"waypoints": [1, 2]})
        );
    }

    #[test]
    fn test_load_overrides() {
        let dir = directory("overrides");
        let path = dir.join("campaign.yaml");
        fs::write(
            &path,
            r#"
spec:
  drone: Polkadot
  modes: [AUTO.RTL]
  geofence: [1, 5]
mission: /srv/mission.json
store: state/executed.json
broker: broker:1883
timing:
  mission_timeout_ms: 1000
geofence_radius: 35.5
runtime:
  start: docker start px4
  latest_artifact: ls -t *.ulg | head -n 1
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.spec.kind().geofence);
        assert_eq!(config.mission, PathBuf::from("/srv/mission.json"));
        assert_eq!(config.store, dir.join("state/executed.json"));
        assert_eq!(config.broker, "broker:1883");
        assert_eq!(config.timing.mission_timeout(), Duration::from_secs(1));
        assert_eq!(config.timing.publish_delay(), DEFAULT_PUBLISH_DELAY);
        assert_eq!(config.geofence_radius, 35.5);
        assert_eq!(config.runtime.start.as_deref(), Some("docker start px4"));
        assert_eq!(config.runtime.stop, None);
    }

    #[test]
    fn test_load_invalid() {
        let dir = directory("invalid");
        let path = dir.join("campaign.yaml");

        // States and geofence actions are mutually exclusive
        fs::write(
            &path,
            "spec:\n  drone: Polkadot\n  states: [Takeoff]\n  geofence: [1]\nmission: m.json\n",
        )
        .unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Yaml(_))));

        // Unknown fields are rejected
        fs::write(
            &path,
            "spec:\n  drone: Polkadot\n  states: [Takeoff]\nmission: m.json\nretries: 3\n",
        )
        .unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Yaml(_))));

        assert!(matches!(
            Config::load(&dir.join("missing.yaml")),
            Err(Error::Io(_))
        ));
    }
}
