//! Append-only log of mission outcomes.
//!
//! Each line is a JSON [Record]. Downstream tooling (flight log deviation analysis,
//! anomaly classification) consumes the file line by line.

use crate::{spec::Combination, Error};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// Outcome of a single mission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Vehicle the mission was flown by.
    pub vehicle: String,
    /// Sequence number of the mission within this process.
    pub mission: u64,
    /// Flight log produced by the mission, if the runtime found one.
    pub artifact: Option<PathBuf>,
    /// Combination dispatched during the mission, if any.
    pub combination: Option<Combination>,
    /// Whether the vehicle reported success before the watchdog fired.
    pub mission_complete: bool,
    /// Time between publishing the mission and its outcome.
    pub duration_ms: u64,
}

/// Appends [Record]s to a file.
#[derive(Clone, Debug)]
pub struct ResultLog {
    path: PathBuf,
}

impl ResultLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `record` as a single line.
    pub fn append(&self, record: &Record) -> Result<(), Error> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Read every record written so far.
    pub fn read(&self) -> Result<Vec<Record>, Error> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        fs::read_to_string(&self.path)?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(Error::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{Context, Mode};

    #[test]
    fn test_append_and_read() {
        let dir = std::env::temp_dir().join(format!("campaign_results_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let log = ResultLog::new(dir.join("results.jsonl"));
        assert!(log.read().unwrap().is_empty());

        let completed = Record {
            vehicle: "Polkadot".into(),
            mission: 1,
            artifact: Some(PathBuf::from("2024-06-03/17_49_00.ulg")),
            combination: Some(Combination {
                mode: Some(Mode::Posctl),
                throttle: Some(550),
                context: Context::State("Takeoff".into()),
            }),
            mission_complete: true,
            duration_ms: 61_000,
        };
        let aborted = Record {
            mission: 2,
            artifact: None,
            combination: None,
            mission_complete: false,
            duration_ms: 74_000,
            ..completed.clone()
        };
        log.append(&completed).unwrap();
        log.append(&aborted).unwrap();

        let raw = fs::read_to_string(log.path()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert_eq!(log.read().unwrap(), vec![completed, aborted]);
    }
}
