//! Persisted record of the combinations a campaign has already dispatched.
//!
//! # Format
//!
//! The store is a single JSON document:
//!
//! ```text
//! {
//!   "version": 1,
//!   "executed": [{"mode": "ALTCTL", "throttle": 260, "state": "Takeoff"}, ...],
//!   "by_state": {"Takeoff": [{"mode": "ALTCTL", "throttle": 260}, ...]}
//! }
//! ```
//!
//! `executed` is sorted and holds complete combinations. `by_state` is only written
//! for state-scoped campaigns and indexes what has been tried in each state. It is
//! derived from `executed`, which remains the ground truth on load.
//!
//! Writes go to a sibling temporary file that is then renamed over the store, so a
//! crash mid-write leaves the previous version intact.

use crate::{
    spec::{Combination, Scope, Space, Variant},
    Error,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// Current version of the store format.
pub const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Document {
    version: u32,
    executed: Vec<Combination>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    by_state: BTreeMap<String, Vec<Variant>>,
}

/// Combinations already dispatched, optionally partitioned by vehicle state.
#[derive(Debug)]
pub struct Store {
    path: PathBuf,
    scope: Scope,
    executed: BTreeSet<Combination>,
    by_state: BTreeMap<String, BTreeSet<Variant>>,
}

impl Store {
    /// Load the store at `path`.
    ///
    /// A missing or empty file yields an empty store. Any other failure is returned, as
    /// resuming without the executed set could dispatch a combination twice.
    pub fn load(path: impl Into<PathBuf>, scope: Scope) -> Result<Self, Error> {
        let path = path.into();
        let mut store = Self {
            path,
            scope,
            executed: BTreeSet::new(),
            by_state: BTreeMap::new(),
        };
        if !store.path.exists() {
            debug!(path = ?store.path, "no executed tests found");
            return Ok(store);
        }
        let raw = fs::read_to_string(&store.path)?;
        if raw.trim().is_empty() {
            return Ok(store);
        }
        let document: Document = serde_json::from_str(&raw)?;
        if document.version != VERSION {
            return Err(Error::UnsupportedVersion(document.version));
        }
        for combination in document.executed {
            store.mark_executed(combination);
        }
        if scope == Scope::State && document.by_state != store.index() {
            warn!(path = ?store.path, "state index out of sync, rebuilt from executed tests");
        }
        info!(path = ?store.path, executed = store.executed.len(), "loaded executed tests");
        Ok(store)
    }

    /// Persist the store.
    pub fn save(&self) -> Result<(), Error> {
        let document = Document {
            version: VERSION,
            executed: self.executed.iter().cloned().collect(),
            by_state: self.index(),
        };
        let encoded = serde_json::to_vec_pretty(&document)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, encoded)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    /// Remove the store at `path`, even if it can no longer be loaded.
    ///
    /// Returns the number of combinations forgotten (zero for an unreadable store).
    pub fn reset(path: impl Into<PathBuf>, scope: Scope) -> Result<usize, Error> {
        let path = path.into();
        match Self::load(path.clone(), scope) {
            Ok(mut store) => {
                let forgotten = store.len();
                store.clear()?;
                Ok(forgotten)
            }
            Err(err) => {
                warn!(?err, ?path, "discarding unreadable executed tests");
                fs::remove_file(&path)?;
                Ok(0)
            }
        }
    }

    /// Forget every executed combination and remove the file.
    pub fn clear(&mut self) -> Result<(), Error> {
        self.executed.clear();
        self.by_state.clear();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.executed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executed.is_empty()
    }

    pub fn executed(&self) -> impl Iterator<Item = &Combination> {
        self.executed.iter()
    }

    pub fn contains(&self, combination: &Combination) -> bool {
        self.executed.contains(combination)
    }

    /// Record `combination` as dispatched.
    ///
    /// Returns `false` if it was already recorded.
    pub fn mark_executed(&mut self, combination: Combination) -> bool {
        if self.scope == Scope::State {
            if let Some(state) = combination.state() {
                self.by_state
                    .entry(state.to_string())
                    .or_default()
                    .insert(combination.variant());
            }
        }
        self.executed.insert(combination)
    }

    /// Combinations of `space` that may still be dispatched in `context`.
    ///
    /// State-scoped campaigns only offer combinations of the given state that have not
    /// been tried in it. Geofence-scoped campaigns ignore `context`: once dispatched, a
    /// combination is exhausted everywhere.
    pub fn available<'a>(&'a self, space: &'a Space, context: &'a str) -> Vec<&'a Combination> {
        match self.scope {
            Scope::State => {
                let tried = self.by_state.get(context);
                space
                    .in_state(context)
                    .filter(|c| tried.is_none_or(|tried| !tried.contains(&c.variant())))
                    .collect()
            }
            Scope::Geofence => space.iter().filter(|c| !self.contains(c)).collect(),
        }
    }

    /// Pick one available combination for `context`.
    ///
    /// No ordering among available combinations is guaranteed.
    pub fn select(&self, space: &Space, context: &str) -> Option<Combination> {
        self.available(space, context).first().map(|c| (*c).clone())
    }

    /// Whether every combination of `space` has been dispatched.
    pub fn is_exhausted(&self, space: &Space) -> bool {
        space.iter().all(|c| self.contains(c))
    }

    /// Number of combinations of `space` not yet dispatched.
    pub fn remaining(&self, space: &Space) -> usize {
        space.iter().filter(|c| !self.contains(c)).count()
    }

    fn index(&self) -> BTreeMap<String, Vec<Variant>> {
        self.by_state
            .iter()
            .map(|(state, variants)| (state.clone(), variants.iter().cloned().collect()))
            .collect()
    }
}
