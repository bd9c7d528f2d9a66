use super::Watchdog;
use crate::spec::Combination;
use std::time::Duration;
use tokio::time::Instant;

/// State of the mission currently in flight.
///
/// Created when a mission is enqueued and consumed once its result is recorded
/// or it is aborted.
pub struct Session {
    mission: u64,
    published: Option<Instant>,
    combination: Option<Combination>,
    sent: bool,
    watchdog: Watchdog,
}

impl Session {
    pub fn new(mission: u64, watchdog: Watchdog) -> Self {
        Self {
            mission,
            published: None,
            combination: None,
            sent: false,
            watchdog,
        }
    }

    pub fn mission(&self) -> u64 {
        self.mission
    }

    /// Whether a test was already sent during this mission.
    pub fn sent(&self) -> bool {
        self.sent
    }

    pub fn combination(&self) -> Option<&Combination> {
        self.combination.as_ref()
    }

    /// Mark the mission as published and arm its watchdog.
    pub fn publish(&mut self, at: Instant) {
        self.published = Some(at);
        self.watchdog.start(at);
    }

    /// Record the test sent during this mission.
    pub fn record(&mut self, combination: Combination) {
        self.combination = Some(combination);
        self.sent = true;
    }

    /// Time since the mission was published.
    pub fn elapsed(&self) -> Duration {
        self.published
            .map(|published| published.elapsed())
            .unwrap_or_default()
    }

    /// Cancel the watchdog and return the tested combination and mission duration.
    pub fn finish(mut self) -> (Option<Combination>, Duration) {
        self.watchdog.cancel();
        let elapsed = self.elapsed();
        (self.combination.take(), elapsed)
    }
}
