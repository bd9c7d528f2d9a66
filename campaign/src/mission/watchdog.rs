use super::Mailbox;
use futures::channel::oneshot;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Enforces the maximum duration of a single mission.
///
/// The waiter is spawned when a mission is enqueued, armed once the mission is
/// published and reports [super::Message::Timeout] to the engine if the threshold
/// elapses before it is cancelled. Dropping the [Watchdog] cancels it.
///
/// The engine decides whether a reported timeout still applies: a mission may have
/// completed while the timeout was in flight.
pub struct Watchdog {
    start: Option<oneshot::Sender<Instant>>,
    cancel: Option<oneshot::Sender<()>>,
}

impl Watchdog {
    /// Spawn the waiter for `mission`.
    pub fn spawn(mission: u64, threshold: Duration, mut mailbox: Mailbox) -> Self {
        let (start, started) = oneshot::channel::<Instant>();
        let (cancel, mut cancelled) = oneshot::channel::<()>();
        tokio::spawn(async move {
            // Wait for the mission to be published
            let started = tokio::select! {
                started = started => match started {
                    Ok(started) => started,
                    Err(_) => return,
                },
                _ = &mut cancelled => return,
            };

            // Race completion against the threshold
            tokio::select! {
                _ = &mut cancelled => {
                    debug!(mission, "watchdog cancelled");
                    return;
                },
                _ = sleep_until(started + threshold) => {},
            }
            warn!(mission, ?threshold, "mission exceeded threshold");
            mailbox.timeout(mission).await;
        });
        Self {
            start: Some(start),
            cancel: Some(cancel),
        }
    }

    /// Arm the watchdog, measuring from `at`.
    ///
    /// Only the first call has an effect.
    pub fn start(&mut self, at: Instant) {
        if let Some(start) = self.start.take() {
            let _ = start.send(at);
        }
    }

    /// Cancel the watchdog.
    pub fn cancel(&mut self) {
        self.start.take();
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}
