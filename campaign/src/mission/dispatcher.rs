use super::Mailbox;
use crate::{Channel, Error};
use futures::{channel::mpsc, SinkExt, StreamExt};
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info};

/// Lifecycle of a mission.
///
/// ```txt
/// Idle -> WaitingForReady -> Dispatched -> Monitoring -> Completed -> Idle
///                                                     \-> Aborting  -> Idle
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    WaitingForReady,
    Dispatched,
    Monitoring,
    Completed,
    Aborting,
}

/// A mission waiting to be published.
#[derive(Debug)]
pub struct Request {
    pub mission: u64,
    pub payload: serde_json::Value,
}

/// Tracks the [Phase] of the single mission in flight and hands new missions to the
/// publish [Worker].
///
/// The queue holds a single mission: enqueuing waits until the worker has taken the
/// mission off the queue.
pub struct Dispatcher {
    phase: Phase,
    current: Option<u64>,
    next: u64,
    queue: mpsc::Sender<Request>,
}

impl Dispatcher {
    /// Create a dispatcher and the receiving end of its queue.
    pub fn new() -> (Self, mpsc::Receiver<Request>) {
        let (queue, requests) = mpsc::channel(0);
        (
            Self {
                phase: Phase::Idle,
                current: None,
                next: 0,
                queue,
            },
            requests,
        )
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Mission currently between enqueue and its outcome.
    pub fn current(&self) -> Option<u64> {
        self.current
    }

    /// Queue a new mission for publishing.
    ///
    /// Resolves once the worker has received the mission and returns the sequence number
    /// assigned to it.
    pub async fn enqueue(&mut self, payload: serde_json::Value) -> Result<u64, Error> {
        self.next += 1;
        let mission = self.next;
        self.queue
            .send(Request { mission, payload })
            .await
            .map_err(|_| Error::Closed)?;
        self.current = Some(mission);
        self.transition(Phase::WaitingForReady);
        Ok(mission)
    }

    /// The worker published `mission`.
    ///
    /// Returns `false` (and stays put) if `mission` is not the one awaiting publication.
    pub fn dispatched(&mut self, mission: u64) -> bool {
        if self.phase != Phase::WaitingForReady || self.current != Some(mission) {
            return false;
        }
        self.transition(Phase::Dispatched);
        self.transition(Phase::Monitoring);
        true
    }

    /// Whether `mission` is published and awaiting its outcome.
    pub fn is_monitoring(&self, mission: u64) -> bool {
        self.phase == Phase::Monitoring && self.current == Some(mission)
    }

    /// The mission in flight reported success.
    pub fn complete(&mut self) {
        if self.phase != Phase::Monitoring {
            return;
        }
        self.transition(Phase::Completed);
        self.current = None;
        self.transition(Phase::Idle);
    }

    /// The mission in flight timed out.
    pub fn abort(&mut self) {
        if self.phase == Phase::Monitoring {
            self.transition(Phase::Aborting);
        }
    }

    /// Recovery from an aborted mission finished.
    pub fn recovered(&mut self) {
        if self.phase != Phase::Aborting {
            return;
        }
        self.current = None;
        self.transition(Phase::Idle);
    }

    fn transition(&mut self, to: Phase) {
        debug!(mission = ?self.current, from = ?self.phase, ?to, "mission transition");
        self.phase = to;
    }
}

/// Publishes queued missions once the vehicle is ready.
pub struct Worker<C: Channel> {
    channel: C,
    vehicle: String,
    requests: mpsc::Receiver<Request>,
    ready: watch::Receiver<bool>,
    mailbox: Mailbox,
    publish_delay: Duration,
}

impl<C: Channel> Worker<C> {
    pub fn new(
        channel: C,
        vehicle: String,
        requests: mpsc::Receiver<Request>,
        ready: watch::Receiver<bool>,
        mailbox: Mailbox,
        publish_delay: Duration,
    ) -> Self {
        Self {
            channel,
            vehicle,
            requests,
            ready,
            mailbox,
            publish_delay,
        }
    }

    /// Start draining the queue.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        while let Some(request) = self.requests.next().await {
            let mission = request.mission;
            info!(mission, "waiting for vehicle to be ready");
            if self.ready.wait_for(|ready| *ready).await.is_err() {
                return;
            }

            // Give the vehicle's state machine time to settle before publishing
            sleep(self.publish_delay).await;
            let result = self
                .channel
                .publish_mission(&self.vehicle, request.payload)
                .await;
            if result.is_ok() {
                info!(mission, vehicle = self.vehicle.as_str(), "published mission");
            }
            self.mailbox.dispatched(mission, result).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{join, FutureExt};
    use serde_json::json;

    #[tokio::test]
    async fn test_transitions() {
        let (mut dispatcher, mut requests) = Dispatcher::new();
        assert_eq!(dispatcher.phase(), Phase::Idle);

        let (mission, request) = join!(dispatcher.enqueue(json!({})), requests.next());
        let mission = mission.unwrap();
        assert_eq!(dispatcher.phase(), Phase::WaitingForReady);
        assert_eq!(request.unwrap().mission, mission);

        // Stale acknowledgements are ignored
        assert!(!dispatcher.dispatched(mission + 1));
        assert!(dispatcher.dispatched(mission));
        assert!(dispatcher.is_monitoring(mission));

        dispatcher.complete();
        assert_eq!(dispatcher.phase(), Phase::Idle);
        assert_eq!(dispatcher.current(), None);

        let (next, _) = join!(dispatcher.enqueue(json!({})), requests.next());
        let next = next.unwrap();
        assert_eq!(next, mission + 1);
        assert!(dispatcher.dispatched(next));
        dispatcher.abort();
        assert_eq!(dispatcher.phase(), Phase::Aborting);

        // Completion cannot race an abort
        dispatcher.complete();
        assert_eq!(dispatcher.phase(), Phase::Aborting);
        dispatcher.recovered();
        assert_eq!(dispatcher.phase(), Phase::Idle);
        assert!(!dispatcher.is_monitoring(next));
    }

    #[tokio::test]
    async fn test_enqueue_waits_for_worker() {
        let (mut dispatcher, mut requests) = Dispatcher::new();

        // Nothing drains the queue yet
        let mut first = Box::pin(dispatcher.enqueue(json!({"n": 1})));
        assert!((&mut first).now_or_never().is_none());

        // Once the worker takes the mission, enqueue resolves
        let request = requests.next().await.unwrap();
        assert_eq!(request.payload, json!({"n": 1}));
        assert_eq!(first.await.unwrap(), 1);
        assert_eq!(dispatcher.phase(), Phase::WaitingForReady);

        let mut second = Box::pin(dispatcher.enqueue(json!({"n": 2})));
        assert!((&mut second).now_or_never().is_none());
        assert_eq!(requests.next().await.unwrap().mission, 2);
        assert_eq!(second.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_enqueue_fails_without_worker() {
        let (mut dispatcher, requests) = Dispatcher::new();
        drop(requests);
        assert!(matches!(
            dispatcher.enqueue(json!({})).await,
            Err(Error::Closed)
        ));
        assert_eq!(dispatcher.phase(), Phase::Idle);
    }
}
