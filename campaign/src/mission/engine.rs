use super::{
    dispatcher::{Dispatcher, Worker},
    ingress::{Mailbox, Message, Status},
    metrics::Metrics,
    Config, Outcome, Session, Watchdog,
};
use crate::{
    command::Template,
    results::{Record, ResultLog},
    spec::{generate, Combination, Space, Specification},
    store::Store,
    Adapter, Channel, Error, Runtime,
};
use futures::{channel::mpsc, StreamExt};
use prometheus_client::registry::Registry;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

/// Runs a campaign one mission at a time.
///
/// Every ready signal, status update, publish acknowledgement and watchdog expiry is
/// handled here, one message at a time. Selecting a combination, marking it executed
/// and sending its command therefore happen without interleaving, which is what keeps
/// dispatch at-most-once and a single mission in flight.
pub struct Engine<R: Runtime, A: Adapter, C: Channel> {
    // Collaborators
    runtime: R,
    adapter: A,
    channel: C,

    // Configuration
    spec: Specification,
    mission: serde_json::Value,
    mission_timeout: Duration,
    geofence_radius: f64,

    // Campaign
    space: Space,
    template: Template,
    store: Store,
    results: ResultLog,

    // Message passing
    mailbox: mpsc::Receiver<Message>,
    sender: Mailbox,
    ready: watch::Sender<bool>,
    dispatcher: Dispatcher,
    worker: Option<Worker<C>>,

    // State
    session: Option<Session>,

    metrics: Metrics,
}

impl<R: Runtime, A: Adapter, C: Channel> Engine<R, A, C> {
    /// Creates a new engine with the given configuration.
    ///
    /// Loads the executed-test store, failing if it cannot be read. Returns a tuple of
    /// the engine and the mailbox used to deliver vehicle events.
    pub fn new(registry: &mut Registry, cfg: Config<R, A, C>) -> Result<(Self, Mailbox), Error> {
        let space = generate(&cfg.spec);
        let template = Template::new(space.kind());
        let store = Store::load(cfg.store, space.kind().scope())?;
        info!(
            drone = cfg.spec.drone(),
            combinations = space.len(),
            executed = store.len(),
            "prepared campaign"
        );

        // Create mailbox
        let (tx, rx) = mpsc::channel(cfg.mailbox_size);
        let mailbox = Mailbox::new(tx);

        // Create publish worker
        let (ready, ready_rx) = watch::channel(false);
        let (dispatcher, requests) = Dispatcher::new();
        let worker = Worker::new(
            cfg.channel.clone(),
            cfg.spec.drone().to_string(),
            requests,
            ready_rx,
            mailbox.clone(),
            cfg.publish_delay,
        );

        let metrics = Metrics::init(registry);
        metrics.remaining.set(store.remaining(&space) as i64);

        Ok((
            Self {
                runtime: cfg.runtime,
                adapter: cfg.adapter,
                channel: cfg.channel,
                spec: cfg.spec,
                mission: cfg.mission,
                mission_timeout: cfg.mission_timeout,
                geofence_radius: cfg.geofence_radius,
                space,
                template,
                store,
                results: ResultLog::new(cfg.results),
                mailbox: rx,
                sender: mailbox.clone(),
                ready,
                dispatcher,
                worker: Some(worker),
                session: None,
                metrics,
            },
            mailbox,
        ))
    }

    /// Starts the engine.
    ///
    /// Returns a handle that resolves once the campaign completes, is shut down, or
    /// hits a fatal error.
    pub fn start(self) -> JoinHandle<Result<Outcome, Error>> {
        tokio::spawn(self.run())
    }

    /// Runs the campaign to completion.
    pub async fn run(mut self) -> Result<Outcome, Error> {
        // Prepare the vehicle
        if let Err(err) = self.runtime.start().await {
            warn!(?err, "failed to start vehicle runtime");
        }
        let radius = if self.space.kind().geofence {
            self.geofence_radius
        } else {
            0.0
        };
        if let Err(err) = self.adapter.toggle_geofence(radius).await {
            warn!(?err, radius, "failed to set geofence");
        }
        let worker = self.worker.take().map(Worker::start);

        let result = self.drive().await;

        // Tear down the mission in flight (if any)
        if let Some(session) = self.session.take() {
            let _ = session.finish();
        }
        if let Some(worker) = worker {
            worker.abort();
        }
        self.persist();
        match &result {
            Ok(outcome) => info!(?outcome, executed = self.store.len(), "campaign stopped"),
            Err(err) => warn!(?err, "campaign failed"),
        }
        result
    }

    async fn drive(&mut self) -> Result<Outcome, Error> {
        if let Some(outcome) = self.next().await? {
            return Ok(outcome);
        }
        while let Some(message) = self.mailbox.next().await {
            let outcome = match message {
                Message::Ready => {
                    self.on_ready();
                    None
                }
                Message::Status(status) => self.on_status(status).await?,
                Message::Dispatched { mission, result } => {
                    result?;
                    self.on_dispatched(mission);
                    None
                }
                Message::Timeout { mission } => self.on_timeout(mission).await?,
                Message::Shutdown => Some(Outcome::Shutdown),
            };
            if let Some(outcome) = outcome {
                return Ok(outcome);
            }
        }
        Ok(Outcome::Shutdown)
    }

    fn on_ready(&mut self) {
        if !self.ready.send_replace(true) {
            info!("vehicle ready");
        }
    }

    fn on_dispatched(&mut self, mission: u64) {
        if !self.dispatcher.dispatched(mission) {
            debug!(mission, "ignoring publish of stale mission");
            return;
        }
        if let Some(session) = self.session.as_mut() {
            session.publish(Instant::now());
        }
        info!(mission, timeout = ?self.mission_timeout, "monitoring mission");
    }

    async fn on_status(&mut self, status: Status) -> Result<Option<Outcome>, Error> {
        // Ignore updates until the vehicle is ready and a mission is in flight
        let monitoring = self
            .session
            .as_ref()
            .filter(|session| self.dispatcher.is_monitoring(session.mission()));
        let Some(session) = monitoring.filter(|_| *self.ready.borrow()) else {
            debug!(?status, phase = ?self.dispatcher.phase(), "dropping status");
            self.metrics.dropped.inc();
            return Ok(None);
        };
        let (mission, sent) = (session.mission(), session.sent());

        // Record success
        let context = match status {
            Status::Success => return self.complete().await,
            Status::State(context) => context,
        };

        // Only one test per mission
        if sent {
            debug!(mission, %context, "test already sent this mission");
            self.metrics.dropped.inc();
            return Ok(None);
        }

        // Select an untested combination for this context
        let Some(combination) = self.store.select(&self.space, &context) else {
            if self.store.is_exhausted(&self.space) {
                info!(executed = self.store.len(), "finished with all tests");
                return Ok(Some(Outcome::Completed));
            }
            debug!(mission, %context, "no tests available in context");
            return Ok(None);
        };

        // Mark before sending so no later update can select it again
        let command = self.template.build(&combination)?;
        self.store.mark_executed(combination.clone());
        self.persist();
        info!(mission, %context, %combination, "executing test");
        if let Err(err) = self.adapter.send_command(command).await {
            warn!(?err, mission, %combination, "failed to send command");
        }
        self.metrics.dispatched.inc();
        self.metrics
            .remaining
            .set(self.store.remaining(&self.space) as i64);
        if let Some(session) = self.session.as_mut() {
            session.record(combination);
        }
        Ok(None)
    }

    async fn complete(&mut self) -> Result<Option<Outcome>, Error> {
        let Some(session) = self.session.take() else {
            return Ok(None);
        };
        let mission = session.mission();
        self.dispatcher.complete();
        let (combination, elapsed) = session.finish();
        info!(mission, ?elapsed, "mission succeeded");
        self.record(mission, combination, true, elapsed).await;
        self.persist();
        self.metrics.completed.inc();

        // Force a landing in case the test switched to a manual mode
        if let Err(err) = self.adapter.cleanup().await {
            warn!(?err, "failed to return vehicle to a safe state");
        }
        self.next().await
    }

    async fn on_timeout(&mut self, mission: u64) -> Result<Option<Outcome>, Error> {
        // The mission may have completed while the timeout was in flight
        if !self.dispatcher.is_monitoring(mission) {
            debug!(mission, "ignoring stale timeout");
            return Ok(None);
        }
        let Some(session) = self.session.take() else {
            return Ok(None);
        };
        self.dispatcher.abort();
        self.ready.send_replace(false);
        warn!(mission, "time exceeded, restarting vehicle");

        let (combination, elapsed) = session.finish();
        self.record(mission, combination, false, elapsed).await;
        self.persist();
        self.recover().await;
        self.dispatcher.recovered();
        self.metrics.aborted.inc();
        self.next().await
    }

    /// Halt the vehicle and bring its runtime back up.
    async fn recover(&mut self) {
        if let Err(err) = self.channel.broadcast_abort().await {
            warn!(?err, "failed to broadcast abort");
        }
        if let Err(err) = self.runtime.stop().await {
            warn!(?err, "failed to stop vehicle runtime");
        }
        if let Err(err) = self.runtime.restart().await {
            warn!(?err, "failed to restart vehicle services");
        }
        if let Err(err) = self.adapter.cleanup().await {
            warn!(?err, "failed to return vehicle to a safe state");
        }
        if let Err(err) = self.runtime.start().await {
            warn!(?err, "failed to start vehicle runtime");
        }
    }

    /// Enqueue the next mission, unless every combination has been dispatched.
    async fn next(&mut self) -> Result<Option<Outcome>, Error> {
        if self.store.is_exhausted(&self.space) {
            info!(executed = self.store.len(), "finished with all tests");
            return Ok(Some(Outcome::Completed));
        }
        let mission = self.dispatcher.enqueue(self.mission.clone()).await?;
        let watchdog = Watchdog::spawn(mission, self.mission_timeout, self.sender.clone());
        self.session = Some(Session::new(mission, watchdog));
        debug!(mission, "enqueued mission");
        Ok(None)
    }

    async fn record(
        &mut self,
        mission: u64,
        combination: Option<Combination>,
        mission_complete: bool,
        elapsed: Duration,
    ) {
        let artifact = self.runtime.latest_artifact().await;
        let record = Record {
            vehicle: self.spec.drone().to_string(),
            mission,
            artifact,
            combination,
            mission_complete,
            duration_ms: elapsed.as_millis() as u64,
        };
        if let Err(err) = self.results.append(&record) {
            warn!(?err, path = ?self.results.path(), "failed to write result");
        }
    }

    fn persist(&self) {
        if let Err(err) = self.store.save() {
            warn!(?err, path = ?self.store.path(), "failed to save executed tests");
        }
    }
}
