//! Reach the vehicle through a message broker.
//!
//! The broker speaks newline-delimited JSON [Frame]s over TCP: a client subscribes to
//! topics and publishes payloads to topics. A [Link] owns the connection, subscribes to
//! the ready and status topics (forwarding them to the campaign's [Mailbox]) and writes
//! frames on behalf of any number of [Handle]s.
//!
//! The [Handle] exists before the link starts, so it can be handed to the
//! [crate::mission::Engine] whose [Mailbox] the link then feeds.
//!
//! When the connection drops, the [Link] reconnects after a delay and resubscribes. A
//! frame that failed to be written is retried on the new connection, so a publish only
//! fails once the [Link] itself has stopped.
//!
//! Writes never wait on inbound delivery: lines read from the broker are forwarded to
//! the [Mailbox] by a separate task per connection.

use crate::{
    command::Command,
    mission::{Mailbox, Status},
    Adapter, Channel, Error,
};
use futures::{
    channel::{mpsc, oneshot},
    SinkExt, StreamExt,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

/// Topic the vehicle publishes to once it can accept a mission.
pub const READY_TOPIC: &str = "fuzz_mission/ready";

/// Topic the vehicle publishes its status updates to.
pub const STATUS_TOPIC: &str = "update_drone";

/// Topic every vehicle listens to for aborts.
pub const ABORT_TOPIC: &str = "all-drones/abort";

/// Payload of an abort.
pub const ABORT_PAYLOAD: &str = "Shutdown";

/// Default delay between connection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Topic missions for `vehicle` are published to.
pub fn mission_topic(vehicle: &str) -> String {
    format!("drone/{vehicle}/mission-spec")
}

/// Topic commands for `vehicle` are published to.
pub fn command_topic(vehicle: &str) -> String {
    format!("drone/{vehicle}/command")
}

/// A line on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    Subscribe {
        topic: String,
    },
    Publish {
        topic: String,
        payload: serde_json::Value,
    },
}

/// Configuration for the [Link].
#[derive(Clone, Debug)]
pub struct Config {
    /// Broker address (`host:port`).
    pub address: String,

    /// Vehicle commands are addressed to.
    pub vehicle: String,

    /// Whether returning the vehicle to a safe state also zeroes its throttle.
    pub reset_throttle: bool,

    /// Delay between connection attempts.
    pub reconnect_delay: Duration,

    /// The maximum number of frames waiting to be written.
    pub mailbox_size: usize,
}

struct Outbound {
    frame: Frame,
    written: oneshot::Sender<()>,
}

/// Connection to the broker.
pub struct Link {
    cfg: Config,
    requests: mpsc::Receiver<Outbound>,
}

impl Link {
    /// Create a link.
    ///
    /// Returns the link and a [Handle] to publish through it.
    pub fn new(cfg: Config) -> (Self, Handle) {
        let (sender, requests) = mpsc::channel(cfg.mailbox_size);
        let handle = Handle {
            vehicle: cfg.vehicle.clone(),
            reset_throttle: cfg.reset_throttle,
            sender,
        };
        (Self { cfg, requests }, handle)
    }

    /// Start the link, forwarding vehicle events to `events`.
    ///
    /// The link runs until every [Handle] has been dropped.
    pub fn start(self, events: Mailbox) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    async fn run(mut self, events: Mailbox) {
        let mut pending: Option<Outbound> = None;
        loop {
            let stream = match TcpStream::connect(&self.cfg.address).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(?err, address = %self.cfg.address, "failed to connect to broker");
                    sleep(self.cfg.reconnect_delay).await;
                    continue;
                }
            };
            let (reader, mut writer) = stream.into_split();
            if let Err(err) = subscribe(&mut writer).await {
                warn!(?err, "failed to subscribe");
                sleep(self.cfg.reconnect_delay).await;
                continue;
            }
            info!(address = %self.cfg.address, "connected to broker");

            // Inbound lines are delivered from their own task: the engine may be waiting
            // on a write while its mailbox is full
            let (closed, mut disconnected) = oneshot::channel();
            let receiver = tokio::spawn(receive(reader, events.clone(), closed));
            loop {
                let outbound = match pending.take() {
                    Some(outbound) => outbound,
                    None => {
                        let outbound = tokio::select! {
                            biased;
                            outbound = self.requests.next() => Some(outbound),
                            _ = &mut disconnected => None,
                        };
                        match outbound {
                            Some(Some(outbound)) => outbound,
                            Some(None) => {
                                debug!("all handles dropped, closing link");
                                receiver.abort();
                                return;
                            }
                            None => break,
                        }
                    }
                };
                if let Err(err) = write(&mut writer, &outbound.frame).await {
                    warn!(?err, "failed to write frame, reconnecting");
                    pending = Some(outbound);
                    break;
                }
                let _ = outbound.written.send(());
            }
            receiver.abort();
            sleep(self.cfg.reconnect_delay).await;
        }
    }
}

/// Forward every line read from the broker until the connection closes.
async fn receive(reader: OwnedReadHalf, mut events: Mailbox, _closed: oneshot::Sender<()>) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => deliver(&mut events, &line).await,
            Ok(None) => {
                warn!("broker closed connection");
                return;
            }
            Err(err) => {
                warn!(?err, "failed to read from broker");
                return;
            }
        }
    }
}

async fn deliver(events: &mut Mailbox, line: &str) {
    let frame = match serde_json::from_str::<Frame>(line) {
        Ok(frame) => frame,
        Err(err) => {
            debug!(?err, "ignoring malformed frame");
            return;
        }
    };
    let Frame::Publish { topic, payload } = frame else {
        return;
    };
    match topic.as_str() {
        READY_TOPIC => events.ready().await,
        STATUS_TOPIC => match Status::from_value(payload) {
            Ok(status) => events.status(status).await,
            Err(err) => debug!(?err, "ignoring malformed status"),
        },
        _ => debug!(%topic, "ignoring frame"),
    }
}

async fn subscribe(writer: &mut OwnedWriteHalf) -> Result<(), Error> {
    for topic in [READY_TOPIC, STATUS_TOPIC] {
        let frame = Frame::Subscribe {
            topic: topic.to_string(),
        };
        write(writer, &frame).await?;
    }
    Ok(())
}

async fn write(writer: &mut OwnedWriteHalf, frame: &Frame) -> Result<(), Error> {
    let mut line = serde_json::to_vec(frame)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    Ok(())
}

/// Publishes through a [Link].
///
/// Acts as both the mission [Channel] and the vehicle command [Adapter].
#[derive(Clone)]
pub struct Handle {
    vehicle: String,
    reset_throttle: bool,
    sender: mpsc::Sender<Outbound>,
}

impl Handle {
    /// Publish `payload` to `topic`, waiting until it has been written to the broker.
    pub async fn publish(
        &mut self,
        topic: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<(), Error> {
        let (written, done) = oneshot::channel();
        let frame = Frame::Publish {
            topic: topic.into(),
            payload,
        };
        self.sender
            .send(Outbound { frame, written })
            .await
            .map_err(|_| Error::Closed)?;
        done.await.map_err(|_| Error::Closed)
    }
}

impl Channel for Handle {
    async fn publish_mission(
        &mut self,
        vehicle: &str,
        mission: serde_json::Value,
    ) -> Result<(), Error> {
        self.publish(mission_topic(vehicle), mission).await
    }

    async fn broadcast_abort(&mut self) -> Result<(), Error> {
        self.publish(ABORT_TOPIC, json!(ABORT_PAYLOAD)).await
    }
}

impl Adapter for Handle {
    async fn send_command(&mut self, command: Command) -> Result<(), Error> {
        let payload = serde_json::to_value(&command)?;
        let topic = command_topic(&self.vehicle);
        self.publish(topic, payload).await
    }

    async fn toggle_geofence(&mut self, radius: f64) -> Result<(), Error> {
        self.send_command(Command::geofence_radius(radius)).await
    }

    async fn cleanup(&mut self) -> Result<(), Error> {
        self.send_command(Command::safe_state(self.reset_throttle)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{command::Action, mission::Message, spec::Mode};
    use futures::join;
    use tokio::{
        io::{BufReader, Lines},
        net::TcpListener,
        time::timeout,
    };

    const WAIT: Duration = Duration::from_secs(5);

    struct Broker {
        lines: Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Broker {
        async fn accept(listener: &TcpListener) -> Self {
            let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
            let (reader, writer) = stream.into_split();
            let mut broker = Self {
                lines: BufReader::new(reader).lines(),
                writer,
            };
            for topic in [READY_TOPIC, STATUS_TOPIC] {
                assert_eq!(
                    broker.read().await,
                    Frame::Subscribe {
                        topic: topic.into()
                    }
                );
            }
            broker
        }

        /// Abort the connection, so the link's next write fails.
        fn reset(self) {
            let reader = self.lines.into_inner().into_inner();
            let stream = reader.reunite(self.writer).unwrap();
            stream.set_zero_linger().unwrap();
        }

        async fn read(&mut self) -> Frame {
            let line = timeout(WAIT, self.lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn publish(&mut self, topic: &str, payload: serde_json::Value) {
            write(
                &mut self.writer,
                &Frame::Publish {
                    topic: topic.into(),
                    payload,
                },
            )
            .await
            .unwrap();
        }
    }

    async fn setup() -> (TcpListener, Handle, mpsc::Receiver<Message>, JoinHandle<()>) {
        setup_with_events(16).await
    }

    async fn setup_with_events(
        capacity: usize,
    ) -> (TcpListener, Handle, mpsc::Receiver<Message>, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (sender, receiver) = mpsc::channel(capacity);
        let (link, handle) = Link::new(Config {
            address: listener.local_addr().unwrap().to_string(),
            vehicle: "Polkadot".into(),
            reset_throttle: true,
            reconnect_delay: Duration::from_millis(10),
            mailbox_size: 16,
        });
        (listener, handle, receiver, link.start(Mailbox::new(sender)))
    }

    #[tokio::test]
    async fn test_publish_topics() {
        let (listener, mut handle, _events, _link) = setup().await;
        let mut broker = Broker::accept(&listener).await;

        handle
            .publish_mission("Polkadot", json!({"waypoints": []}))
            .await
            .unwrap();
        assert_eq!(
            broker.read().await,
            Frame::Publish {
                topic: "drone/Polkadot/mission-spec".into(),
                payload: json!({"waypoints": []}),
            }
        );

        handle.cleanup().await.unwrap();
        let Frame::Publish { topic, payload } = broker.read().await else {
            panic!("expected publish");
        };
        assert_eq!(topic, "drone/Polkadot/command");
        let command: Command = serde_json::from_value(payload).unwrap();
        assert_eq!(
            command.actions,
            vec![
                Action::SetMode {
                    custom_mode: Mode::AutoLand
                },
                Action::SetThrottle { throttle_value: 0 },
            ]
        );

        handle.broadcast_abort().await.unwrap();
        assert_eq!(
            broker.read().await,
            Frame::Publish {
                topic: ABORT_TOPIC.into(),
                payload: json!("Shutdown"),
            }
        );
    }

    #[tokio::test]
    async fn test_forwards_vehicle_events() {
        let (listener, _handle, mut events, _link) = setup().await;
        let mut broker = Broker::accept(&listener).await;

        broker.publish("unrelated", json!(1)).await;
        broker.publish(STATUS_TOPIC, json!({"status": {"state_name": "Takeoff"}})).await;
        broker.publish(STATUS_TOPIC, json!({"nonsense": true})).await;
        broker.publish(READY_TOPIC, json!("ready")).await;
        broker.publish(STATUS_TOPIC, json!({"status": "success"})).await;

        let message = timeout(WAIT, events.next()).await.unwrap().unwrap();
        assert!(matches!(message, Message::Status(Status::State(s)) if s == "Takeoff"));
        let message = timeout(WAIT, events.next()).await.unwrap().unwrap();
        assert!(matches!(message, Message::Ready));
        let message = timeout(WAIT, events.next()).await.unwrap().unwrap();
        assert!(matches!(message, Message::Status(Status::Success)));
    }

    #[tokio::test]
    async fn test_reconnects_after_broker_drop() {
        let (listener, mut handle, _events, _link) = setup().await;
        let broker = Broker::accept(&listener).await;
        drop(broker);

        // The link resubscribes on a new connection
        let mut broker = Broker::accept(&listener).await;
        handle.broadcast_abort().await.unwrap();
        assert!(matches!(
            broker.read().await,
            Frame::Publish { topic, .. } if topic == ABORT_TOPIC
        ));
    }

    #[tokio::test]
    async fn test_failed_write_resent_after_reconnect() {
        let (listener, mut handle, _events, _link) = setup().await;
        let broker = Broker::accept(&listener).await;
        broker.reset();

        // The abort is queued before the link notices the reset connection
        let (result, mut broker) = join!(handle.broadcast_abort(), Broker::accept(&listener));
        result.unwrap();
        assert_eq!(
            broker.read().await,
            Frame::Publish {
                topic: ABORT_TOPIC.into(),
                payload: json!(ABORT_PAYLOAD),
            }
        );
    }

    #[tokio::test]
    async fn test_writes_while_events_back_up() {
        // Nothing drains the campaign's mailbox
        let (listener, mut handle, _events, _link) = setup_with_events(0).await;
        let mut broker = Broker::accept(&listener).await;
        for _ in 0..4 {
            broker.publish(STATUS_TOPIC, json!({"status": "Takeoff"})).await;
        }

        timeout(WAIT, handle.cleanup()).await.unwrap().unwrap();
        let Frame::Publish { topic, .. } = broker.read().await else {
            panic!("expected publish");
        };
        assert_eq!(topic, command_topic("Polkadot"));
    }

    #[tokio::test]
    async fn test_publish_fails_once_link_stops() {
        let (_listener, mut handle, _events, link) = setup().await;
        link.abort();
        let _ = link.await;
        assert!(matches!(
            handle.broadcast_abort().await,
            Err(Error::Closed)
        ));
    }
}
