use crate::Error;
use futures::{channel::mpsc, SinkExt};
use serde::Deserialize;

/// Status update reported by the vehicle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// The mission finished.
    Success,
    /// The vehicle entered the named state.
    State(String),
}

#[derive(Deserialize)]
struct Update {
    status: Reported,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Reported {
    Name(String),
    State { state_name: String },
}

impl Status {
    /// Parse a status payload.
    ///
    /// Accepts `{"status":"success"}`, `{"status":"<state>"}` and
    /// `{"status":{"state_name":"<state>"}}`.
    pub fn parse(payload: &[u8]) -> Result<Self, Error> {
        Ok(Self::from_update(serde_json::from_slice(payload)?))
    }

    /// Parse an already decoded status payload.
    pub fn from_value(payload: serde_json::Value) -> Result<Self, Error> {
        Ok(Self::from_update(serde_json::from_value(payload)?))
    }

    fn from_update(update: Update) -> Self {
        match update.status {
            Reported::Name(name) if name == "success" => Status::Success,
            Reported::Name(name) => Status::State(name),
            Reported::State { state_name } => Status::State(state_name),
        }
    }
}

/// Messages that can be sent to the [super::Engine].
#[derive(Debug)]
pub enum Message {
    /// The vehicle is ready to accept a mission.
    Ready,
    /// The vehicle reported a status update.
    Status(Status),
    /// The publish worker finished publishing a mission.
    Dispatched {
        mission: u64,
        result: Result<(), Error>,
    },
    /// A mission's watchdog expired.
    Timeout { mission: u64 },
    /// Stop the campaign.
    Shutdown,
}

/// A mailbox that can be used to send [Message]s to the [super::Engine].
#[derive(Clone)]
pub struct Mailbox {
    sender: mpsc::Sender<Message>,
}

impl Mailbox {
    /// Creates a new [Mailbox] with the given [mpsc::Sender].
    pub fn new(sender: mpsc::Sender<Message>) -> Self {
        Self { sender }
    }

    /// Signal that the vehicle is ready for a mission.
    pub async fn ready(&mut self) {
        let _ = self.sender.send(Message::Ready).await;
    }

    /// Deliver a status update from the vehicle.
    pub async fn status(&mut self, status: Status) {
        let _ = self.sender.send(Message::Status(status)).await;
    }

    /// Request that the campaign stop.
    pub async fn shutdown(&mut self) {
        let _ = self.sender.send(Message::Shutdown).await;
    }

    pub(crate) async fn dispatched(&mut self, mission: u64, result: Result<(), Error>) {
        let _ = self
            .sender
            .send(Message::Dispatched { mission, result })
            .await;
    }

    pub(crate) async fn timeout(&mut self, mission: u64) {
        let _ = self.sender.send(Message::Timeout { mission }).await;
    }
}
