use huddle_protocol::protocol::ActiveSession;
use huddle_protocol::protocol::ChatMessage;
use huddle_protocol::protocol::ErrorKind;
use huddle_protocol::protocol::ExecutionResult;
use huddle_protocol::protocol::RoomEvent;
use huddle_protocol::protocol::RoomSnapshot;
use serde::Serialize;
use tokio::sync::mpsc;

pub(crate) struct OutgoingMessageSender {
    sender: mpsc::Sender<OutgoingMessage>,
}

impl OutgoingMessageSender {
    pub(crate) fn new(sender: mpsc::Sender<OutgoingMessage>) -> Self {
        Self { sender }
    }

    pub(crate) async fn send(&self, message: OutgoingMessage) {
        let _ = self.sender.send(message).await;
    }

    /// Route one room event to the bridge connection for `to`.
    pub(crate) async fn send_event(&self, to: &str, event: RoomEvent) {
        self.send(OutgoingMessage::Event {
            to: to.to_string(),
            event,
        })
        .await;
    }
}

/// Outgoing message from the server to the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub(crate) enum OutgoingMessage {
    /// Room event fan-out; `to` names the receiving actor.
    Event { to: String, event: RoomEvent },

    JoinedRoom { id: u64, snapshot: RoomSnapshot },

    ExecutionCompleted { id: u64, result: ExecutionResult },

    /// The command was rejected before any process was spawned.
    ExecutionRejected {
        id: u64,
        kind: ErrorKind,
        message: String,
    },

    ChatHistory {
        id: u64,
        messages: Vec<ChatMessage>,
    },

    Sessions {
        id: u64,
        sessions: Vec<ActiveSession>,
    },

    SessionKilled { id: u64, killed: bool },

    /// Transport-level problem with an inbound line.
    Error { message: String },
}
