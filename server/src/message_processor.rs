use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use huddle_core::ExecutionManager;
use huddle_core::RoomCoordinator;
use huddle_protocol::protocol::ChatMessage;
use huddle_protocol::protocol::ExecutionRequest;
use huddle_protocol::protocol::Role;
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::outgoing_message::OutgoingMessage;
use crate::outgoing_message::OutgoingMessageSender;

/// Capacity of one actor's room-event channel. A peer that falls this far
/// behind starts missing events and reconciles from chat history.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Inbound message from the bridge. The bridge has already authenticated
/// the actor; `actor_id` is trusted here.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMessage {
    Join {
        id: u64,
        actor_id: String,
        directory: PathBuf,
    },
    Leave {
        actor_id: String,
    },
    Execute {
        id: u64,
        request: ExecutionRequest,
    },
    Chat {
        actor_id: String,
        message: ChatMessage,
    },
    ClearChat {
        actor_id: String,
        directory: PathBuf,
    },
    History {
        id: u64,
        directory: PathBuf,
    },
    ListSessions {
        id: u64,
    },
    KillSession {
        id: u64,
        session_id: Uuid,
    },
}

pub(crate) struct MessageProcessor {
    outgoing: Arc<OutgoingMessageSender>,
    manager: Arc<ExecutionManager>,
    rooms: Arc<RoomCoordinator>,
}

impl MessageProcessor {
    pub(crate) fn new(
        outgoing: Arc<OutgoingMessageSender>,
        manager: Arc<ExecutionManager>,
        rooms: Arc<RoomCoordinator>,
    ) -> Self {
        Self {
            outgoing,
            manager,
            rooms,
        }
    }

    pub(crate) async fn process(&self, line: &str) {
        let message = match serde_json::from_str::<ClientMessage>(line) {
            Ok(message) => message,
            Err(e) => {
                warn!("failed to parse client message: {e}");
                self.outgoing
                    .send(OutgoingMessage::Error {
                        message: format!("unparseable message: {e}"),
                    })
                    .await;
                return;
            }
        };

        match message {
            ClientMessage::Join {
                id,
                actor_id,
                directory,
            } => self.handle_join(id, actor_id, directory).await,
            ClientMessage::Leave { actor_id } => self.rooms.leave(&actor_id),
            ClientMessage::Execute { id, request } => self.handle_execute(id, request),
            ClientMessage::Chat { actor_id, message } => {
                self.rooms.new_message(message, &actor_id);
            }
            ClientMessage::ClearChat {
                actor_id,
                directory,
            } => self.rooms.chat_cleared(&directory, &actor_id),
            ClientMessage::History { id, directory } => {
                let messages = self.rooms.history(&directory);
                self.outgoing
                    .send(OutgoingMessage::ChatHistory { id, messages })
                    .await;
            }
            ClientMessage::ListSessions { id } => {
                let sessions = self.manager.list_active_sessions();
                self.outgoing
                    .send(OutgoingMessage::Sessions { id, sessions })
                    .await;
            }
            ClientMessage::KillSession { id, session_id } => {
                let killed = self.manager.kill_session(session_id);
                self.outgoing
                    .send(OutgoingMessage::SessionKilled { id, killed })
                    .await;
            }
        }
    }

    async fn handle_join(&self, id: u64, actor_id: String, directory: PathBuf) {
        let (tx, rx) = async_channel::bounded(EVENT_CHANNEL_CAPACITY);
        let snapshot = self.rooms.join(&actor_id, &directory, tx);

        // Pump this actor's room events to the bridge until its channel
        // closes (the actor left, hopped rooms, or disconnected).
        let outgoing = self.outgoing.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                outgoing.send_event(&actor_id, event).await;
            }
        });

        self.outgoing
            .send(OutgoingMessage::JoinedRoom { id, snapshot })
            .await;
    }

    /// Executions run on their own task so one long assistant invocation
    /// never blocks the processor loop.
    fn handle_execute(&self, id: u64, request: ExecutionRequest) {
        let outgoing = self.outgoing.clone();
        let manager = self.manager.clone();
        let rooms = self.rooms.clone();

        tokio::spawn(async move {
            let actor_id = request.actor_id.clone();
            let directory = request.directory.clone();
            match manager.execute(request).await {
                Ok(result) => {
                    // Relay the assistant's reply into the room chat so
                    // peers see it without polling.
                    if result.success && !result.output.is_empty() {
                        rooms.new_message(
                            ChatMessage {
                                role: Role::Assistant,
                                content: result.output.clone(),
                                timestamp: Utc::now(),
                                directory,
                            },
                            &actor_id,
                        );
                    }
                    outgoing
                        .send(OutgoingMessage::ExecutionCompleted { id, result })
                        .await;
                }
                Err(err) => {
                    outgoing
                        .send(OutgoingMessage::ExecutionRejected {
                            id,
                            kind: err.kind(),
                            message: err.to_string(),
                        })
                        .await;
                }
            }
        });
    }
}
