//! Defines the protocol between the huddle service and connected actors.
//!
//! Commands flow from an actor to the execution manager; [`RoomEvent`]s flow
//! back out to every *other* member of the originating actor's room. Both
//! sides are plain serde values so the transport (stdio today, a websocket
//! bridge in front of it in deployment) stays dumb.

use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use uuid::Uuid;

/// What the actor wants the assistant to do with the prompt. Only controls
/// the phrasing of the wrapped prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ActionKind {
    Generate,
    Analyze,
    Refactor,
    Review,
    Test,
}

/// One inbound command. Immutable; discarded once the matching
/// [`ExecutionResult`] has been produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Opaque identity supplied by the session provider.
    pub actor_id: String,

    /// Absolute working directory the execution is scoped to.
    pub directory: PathBuf,

    pub action: ActionKind,

    /// The actor's natural-language task, exactly as typed.
    pub prompt: String,

    /// When false the task is sent to the assistant bare, without the
    /// context-maintenance wrapping.
    #[serde(default = "default_true")]
    pub context_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Produced exactly once per [`ExecutionRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    /// Accumulated assistant output (stdout), possibly prefixed with a
    /// context-truncation warning.
    pub output: String,

    pub duration_ms: u64,

    /// Identifier for this execution; also the key for
    /// out-of-band cancellation while the run is in flight.
    pub session_id: Uuid,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Failure taxonomy surfaced to actors. Never a raw string: clients branch
/// on the kind (e.g. a timeout suggests simplifying the request, a
/// rate-limit denial carries a retry-after).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    PathInvalid,
    PromptInvalid,
    RateLimited,
    TimedOut,
    ProcessFailed,
    ProcessStartFailed,
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,

    pub content: String,

    /// Informational only. Ordering of the stored history is arrival order
    /// at the coordinator, never this client-generated stamp.
    pub timestamp: DateTime<Utc>,

    pub directory: PathBuf,
}

/// Reply handed to a joining actor describing the room it just entered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub directory: PathBuf,
    pub member_count: usize,
    pub execution_in_flight: bool,
}

/// Broadcast to members of a room. Delivery is best-effort and
/// at-most-once per connected peer; an offline peer reconciles by
/// re-fetching chat history on reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display)]
#[serde(tag = "type", rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RoomEvent {
    MemberJoined {
        actor_id: String,
        member_count: usize,
    },

    MemberLeft {
        actor_id: String,
        member_count: usize,
    },

    /// Snapshot sent to the joining actor itself.
    RoomStatus {
        directory: PathBuf,
        member_count: usize,
        execution_in_flight: bool,
    },

    /// Peers receiving this should disable their own command input until
    /// the matching `command-completed` arrives for the same directory.
    CommandStarted {
        directory: PathBuf,
        actor_id: String,
        command: String,
    },

    CommandCompleted {
        directory: PathBuf,
        actor_id: String,
        success: bool,
    },

    NewMessage {
        directory: PathBuf,
        message: ChatMessage,
    },

    ChatCleared {
        directory: PathBuf,
    },
}

/// Row in the administrative active-sessions listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSession {
    pub session_id: Uuid,
    pub actor_id: String,
    pub directory: PathBuf,
    pub started_at: DateTime<Utc>,
}
