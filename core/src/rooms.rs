//! Per-directory rooms: membership, chat relay, and lifecycle broadcasts.
//!
//! All mutable state lives behind a single mutex owned by the coordinator.
//! Delivery is best-effort and never blocks: a peer whose channel is full
//! or gone simply misses the event and reconciles from chat history on
//! reconnect.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use async_channel::Sender;
use chrono::DateTime;
use chrono::Utc;
use huddle_protocol::protocol::ChatMessage;
use huddle_protocol::protocol::RoomEvent;
use huddle_protocol::protocol::RoomSnapshot;
use tracing::debug;
use tracing::warn;

use crate::chat_log::ChatLog;

struct Member {
    tx: Sender<RoomEvent>,
    #[allow(dead_code)]
    joined_at: DateTime<Utc>,
}

#[derive(Default)]
struct Room {
    members: HashMap<String, Member>,
    /// Advisory UI signal only. Genuine exclusivity is the execution
    /// manager's per-directory lock.
    execution_in_flight: bool,
}

#[derive(Default)]
struct CoordinatorState {
    rooms: HashMap<PathBuf, Room>,
    /// An actor belongs to at most one room at a time.
    memberships: HashMap<String, PathBuf>,
}

pub struct RoomCoordinator {
    state: Mutex<CoordinatorState>,
    chat_log: Arc<dyn ChatLog>,
}

impl RoomCoordinator {
    pub fn new(chat_log: Arc<dyn ChatLog>) -> Self {
        Self {
            state: Mutex::new(CoordinatorState::default()),
            chat_log,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Add `actor_id` to the room for `directory`, leaving any prior room
    /// first. The joining actor receives a `room-status` event on its own
    /// channel; the snapshot is also returned for request/response
    /// surfaces.
    pub fn join(&self, actor_id: &str, directory: &Path, tx: Sender<RoomEvent>) -> RoomSnapshot {
        let mut guard = self.lock();
        let state = &mut *guard;
        Self::remove_membership_locked(state, actor_id);

        state
            .memberships
            .insert(actor_id.to_string(), directory.to_path_buf());
        let room = state.rooms.entry(directory.to_path_buf()).or_default();
        room.members.insert(
            actor_id.to_string(),
            Member {
                tx,
                joined_at: Utc::now(),
            },
        );

        let member_count = room.members.len();
        let snapshot = RoomSnapshot {
            directory: directory.to_path_buf(),
            member_count,
            execution_in_flight: room.execution_in_flight,
        };

        Self::broadcast_locked(
            room,
            &RoomEvent::MemberJoined {
                actor_id: actor_id.to_string(),
                member_count,
            },
            Some(actor_id),
        );
        if let Some(member) = room.members.get(actor_id) {
            let _ = member.tx.try_send(RoomEvent::RoomStatus {
                directory: snapshot.directory.clone(),
                member_count: snapshot.member_count,
                execution_in_flight: snapshot.execution_in_flight,
            });
        }

        debug!("{actor_id} joined room {}", directory.display());
        snapshot
    }

    /// Remove `actor_id` from its room, if any. Also the disconnect path.
    pub fn leave(&self, actor_id: &str) {
        let mut state = self.lock();
        Self::remove_membership_locked(&mut state, actor_id);
    }

    /// Mark the room's execution in flight and tell everyone except the
    /// originator, whose own UI already knows.
    pub fn command_started(&self, directory: &Path, command: &str, originating_actor: &str) {
        let mut state = self.lock();
        let Some(room) = state.rooms.get_mut(directory) else {
            return;
        };
        if room.execution_in_flight {
            // The execution manager's directory lock should make this
            // impossible; seeing it means a caller bypassed the manager.
            warn!(
                "protocol violation: overlapping command-started for {}",
                directory.display()
            );
        }
        room.execution_in_flight = true;
        Self::broadcast_locked(
            room,
            &RoomEvent::CommandStarted {
                directory: directory.to_path_buf(),
                actor_id: originating_actor.to_string(),
                command: command.to_string(),
            },
            Some(originating_actor),
        );
    }

    /// Clear the in-flight flag and unlock peers' inputs. Emitted on every
    /// completion path, including failures and timeouts.
    pub fn command_completed(&self, directory: &Path, success: bool, originating_actor: &str) {
        let mut state = self.lock();
        let Some(room) = state.rooms.get_mut(directory) else {
            return;
        };
        room.execution_in_flight = false;
        Self::broadcast_locked(
            room,
            &RoomEvent::CommandCompleted {
                directory: directory.to_path_buf(),
                actor_id: originating_actor.to_string(),
                success,
            },
            Some(originating_actor),
        );
    }

    /// Record a chat message and relay it to the rest of the room. The
    /// originator applies it locally without waiting for the echo.
    pub fn new_message(&self, message: ChatMessage, originating_actor: &str) {
        self.chat_log.append(message.clone());
        let state = self.lock();
        let Some(room) = state.rooms.get(&message.directory) else {
            return;
        };
        let directory = message.directory.clone();
        Self::broadcast_locked(
            room,
            &RoomEvent::NewMessage { directory, message },
            Some(originating_actor),
        );
    }

    /// Clear the stored history and tell peers to reset their local views
    /// in lockstep with the server-side context reset.
    pub fn chat_cleared(&self, directory: &Path, originating_actor: &str) {
        self.chat_log.clear(directory);
        let state = self.lock();
        let Some(room) = state.rooms.get(directory) else {
            return;
        };
        Self::broadcast_locked(
            room,
            &RoomEvent::ChatCleared {
                directory: directory.to_path_buf(),
            },
            Some(originating_actor),
        );
    }

    pub fn history(&self, directory: &Path) -> Vec<ChatMessage> {
        self.chat_log.history(directory)
    }

    fn remove_membership_locked(state: &mut CoordinatorState, actor_id: &str) {
        let Some(directory) = state.memberships.remove(actor_id) else {
            return;
        };
        let Some(room) = state.rooms.get_mut(&directory) else {
            return;
        };
        room.members.remove(actor_id);
        if room.members.is_empty() {
            // Lazy cleanup: the room table never holds empty rooms.
            state.rooms.remove(&directory);
            debug!("room {} dropped (last member left)", directory.display());
            return;
        }
        let member_count = room.members.len();
        Self::broadcast_locked(
            room,
            &RoomEvent::MemberLeft {
                actor_id: actor_id.to_string(),
                member_count,
            },
            None,
        );
    }

    fn broadcast_locked(room: &Room, event: &RoomEvent, except: Option<&str>) {
        for (member_id, member) in &room.members {
            if except.is_some_and(|skip| skip == member_id) {
                continue;
            }
            // Best-effort, at-most-once: a full or closed channel means the
            // peer misses this event.
            let _ = member.tx.try_send(event.clone());
        }
    }
}
