//! services/api/src/live/hub.rs
//!
//! The realtime hub: named rooms (one per session id) whose members are
//! reached through per-connection outbound channels. Connection tasks
//! register an `UnboundedSender` on join and drain the matching receiver
//! into their transport; the hub itself never touches a socket, which keeps
//! it transport-agnostic and directly testable.

use crate::web::protocol::ServerMessage;
use checkpoint_core::domain::Role;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

/// The outbound channel half a connection registers for itself.
pub type MemberSender = UnboundedSender<ServerMessage>;

struct Member {
    role: Role,
    tx: MemberSender,
}

#[derive(Default)]
struct Room {
    members: HashMap<Uuid, Member>,
}

/// Maintains room membership and delivers messages to room members.
///
/// All operations on a missing room (or member) are deliberate no-ops: a
/// late or duplicate `leave` after a session was torn down must never fault.
/// The lock is never held across an await point; channel sends are
/// non-blocking.
#[derive(Default)]
pub struct Hub {
    rooms: Mutex<HashMap<Uuid, Room>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the room for a newly opened session. Idempotent.
    pub fn create_room(&self, session_id: Uuid) {
        self.rooms
            .lock()
            .expect("hub lock poisoned")
            .entry(session_id)
            .or_default();
    }

    /// Tears down the room and drops every member channel.
    pub fn remove_room(&self, session_id: Uuid) {
        self.rooms.lock().expect("hub lock poisoned").remove(&session_id);
    }

    /// Adds a participant to a room, replacing any earlier registration for
    /// the same participant id (reconnect). A joining teacher also displaces
    /// any other teacher member: the latest presenter connection is
    /// authoritative for the room.
    ///
    /// Returns false when the room does not exist, so callers can reject a
    /// join against a session that was never opened.
    pub fn join(&self, session_id: Uuid, participant_id: Uuid, role: Role, tx: MemberSender) -> bool {
        let mut rooms = self.rooms.lock().expect("hub lock poisoned");
        let Some(room) = rooms.get_mut(&session_id) else {
            warn!("Join for unknown room {}", session_id);
            return false;
        };
        if role == Role::Teacher {
            let displaced: Vec<Uuid> = room
                .members
                .iter()
                .filter(|(id, m)| m.role == Role::Teacher && **id != participant_id)
                .map(|(id, _)| *id)
                .collect();
            for id in displaced {
                debug!("Presenter {} displaced by {} in room {}", id, participant_id, session_id);
                room.members.remove(&id);
            }
        }
        room.members.insert(participant_id, Member { role, tx });
        true
    }

    /// Removes a participant. An empty room is retained: a session may
    /// briefly have zero viewers between disconnect and reconnect.
    pub fn leave(&self, session_id: Uuid, participant_id: Uuid) {
        let mut rooms = self.rooms.lock().expect("hub lock poisoned");
        if let Some(room) = rooms.get_mut(&session_id) {
            room.members.remove(&participant_id);
        }
    }

    /// Delivers to every room member except `exclude`.
    pub fn broadcast(&self, session_id: Uuid, message: ServerMessage, exclude: Option<Uuid>) {
        let rooms = self.rooms.lock().expect("hub lock poisoned");
        let Some(room) = rooms.get(&session_id) else {
            return;
        };
        for (id, member) in &room.members {
            if Some(*id) == exclude {
                continue;
            }
            // A closed receiver means the connection is going away; its
            // leave() will clean the entry up.
            let _ = member.tx.send(message.clone());
        }
    }

    /// Delivers only to members holding the given role. Used for
    /// presenter-only tally updates and viewer-only checkpoint announcements.
    pub fn send_to_role(&self, session_id: Uuid, role: Role, message: ServerMessage) {
        let rooms = self.rooms.lock().expect("hub lock poisoned");
        let Some(room) = rooms.get(&session_id) else {
            return;
        };
        for member in room.members.values().filter(|m| m.role == role) {
            let _ = member.tx.send(message.clone());
        }
    }

    /// Delivers to a single member, e.g. a sync reply or a per-participant
    /// rejection.
    pub fn send_to(&self, session_id: Uuid, participant_id: Uuid, message: ServerMessage) {
        let rooms = self.rooms.lock().expect("hub lock poisoned");
        if let Some(member) = rooms
            .get(&session_id)
            .and_then(|room| room.members.get(&participant_id))
        {
            let _ = member.tx.send(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn member(hub: &Hub, session: Uuid, role: Role) -> (Uuid, UnboundedReceiver<ServerMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = unbounded_channel();
        assert!(hub.join(session, id, role, tx));
        (id, rx)
    }

    #[test]
    fn broadcast_skips_the_excluded_sender() {
        let hub = Hub::new();
        let session = Uuid::new_v4();
        hub.create_room(session);
        let (teacher, mut teacher_rx) = member(&hub, session, Role::Teacher);
        let (_, mut student_rx) = member(&hub, session, Role::Student);

        hub.broadcast(session, ServerMessage::SessionEnded, Some(teacher));

        assert_eq!(student_rx.try_recv().unwrap(), ServerMessage::SessionEnded);
        assert!(teacher_rx.try_recv().is_err());
    }

    #[test]
    fn role_delivery_only_reaches_that_role() {
        let hub = Hub::new();
        let session = Uuid::new_v4();
        hub.create_room(session);
        let (_, mut teacher_rx) = member(&hub, session, Role::Teacher);
        let (_, mut student_rx) = member(&hub, session, Role::Student);

        hub.send_to_role(session, Role::Student, ServerMessage::SessionEnded);

        assert_eq!(student_rx.try_recv().unwrap(), ServerMessage::SessionEnded);
        assert!(teacher_rx.try_recv().is_err());
    }

    #[test]
    fn latest_presenter_connection_is_authoritative() {
        let hub = Hub::new();
        let session = Uuid::new_v4();
        hub.create_room(session);
        let (_, mut first_rx) = member(&hub, session, Role::Teacher);
        let (_, mut second_rx) = member(&hub, session, Role::Teacher);

        hub.send_to_role(session, Role::Teacher, ServerMessage::SessionEnded);

        assert_eq!(second_rx.try_recv().unwrap(), ServerMessage::SessionEnded);
        // The displaced presenter's channel was dropped by the hub.
        assert!(first_rx.try_recv().is_err());
    }

    #[test]
    fn operations_on_missing_rooms_are_no_ops() {
        let hub = Hub::new();
        let session = Uuid::new_v4();
        // No create_room: join is rejected, everything else is silent.
        let (tx, _rx) = unbounded_channel();
        assert!(!hub.join(session, Uuid::new_v4(), Role::Student, tx));
        hub.leave(session, Uuid::new_v4());
        hub.broadcast(session, ServerMessage::SessionEnded, None);
        hub.send_to_role(session, Role::Teacher, ServerMessage::SessionEnded);
    }
}
