use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{CreatePollRequest, SendMessageRequest, VotePollRequest};
use crate::models::{Message, Poll, PresenceStatus};

/// Fan-out key for live delivery: a user's own room for 1:1 messages, a
/// group's room for group messages. Derived, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    User(Uuid),
    Group(Uuid),
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Authenticate the connection. Must be the first frame.
    Identify { token: String },

    /// Join the caller's own user room. The payload id is advisory; the
    /// authenticated id is authoritative.
    Join(Uuid),

    /// Join a group room.
    JoinGroup(Uuid),

    SendMessage(SendMessageRequest),

    #[serde(rename_all = "camelCase")]
    MarkAsRead { message_id: Uuid },

    Typing(TypingTarget),
    StopTyping(TypingTarget),

    #[serde(rename_all = "camelCase")]
    PinMessage { message_id: Uuid },

    CreatePoll(CreatePollRequest),
    VotePoll(VotePollRequest),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingTarget {
    pub receiver_id: Option<Uuid>,
    pub group_id: Option<Uuid>,
}

/// Events sent FROM server TO clients over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful authentication.
    #[serde(rename_all = "camelCase")]
    Ready { user_id: Uuid },

    /// A new message was delivered to a room this connection joined.
    NewMessage(Message),

    MessageEdited(Message),

    #[serde(rename_all = "camelCase")]
    MessageDeleted { message_id: Uuid },

    #[serde(rename_all = "camelCase")]
    MessagePinned { message_id: Uuid, pinned: bool },

    /// Unicast to the original sender when someone reads their message.
    #[serde(rename_all = "camelCase")]
    MessageRead { message_id: Uuid, reader_id: Uuid },

    /// Global broadcast on every presence transition.
    #[serde(rename_all = "camelCase")]
    UserStatusChange {
        user_id: Uuid,
        status: PresenceStatus,
    },

    #[serde(rename_all = "camelCase")]
    UserTyping {
        user_id: Uuid,
        group_id: Option<Uuid>,
    },

    #[serde(rename_all = "camelCase")]
    UserStoppedTyping {
        user_id: Uuid,
        group_id: Option<Uuid>,
    },

    /// A poll plus its companion message.
    NewPoll { poll: Poll, message: Message },

    PollUpdated(Poll),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_camel_case_wire_names() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"joinGroup","data":"6a9f1c6e-8d10-4b6e-9e0a-24c2d1a0b111"}"#)
                .unwrap();
        assert!(matches!(cmd, ClientCommand::JoinGroup(_)));

        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"sendMessage","data":{"receiverId":"6a9f1c6e-8d10-4b6e-9e0a-24c2d1a0b111","content":"hello","contentType":"text"}}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::SendMessage(req) => {
                assert!(req.receiver_id.is_some());
                assert!(req.group_id.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn status_change_wire_shape() {
        let event = GatewayEvent::UserStatusChange {
            user_id: Uuid::nil(),
            status: PresenceStatus::Online,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "userStatusChange");
        assert_eq!(json["data"]["status"], "online");
    }
}
