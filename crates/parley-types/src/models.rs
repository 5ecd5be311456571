use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::RoomId;

/// Placeholder content left behind by a soft delete. The record itself is
/// retained.
pub const DELETED_PLACEHOLDER: &str = "This message has been deleted";

/// Per-user presence, derived from the live connection count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            _ => Self::Offline,
        }
    }
}

/// A registered account. The password hash lives in the store only and is
/// never part of this model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub avatar: Option<String>,
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub blocked_users: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub creator: Uuid,
    pub members: Vec<Uuid>,
    pub admins: Vec<Uuid>,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn is_admin(&self, user_id: Uuid) -> bool {
        self.admins.contains(&user_id)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    #[default]
    Text,
    Voice,
    File,
    Location,
    Poll,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Voice => "voice",
            Self::File => "file",
            Self::Location => "location",
            Self::Poll => "poll",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "voice" => Self::Voice,
            "file" => Self::File,
            "location" => Self::Location,
            "poll" => Self::Poll,
            _ => Self::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user: Uuid,
    pub emoji: String,
}

/// A persisted chat message. Exactly one of `receiver` and `group` is set:
/// `receiver` for 1:1 messages, `group` for group messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub sender: Uuid,
    pub receiver: Option<Uuid>,
    pub group: Option<Uuid>,
    pub content: String,
    pub content_type: ContentType,
    pub voice_url: Option<String>,
    pub location: Option<Location>,
    pub poll_id: Option<Uuid>,
    /// Snapshot of the content before the first edit, set exactly once.
    pub original_content: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub read_by: Vec<Uuid>,
    pub reactions: Vec<Reaction>,
    pub parent_message: Option<Uuid>,
    pub forwarded_from: Option<Uuid>,
    pub is_deleted: bool,
    pub is_pinned: bool,
}

impl Message {
    /// The room this message fans out to.
    pub fn room(&self) -> Option<RoomId> {
        match (self.receiver, self.group) {
            (Some(user), None) => Some(RoomId::User(user)),
            (None, Some(group)) => Some(RoomId::Group(group)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    pub votes: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: Uuid,
    pub creator: Uuid,
    pub question: String,
    pub options: Vec<PollOption>,
    pub expires_at: Option<DateTime<Utc>>,
    pub is_multiple_choice: bool,
    pub group: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Poll {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|t| t <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_room_is_receiver_xor_group() {
        let mut msg = Message {
            id: Uuid::new_v4(),
            sender: Uuid::new_v4(),
            receiver: Some(Uuid::new_v4()),
            group: None,
            content: "hi".into(),
            content_type: ContentType::Text,
            voice_url: None,
            location: None,
            poll_id: None,
            original_content: None,
            timestamp: Utc::now(),
            edited_at: None,
            read_by: vec![],
            reactions: vec![],
            parent_message: None,
            forwarded_from: None,
            is_deleted: false,
            is_pinned: false,
        };
        assert!(matches!(msg.room(), Some(RoomId::User(_))));

        msg.group = Some(Uuid::new_v4());
        assert!(msg.room().is_none());

        msg.receiver = None;
        assert!(matches!(msg.room(), Some(RoomId::Group(_))));
    }

    #[test]
    fn poll_expiry() {
        let now = Utc::now();
        let poll = Poll {
            id: Uuid::new_v4(),
            creator: Uuid::new_v4(),
            question: "?".into(),
            options: vec![],
            expires_at: Some(now - chrono::Duration::seconds(1)),
            is_multiple_choice: false,
            group: Uuid::new_v4(),
            created_at: now,
        };
        assert!(poll.is_expired(now));
        assert!(!Poll { expires_at: None, ..poll }.is_expired(now));
    }
}
