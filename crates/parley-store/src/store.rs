use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use parley_types::models::{Group, Message, Poll, PresenceStatus, User};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage failure: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Data-access interface for the chat backend.
///
/// Lookups return `Ok(None)` for missing ids; `StoreError` is reserved for
/// real storage failures.
#[async_trait]
pub trait Store: Send + Sync {
    // -- Users --

    async fn create_user(&self, user: &User, password_hash: &str) -> StoreResult<()>;
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Returns the user together with their password hash, for login.
    async fn find_user_by_username(&self, username: &str)
    -> StoreResult<Option<(User, String)>>;
    async fn list_users(&self) -> StoreResult<Vec<User>>;
    async fn update_user_status(
        &self,
        id: Uuid,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;
    async fn set_block(&self, user_id: Uuid, blocked_id: Uuid, blocked: bool) -> StoreResult<()>;

    // -- Groups --

    async fn create_group(&self, group: &Group) -> StoreResult<()>;
    async fn find_group_by_id(&self, id: Uuid) -> StoreResult<Option<Group>>;
    async fn update_group(&self, group: &Group) -> StoreResult<()>;
    async fn add_member(&self, group_id: Uuid, user_id: Uuid, admin: bool) -> StoreResult<()>;
    async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<()>;

    // -- Messages --

    async fn create_message(&self, message: &Message) -> StoreResult<()>;
    async fn find_message_by_id(&self, id: Uuid) -> StoreResult<Option<Message>>;
    /// Full-row update of the mutable message fields (content, edit
    /// snapshot, delete/pin flags). The read-by and reaction sets are
    /// updated through the atomic operations below instead.
    async fn update_message(&self, message: &Message) -> StoreResult<()>;
    /// Atomic set-append; adding an existing reader is a no-op.
    async fn append_read_by(&self, message_id: Uuid, reader: Uuid) -> StoreResult<()>;
    /// Returns false when the (user, emoji) pair was already present.
    async fn add_reaction(&self, message_id: Uuid, user: Uuid, emoji: &str) -> StoreResult<bool>;
    async fn remove_reaction(&self, message_id: Uuid, user: Uuid, emoji: &str)
    -> StoreResult<bool>;
    async fn direct_messages(&self, a: Uuid, b: Uuid) -> StoreResult<Vec<Message>>;
    async fn group_messages(&self, group_id: Uuid) -> StoreResult<Vec<Message>>;
    async fn thread_messages(&self, parent_id: Uuid) -> StoreResult<Vec<Message>>;

    // -- Polls --

    async fn create_poll(&self, poll: &Poll) -> StoreResult<()>;
    async fn find_poll_by_id(&self, id: Uuid) -> StoreResult<Option<Poll>>;
    /// Records a vote in one transaction: adds the voter to each chosen
    /// option (idempotent) and, when `clear_others` is set, removes them
    /// from every option not chosen.
    async fn record_votes(
        &self,
        poll_id: Uuid,
        voter: Uuid,
        option_indexes: &[usize],
        clear_others: bool,
    ) -> StoreResult<()>;
}
