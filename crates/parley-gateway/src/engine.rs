use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use parley_store::{Store, StoreError};
use parley_types::api::{
    CreatePollRequest, ForwardRequest, ReplyRequest, SendMessageRequest, VotePollRequest,
};
use parley_types::events::{GatewayEvent, RoomId, TypingTarget};
use parley_types::models::{
    ContentType, DELETED_PLACEHOLDER, Location, Message, Poll, PollOption, Reaction,
};

use crate::markdown;
use crate::router::RoomRouter;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// The delivery engine shared by the socket and REST transports.
///
/// Every operation follows the same shape: validate → transform → persist →
/// fan out. Persistence failure aborts before any fan-out, so an event is
/// never broadcast unless it was durably saved first.
#[derive(Clone)]
pub struct ChatEngine {
    store: Arc<dyn Store>,
    router: RoomRouter,
}

impl ChatEngine {
    pub fn new(store: Arc<dyn Store>, router: RoomRouter) -> Self {
        Self { store, router }
    }

    pub async fn send_message(
        &self,
        sender: Uuid,
        req: SendMessageRequest,
    ) -> EngineResult<Message> {
        let room = target_room(req.receiver_id, req.group_id)?;
        self.authorize_target(sender, room).await?;

        let mut message = blank_message(sender, req.receiver_id, req.group_id, req.content_type);
        match req.content_type {
            ContentType::Text => message.content = markdown::render(&req.content),
            ContentType::Voice => {
                message.voice_url = Some(req.content.clone());
                message.content = req.content;
            }
            // An upload URL produced elsewhere; stored as-is.
            ContentType::File => message.content = req.content,
            ContentType::Location => {
                let latitude = req
                    .latitude
                    .ok_or(EngineError::Validation("latitude is required"))?;
                let longitude = req
                    .longitude
                    .ok_or(EngineError::Validation("longitude is required"))?;
                if !latitude.is_finite() || !longitude.is_finite() {
                    return Err(EngineError::Validation(
                        "latitude and longitude must be finite numbers",
                    ));
                }
                message.location = Some(Location {
                    latitude,
                    longitude,
                });
                message.content = "Location shared".to_string();
            }
            ContentType::Poll => {
                return Err(EngineError::Validation(
                    "poll messages are created through createPoll",
                ));
            }
        }

        self.store.create_message(&message).await?;
        self.router
            .route(room, GatewayEvent::NewMessage(message.clone()))
            .await;
        Ok(message)
    }

    pub async fn reply_to_message(
        &self,
        sender: Uuid,
        parent_id: Uuid,
        req: ReplyRequest,
    ) -> EngineResult<Message> {
        if self.store.find_message_by_id(parent_id).await?.is_none() {
            return Err(EngineError::NotFound("parent message"));
        }
        let room = target_room(req.receiver_id, req.group_id)?;
        self.authorize_target(sender, room).await?;

        let mut message = blank_message(sender, req.receiver_id, req.group_id, ContentType::Text);
        message.content = req.content;
        message.parent_message = Some(parent_id);

        self.store.create_message(&message).await?;
        self.router
            .route(room, GatewayEvent::NewMessage(message.clone()))
            .await;
        Ok(message)
    }

    pub async fn forward_message(
        &self,
        sender: Uuid,
        message_id: Uuid,
        req: ForwardRequest,
    ) -> EngineResult<Message> {
        let original = self
            .store
            .find_message_by_id(message_id)
            .await?
            .ok_or(EngineError::NotFound("message"))?;
        let room = target_room(req.receiver_id, req.group_id)?;
        self.authorize_target(sender, room).await?;

        let mut message = blank_message(sender, req.receiver_id, req.group_id, original.content_type);
        message.content = original.content.clone();
        message.voice_url = original.voice_url.clone();
        message.location = original.location;
        message.forwarded_from = Some(original.id);

        self.store.create_message(&message).await?;
        self.router
            .route(room, GatewayEvent::NewMessage(message.clone()))
            .await;
        Ok(message)
    }

    pub async fn edit_message(
        &self,
        actor: Uuid,
        message_id: Uuid,
        content: String,
    ) -> EngineResult<Message> {
        let mut message = self
            .store
            .find_message_by_id(message_id)
            .await?
            .ok_or(EngineError::NotFound("message"))?;
        if message.sender != actor {
            return Err(EngineError::Forbidden("only the sender may edit a message"));
        }

        // The first edit snapshots the pre-edit content, exactly once.
        if message.original_content.is_none() {
            message.original_content = Some(message.content.clone());
        }
        message.content = content;
        message.edited_at = Some(Utc::now());

        self.store.update_message(&message).await?;
        if let Some(room) = message.room() {
            self.router
                .route(room, GatewayEvent::MessageEdited(message.clone()))
                .await;
        }
        Ok(message)
    }

    pub async fn delete_message(&self, actor: Uuid, message_id: Uuid) -> EngineResult<()> {
        let mut message = self
            .store
            .find_message_by_id(message_id)
            .await?
            .ok_or(EngineError::NotFound("message"))?;
        if message.sender != actor {
            return Err(EngineError::Forbidden(
                "only the sender may delete a message",
            ));
        }

        // Soft delete: the record stays, the content becomes a tombstone.
        message.content = DELETED_PLACEHOLDER.to_string();
        message.is_deleted = true;

        self.store.update_message(&message).await?;
        if let Some(room) = message.room() {
            self.router
                .route(room, GatewayEvent::MessageDeleted { message_id })
                .await;
        }
        Ok(())
    }

    /// Flips the pin flag. Direct messages: sender or receiver; group
    /// messages: a group admin only. Returns the new state.
    pub async fn toggle_pin(&self, actor: Uuid, message_id: Uuid) -> EngineResult<bool> {
        let mut message = self
            .store
            .find_message_by_id(message_id)
            .await?
            .ok_or(EngineError::NotFound("message"))?;

        match message.group {
            Some(group_id) => {
                let group = self
                    .store
                    .find_group_by_id(group_id)
                    .await?
                    .ok_or(EngineError::NotFound("group"))?;
                if !group.is_admin(actor) {
                    return Err(EngineError::Forbidden(
                        "only a group admin may pin a group message",
                    ));
                }
            }
            None => {
                if message.sender != actor && message.receiver != Some(actor) {
                    return Err(EngineError::Forbidden(
                        "only the sender or receiver may pin a direct message",
                    ));
                }
            }
        }

        message.is_pinned = !message.is_pinned;
        self.store.update_message(&message).await?;
        if let Some(room) = message.room() {
            self.router
                .route(
                    room,
                    GatewayEvent::MessagePinned {
                        message_id,
                        pinned: message.is_pinned,
                    },
                )
                .await;
        }
        Ok(message.is_pinned)
    }

    /// Appends a (user, emoji) reaction. Duplicates of the same pair are
    /// deduplicated by the store.
    pub async fn add_reaction(
        &self,
        actor: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> EngineResult<Message> {
        let mut message = self
            .store
            .find_message_by_id(message_id)
            .await?
            .ok_or(EngineError::NotFound("message"))?;
        if self.store.add_reaction(message_id, actor, emoji).await? {
            message.reactions.push(Reaction {
                user: actor,
                emoji: emoji.to_string(),
            });
        }
        Ok(message)
    }

    pub async fn remove_reaction(
        &self,
        actor: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> EngineResult<Message> {
        let mut message = self
            .store
            .find_message_by_id(message_id)
            .await?
            .ok_or(EngineError::NotFound("message"))?;
        if self.store.remove_reaction(message_id, actor, emoji).await? {
            message
                .reactions
                .retain(|r| !(r.user == actor && r.emoji == emoji));
        }
        Ok(message)
    }

    /// Idempotently adds the reader to the read-by set, then unicasts a
    /// `messageRead` event back to the original sender (who may not have
    /// joined the reader's room).
    pub async fn mark_read(&self, reader: Uuid, message_id: Uuid) -> EngineResult<Message> {
        let mut message = self
            .store
            .find_message_by_id(message_id)
            .await?
            .ok_or(EngineError::NotFound("message"))?;

        self.store.append_read_by(message_id, reader).await?;
        if !message.read_by.contains(&reader) {
            message.read_by.push(reader);
        }

        self.router
            .route_to_user(
                message.sender,
                GatewayEvent::MessageRead {
                    message_id,
                    reader_id: reader,
                },
            )
            .await;
        Ok(message)
    }

    /// Transient and unpersisted; routed to the room excluding every
    /// connection of the sender.
    pub async fn typing(
        &self,
        sender: Uuid,
        target: TypingTarget,
        started: bool,
    ) -> EngineResult<()> {
        let room = target_room(target.receiver_id, target.group_id)?;
        let event = if started {
            GatewayEvent::UserTyping {
                user_id: sender,
                group_id: target.group_id,
            }
        } else {
            GatewayEvent::UserStoppedTyping {
                user_id: sender,
                group_id: target.group_id,
            }
        };
        self.router.route_except(room, event, sender).await;
        Ok(())
    }

    /// Creates the poll plus its companion message, then announces both to
    /// the owning group room.
    pub async fn create_poll(
        &self,
        creator: Uuid,
        req: CreatePollRequest,
    ) -> EngineResult<(Poll, Message)> {
        if req.question.trim().is_empty() {
            return Err(EngineError::Validation("a poll needs a question"));
        }
        if req.options.len() < 2 {
            return Err(EngineError::Validation("a poll needs at least two options"));
        }
        if self.store.find_group_by_id(req.group_id).await?.is_none() {
            return Err(EngineError::NotFound("group"));
        }

        let poll = Poll {
            id: Uuid::new_v4(),
            creator,
            question: req.question,
            options: req
                .options
                .into_iter()
                .map(|text| PollOption {
                    text,
                    votes: Vec::new(),
                })
                .collect(),
            expires_at: req.expires_at,
            is_multiple_choice: req.is_multiple_choice,
            group: req.group_id,
            created_at: Utc::now(),
        };
        self.store.create_poll(&poll).await?;

        let mut message = blank_message(creator, None, Some(poll.group), ContentType::Poll);
        message.content = poll.question.clone();
        message.poll_id = Some(poll.id);
        self.store.create_message(&message).await?;

        self.router
            .route(
                RoomId::Group(poll.group),
                GatewayEvent::NewPoll {
                    poll: poll.clone(),
                    message: message.clone(),
                },
            )
            .await;
        Ok((poll, message))
    }

    /// Validates the vote against the poll's rules before any write, so a
    /// rejected vote leaves the poll unmodified.
    pub async fn vote_poll(&self, voter: Uuid, req: VotePollRequest) -> EngineResult<Poll> {
        let poll = self
            .store
            .find_poll_by_id(req.poll_id)
            .await?
            .ok_or(EngineError::NotFound("poll"))?;

        if poll.is_expired(Utc::now()) {
            return Err(EngineError::Validation("poll has expired"));
        }
        if req.option_indexes.is_empty() {
            return Err(EngineError::Validation("at least one option must be chosen"));
        }
        if !poll.is_multiple_choice && req.option_indexes.len() > 1 {
            return Err(EngineError::Validation(
                "poll only allows a single choice",
            ));
        }
        if req.option_indexes.iter().any(|&idx| idx >= poll.options.len()) {
            return Err(EngineError::Validation("option index out of range"));
        }

        self.store
            .record_votes(poll.id, voter, &req.option_indexes, !poll.is_multiple_choice)
            .await?;

        let poll = self
            .store
            .find_poll_by_id(req.poll_id)
            .await?
            .ok_or(EngineError::NotFound("poll"))?;
        self.router
            .route(
                RoomId::Group(poll.group),
                GatewayEvent::PollUpdated(poll.clone()),
            )
            .await;
        Ok(poll)
    }

    async fn authorize_target(&self, sender: Uuid, room: RoomId) -> EngineResult<()> {
        match room {
            RoomId::User(receiver) => {
                let sender_user = self
                    .store
                    .find_user_by_id(sender)
                    .await?
                    .ok_or(EngineError::NotFound("sender"))?;
                let receiver_user = self
                    .store
                    .find_user_by_id(receiver)
                    .await?
                    .ok_or(EngineError::NotFound("receiver"))?;
                if sender_user.blocked_users.contains(&receiver)
                    || receiver_user.blocked_users.contains(&sender)
                {
                    return Err(EngineError::Forbidden(
                        "messaging is blocked between these users",
                    ));
                }
            }
            RoomId::Group(group_id) => {
                if self.store.find_group_by_id(group_id).await?.is_none() {
                    return Err(EngineError::NotFound("group"));
                }
            }
        }
        Ok(())
    }
}

fn target_room(receiver: Option<Uuid>, group: Option<Uuid>) -> EngineResult<RoomId> {
    match (receiver, group) {
        (Some(user), None) => Ok(RoomId::User(user)),
        (None, Some(group)) => Ok(RoomId::Group(group)),
        _ => Err(EngineError::Validation(
            "exactly one of receiverId and groupId must be set",
        )),
    }
}

fn blank_message(
    sender: Uuid,
    receiver: Option<Uuid>,
    group: Option<Uuid>,
    content_type: ContentType,
) -> Message {
    Message {
        id: Uuid::new_v4(),
        sender,
        receiver,
        group,
        content: String::new(),
        content_type,
        voice_url: None,
        location: None,
        poll_id: None,
        original_content: None,
        timestamp: Utc::now(),
        edited_at: None,
        read_by: Vec::new(),
        reactions: Vec::new(),
        parent_message: None,
        forwarded_from: None,
        is_deleted: false,
        is_pinned: false,
    }
}
