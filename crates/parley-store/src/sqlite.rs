use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use parley_types::models::{
    ContentType, Group, Location, Message, Poll, PollOption, PresenceStatus, Reaction, User,
};

use crate::migrations;
use crate::store::{Store, StoreError, StoreResult};

/// SQLite-backed persistence gateway.
///
/// Blocking rusqlite calls run under `spawn_blocking`; the connection
/// itself is serialized by a mutex, so every statement is a single atomic
/// step from the engine's point of view.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

struct Database {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("database opened at {}", path.display());
        Ok(Self {
            db: Arc::new(Database {
                conn: Mutex::new(conn),
            }),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            db: Arc::new(Database {
                conn: Mutex::new(conn),
            }),
        })
    }

    async fn call<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .conn
                .lock()
                .map_err(|e| anyhow!("db lock poisoned: {e}"))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(anyhow!("blocking task failed: {e}")))?
        .map_err(StoreError::Backend)
    }
}

#[async_trait]
impl Store for SqliteStore {
    // -- Users --

    async fn create_user(&self, user: &User, password_hash: &str) -> StoreResult<()> {
        let user = user.clone();
        let password = password_hash.to_string();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO users (id, username, email, password, avatar, status, last_seen, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    user.id.to_string(),
                    user.username,
                    user.email,
                    password,
                    user.avatar,
                    user.status.as_str(),
                    user.last_seen.map(ts),
                    ts(user.created_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.call(move |conn| {
            Ok(query_user(conn, "id = ?1", &id.to_string())?.map(|(user, _)| user))
        })
        .await
    }

    async fn find_user_by_username(
        &self,
        username: &str,
    ) -> StoreResult<Option<(User, String)>> {
        let username = username.to_string();
        self.call(move |conn| query_user(conn, "username = ?1", &username))
            .await
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.call(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, email, password, avatar, status, last_seen, created_at
                 FROM users ORDER BY username",
            )?;
            let rows = stmt
                .query_map([], row_to_user_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.into_iter()
                .map(|row| user_from_row(conn, row).map(|(user, _)| user))
                .collect()
        })
        .await
    }

    async fn update_user_status(
        &self,
        id: Uuid,
        status: PresenceStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        self.call(move |conn| {
            conn.execute(
                "UPDATE users SET status = ?1, last_seen = ?2 WHERE id = ?3",
                rusqlite::params![status.as_str(), last_seen.map(ts), id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn set_block(&self, user_id: Uuid, blocked_id: Uuid, blocked: bool) -> StoreResult<()> {
        self.call(move |conn| {
            if blocked {
                conn.execute(
                    "INSERT OR IGNORE INTO user_blocks (user_id, blocked_id) VALUES (?1, ?2)",
                    rusqlite::params![user_id.to_string(), blocked_id.to_string()],
                )?;
            } else {
                conn.execute(
                    "DELETE FROM user_blocks WHERE user_id = ?1 AND blocked_id = ?2",
                    rusqlite::params![user_id.to_string(), blocked_id.to_string()],
                )?;
            }
            Ok(())
        })
        .await
    }

    // -- Groups --

    async fn create_group(&self, group: &Group) -> StoreResult<()> {
        let group = group.clone();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO groups (id, name, description, creator, avatar, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    group.id.to_string(),
                    group.name,
                    group.description,
                    group.creator.to_string(),
                    group.avatar,
                    ts(group.created_at),
                ],
            )?;
            for member in &group.members {
                let role = if group.admins.contains(member) {
                    "admin"
                } else {
                    "member"
                };
                tx.execute(
                    "INSERT OR IGNORE INTO group_members (group_id, user_id, role) VALUES (?1, ?2, ?3)",
                    rusqlite::params![group.id.to_string(), member.to_string(), role],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_group_by_id(&self, id: Uuid) -> StoreResult<Option<Group>> {
        self.call(move |conn| query_group(conn, id)).await
    }

    async fn update_group(&self, group: &Group) -> StoreResult<()> {
        let group = group.clone();
        self.call(move |conn| {
            conn.execute(
                "UPDATE groups SET name = ?1, description = ?2, avatar = ?3 WHERE id = ?4",
                rusqlite::params![
                    group.name,
                    group.description,
                    group.avatar,
                    group.id.to_string()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn add_member(&self, group_id: Uuid, user_id: Uuid, admin: bool) -> StoreResult<()> {
        self.call(move |conn| {
            let role = if admin { "admin" } else { "member" };
            conn.execute(
                "INSERT OR IGNORE INTO group_members (group_id, user_id, role) VALUES (?1, ?2, ?3)",
                rusqlite::params![group_id.to_string(), user_id.to_string(), role],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_member(&self, group_id: Uuid, user_id: Uuid) -> StoreResult<()> {
        self.call(move |conn| {
            conn.execute(
                "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
                rusqlite::params![group_id.to_string(), user_id.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    // -- Messages --

    async fn create_message(&self, message: &Message) -> StoreResult<()> {
        let msg = message.clone();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO messages (id, sender, receiver, group_id, content, content_type,
                                       voice_url, latitude, longitude, poll_id, original_content,
                                       timestamp, edited_at, parent_message, forwarded_from,
                                       is_deleted, is_pinned)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                rusqlite::params![
                    msg.id.to_string(),
                    msg.sender.to_string(),
                    msg.receiver.map(|u| u.to_string()),
                    msg.group.map(|u| u.to_string()),
                    msg.content,
                    msg.content_type.as_str(),
                    msg.voice_url,
                    msg.location.map(|l| l.latitude),
                    msg.location.map(|l| l.longitude),
                    msg.poll_id.map(|u| u.to_string()),
                    msg.original_content,
                    ts(msg.timestamp),
                    msg.edited_at.map(ts),
                    msg.parent_message.map(|u| u.to_string()),
                    msg.forwarded_from.map(|u| u.to_string()),
                    msg.is_deleted,
                    msg.is_pinned,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn find_message_by_id(&self, id: Uuid) -> StoreResult<Option<Message>> {
        self.call(move |conn| {
            let messages = query_messages(conn, "id = ?1", rusqlite::params![id.to_string()])?;
            Ok(messages.into_iter().next())
        })
        .await
    }

    async fn update_message(&self, message: &Message) -> StoreResult<()> {
        let msg = message.clone();
        self.call(move |conn| {
            conn.execute(
                "UPDATE messages SET content = ?1, original_content = ?2, edited_at = ?3,
                                     is_deleted = ?4, is_pinned = ?5
                 WHERE id = ?6",
                rusqlite::params![
                    msg.content,
                    msg.original_content,
                    msg.edited_at.map(ts),
                    msg.is_deleted,
                    msg.is_pinned,
                    msg.id.to_string(),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn append_read_by(&self, message_id: Uuid, reader: Uuid) -> StoreResult<()> {
        self.call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO read_receipts (message_id, user_id) VALUES (?1, ?2)",
                rusqlite::params![message_id.to_string(), reader.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    async fn add_reaction(&self, message_id: Uuid, user: Uuid, emoji: &str) -> StoreResult<bool> {
        let emoji = emoji.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                rusqlite::params![message_id.to_string(), user.to_string(), emoji],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn remove_reaction(
        &self,
        message_id: Uuid,
        user: Uuid,
        emoji: &str,
    ) -> StoreResult<bool> {
        let emoji = emoji.to_string();
        self.call(move |conn| {
            let changed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                rusqlite::params![message_id.to_string(), user.to_string(), emoji],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn direct_messages(&self, a: Uuid, b: Uuid) -> StoreResult<Vec<Message>> {
        self.call(move |conn| {
            query_messages(
                conn,
                "(sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)",
                rusqlite::params![a.to_string(), b.to_string()],
            )
        })
        .await
    }

    async fn group_messages(&self, group_id: Uuid) -> StoreResult<Vec<Message>> {
        self.call(move |conn| {
            query_messages(conn, "group_id = ?1", rusqlite::params![group_id.to_string()])
        })
        .await
    }

    async fn thread_messages(&self, parent_id: Uuid) -> StoreResult<Vec<Message>> {
        self.call(move |conn| {
            query_messages(conn, "parent_message = ?1", rusqlite::params![parent_id.to_string()])
        })
        .await
    }

    // -- Polls --

    async fn create_poll(&self, poll: &Poll) -> StoreResult<()> {
        let poll = poll.clone();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO polls (id, creator, question, expires_at, is_multiple_choice,
                                    group_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    poll.id.to_string(),
                    poll.creator.to_string(),
                    poll.question,
                    poll.expires_at.map(ts),
                    poll.is_multiple_choice,
                    poll.group.to_string(),
                    ts(poll.created_at),
                ],
            )?;
            for (idx, option) in poll.options.iter().enumerate() {
                tx.execute(
                    "INSERT INTO poll_options (poll_id, idx, text) VALUES (?1, ?2, ?3)",
                    rusqlite::params![poll.id.to_string(), idx as i64, option.text],
                )?;
                for voter in &option.votes {
                    tx.execute(
                        "INSERT INTO poll_votes (poll_id, option_idx, user_id) VALUES (?1, ?2, ?3)",
                        rusqlite::params![poll.id.to_string(), idx as i64, voter.to_string()],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn find_poll_by_id(&self, id: Uuid) -> StoreResult<Option<Poll>> {
        self.call(move |conn| query_poll(conn, id)).await
    }

    async fn record_votes(
        &self,
        poll_id: Uuid,
        voter: Uuid,
        option_indexes: &[usize],
        clear_others: bool,
    ) -> StoreResult<()> {
        let indexes = option_indexes.to_vec();
        self.call(move |conn| {
            let tx = conn.transaction()?;
            if clear_others {
                // Dropping every existing vote and re-inserting the chosen
                // set leaves the voter only in the chosen options.
                tx.execute(
                    "DELETE FROM poll_votes WHERE poll_id = ?1 AND user_id = ?2",
                    rusqlite::params![poll_id.to_string(), voter.to_string()],
                )?;
            }
            for idx in &indexes {
                tx.execute(
                    "INSERT OR IGNORE INTO poll_votes (poll_id, option_idx, user_id)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![poll_id.to_string(), *idx as i64, voter.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

// -- Row mapping --

struct UserRow {
    id: String,
    username: String,
    email: String,
    password: String,
    avatar: Option<String>,
    status: String,
    last_seen: Option<String>,
    created_at: String,
}

fn row_to_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        avatar: row.get(4)?,
        status: row.get(5)?,
        last_seen: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn query_user(
    conn: &Connection,
    where_sql: &str,
    param: &str,
) -> Result<Option<(User, String)>> {
    let sql = format!(
        "SELECT id, username, email, password, avatar, status, last_seen, created_at
         FROM users WHERE {where_sql}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row([param], row_to_user_row).optional()?;
    row.map(|r| user_from_row(conn, r)).transpose()
}

fn user_from_row(conn: &Connection, row: UserRow) -> Result<(User, String)> {
    let blocked_users = blocked_ids(conn, &row.id)?;
    Ok((
        User {
            id: uuid_of(&row.id)?,
            username: row.username,
            email: row.email,
            avatar: row.avatar,
            status: PresenceStatus::from_str(&row.status),
            last_seen: row.last_seen.as_deref().map(parse_ts).transpose()?,
            blocked_users,
            created_at: parse_ts(&row.created_at)?,
        },
        row.password,
    ))
}

fn blocked_ids(conn: &Connection, user_id: &str) -> Result<Vec<Uuid>> {
    let mut stmt =
        conn.prepare("SELECT blocked_id FROM user_blocks WHERE user_id = ?1 ORDER BY blocked_id")?;
    let ids = stmt
        .query_map([user_id], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    ids.iter().map(|id| uuid_of(id)).collect()
}

fn query_group(conn: &Connection, id: Uuid) -> Result<Option<Group>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, description, creator, avatar, created_at FROM groups WHERE id = ?1",
    )?;
    let row = stmt
        .query_row([id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .optional()?;

    let Some((gid, name, description, creator, avatar, created_at)) = row else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare("SELECT user_id, role FROM group_members WHERE group_id = ?1 ORDER BY rowid")?;
    let member_rows = stmt
        .query_map([&gid], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut members = Vec::with_capacity(member_rows.len());
    let mut admins = Vec::new();
    for (user_id, role) in member_rows {
        let user_id = uuid_of(&user_id)?;
        members.push(user_id);
        if role == "admin" {
            admins.push(user_id);
        }
    }

    Ok(Some(Group {
        id: uuid_of(&gid)?,
        name,
        description,
        creator: uuid_of(&creator)?,
        members,
        admins,
        avatar,
        created_at: parse_ts(&created_at)?,
    }))
}

struct MessageRow {
    id: String,
    sender: String,
    receiver: Option<String>,
    group_id: Option<String>,
    content: String,
    content_type: String,
    voice_url: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    poll_id: Option<String>,
    original_content: Option<String>,
    timestamp: String,
    edited_at: Option<String>,
    parent_message: Option<String>,
    forwarded_from: Option<String>,
    is_deleted: bool,
    is_pinned: bool,
}

fn row_to_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender: row.get(1)?,
        receiver: row.get(2)?,
        group_id: row.get(3)?,
        content: row.get(4)?,
        content_type: row.get(5)?,
        voice_url: row.get(6)?,
        latitude: row.get(7)?,
        longitude: row.get(8)?,
        poll_id: row.get(9)?,
        original_content: row.get(10)?,
        timestamp: row.get(11)?,
        edited_at: row.get(12)?,
        parent_message: row.get(13)?,
        forwarded_from: row.get(14)?,
        is_deleted: row.get(15)?,
        is_pinned: row.get(16)?,
    })
}

fn query_messages(
    conn: &Connection,
    where_sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT id, sender, receiver, group_id, content, content_type, voice_url,
                latitude, longitude, poll_id, original_content, timestamp, edited_at,
                parent_message, forwarded_from, is_deleted, is_pinned
         FROM messages WHERE {where_sql} ORDER BY timestamp"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, row_to_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
    let mut read_by = read_receipts_for(conn, &ids)?;
    let mut reactions = reactions_for(conn, &ids)?;

    rows.into_iter()
        .map(|row| {
            let read_by = read_by.remove(&row.id).unwrap_or_default();
            let reactions = reactions.remove(&row.id).unwrap_or_default();
            message_from_row(row, read_by, reactions)
        })
        .collect()
}

fn message_from_row(
    row: MessageRow,
    read_by: Vec<Uuid>,
    reactions: Vec<Reaction>,
) -> Result<Message> {
    let location = match (row.latitude, row.longitude) {
        (Some(latitude), Some(longitude)) => Some(Location {
            latitude,
            longitude,
        }),
        _ => None,
    };
    Ok(Message {
        id: uuid_of(&row.id)?,
        sender: uuid_of(&row.sender)?,
        receiver: opt_uuid(row.receiver)?,
        group: opt_uuid(row.group_id)?,
        content: row.content,
        content_type: ContentType::from_str(&row.content_type),
        voice_url: row.voice_url,
        location,
        poll_id: opt_uuid(row.poll_id)?,
        original_content: row.original_content,
        timestamp: parse_ts(&row.timestamp)?,
        edited_at: row.edited_at.as_deref().map(parse_ts).transpose()?,
        read_by,
        reactions,
        parent_message: opt_uuid(row.parent_message)?,
        forwarded_from: opt_uuid(row.forwarded_from)?,
        is_deleted: row.is_deleted,
        is_pinned: row.is_pinned,
    })
}

/// Batch-fetch read receipts for a set of message ids.
fn read_receipts_for(
    conn: &Connection,
    message_ids: &[String],
) -> Result<HashMap<String, Vec<Uuid>>> {
    if message_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT message_id, user_id FROM read_receipts WHERE message_id IN ({})",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let mut map: HashMap<String, Vec<Uuid>> = HashMap::new();
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (message_id, user_id) in rows {
        map.entry(message_id).or_default().push(uuid_of(&user_id)?);
    }
    Ok(map)
}

/// Batch-fetch reactions for a set of message ids.
fn reactions_for(
    conn: &Connection,
    message_ids: &[String],
) -> Result<HashMap<String, Vec<Reaction>>> {
    if message_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders: Vec<String> = (1..=message_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT message_id, user_id, emoji FROM reactions
         WHERE message_id IN ({}) ORDER BY created_at",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
        .iter()
        .map(|id| id as &dyn rusqlite::types::ToSql)
        .collect();

    let mut map: HashMap<String, Vec<Reaction>> = HashMap::new();
    let rows = stmt
        .query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (message_id, user_id, emoji) in rows {
        map.entry(message_id).or_default().push(Reaction {
            user: uuid_of(&user_id)?,
            emoji,
        });
    }
    Ok(map)
}

fn query_poll(conn: &Connection, id: Uuid) -> Result<Option<Poll>> {
    let mut stmt = conn.prepare(
        "SELECT id, creator, question, expires_at, is_multiple_choice, group_id, created_at
         FROM polls WHERE id = ?1",
    )?;
    let row = stmt
        .query_row([id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })
        .optional()?;

    let Some((pid, creator, question, expires_at, is_multiple_choice, group_id, created_at)) = row
    else {
        return Ok(None);
    };

    let mut stmt =
        conn.prepare("SELECT idx, text FROM poll_options WHERE poll_id = ?1 ORDER BY idx")?;
    let option_rows = stmt
        .query_map([&pid], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut options: Vec<PollOption> = option_rows
        .into_iter()
        .map(|(_, text)| PollOption { text, votes: vec![] })
        .collect();

    let mut stmt = conn.prepare(
        "SELECT option_idx, user_id FROM poll_votes WHERE poll_id = ?1 ORDER BY option_idx",
    )?;
    let vote_rows = stmt
        .query_map([&pid], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (idx, user_id) in vote_rows {
        if let Some(option) = options.get_mut(idx as usize) {
            option.votes.push(uuid_of(&user_id)?);
        }
    }

    Ok(Some(Poll {
        id: uuid_of(&pid)?,
        creator: uuid_of(&creator)?,
        question,
        options,
        expires_at: expires_at.as_deref().map(parse_ts).transpose()?,
        is_multiple_choice,
        group: uuid_of(&group_id)?,
        created_at: parse_ts(&created_at)?,
    }))
}

// -- Value helpers --

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite's datetime('now') default stores "YYYY-MM-DD HH:MM:SS"
            // without a timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc())
        })
        .map_err(|e| anyhow!("corrupt timestamp '{s}': {e}"))
}

fn uuid_of(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| anyhow!("corrupt uuid '{s}': {e}"))
}

fn opt_uuid(s: Option<String>) -> Result<Option<Uuid>> {
    s.as_deref().map(uuid_of).transpose()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::models::ContentType;

    fn user(name: &str) -> User {
        User {
            id: Uuid::new_v4(),
            username: name.to_string(),
            email: format!("{name}@example.com"),
            avatar: None,
            status: PresenceStatus::Offline,
            last_seen: None,
            blocked_users: vec![],
            created_at: Utc::now(),
        }
    }

    fn direct_message(sender: Uuid, receiver: Uuid, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender,
            receiver: Some(receiver),
            group: None,
            content: content.to_string(),
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
        }
    }

    #[tokio::test]
    async fn user_roundtrip_with_blocks() {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = user("alice");
        let bob = user("bob");
        store.create_user(&alice, "hash-a").await.unwrap();
        store.create_user(&bob, "hash-b").await.unwrap();

        store.set_block(alice.id, bob.id, true).await.unwrap();

        let loaded = store.find_user_by_id(alice.id).await.unwrap().unwrap();
        assert_eq!(loaded.username, "alice");
        assert_eq!(loaded.blocked_users, vec![bob.id]);

        store.set_block(alice.id, bob.id, false).await.unwrap();
        let loaded = store.find_user_by_id(alice.id).await.unwrap().unwrap();
        assert!(loaded.blocked_users.is_empty());

        let (by_name, hash) = store
            .find_user_by_username("bob")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_name.id, bob.id);
        assert_eq!(hash, "hash-b");
    }

    #[tokio::test]
    async fn missing_ids_are_none_not_errors() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.find_user_by_id(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.find_group_by_id(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.find_message_by_id(Uuid::new_v4()).await.unwrap().is_none());
        assert!(store.find_poll_by_id(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn message_roundtrip_with_sets() {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = user("alice");
        let bob = user("bob");
        store.create_user(&alice, "h").await.unwrap();
        store.create_user(&bob, "h").await.unwrap();

        let msg = direct_message(alice.id, bob.id, "<p>hi</p>");
        store.create_message(&msg).await.unwrap();

        store.append_read_by(msg.id, bob.id).await.unwrap();
        store.append_read_by(msg.id, bob.id).await.unwrap(); // idempotent

        assert!(store.add_reaction(msg.id, bob.id, "👍").await.unwrap());
        assert!(!store.add_reaction(msg.id, bob.id, "👍").await.unwrap()); // deduplicated

        let loaded = store.find_message_by_id(msg.id).await.unwrap().unwrap();
        assert_eq!(loaded.content, "<p>hi</p>");
        assert_eq!(loaded.read_by, vec![bob.id]);
        assert_eq!(loaded.reactions.len(), 1);

        assert!(store.remove_reaction(msg.id, bob.id, "👍").await.unwrap());
        assert!(!store.remove_reaction(msg.id, bob.id, "👍").await.unwrap());
    }

    #[tokio::test]
    async fn direct_history_covers_both_directions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = user("alice");
        let bob = user("bob");
        store.create_user(&alice, "h").await.unwrap();
        store.create_user(&bob, "h").await.unwrap();

        store
            .create_message(&direct_message(alice.id, bob.id, "one"))
            .await
            .unwrap();
        store
            .create_message(&direct_message(bob.id, alice.id, "two"))
            .await
            .unwrap();

        let history = store.direct_messages(alice.id, bob.id).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn single_choice_revote_moves_the_voter() {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = user("alice");
        store.create_user(&alice, "h").await.unwrap();
        let group = Group {
            id: Uuid::new_v4(),
            name: "g".into(),
            description: None,
            creator: alice.id,
            members: vec![alice.id],
            admins: vec![alice.id],
            avatar: None,
            created_at: Utc::now(),
        };
        store.create_group(&group).await.unwrap();

        let poll = Poll {
            id: Uuid::new_v4(),
            creator: alice.id,
            question: "favorite color?".into(),
            options: vec![
                PollOption { text: "red".into(), votes: vec![] },
                PollOption { text: "blue".into(), votes: vec![] },
            ],
            expires_at: None,
            is_multiple_choice: false,
            group: group.id,
            created_at: Utc::now(),
        };
        store.create_poll(&poll).await.unwrap();

        store.record_votes(poll.id, alice.id, &[0], true).await.unwrap();
        store.record_votes(poll.id, alice.id, &[1], true).await.unwrap();

        let loaded = store.find_poll_by_id(poll.id).await.unwrap().unwrap();
        assert!(loaded.options[0].votes.is_empty());
        assert_eq!(loaded.options[1].votes, vec![alice.id]);
    }

    #[tokio::test]
    async fn group_membership_roles() {
        let store = SqliteStore::open_in_memory().unwrap();
        let alice = user("alice");
        let bob = user("bob");
        store.create_user(&alice, "h").await.unwrap();
        store.create_user(&bob, "h").await.unwrap();

        let group = Group {
            id: Uuid::new_v4(),
            name: "team".into(),
            description: None,
            creator: alice.id,
            members: vec![alice.id],
            admins: vec![alice.id],
            avatar: None,
            created_at: Utc::now(),
        };
        store.create_group(&group).await.unwrap();
        store.add_member(group.id, bob.id, false).await.unwrap();

        let loaded = store.find_group_by_id(group.id).await.unwrap().unwrap();
        assert_eq!(loaded.members.len(), 2);
        assert_eq!(loaded.admins, vec![alice.id]);
        assert!(loaded.is_admin(alice.id));
        assert!(!loaded.is_admin(bob.id));

        store.remove_member(group.id, bob.id).await.unwrap();
        let loaded = store.find_group_by_id(group.id).await.unwrap().unwrap();
        assert_eq!(loaded.members, vec![alice.id]);
    }
}
