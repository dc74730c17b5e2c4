use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::sync::watch;
use uuid::Uuid;

use crate::backend::{Backend, ChangeBinding, Embed, Filter, Query, decode, decode_all};
use crate::chat::{RoomDisplay, derive_display};
use crate::models::{ChatMessage, ChatRoom, Event, Profile, fmt_rfc3339};
use crate::session::SessionContext;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq)]
pub struct RoomView {
    pub room: ChatRoom,
    pub event: Option<Event>,
    pub members: Vec<Profile>,
    pub display: RoomDisplay,
    /// Full history, ascending by creation time. Unbounded by design;
    /// pagination is out of scope.
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
    pub message: ChatMessage,
    pub sender: Option<Profile>,
}

#[derive(Deserialize)]
struct RoomRow {
    #[serde(flatten)]
    room: ChatRoom,
    #[serde(default)]
    event: Option<Event>,
    #[serde(default)]
    members: Vec<MemberRow>,
}

#[derive(Deserialize)]
struct MemberRow {
    #[serde(default)]
    profile: Option<Profile>,
}

#[derive(Deserialize)]
struct MessageRow {
    #[serde(flatten)]
    message: ChatMessage,
    #[serde(default)]
    sender: Option<Profile>,
}

#[derive(Clone)]
pub struct RoomAssembler {
    backend: Arc<dyn Backend>,
    session: Arc<SessionContext>,
    chat_id: Uuid,
}

impl RoomAssembler {
    pub fn new(session: Arc<SessionContext>, chat_id: Uuid) -> Self {
        Self {
            backend: session.backend(),
            session,
            chat_id,
        }
    }

    pub fn chat_id(&self) -> Uuid {
        self.chat_id
    }

    pub async fn load(&self) -> AppResult<RoomView> {
        self.session.ensure_ready()?;

        let rows = self
            .backend
            .select(
                Query::table("chats")
                    .filter(Filter::eq("id", self.chat_id.to_string()))
                    .embed(Embed::belongs_to("event", "events", "event_id"))
                    .embed(
                        Embed::has_many("members", "chat_members", "chat_id")
                            .nest(Embed::belongs_to("profile", "profiles", "user_id")),
                    )
                    .limit(1),
            )
            .await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or(AppError::NotFound("chat room"))?;
        let row: RoomRow = decode(row)?;

        let messages = self.fetch_history().await?;

        let members: Vec<Profile> = row.members.into_iter().filter_map(|m| m.profile).collect();
        let me = self.session.user_id();
        let counterpart = members.iter().find(|profile| profile.id != me);
        let display = derive_display(row.room.kind, row.event.as_ref(), counterpart);

        Ok(RoomView {
            room: row.room,
            event: row.event,
            members,
            display,
            messages,
        })
    }

    /// Validates trimmed content and inserts one message row. The follow-up
    /// bump of the room's `updated_at` is best-effort: delivery is the
    /// guarantee, inbox ordering isn't, so a failed bump is logged and never
    /// surfaced. Returns `None` when the content was empty after trimming.
    pub async fn send(&self, content: &str) -> AppResult<Option<ChatMessage>> {
        self.session.ensure_ready()?;

        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        let message = ChatMessage {
            id: Uuid::now_v7(),
            chat_id: self.chat_id,
            sender_id: self.session.user_id(),
            content: content.to_owned(),
            created_at: OffsetDateTime::now_utc(),
        };
        self.backend
            .insert("messages", serde_json::to_value(&message)?)
            .await?;

        let bump = self
            .backend
            .update(
                "chats",
                json!({ "updated_at": fmt_rfc3339(message.created_at) }),
                vec![Filter::eq("id", self.chat_id.to_string())],
            )
            .await;
        if let Err(err) = bump {
            tracing::warn!(%err, chat = %self.chat_id, "failed to bump chat activity stamp");
        }

        Ok(Some(message))
    }

    /// Loads the room and appends messages as they arrive. The raw feed
    /// payload lacks the joined sender profile, so each insert notification
    /// re-fetches the single new row by id before appending. Dropping the
    /// receiver tears the channel down; keeping it past the life of the view
    /// would leak one channel per visited room.
    pub async fn watch(&self) -> AppResult<watch::Receiver<RoomView>> {
        let initial = self.load().await?;
        let mut sub = self
            .backend
            .subscribe(vec![
                ChangeBinding::insert("messages")
                    .with_filter(Filter::eq("chat_id", self.chat_id.to_string())),
            ])
            .await?;
        let (tx, rx) = watch::channel(initial);

        let assembler = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = sub.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    () = tx.closed() => break,
                };

                let Some(id) = event
                    .row
                    .get("id")
                    .and_then(Value::as_str)
                    .and_then(|id| Uuid::parse_str(id).ok())
                else {
                    continue;
                };

                match assembler.fetch_message(id).await {
                    Ok(Some(view)) => {
                        tx.send_modify(|room| {
                            if room.messages.iter().all(|m| m.message.id != view.message.id) {
                                room.messages.push(view);
                            }
                        });
                    }
                    // Row gone between notification and fetch; nothing to show.
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!(%err, chat = %assembler.chat_id, "live message fetch failed");
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn fetch_history(&self) -> AppResult<Vec<MessageView>> {
        let rows = self
            .backend
            .select(
                Query::table("messages")
                    .filter(Filter::eq("chat_id", self.chat_id.to_string()))
                    .embed(Embed::belongs_to("sender", "profiles", "sender_id"))
                    .order_by("created_at", false),
            )
            .await?;

        let rows: Vec<MessageRow> = decode_all(rows)?;
        Ok(rows
            .into_iter()
            .map(|row| MessageView {
                message: row.message,
                sender: row.sender,
            })
            .collect())
    }

    async fn fetch_message(&self, id: Uuid) -> AppResult<Option<MessageView>> {
        let rows = self
            .backend
            .select(
                Query::table("messages")
                    .filter(Filter::eq("id", id.to_string()))
                    .embed(Embed::belongs_to("sender", "profiles", "sender_id"))
                    .limit(1),
            )
            .await?;

        match rows.into_iter().next() {
            Some(row) => {
                let row: MessageRow = decode(row)?;
                Ok(Some(MessageView {
                    message: row.message,
                    sender: row.sender,
                }))
            }
            None => Ok(None),
        }
    }
}
