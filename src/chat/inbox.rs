use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::watch;
use uuid::Uuid;

use crate::backend::{Backend, ChangeBinding, Embed, Filter, Query, decode};
use crate::chat::{RoomDisplay, derive_display};
use crate::models::{ChatMessage, ChatRoom, Event, Profile, RoomKind};
use crate::session::SessionContext;
use crate::AppResult;

/// One inbox line: the room plus everything the list view needs to render it.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxEntry {
    pub room: ChatRoom,
    pub display: RoomDisplay,
    pub event: Option<Event>,
    /// The other member, resolved for direct rooms only.
    pub counterpart: Option<Profile>,
    pub last_message: Option<LastMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LastMessage {
    pub content: String,
    pub sender_name: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Deserialize)]
struct InboxRow {
    #[serde(flatten)]
    room: ChatRoom,
    #[serde(default)]
    event: Option<Event>,
    #[serde(default)]
    messages: Vec<MessageWithSender>,
}

#[derive(Deserialize)]
struct MessageWithSender {
    #[serde(flatten)]
    message: ChatMessage,
    #[serde(default)]
    sender: Option<Profile>,
}

#[derive(Clone)]
pub struct InboxAssembler {
    backend: Arc<dyn Backend>,
    session: Arc<SessionContext>,
}

impl InboxAssembler {
    pub fn new(session: Arc<SessionContext>) -> Self {
        Self {
            backend: session.backend(),
            session,
        }
    }

    /// All enabled rooms visible to the current user (visibility is enforced
    /// by the backend's row policies), ordered by latest activity.
    pub async fn load(&self) -> AppResult<Vec<InboxEntry>> {
        self.session.ensure_ready()?;

        let rows = self
            .backend
            .select(
                Query::table("chats")
                    .filter(Filter::eq("enabled", true))
                    .embed(Embed::belongs_to("event", "events", "event_id"))
                    .embed(
                        Embed::has_many("messages", "messages", "chat_id")
                            .nest(Embed::belongs_to("sender", "profiles", "sender_id")),
                    )
                    .order_by("updated_at", true),
            )
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let row: InboxRow = decode(row)?;

            // The join hands back an array of messages; the view gets exactly
            // the newest one, as a scalar.
            let last_message = row
                .messages
                .into_iter()
                .max_by_key(|m| m.message.created_at)
                .map(|m| LastMessage {
                    content: m.message.content,
                    sender_name: m.sender.map(|p| p.name().to_owned()),
                    created_at: m.message.created_at,
                });

            // One extra lookup per direct room. Fine at inbox scale; revisit
            // before rooms number in the hundreds.
            let counterpart = match row.room.kind {
                RoomKind::Direct => self.counterpart(row.room.id).await?,
                _ => None,
            };

            let display = derive_display(row.room.kind, row.event.as_ref(), counterpart.as_ref());
            entries.push(InboxEntry {
                room: row.room,
                display,
                event: row.event,
                counterpart,
                last_message,
            });
        }
        Ok(entries)
    }

    pub async fn reload(&self) -> AppResult<Vec<InboxEntry>> {
        self.load().await
    }

    /// Message changes for the given rooms invalidate the whole inbox.
    pub fn change_bindings(&self, room_ids: &[Uuid]) -> Vec<ChangeBinding> {
        let ids = room_ids
            .iter()
            .map(|id| Value::String(id.to_string()))
            .collect();
        vec![ChangeBinding::any("messages").with_filter(Filter::is_in("chat_id", ids))]
    }

    /// Loads the inbox and keeps it live. The message-feed filter is computed
    /// once from the room ids known right now; a room created later in the
    /// session is not folded in until the next `watch` call.
    pub async fn watch(&self) -> AppResult<watch::Receiver<Vec<InboxEntry>>> {
        let initial = self.load().await?;
        let room_ids: Vec<Uuid> = initial.iter().map(|entry| entry.room.id).collect();
        let mut sub = self
            .backend
            .subscribe(self.change_bindings(&room_ids))
            .await?;
        let (tx, rx) = watch::channel(initial);

        let assembler = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = sub.recv() => {
                        if event.is_none() {
                            break;
                        }
                        match assembler.reload().await {
                            Ok(entries) => {
                                if tx.send(entries).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(%err, "inbox refresh failed, keeping previous view");
                            }
                        }
                    }
                    () = tx.closed() => break,
                }
            }
        });

        Ok(rx)
    }

    async fn counterpart(&self, chat_id: Uuid) -> AppResult<Option<Profile>> {
        let rows = self
            .backend
            .select(
                Query::table("chat_members")
                    .filter(Filter::eq("chat_id", chat_id.to_string()))
                    .filter(Filter::neq("user_id", self.session.user_id().to_string()))
                    .embed(Embed::belongs_to("profile", "profiles", "user_id"))
                    .limit(1),
            )
            .await?;

        let profile = rows
            .into_iter()
            .next()
            .and_then(|row| row.get("profile").cloned())
            .filter(|value| !value.is_null())
            .map(serde_json::from_value)
            .transpose()?;
        Ok(profile)
    }
}
