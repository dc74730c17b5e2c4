//! Event view-model assembler: one event row joined with its author, the
//! organizer/participant profile lists, and the ids of the event's chat
//! rooms. Any relevant change notification triggers a full reload of the
//! whole view-model rather than an incremental patch.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use uuid::Uuid;

use crate::backend::{Backend, ChangeBinding, Embed, Filter, Query, decode, decode_all};
use crate::models::{Event, Profile};
use crate::session::SessionContext;
use crate::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq)]
pub struct EventDetail {
    pub event: Event,
    pub author: Profile,
    pub organizers: Vec<Profile>,
    pub participants: Vec<Profile>,
    pub chat_rooms: EventChatRooms,
}

/// Ids of the event's chat rooms, as visible to the current viewer. A room
/// the viewer cannot see is simply absent here, never an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventChatRooms {
    pub organizers: Option<Uuid>,
    pub participants: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRole {
    Participant,
    Organizer,
}

impl EventRole {
    fn table(self) -> &'static str {
        match self {
            EventRole::Participant => "event_participants",
            EventRole::Organizer => "event_organizers",
        }
    }
}

#[derive(Deserialize)]
struct EventRow {
    #[serde(flatten)]
    event: Event,
    author: Profile,
}

#[derive(Deserialize)]
struct MembershipRow {
    #[serde(default)]
    profile: Option<Profile>,
}

#[derive(Clone)]
pub struct EventAssembler {
    backend: Arc<dyn Backend>,
    session: Arc<SessionContext>,
    event_id: Uuid,
}

impl EventAssembler {
    pub fn new(session: Arc<SessionContext>, event_id: Uuid) -> Self {
        Self {
            backend: session.backend(),
            session,
            event_id,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub async fn load(&self) -> AppResult<EventDetail> {
        self.session.ensure_ready()?;

        let (row, chat_rooms, organizers, participants) = tokio::try_join!(
            self.fetch_event(),
            self.fetch_chat_rooms(),
            self.fetch_members(EventRole::Organizer),
            self.fetch_members(EventRole::Participant),
        )?;

        Ok(EventDetail {
            event: row.event,
            author: row.author,
            organizers,
            participants,
            chat_rooms,
        })
    }

    /// Alias making the coarse invalidate-and-reload contract explicit; the
    /// watch loop goes through this and [`Self::change_bindings`] only.
    pub async fn reload(&self) -> AppResult<EventDetail> {
        self.load().await
    }

    /// Toggles the current user's membership in the given relation. Returns
    /// `true` when the toggle joined, `false` when it left. The decision is a
    /// plain read-then-write: two rapid toggles race at the backend and the
    /// last write wins.
    pub async fn toggle_membership(&self, role: EventRole) -> AppResult<bool> {
        self.session.ensure_ready()?;
        let user_id = self.session.user_id();

        let filters = vec![
            Filter::eq("event_id", self.event_id.to_string()),
            Filter::eq("user_id", user_id.to_string()),
        ];

        let existing = self
            .backend
            .select(
                Query::table(role.table())
                    .filter(filters[0].clone())
                    .filter(filters[1].clone()),
            )
            .await?;

        if existing.is_empty() {
            self.backend
                .insert(
                    role.table(),
                    json!({
                        "event_id": self.event_id.to_string(),
                        "user_id": user_id.to_string(),
                    }),
                )
                .await?;
            Ok(true)
        } else {
            if role == EventRole::Organizer {
                let row = self.fetch_event().await?;
                if row.event.author_id == user_id {
                    return Err(AppError::Forbidden(
                        "the event author cannot leave the organizer team".to_owned(),
                    ));
                }
            }
            self.backend.delete(role.table(), filters).await?;
            Ok(false)
        }
    }

    /// Changes that invalidate this view-model: the event row itself, and
    /// either membership relation scoped to this event.
    pub fn change_bindings(&self) -> Vec<ChangeBinding> {
        let scope = Filter::eq("event_id", self.event_id.to_string());
        vec![
            ChangeBinding::any("events").with_filter(Filter::eq("id", self.event_id.to_string())),
            ChangeBinding::any("event_participants").with_filter(scope.clone()),
            ChangeBinding::any("event_organizers").with_filter(scope),
        ]
    }

    /// Loads the view-model and keeps it live: every matching change event
    /// triggers a full reload. A failed reload keeps the previous view and
    /// logs. The background task ends once every receiver is dropped, which
    /// also releases the feed channel.
    pub async fn watch(&self) -> AppResult<watch::Receiver<EventDetail>> {
        let initial = self.load().await?;
        let mut sub = self.backend.subscribe(self.change_bindings()).await?;
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
                            Ok(view) => {
                                if tx.send(view).is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                tracing::warn!(
                                    %err,
                                    event = %assembler.event_id,
                                    "event refresh failed, keeping previous view"
                                );
                            }
                        }
                    }
                    () = tx.closed() => break,
                }
            }
        });

        Ok(rx)
    }

    async fn fetch_event(&self) -> AppResult<EventRow> {
        let rows = self
            .backend
            .select(
                Query::table("events")
                    .filter(Filter::eq("id", self.event_id.to_string()))
                    .embed(Embed::belongs_to("author", "profiles", "author_id"))
                    .limit(1),
            )
            .await?;

        let row = rows.into_iter().next().ok_or(AppError::NotFound("event"))?;
        decode(row)
    }

    async fn fetch_chat_rooms(&self) -> AppResult<EventChatRooms> {
        let (organizers, participants) = tokio::join!(
            self.room_id("event_organizers"),
            self.room_id("event_participants"),
        );
        Ok(EventChatRooms {
            organizers,
            participants,
        })
    }

    /// Room visibility is access-controlled on the backend; a failed or empty
    /// lookup means "no room for this viewer", never a fatal error.
    async fn room_id(&self, kind: &str) -> Option<Uuid> {
        let query = Query::table("chats")
            .filter(Filter::eq("event_id", self.event_id.to_string()))
            .filter(Filter::eq("kind", kind))
            .limit(1);

        match self.backend.select(query).await {
            Ok(rows) => rows.into_iter().next().and_then(|row| {
                row.get("id")
                    .and_then(Value::as_str)
                    .and_then(|id| Uuid::parse_str(id).ok())
            }),
            Err(err) => {
                tracing::debug!(%err, kind, "chat room lookup failed, treating as absent");
                None
            }
        }
    }

    async fn fetch_members(&self, role: EventRole) -> AppResult<Vec<Profile>> {
        let rows = self
            .backend
            .select(
                Query::table(role.table())
                    .filter(Filter::eq("event_id", self.event_id.to_string()))
                    .embed(Embed::belongs_to("profile", "profiles", "user_id")),
            )
            .await?;

        let memberships: Vec<MembershipRow> = decode_all(rows)?;
        Ok(memberships
            .into_iter()
            .filter_map(|membership| membership.profile)
            .collect())
    }
}
