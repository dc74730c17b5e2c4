use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// A user's public identity. Created implicitly on first authentication,
/// mutated only by the owning user, never deleted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    pub bio: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Profile {
    pub fn new(id: Uuid) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id,
            display_name: None,
            photo_url: None,
            bio: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Display name with the fallback used anywhere a profile is rendered.
    pub fn name(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStage {
    #[serde(rename = "in-development")]
    InDevelopment,
    #[serde(rename = "upcoming")]
    Upcoming,
    #[serde(rename = "completed")]
    Completed,
}

impl EventStage {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStage::InDevelopment => "in-development",
            EventStage::Upcoming => "upcoming",
            EventStage::Completed => "completed",
        }
    }
}

/// A plannable activity. The author is always a member of the organizer set;
/// the backend enforces that at creation. Participants and organizers are
/// separate relations (`event_participants`, `event_organizers`), not arrays
/// embedded on the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub starts_at: OffsetDateTime,
    pub venue: String,
    pub stage: EventStage,
    pub image_url: Option<String>,
    pub author_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Direct,
    EventOrganizers,
    EventParticipants,
}

impl RoomKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoomKind::Direct => "direct",
            RoomKind::EventOrganizers => "event_organizers",
            RoomKind::EventParticipants => "event_participants",
        }
    }
}

/// A messaging channel. `updated_at` is bumped on new messages so the inbox
/// can order rooms by latest activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: Uuid,
    pub kind: RoomKind,
    pub event_id: Option<Uuid>,
    pub enabled: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Immutable once created; no edit or delete is exposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Ephemeral post: only visible while `expires_at` lies in the future.
/// Expired stories are filtered out by query, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    pub id: Uuid,
    pub author_id: Uuid,
    pub image_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub content: String,
    pub image_url: Option<String>,
    pub author_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// RFC 3339 rendering for timestamps going into filters and patches.
pub fn fmt_rfc3339(stamp: OffsetDateTime) -> String {
    stamp.format(&Rfc3339).unwrap_or_default()
}
