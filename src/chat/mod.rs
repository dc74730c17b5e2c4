//! Chat assemblers: the inbox (all rooms of the current user, newest activity
//! first) and a single room (ordered history, send, live append).

pub mod inbox;
pub mod room;

pub use inbox::{InboxAssembler, InboxEntry, LastMessage};
pub use room::{MessageView, RoomAssembler, RoomView};

use crate::models::{Event, Profile, RoomKind};

/// UI-facing identity of a room, derived in one place so every room kind is
/// handled exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomDisplay {
    pub name: String,
    pub icon: Option<String>,
    /// Whether the icon/name belong to a person (direct chat) rather than an
    /// event.
    pub is_profile: bool,
}

pub(crate) fn derive_display(
    kind: RoomKind,
    event: Option<&Event>,
    counterpart: Option<&Profile>,
) -> RoomDisplay {
    match kind {
        RoomKind::Direct => RoomDisplay {
            name: counterpart.map(|p| p.name().to_owned()).unwrap_or_else(|| "Unknown".to_owned()),
            icon: counterpart.and_then(|p| p.photo_url.clone()),
            is_profile: true,
        },
        RoomKind::EventOrganizers => RoomDisplay {
            name: match event {
                Some(event) => format!("Organizers: {}", event.title),
                None => "Organizers".to_owned(),
            },
            icon: event.and_then(|e| e.image_url.clone()),
            is_profile: false,
        },
        RoomKind::EventParticipants => RoomDisplay {
            name: match event {
                Some(event) => format!("Participants: {}", event.title),
                None => "Participants".to_owned(),
            },
            icon: event.and_then(|e| e.image_url.clone()),
            is_profile: false,
        },
    }
}
