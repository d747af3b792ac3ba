use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::StoredMessage;

/// Presence payload tracked on the realtime channel.
///
/// Always sent whole: tracking replaces the participant's entire state,
/// never patches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresencePayload {
    pub online: bool,
    pub typing: bool,
    pub online_at: DateTime<Utc>,
}

impl PresencePayload {
    pub fn online(typing: bool) -> Self {
        Self { online: true, typing, online_at: Utc::now() }
    }

    pub fn offline() -> Self {
        Self { online: false, typing: false, online_at: Utc::now() }
    }
}

/// Snapshot of every participant's presence payloads, keyed by
/// participant key (`agent:…`, `user:…`). A key may carry several
/// payloads when the same participant is connected more than once.
pub type PresenceSnapshot = HashMap<String, Vec<PresencePayload>>;

/// A change on the human-session lifecycle table for this session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HumanSessionChange {
    /// Row inserted or updated with the given status ("active", "closed", …).
    Upsert { status: String },
    /// Row deleted.
    Delete,
}

/// Events delivered by the realtime channel to the session controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// A message row was inserted for this session.
    MessageInserted(StoredMessage),
    /// The human-session lifecycle record changed.
    HumanSession(HumanSessionChange),
    /// Full presence state resync.
    PresenceSync(PresenceSnapshot),
    /// A participant joined.
    PresenceJoin { key: String },
    /// A participant left.
    PresenceLeave { key: String },
    /// Broadcast: the responding agent's identity. Untrusted input,
    /// validated before being applied to configuration.
    AgentInfo { name: String, avatar: String },
    /// Broadcast: the operator force-closed the chat.
    ChatClosed { message: String, user_name: String },
    /// The subscription reported an error (including rate-limit rejection).
    ChannelError { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_event_serialization_roundtrip() {
        let event = ChannelEvent::ChatClosed {
            message: "Bye".into(),
            user_name: "X".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: ChannelEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_human_session_tagging() {
        let json = r#"{"type":"upsert","status":"active"}"#;
        let change: HumanSessionChange = serde_json::from_str(json).unwrap();
        assert_eq!(change, HumanSessionChange::Upsert { status: "active".into() });
    }
}
