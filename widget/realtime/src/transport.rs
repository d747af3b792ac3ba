//! Realtime transport seam.
//!
//! The actual transport (the realtime backend's websocket protocol) is an
//! external collaborator; the controller only needs to open one named
//! channel per session, track/untrack its own presence on it, and consume
//! the channel's event stream.

use async_trait::async_trait;
use tokio::sync::mpsc;

use livechat_core::{ChannelEvent, ChatError, PresencePayload};

/// Participant keys for human operators start with this prefix.
pub const AGENT_KEY_PREFIX: &str = "agent:";

/// Deterministic channel name for a session.
pub fn channel_name(session_id: &str) -> String {
    format!("chat:{session_id}")
}

/// Presence key under which the visitor is tracked.
pub fn presence_key(session_id: &str) -> String {
    format!("user:{session_id}")
}

/// Parameters scoping a channel subscription.
#[derive(Debug, Clone)]
pub struct ChannelParams {
    /// Session id used for the channel name and every row filter
    /// (message inserts, human-session changes).
    pub session_id: String,
    /// Key this client tracks its presence under.
    pub presence_key: String,
}

impl ChannelParams {
    pub fn for_session(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            presence_key: presence_key(session_id),
        }
    }
}

/// A live, subscribed channel.
///
/// Presence payloads are always tracked whole — the transport must replace
/// the participant's state, never merge it.
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    async fn track(&self, payload: PresencePayload) -> Result<(), ChatError>;
    async fn untrack(&self) -> Result<(), ChatError>;
    /// Remove the channel from the client. The event stream ends after this.
    async fn close(&self) -> Result<(), ChatError>;
}

/// Factory for channels, one per live session.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Open and subscribe the channel `chat:{session_id}`, delivering
    /// inserts, lifecycle changes, presence, and broadcasts on the
    /// returned receiver.
    async fn open_channel(
        &self,
        params: ChannelParams,
    ) -> Result<(std::sync::Arc<dyn ChannelHandle>, mpsc::Receiver<ChannelEvent>), ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_naming() {
        assert_eq!(channel_name("abc"), "chat:abc");
        assert_eq!(presence_key("abc"), "user:abc");
        let params = ChannelParams::for_session("abc");
        assert_eq!(params.presence_key, "user:abc");
    }
}
