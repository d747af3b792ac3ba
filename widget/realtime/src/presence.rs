//! Presence evaluation.
//!
//! Readiness and the human-typing indicator are derived entirely from the
//! channel's live presence payloads and recomputed on every sync.

use livechat_core::PresenceSnapshot;

use crate::transport::AGENT_KEY_PREFIX;

/// Readiness and typing view derived from one presence snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresenceView {
    pub ready: bool,
    pub agent_typing: bool,
}

/// Recompute the presence view from a full sync.
///
/// When an agent-prefixed participant is present, its payloads decide both
/// readiness (any online) and the typing indicator (any typing). Without
/// one, any participant at all (the visitor's own join) counts as ready.
pub fn evaluate(snapshot: &PresenceSnapshot) -> PresenceView {
    let agent_states = snapshot
        .iter()
        .find(|(key, _)| key.starts_with(AGENT_KEY_PREFIX))
        .map(|(_, states)| states);

    match agent_states {
        Some(states) => PresenceView {
            ready: states.iter().any(|s| s.online),
            agent_typing: states.iter().any(|s| s.typing),
        },
        None => PresenceView {
            ready: !snapshot.is_empty(),
            agent_typing: false,
        },
    }
}
