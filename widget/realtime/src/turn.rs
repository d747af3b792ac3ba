//! Connection phase and turn-level bookkeeping.
//!
//! The pending-response counters and loading flag form one small state
//! machine with clamped transitions, so a negative count is
//! unrepresentable no matter how HTTP responses and insert events
//! interleave.

use serde::{Deserialize, Serialize};

/// Connection lifecycle of the realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// No channel; initial state and the state after teardown completes.
    #[default]
    Disconnected,
    /// Session established, channel subscribed, waiting for presence.
    Connecting,
    /// Presence sync confirmed an active participant.
    Joined,
    /// A closure event arrived; farewell shown, teardown scheduled.
    Degraded,
    /// Channel torn down after forced closure. Terminal until refresh.
    Closed,
}

impl Phase {
    /// Whether results of in-flight calls should still be applied.
    pub fn accepts_results(&self) -> bool {
        !matches!(self, Phase::Closed)
    }
}

/// What the next visitor input means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    /// The next input is the visitor's display name, not a chat message.
    AwaitingName,
}

/// Tracks in-flight sends and expected assistant replies.
#[derive(Debug, Clone, Default)]
pub struct TurnTracker {
    /// Sends whose server-side echo has not been observed yet.
    pending_messages: u32,
    /// Assistant replies requested but not yet received.
    outstanding_responses: u32,
    /// Explicit loading flag, set independently of the counters.
    explicit_loading: bool,
}

impl TurnTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optimistic increment before the HTTP send; the user row may arrive
    /// over the channel before the HTTP response does.
    pub fn begin_send(&mut self) {
        self.pending_messages += 1;
    }

    /// Roll back the optimistic increment after a transport failure.
    pub fn rollback_send(&mut self) {
        self.pending_messages = self.pending_messages.saturating_sub(1);
        self.explicit_loading = false;
    }

    /// The backend promised an assistant reply for this turn.
    pub fn expect_reply(&mut self) {
        self.outstanding_responses += 1;
        self.explicit_loading = true;
    }

    /// The send completed without any reply to wait for.
    pub fn settle_without_reply(&mut self) {
        self.pending_messages = self.pending_messages.saturating_sub(1);
        self.explicit_loading = false;
    }

    /// An assistant-authored row arrived. Decrements both counters when a
    /// reply was outstanding; the loading flag clears only when the last
    /// outstanding reply lands.
    pub fn note_assistant_arrival(&mut self) {
        if self.outstanding_responses == 0 {
            return;
        }
        self.outstanding_responses -= 1;
        self.pending_messages = self.pending_messages.saturating_sub(1);
        if self.outstanding_responses == 0 {
            self.explicit_loading = false;
        }
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.explicit_loading = loading;
    }

    /// The loading indicator is visible iff a reply is outstanding or the
    /// explicit flag is set.
    pub fn indicator(&self) -> bool {
        self.outstanding_responses > 0 || self.explicit_loading
    }

    pub fn pending_messages(&self) -> u32 {
        self.pending_messages
    }

    pub fn outstanding_responses(&self) -> u32 {
        self.outstanding_responses
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
