//! Host-facing configuration surface and runtime tunables.
//!
//! `WidgetConfig` is what the embedding page supplies (agent_id is the only
//! required field); `RuntimeConfig` holds the timing and limit knobs, with
//! environment-level defaults for the session durations.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Default session duration in minutes.
pub const DEFAULT_SESSION_DURATION_MINUTES: u64 = 10;

/// Default inactivity timeout in minutes.
pub const DEFAULT_INACTIVITY_TIMEOUT_MINUTES: u64 = 10;

/// Maximum visitor message length in characters.
pub const MAX_MESSAGE_LENGTH: usize = 500;

/// Minimum interval between accepted sends.
pub const MIN_TIME_BETWEEN_MESSAGES: Duration = Duration::from_millis(2000);

/// How long a farewell message stays on screen before teardown.
pub const CLOSE_GRACE_DELAY: Duration = Duration::from_millis(2000);

/// Delay for an offline presence update to propagate before untrack.
pub const PRESENCE_PROPAGATION_DELAY: Duration = Duration::from_millis(100);

/// Delay after a session reset before assigning the new session id.
pub const REFRESH_PROPAGATION_DELAY: Duration = Duration::from_millis(200);

/// Cached auth token validity: 55 minutes for a nominal 60-minute token,
/// leaving a 5-minute safety margin.
pub const TOKEN_CACHE_VALIDITY: Duration = Duration::from_secs(55 * 60);

/// Presence-track rate monitoring window and warn threshold.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_millis(1000);
pub const RATE_LIMIT_THRESHOLD: usize = 10;

/// Visual and behavioral options supplied by the host page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WidgetConfig {
    /// Agent identifier. Required; absence blocks initialization.
    pub agent_id: String,
    /// Current visitor session. Blanked on forced closure to force a new
    /// connecting cycle on the next send.
    #[serde(default)]
    pub session_id: String,
    #[serde(default = "default_position")]
    pub position: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default = "default_submit_text")]
    pub submit_text: String,
    #[serde(default = "default_initial_message")]
    pub initial_message: String,
    #[serde(default)]
    pub full_screen: bool,
    #[serde(default)]
    pub consent_main: bool,
    #[serde(default)]
    pub consent_intro_message: String,
    #[serde(default)]
    pub consent_url: String,
}

fn default_position() -> String {
    "bottom-right".to_string()
}

fn default_width() -> u32 {
    380
}

fn default_height() -> u32 {
    560
}

fn default_title() -> String {
    "Chat".to_string()
}

fn default_submit_text() -> String {
    "Send".to_string()
}

fn default_initial_message() -> String {
    "Hi! How can I help you today?".to_string()
}

impl WidgetConfig {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            session_id: String::new(),
            position: default_position(),
            width: default_width(),
            height: default_height(),
            background_color: None,
            title: default_title(),
            avatar_url: String::new(),
            submit_text: default_submit_text(),
            initial_message: default_initial_message(),
            full_screen: false,
            consent_main: false,
            consent_intro_message: String::new(),
            consent_url: String::new(),
        }
    }

    /// Reject configurations that cannot initialize a chat.
    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            bail!("agent_id is required");
        }
        Ok(())
    }
}

/// Timing and limit knobs for the session runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub session_duration: Duration,
    pub inactivity_timeout: Duration,
    pub max_message_length: usize,
    pub min_time_between_messages: Duration,
    pub close_grace_delay: Duration,
    pub presence_propagation_delay: Duration,
    pub refresh_propagation_delay: Duration,
    pub token_cache_validity: Duration,
    pub rate_limit_window: Duration,
    pub rate_limit_threshold: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            session_duration: Duration::from_secs(DEFAULT_SESSION_DURATION_MINUTES * 60),
            inactivity_timeout: Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_MINUTES * 60),
            max_message_length: MAX_MESSAGE_LENGTH,
            min_time_between_messages: MIN_TIME_BETWEEN_MESSAGES,
            close_grace_delay: CLOSE_GRACE_DELAY,
            presence_propagation_delay: PRESENCE_PROPAGATION_DELAY,
            refresh_propagation_delay: REFRESH_PROPAGATION_DELAY,
            token_cache_validity: TOKEN_CACHE_VALIDITY,
            rate_limit_window: RATE_LIMIT_WINDOW,
            rate_limit_threshold: RATE_LIMIT_THRESHOLD,
        }
    }
}

impl RuntimeConfig {
    /// Apply environment-level overrides for the session durations.
    ///
    /// `SESSION_DURATION_MINUTES` and `INACTIVITY_TIMEOUT_MINUTES` are read
    /// if set and parseable; anything else keeps the defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(minutes) = read_env_minutes("SESSION_DURATION_MINUTES") {
            config.session_duration = Duration::from_secs(minutes * 60);
        }
        if let Some(minutes) = read_env_minutes("INACTIVITY_TIMEOUT_MINUTES") {
            config.inactivity_timeout = Duration::from_secs(minutes * 60);
        }
        config
    }
}

fn read_env_minutes(var: &str) -> Option<u64> {
    std::env::var(var).ok()?.trim().parse().ok()
}
