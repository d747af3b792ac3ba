//! Core types for the livechat widget runtime.
//!
//! Shared by the session, services, and realtime crates: the message model
//! and formatter, the channel event model consumed by the controller, the
//! error taxonomy, and the host-facing configuration surface.

pub mod config;
pub mod error;
pub mod event;
pub mod message;

pub use config::{RuntimeConfig, WidgetConfig};
pub use error::ChatError;
pub use event::{ChannelEvent, HumanSessionChange, PresencePayload, PresenceSnapshot};
pub use message::{
    format_message, ButtonOption, ChatMessage, ChatRole, MessageContent, StoredMessage,
    SystemVariant,
};
