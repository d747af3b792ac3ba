//! Realtime session orchestration.
//!
//! The controller here is the widget's centerpiece: a small state machine
//! coordinating timers, realtime push events, HTTP responses, and user
//! input so the "is the chat ready / who is typing / how many responses
//! are outstanding" view never desynchronizes from the server.

pub mod controller;
pub mod presence;
pub mod rate;
pub mod registry;
pub mod transport;
pub mod turn;

pub use controller::{ChatController, ChatView};
pub use registry::ClientRegistry;
pub use transport::{channel_name, presence_key, ChannelHandle, ChannelParams, RealtimeTransport};
pub use turn::{InputMode, Phase, TurnTracker};
