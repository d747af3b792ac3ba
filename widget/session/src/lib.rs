//! Visitor session lifecycle.
//!
//! A session is a time-bounded opaque identifier correlating all messages
//! and presence for one chat instance. It lives in cookie-equivalent client
//! storage, is renewed on every active initialization, and is closed on
//! explicit teardown, inactivity, or forced human-session termination.

pub mod keeper;
pub mod store;

pub use keeper::SessionKeeper;
pub use store::{MemoryStore, SessionStore, StoreOptions};
