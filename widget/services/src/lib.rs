//! Service clients consumed by the session controller.
//!
//! Thin request layers over the external collaborators: the credential
//! exchange endpoint, the AI-agent completion backend, and the relational
//! store's REST surface. Each sits behind a trait so the controller can be
//! driven by mocks in tests.

pub mod agent;
pub mod auth;
pub mod backend;

pub use agent::{AgentApi, HttpAgentGateway, SendOutcome};
pub use auth::{AuthToken, AuthTokenProvider, CredentialExchanger, HttpCredentialExchanger, IssuedToken};
pub use backend::{ChatBackend, RestChatBackend};
