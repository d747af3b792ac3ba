//! Agent gateway: status check and message submission.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use livechat_core::ChatError;

use crate::auth::AuthTokenProvider;

/// Result of submitting a visitor message.
#[derive(Debug, Clone, Default)]
pub struct SendOutcome {
    /// Immediate assistant reply text, when one was produced. The actual
    /// message row still arrives over the realtime channel.
    pub response: Option<String>,
    /// True when the backend reports a human operator owns this session.
    pub human_session_active: bool,
}

/// Request layer over the agent backend.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Whether the assistant is currently permitted to respond.
    /// Returns false on any error: chat stays unready rather than inviting
    /// the visitor to type into a dead chat.
    async fn is_agent_active(&self, agent_id: &str, session_id: &str) -> bool;

    /// Submit a visitor message; HTTP and parse failures propagate so the
    /// caller can roll back its optimistic pending bookkeeping.
    async fn send_message(
        &self,
        content: &str,
        agent_id: &str,
        session_id: &str,
    ) -> Result<SendOutcome, ChatError>;
}

#[derive(Debug, Deserialize)]
struct AgentStatusResponse {
    active: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatBackendResponse {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMetadata {
    #[serde(default)]
    pub human_session_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct BackendErrorBody {
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    message: &'a str,
    agent_id: &'a str,
    session_id: &'a str,
}

impl From<ChatBackendResponse> for SendOutcome {
    fn from(body: ChatBackendResponse) -> Self {
        SendOutcome {
            response: body.response,
            human_session_active: body
                .metadata
                .and_then(|m| m.human_session_active)
                .unwrap_or(false),
        }
    }
}

/// HTTP implementation talking to the functions endpoint (agent status)
/// and the agent completion backend (message send).
pub struct HttpAgentGateway {
    client: reqwest::Client,
    functions_url: String,
    backend_url: String,
    auth: Arc<AuthTokenProvider>,
}

impl HttpAgentGateway {
    pub fn new(
        functions_url: impl Into<String>,
        backend_url: impl Into<String>,
        auth: Arc<AuthTokenProvider>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            functions_url: functions_url.into(),
            backend_url: backend_url.into(),
            auth,
        }
    }

    async fn fetch_agent_status(&self, agent_id: &str, session_id: &str) -> Result<bool, ChatError> {
        let token = self.auth.get_token(session_id).await?;
        let url = format!("{}/agent", self.functions_url);
        let response = self
            .client
            .get(&url)
            .query(&[("agent_id", agent_id)])
            .bearer_auth(&token.token)
            .send()
            .await
            .map_err(|err| ChatError::AgentUnavailable(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::AgentUnavailable(format!(
                "status check returned {}",
                response.status()
            )));
        }

        let status: AgentStatusResponse = response
            .json()
            .await
            .map_err(|err| ChatError::AgentUnavailable(err.to_string()))?;
        Ok(status.active)
    }
}

#[async_trait]
impl AgentApi for HttpAgentGateway {
    async fn is_agent_active(&self, agent_id: &str, session_id: &str) -> bool {
        match self.fetch_agent_status(agent_id, session_id).await {
            Ok(active) => active,
            Err(err) => {
                // Fail-closed: an unreachable agent is an inactive agent.
                warn!(agent_id, error = %err, "Agent status check failed");
                false
            }
        }
    }

    async fn send_message(
        &self,
        content: &str,
        agent_id: &str,
        session_id: &str,
    ) -> Result<SendOutcome, ChatError> {
        let token = self.auth.get_token(session_id).await?;
        let response = self
            .client
            .post(&self.backend_url)
            .bearer_auth(&token.token)
            .json(&SendRequest {
                message: content,
                agent_id,
                session_id,
            })
            .send()
            .await
            .map_err(|err| ChatError::Send(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .json::<BackendErrorBody>()
                .await
                .ok()
                .and_then(|body| body.detail)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(ChatError::Send(format!("status {status}: {detail}")));
        }

        let body: ChatBackendResponse = response
            .json()
            .await
            .map_err(|err| ChatError::Send(err.to_string()))?;
        Ok(body.into())
    }
}
