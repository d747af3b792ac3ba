//! Read/write surface of the relational store.
//!
//! History rows, human-session lookups, and the collected visitor name all
//! go through the store's REST interface, scoped by session id.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use livechat_core::{ChatError, StoredMessage};

use crate::auth::AuthTokenProvider;

/// Store queries the controller needs beyond the realtime feed.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Message history for a session, ordered by created_at ascending.
    async fn fetch_history(&self, session_id: &str) -> Result<Vec<StoredMessage>, ChatError>;

    /// Whether a human-session record with status "active" exists.
    /// Used to restore the human-session flag on (re)initialization.
    async fn has_active_human_session(&self, session_id: &str) -> Result<bool, ChatError>;

    /// Persist the visitor's display name on the human-session record.
    async fn set_user_name(&self, session_id: &str, name: &str) -> Result<(), ChatError>;
}

/// PostgREST-style implementation.
pub struct RestChatBackend {
    client: reqwest::Client,
    rest_url: String,
    auth: Arc<AuthTokenProvider>,
}

#[derive(Debug, Deserialize)]
struct HumanSessionRow {
    #[allow(dead_code)]
    id: String,
}

#[derive(Serialize)]
struct UserNamePatch<'a> {
    user_name: &'a str,
}

impl RestChatBackend {
    pub fn new(rest_url: impl Into<String>, auth: Arc<AuthTokenProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            rest_url: rest_url.into(),
            auth,
        }
    }
}

#[async_trait]
impl ChatBackend for RestChatBackend {
    async fn fetch_history(&self, session_id: &str) -> Result<Vec<StoredMessage>, ChatError> {
        let token = self.auth.get_token(session_id).await?;
        let url = format!("{}/messages", self.rest_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("session_id", format!("eq.{session_id}")),
                ("order", "created_at.asc".to_string()),
            ])
            .bearer_auth(&token.token)
            .send()
            .await
            .map_err(|err| ChatError::Backend(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::Backend(format!(
                "history fetch returned {}",
                response.status()
            )));
        }

        response
            .json::<Vec<StoredMessage>>()
            .await
            .map_err(|err| ChatError::Backend(err.to_string()))
    }

    async fn has_active_human_session(&self, session_id: &str) -> Result<bool, ChatError> {
        let token = self.auth.get_token(session_id).await?;
        let url = format!("{}/human_sessions", self.rest_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("session_id", format!("eq.{session_id}")),
                ("status", "eq.active".to_string()),
                ("select", "id".to_string()),
            ])
            .bearer_auth(&token.token)
            .send()
            .await
            .map_err(|err| ChatError::Backend(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::Backend(format!(
                "human session lookup returned {}",
                response.status()
            )));
        }

        let rows: Vec<HumanSessionRow> = response
            .json()
            .await
            .map_err(|err| ChatError::Backend(err.to_string()))?;
        Ok(!rows.is_empty())
    }

    async fn set_user_name(&self, session_id: &str, name: &str) -> Result<(), ChatError> {
        let token = self.auth.get_token(session_id).await?;
        let url = format!("{}/human_sessions", self.rest_url);
        let response = self
            .client
            .patch(&url)
            .query(&[("session_id", format!("eq.{session_id}"))])
            .bearer_auth(&token.token)
            .json(&UserNamePatch { user_name: name })
            .send()
            .await
            .map_err(|err| ChatError::Backend(err.to_string()))?;

        if !response.status().is_success() {
            return Err(ChatError::Backend(format!(
                "user name update returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
