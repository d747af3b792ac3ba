use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a stored message row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// The visitor typing into the widget.
    User,
    /// The automated assistant.
    Assistant,
    /// A human operator who took over the conversation.
    Human,
}

/// A message row as persisted by the backend and delivered over the
/// realtime channel's insert events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    #[serde(default)]
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub session_id: String,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    /// Synthetic message created locally (farewell notices, name prompts).
    /// Never persisted; gets an empty id and the current timestamp.
    pub fn synthetic(role: ChatRole, content: impl Into<String>, agent_id: &str, session_id: &str) -> Self {
        Self {
            id: String::new(),
            role,
            content: content.into(),
            agent_id: agent_id.to_string(),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Renderable content of a displayable message.
///
/// Assistant and human rows may carry a JSON payload selecting a richer
/// content type; anything that does not parse is treated as plain text so
/// history and live messages render identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Text {
        text: String,
    },
    System {
        text: String,
        #[serde(default)]
        variant: SystemVariant,
    },
    Buttons {
        text: String,
        buttons: Vec<ButtonOption>,
    },
    Transfer {
        text: String,
        #[serde(default)]
        agent_name: Option<String>,
    },
}

/// Severity of a system notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SystemVariant {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

/// A selectable option in a buttons message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ButtonOption {
    pub id: String,
    pub text: String,
    pub value: String,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text { text: text.into() }
    }

    /// Dispatch raw stored content into a typed variant. JSON objects with
    /// a recognized `type` tag become rich content; everything else is text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(content) = serde_json::from_str::<MessageContent>(trimmed) {
                return content;
            }
        }
        MessageContent::text(raw)
    }
}

/// A message as exposed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub kind: ChatRole,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
}

/// Format a stored record into a displayable message.
///
/// Assistant and human rows go through content-type dispatch; visitor rows
/// are always plain text.
pub fn format_message(record: &StoredMessage) -> ChatMessage {
    let content = match record.role {
        ChatRole::Assistant | ChatRole::Human => MessageContent::parse(&record.content),
        ChatRole::User => MessageContent::text(record.content.clone()),
    };
    ChatMessage {
        kind: record.role,
        content,
        timestamp: record.created_at,
    }
}
