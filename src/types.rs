use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, the timestamp unit of every record
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// The message carried by one turn
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    /// Chain-of-thought text, only present on assistant turns of reasoning models
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            reasoning: None,
        }
    }

    pub fn assistant(content: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            reasoning: Some(reasoning.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Pending,
    Loading,
    Done,
    Error,
}

/// Platform and model that produced an assistant turn
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub platform: String,
    pub model: String,
}

/// One message within a conversation thread
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TurnRecord {
    /// Unique within the owning conversation
    pub id: String,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    pub status: TurnStatus,
    pub timestamp: i64,
}

/// One chat thread as held by the conversation store
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ConversationRecord {
    pub key: String,
    pub title: String,
    /// Ordered turns, oldest first
    #[serde(default)]
    pub data: Vec<TurnRecord>,
    /// Generation parameters some platforms merge into the request body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configs: Option<serde_json::Value>,
    pub timestamp: i64,
}

impl ConversationRecord {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            data: Vec::new(),
            configs: None,
            timestamp: now_millis(),
        }
    }

    pub fn with_configs(mut self, configs: serde_json::Value) -> Self {
        self.configs = Some(configs);
        self
    }

    pub fn turn(&self, id: &str) -> Option<&TurnRecord> {
        self.data.iter().find(|turn| turn.id == id)
    }
}

fn default_enabled() -> bool {
    true
}

/// Stored credential for one platform endpoint
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ApiKeyRecord {
    /// Identifier that requests use to reference this credential
    pub key: String,
    pub platform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// The secret itself
    pub value: String,
    /// Base endpoint, without a trailing slash
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Display information of a registered platform
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub name: String,
    pub image: String,
    pub url: String,
}

/// Parameters of the balance and model-list queries
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyParams {
    pub api_key: String,
}

impl KeyParams {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

/// Parameters of one chat request
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatParams {
    pub chat_key: String,
    pub api_key: String,
    pub model: String,
    pub content: String,
    /// Id of the assistant turn this request produces
    pub dialogue_id: String,
    /// Id of the user turn this request stores
    pub user_dialogue_id: String,
}

/// Final text of a successfully streamed reply
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct ChatReply {
    pub reasoning: String,
    pub content: String,
}

/// Normalized result envelope returned by every platform operation.
///
/// `error` is empty on success and carries a translatable error key otherwise.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub traceability: serde_json::Value,
    pub data: Option<T>,
    pub error: String,
    pub timestamp: i64,
}

impl<T> ApiResponse<T> {
    pub fn success(params: &impl Serialize, data: T) -> Self {
        Self {
            traceability: traceability(params),
            data: Some(data),
            error: String::new(),
            timestamp: now_millis(),
        }
    }

    pub fn failure(params: &impl Serialize, error: impl Into<String>) -> Self {
        Self {
            traceability: traceability(params),
            data: None,
            error: error.into(),
            timestamp: now_millis(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }
}

fn traceability(params: &impl Serialize) -> serde_json::Value {
    serde_json::to_value(params).unwrap_or(serde_json::Value::Null)
}
