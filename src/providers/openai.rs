use super::compat::{CompatibleClient, PlatformCustomizer};
use super::PlatformAdapter;
use crate::factory::ChatServices;
use crate::types::{ApiResponse, ChatParams, ChatReply, KeyParams, PlatformInfo};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// OpenAI exposes no balance endpoint for API keys
pub struct OpenAICustomizer;

impl PlatformCustomizer for OpenAICustomizer {
    fn info(&self) -> PlatformInfo {
        PlatformInfo {
            name: "OpenAI".to_string(),
            image: "https://openai.com/favicon.ico".to_string(),
            url: OpenAIClient::default_base_url(),
        }
    }

    fn chat_path(&self) -> &'static str {
        "/v1/chat/completions"
    }

    fn models_path(&self) -> &'static str {
        "/v1/models"
    }

    fn balance_path(&self) -> Option<&'static str> {
        None
    }

    fn parse_balance(&self, _body: &Value) -> Option<String> {
        None
    }

    fn status_key(&self, status: u16) -> &'static str {
        match status {
            401 => "authenticationFailed",
            403 => "invalidArea",
            429 => "requestTooFastOrInsufficient",
            500 => "serverError",
            503 => "busyService",
            _ => "getError",
        }
    }
}

pub struct OpenAIClient {
    inner: CompatibleClient,
}

impl OpenAIClient {
    pub fn default_base_url() -> String {
        "https://api.openai.com".to_string()
    }

    pub fn new(services: &ChatServices) -> Result<Self> {
        Ok(Self {
            inner: CompatibleClient::with_customization(Box::new(OpenAICustomizer), services)?,
        })
    }
}

#[async_trait]
impl PlatformAdapter for OpenAIClient {
    fn info(&self) -> PlatformInfo {
        self.inner.info()
    }

    async fn balance(&self, params: KeyParams) -> ApiResponse<String> {
        self.inner.balance(params).await
    }

    async fn models(&self, params: KeyParams) -> ApiResponse<Vec<String>> {
        self.inner.models(params).await
    }

    async fn chat(&self, params: ChatParams) -> ApiResponse<ChatReply> {
        self.inner.chat(params).await
    }

    async fn chat_stop(&self) {
        self.inner.chat_stop().await
    }
}
