use super::compat::{CompatibleClient, PlatformCustomizer};
use super::PlatformAdapter;
use crate::factory::ChatServices;
use crate::types::{ApiResponse, ChatParams, ChatReply, KeyParams, PlatformInfo};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub struct DeepSeekCustomizer;

impl PlatformCustomizer for DeepSeekCustomizer {
    fn info(&self) -> PlatformInfo {
        PlatformInfo {
            name: "DeepSeek".to_string(),
            image: "https://chat.deepseek.com/favicon.svg".to_string(),
            url: DeepSeekClient::default_base_url(),
        }
    }

    fn balance_path(&self) -> Option<&'static str> {
        Some("/user/balance")
    }

    fn parse_balance(&self, body: &Value) -> Option<String> {
        let info = body.pointer("/balance_infos/0")?;
        let total = display_value(info.get("total_balance")?)?;
        let currency = display_value(info.get("currency")?)?;
        Some(format!("{total} {currency}"))
    }

    fn status_key(&self, status: u16) -> &'static str {
        match status {
            400 => "invalidRequest",
            401 => "authenticationFailed",
            402 => "insufficientBalance",
            422 => "requestParameterError",
            429 => "requestTooFastOrInsufficient",
            500 => "serverError",
            503 => "busyService",
            _ => "getError",
        }
    }
}

/// Balances arrive as strings, but accept plain numbers too
fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct DeepSeekClient {
    inner: CompatibleClient,
}

impl DeepSeekClient {
    pub fn default_base_url() -> String {
        "https://api.deepseek.com".to_string()
    }

    pub fn new(services: &ChatServices) -> Result<Self> {
        Ok(Self {
            inner: CompatibleClient::with_customization(Box::new(DeepSeekCustomizer), services)?,
        })
    }
}

#[async_trait]
impl PlatformAdapter for DeepSeekClient {
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
