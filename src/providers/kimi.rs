use super::compat::{CompatibleClient, PlatformCustomizer};
use super::PlatformAdapter;
use crate::factory::ChatServices;
use crate::types::{ApiResponse, ChatParams, ChatReply, KeyParams, PlatformInfo};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

const MODELS_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Moonshot's Kimi platform. Chats carry the conversation's generation
/// settings and model lists are cached.
pub struct KimiCustomizer;

impl PlatformCustomizer for KimiCustomizer {
    fn info(&self) -> PlatformInfo {
        PlatformInfo {
            name: "Kimi".to_string(),
            image: "https://statics.moonshot.cn/kimi-web-seo/favicon.ico".to_string(),
            url: KimiClient::default_base_url(),
        }
    }

    fn balance_path(&self) -> Option<&'static str> {
        Some("/users/me/balance")
    }

    fn parse_balance(&self, body: &Value) -> Option<String> {
        let balance = match body.pointer("/data/available_balance")? {
            // f64 prints whole values without a trailing ".0"
            Value::Number(n) => match n.as_i64() {
                Some(i) => i.to_string(),
                None => n.as_f64()?.to_string(),
            },
            Value::String(s) => s.clone(),
            _ => return None,
        };
        Some(format!("{} CNY", truncate_decimals(&balance, 2)))
    }

    fn status_key(&self, status: u16) -> &'static str {
        match status {
            400 => "invalidRequest",
            401 => "authenticationFailed",
            403 => "insufficientBalance",
            404 => "resourceNotFoundError",
            429 => "requestTooFastOrInsufficient",
            500 => "serverError",
            _ => "getError",
        }
    }

    fn merges_chat_configs(&self) -> bool {
        true
    }

    fn models_cache_ttl(&self) -> Option<Duration> {
        Some(MODELS_CACHE_TTL)
    }
}

/// Cuts the decimal part to `places` digits without rounding
fn truncate_decimals(number: &str, places: usize) -> String {
    match number.split_once('.') {
        Some((int_part, dec_part)) => {
            let kept: String = dec_part.chars().take(places).collect();
            format!("{int_part}.{kept}")
        }
        None => number.to_string(),
    }
}

pub struct KimiClient {
    inner: CompatibleClient,
}

impl KimiClient {
    pub fn default_base_url() -> String {
        "https://api.moonshot.cn/v1".to_string()
    }

    pub fn new(services: &ChatServices) -> Result<Self> {
        Ok(Self {
            inner: CompatibleClient::with_customization(Box::new(KimiCustomizer), services)?,
        })
    }
}

#[async_trait]
impl PlatformAdapter for KimiClient {
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
