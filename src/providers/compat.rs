use super::cache::ModelCache;
use super::PlatformAdapter;
use crate::controller::{StreamChatController, StreamSession};
use crate::error::ChatError;
use crate::factory::ChatServices;
use crate::store::{ApiKeyStore, ConversationStore};
use crate::streaming::HttpChunkStream;
use crate::types::{
    ApiKeyRecord, ApiResponse, ChatMessage, ChatParams, ChatReply, KeyParams, PlatformInfo,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// What differs between OpenAI-compatible platforms
pub trait PlatformCustomizer: Send + Sync {
    fn info(&self) -> PlatformInfo;

    fn chat_path(&self) -> &'static str {
        "/chat/completions"
    }

    fn models_path(&self) -> &'static str {
        "/models"
    }

    /// `None` when the platform has no balance endpoint
    fn balance_path(&self) -> Option<&'static str>;

    /// Renders the balance response body for display
    fn parse_balance(&self, body: &Value) -> Option<String>;

    /// Error key for a non-OK HTTP status, without the platform namespace
    fn status_key(&self, status: u16) -> &'static str;

    /// Merge the conversation's stored `configs` into the chat request body
    fn merges_chat_configs(&self) -> bool {
        false
    }

    fn models_cache_ttl(&self) -> Option<Duration> {
        None
    }
}

/// Balance shown by platforms that do not expose one
pub const BALANCE_UNAVAILABLE: &str = "NULL";

/// Client for platforms speaking the OpenAI chat completion protocol
pub struct CompatibleClient {
    info: PlatformInfo,
    customizer: Box<dyn PlatformCustomizer>,
    chat_client: Client,
    query_client: Client,
    api_keys: Arc<dyn ApiKeyStore>,
    conversations: Arc<dyn ConversationStore>,
    controller: StreamChatController,
    model_cache: Option<ModelCache>,
}

impl CompatibleClient {
    pub fn with_customization(
        customizer: Box<dyn PlatformCustomizer>,
        services: &ChatServices,
    ) -> Result<Self> {
        let info = customizer.info();

        // Chat responses stream for as long as the provider keeps sending, so
        // only the connection attempt is bounded.
        let chat_client = Client::builder()
            .connect_timeout(services.http.connect_timeout())
            .build()
            .context("Failed to build chat HTTP client")?;
        let query_client = Client::builder()
            .connect_timeout(services.http.connect_timeout())
            .timeout(services.http.request_timeout())
            .build()
            .context("Failed to build query HTTP client")?;

        let controller = StreamChatController::new(
            info.name.clone(),
            services.conversations.clone(),
            services.events.clone(),
            services.stream.clone(),
        );
        let model_cache = customizer.models_cache_ttl().map(ModelCache::new);

        Ok(Self {
            info,
            customizer,
            chat_client,
            query_client,
            api_keys: services.api_keys.clone(),
            conversations: services.conversations.clone(),
            controller,
            model_cache,
        })
    }

    pub fn controller(&self) -> &StreamChatController {
        &self.controller
    }

    /// Error keys are namespaced by platform, e.g. `Plugins.DeepSeek.serverError`
    fn error_key(&self, key: &str) -> String {
        format!("Plugins.{}.{}", self.info.name, key)
    }

    fn base_url(&self, record: &ApiKeyRecord) -> String {
        let url = if record.url.is_empty() {
            &self.info.url
        } else {
            &record.url
        };
        url.trim_end_matches('/').to_string()
    }

    async fn lookup_key(&self, api_key: &str) -> Result<ApiKeyRecord, ChatError> {
        self.api_keys
            .get(api_key)
            .await
            .map_err(ChatError::store)?
            .ok_or_else(|| ChatError::UnknownApiKey(api_key.to_string()))
    }

    fn query_transport_key(&self, error: &reqwest::Error) -> String {
        if error.is_timeout() {
            self.error_key("requestTimeout")
        } else if error.is_connect() {
            self.error_key("networkError")
        } else {
            self.error_key("noResponse")
        }
    }

    /// GET a JSON document from the platform, mapping every failure to an
    /// error key
    async fn get_json(&self, api_key: &str, path: &str) -> Result<Value, String> {
        let record = self.lookup_key(api_key).await.map_err(|e| {
            warn!("[{}] {}", self.info.name, e);
            self.error_key("unknownError")
        })?;

        let url = format!("{}{}", self.base_url(&record), path);
        debug!("[{}] GET {}", self.info.name, url);

        let response = self
            .query_client
            .get(&url)
            .bearer_auth(&record.value)
            .send()
            .await
            .map_err(|e| {
                warn!("[{}] Request to {} failed: {}", self.info.name, url, e);
                self.query_transport_key(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("[{}] {} returned {}", self.info.name, url, status);
            return Err(self.error_key(self.customizer.status_key(status.as_u16())));
        }

        response.json::<Value>().await.map_err(|e| {
            warn!("[{}] Unreadable response from {}: {}", self.info.name, url, e);
            self.error_key("getError")
        })
    }

    fn chat_body(&self, model: &str, history: &[ChatMessage], configs: Option<Value>) -> Value {
        // Reasoning text is never sent back to the provider
        let messages: Vec<Value> = history
            .iter()
            .map(|message| json!({ "role": message.role, "content": message.content }))
            .collect();

        let mut body = json!({ "model": model, "messages": messages });
        if let (Some(Value::Object(configs)), Some(fields)) = (configs, body.as_object_mut()) {
            fields.extend(configs);
        }
        body["stream"] = Value::Bool(true);
        body
    }

    async fn chat_configs(&self, chat_key: &str) -> Option<Value> {
        if !self.customizer.merges_chat_configs() {
            return None;
        }
        match self.conversations.get(chat_key).await {
            Ok(record) => record.and_then(|record| record.configs),
            Err(e) => {
                warn!(
                    "[{}] Failed to read configs of {}: {:#}",
                    self.info.name, chat_key, e
                );
                None
            }
        }
    }

    async fn run_chat(&self, session: &mut StreamSession) -> Result<ChatReply, ChatError> {
        self.controller.wait_for_previous(session).await;
        let params = session.params().clone();
        let record = self.lookup_key(&params.api_key).await?;

        // Superseded before anything was stored
        if session.token().is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let history = self.controller.prepare(session).await?;
        let configs = self.chat_configs(&params.chat_key).await;
        let body = self.chat_body(&params.model, &history, configs);
        let url = format!("{}{}", self.base_url(&record), self.customizer.chat_path());
        debug!("[{}] Sending streaming request to {}", self.info.name, url);

        let request = self
            .chat_client
            .post(&url)
            .bearer_auth(&record.value)
            .json(&body)
            .send();

        let token = session.token().clone();
        let response = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ChatError::Cancelled),
            response = request => response.map_err(|e| ChatError::from_transport(&e)),
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => return Err(self.controller.fail(session, e).await),
        };

        let status = response.status();
        if !status.is_success() {
            let key = self.error_key(self.customizer.status_key(status.as_u16()));
            let error = ChatError::Status {
                status: status.as_u16(),
                key,
            };
            return Err(self.controller.fail(session, error).await);
        }

        self.controller
            .handle_stream(session, HttpChunkStream::from_response(response))
            .await
    }
}

fn parse_model_ids(body: &Value) -> Option<Vec<String>> {
    let models = body
        .get("data")?
        .as_array()?
        .iter()
        .filter_map(|model| model.get("id").and_then(Value::as_str))
        .map(str::to_owned)
        .collect();
    Some(models)
}

#[async_trait]
impl PlatformAdapter for CompatibleClient {
    fn info(&self) -> PlatformInfo {
        self.info.clone()
    }

    async fn balance(&self, params: KeyParams) -> ApiResponse<String> {
        let Some(path) = self.customizer.balance_path() else {
            return ApiResponse::success(&params, BALANCE_UNAVAILABLE.to_string());
        };

        let result = self.get_json(&params.api_key, path).await.and_then(|body| {
            self.customizer
                .parse_balance(&body)
                .ok_or_else(|| self.error_key("getError"))
        });

        match result {
            Ok(balance) => ApiResponse::success(&params, balance),
            Err(key) => ApiResponse::failure(&params, key),
        }
    }

    async fn models(&self, params: KeyParams) -> ApiResponse<Vec<String>> {
        if let Some(models) = self
            .model_cache
            .as_ref()
            .and_then(|cache| cache.get(&self.info.name, &params.api_key))
        {
            debug!("[{}] Model list served from cache", self.info.name);
            return ApiResponse::success(&params, models);
        }

        let result = self
            .get_json(&params.api_key, self.customizer.models_path())
            .await
            .and_then(|body| parse_model_ids(&body).ok_or_else(|| self.error_key("getError")));

        match result {
            Ok(models) => {
                if let Some(cache) = &self.model_cache {
                    cache.insert(&self.info.name, &params.api_key, models.clone());
                }
                ApiResponse::success(&params, models)
            }
            Err(key) => ApiResponse::failure(&params, key),
        }
    }

    async fn chat(&self, params: ChatParams) -> ApiResponse<ChatReply> {
        let mut session = self.controller.begin_session(params.clone()).await;
        let result = self.run_chat(&mut session).await;
        self.controller.end_session(&session).await;

        match result {
            Ok(reply) => ApiResponse::success(&params, reply),
            Err(e) => {
                debug!("[{}] Chat ended with {}", self.info.name, e.key());
                ApiResponse::failure(&params, e.key())
            }
        }
    }

    async fn chat_stop(&self) {
        self.controller.abort().await;
    }
}
