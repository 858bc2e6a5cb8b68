use crate::config::{ChatStreamConfig, HttpSettings, StreamSettings};
use crate::events::EventSink;
use crate::providers::{DeepSeekClient, KimiClient, OpenAIClient, PlatformAdapter};
use crate::store::{ApiKeyStore, ConversationStore, MemoryApiKeyStore};
use anyhow::Result;
use clap::ValueEnum;
use std::sync::Arc;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PlatformKind {
    DeepSeek,
    OpenAI,
    Kimi,
}

impl PlatformKind {
    pub fn all() -> [PlatformKind; 3] {
        [PlatformKind::DeepSeek, PlatformKind::OpenAI, PlatformKind::Kimi]
    }

    /// Registered platform name
    pub fn name(&self) -> &'static str {
        match self {
            PlatformKind::DeepSeek => "DeepSeek",
            PlatformKind::OpenAI => "OpenAI",
            PlatformKind::Kimi => "Kimi",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::all().into_iter().find(|kind| kind.name() == name)
    }
}

/// Shared collaborators handed to every adapter
#[derive(Clone)]
pub struct ChatServices {
    pub conversations: Arc<dyn ConversationStore>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub events: Arc<dyn EventSink>,
    pub http: HttpSettings,
    pub stream: StreamSettings,
}

impl ChatServices {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        api_keys: Arc<dyn ApiKeyStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            conversations,
            api_keys,
            events,
            http: HttpSettings::default(),
            stream: StreamSettings::default(),
        }
    }

    /// Services backed by the config file's keys and settings
    pub fn from_config(
        config: &ChatStreamConfig,
        conversations: Arc<dyn ConversationStore>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            conversations,
            api_keys: Arc::new(MemoryApiKeyStore::new(config.api_keys.clone())),
            events,
            http: config.http.clone(),
            stream: config.stream.clone(),
        }
    }
}

pub fn create_adapter(kind: PlatformKind, services: &ChatServices) -> Result<Arc<dyn PlatformAdapter>> {
    Ok(match kind {
        PlatformKind::DeepSeek => Arc::new(DeepSeekClient::new(services)?),
        PlatformKind::OpenAI => Arc::new(OpenAIClient::new(services)?),
        PlatformKind::Kimi => Arc::new(KimiClient::new(services)?),
    })
}
