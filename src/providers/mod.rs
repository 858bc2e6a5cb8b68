//! Platform adapters
//!
//! Every supported platform speaks the OpenAI-compatible chat completion
//! protocol, so the adapters are thin wrappers around
//! [`compat::CompatibleClient`] that only differ in endpoints, balance
//! parsing and status-code mapping.

pub mod cache;
pub mod compat;
pub mod deepseek;
pub mod kimi;
pub mod openai;

pub use compat::{CompatibleClient, PlatformCustomizer};
pub use deepseek::DeepSeekClient;
pub use kimi::KimiClient;
pub use openai::OpenAIClient;

use crate::types::{ApiResponse, ChatParams, ChatReply, KeyParams, PlatformInfo};
use async_trait::async_trait;

/// Uniform contract of one platform.
///
/// Operations never fail with `Err`: failures come back as an envelope whose
/// `error` holds a translatable key.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn info(&self) -> PlatformInfo;

    /// Remaining account balance, rendered for display
    async fn balance(&self, params: KeyParams) -> ApiResponse<String>;

    /// Ids of the models the key can use
    async fn models(&self, params: KeyParams) -> ApiResponse<Vec<String>>;

    /// Streams one reply into the conversation store
    async fn chat(&self, params: ChatParams) -> ApiResponse<ChatReply>;

    /// Aborts the in-flight chat request, if any
    async fn chat_stop(&self);
}
