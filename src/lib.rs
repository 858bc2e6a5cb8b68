//! Streaming chat pipeline for OpenAI-compatible LLM platforms
//!
//! This crate implements:
//! - Incremental parsing of `data:` event streams into reply deltas
//! - A per-platform controller that persists every delta into a conversation
//!   store and announces it on an event sink
//! - Adapters for DeepSeek, OpenAI and Kimi with provider-specific error keys
//! - A platform registry fed by a plugin lifecycle host
//! - Configuration loading and logging setup for the command line front end

#[cfg(test)]
mod tests;

pub mod accumulator;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod factory;
pub mod frame;
pub mod logging;
pub mod plugin;
pub mod providers;
pub mod registry;
pub mod store;
pub mod streaming;
pub mod types;

pub use accumulator::{DeltaChunk, StreamAccumulator};
pub use config::{ChatStreamConfig, HttpSettings, StreamSettings};
pub use controller::{SessionState, StreamChatController, StreamSession};
pub use error::{ChatError, FrameError};
pub use events::{ChatEvent, EventBus, EventSink, StreamOutcome};
pub use factory::{create_adapter, ChatServices, PlatformKind};
pub use frame::{Delta, Frame, FrameParser, FrameReader};
pub use plugin::{builtin_plugins, Plugin, PluginContext, PluginHost, PluginManifest};
pub use providers::PlatformAdapter;
pub use registry::{PlatformRegistration, PlatformRegistry};
pub use store::{ApiKeyStore, ConversationStore, MemoryApiKeyStore, MemoryConversationStore};
pub use streaming::{ChunkStream, HttpChunkStream, ScriptedChunkStream};
pub use types::*;
