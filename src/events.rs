use crate::types::{ModelRef, TurnRecord};
use tokio::sync::broadcast;

/// Notifications the chat controller emits for the UI
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// The user turn was stored and can be rendered right away
    UserMessageAppended {
        chat_key: String,
        user_message: TurnRecord,
    },
    /// One frame's worth of new reply text
    StreamChunk {
        chat_key: String,
        id: String,
        reasoning: Option<String>,
        message: Option<String>,
        model: ModelRef,
    },
    /// The stream finished, successfully or not
    StreamComplete {
        chat_key: String,
        id: String,
        outcome: StreamOutcome,
    },
    ConversationListChanged,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    Success { reasoning: String, message: String },
    Error,
}

/// Receiver of controller notifications
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ChatEvent);
}

impl<F> EventSink for F
where
    F: Fn(&ChatEvent) + Send + Sync,
{
    fn emit(&self, event: ChatEvent) {
        self(&event)
    }
}

/// Fan-out sink: every subscriber sees every event emitted after it subscribed
pub struct EventBus {
    sender: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}
