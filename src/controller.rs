//! Lifecycle of one streaming chat request
//!
//! A session moves `Idle -> Preparing -> Streaming -> {Completed | Failed | Cancelled}`.
//! The controller keeps at most one live session: starting a new one cancels
//! the previous session's token before anything else happens, so two streams
//! never write to the same conversation from one controller.
//!
//! Store writes go through [`ConversationStore::modify`] with the full
//! accumulated text, never a diff, so the last write always holds the whole
//! reply so far.

use crate::accumulator::{DeltaChunk, StreamAccumulator};
use crate::config::StreamSettings;
use crate::error::ChatError;
use crate::events::{ChatEvent, EventSink, StreamOutcome};
use crate::frame::{Frame, FrameReader};
use crate::store::ConversationStore;
use crate::streaming::ChunkStream;
use crate::types::{
    now_millis, ChatMessage, ChatParams, ChatReply, MessageRole, ModelRef, TurnRecord, TurnStatus,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Preparing,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

/// Transient state of one in-flight request
pub struct StreamSession {
    id: u64,
    params: ChatParams,
    token: CancellationToken,
    state: SessionState,
    accumulator: StreamAccumulator,
    /// Fired once this session no longer touches the store
    finished: CancellationToken,
    /// `finished` of the session this one superseded
    previous: Option<CancellationToken>,
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.finished.cancel();
    }
}

impl StreamSession {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn params(&self) -> &ChatParams {
        &self.params
    }

    /// Cancelled when the session is aborted or superseded
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn reasoning(&self) -> &str {
        self.accumulator.reasoning()
    }

    pub fn content(&self) -> &str {
        self.accumulator.content()
    }

    fn reply(&self) -> ChatReply {
        ChatReply {
            reasoning: self.accumulator.reasoning().to_string(),
            content: self.accumulator.content().to_string(),
        }
    }
}

struct ActiveSession {
    id: u64,
    token: CancellationToken,
    finished: CancellationToken,
}

pub struct StreamChatController {
    platform: String,
    store: Arc<dyn ConversationStore>,
    events: Arc<dyn EventSink>,
    settings: StreamSettings,
    active: Mutex<Option<ActiveSession>>,
    next_session_id: AtomicU64,
}

impl StreamChatController {
    pub fn new(
        platform: impl Into<String>,
        store: Arc<dyn ConversationStore>,
        events: Arc<dyn EventSink>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            platform: platform.into(),
            store,
            events,
            settings,
            active: Mutex::new(None),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// Starts a new session, cancelling whichever session was live before
    pub async fn begin_session(&self, params: ChatParams) -> StreamSession {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let finished = CancellationToken::new();

        let mut active = self.active.lock().await;
        let previous = active.take().map(|previous| {
            info!(
                "[{}] Session {} superseded by session {}",
                self.platform, previous.id, id
            );
            previous.token.cancel();
            previous.finished
        });
        *active = Some(ActiveSession {
            id,
            token: token.clone(),
            finished: finished.clone(),
        });

        StreamSession {
            id,
            params,
            token,
            state: SessionState::Idle,
            accumulator: StreamAccumulator::new(),
            finished,
            previous,
        }
    }

    /// Waits until the superseded session has finished its cleanup, so the
    /// history read by [`prepare`](Self::prepare) no longer holds its turns
    /// in flux
    pub async fn wait_for_previous(&self, session: &StreamSession) {
        if let Some(previous) = &session.previous {
            previous.cancelled().await;
        }
    }

    /// Cancels the live session, if any
    pub async fn abort(&self) {
        if let Some(active) = self.active.lock().await.take() {
            debug!("[{}] Aborting session {}", self.platform, active.id);
            active.token.cancel();
        }
    }

    /// Marks the session finished and forgets it if it is still the live one
    pub async fn end_session(&self, session: &StreamSession) {
        session.finished.cancel();
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|a| a.id == session.id) {
            *active = None;
        }
    }

    /// Stores the pending user turn, announces it, and returns the message
    /// history to send: every stored turn's message, the new one last.
    /// Replies still loading are left out.
    pub async fn prepare(
        &self,
        session: &mut StreamSession,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        session.state = SessionState::Preparing;
        let params = &session.params;

        let user_turn = TurnRecord {
            id: params.user_dialogue_id.clone(),
            message: ChatMessage::user(params.content.trim()),
            model: None,
            status: TurnStatus::Pending,
            timestamp: now_millis(),
        };

        let stored = user_turn.clone();
        self.store
            .modify(&params.chat_key, Box::new(move |data| data.push(stored)))
            .await
            .map_err(ChatError::store)?;

        self.events.emit(ChatEvent::UserMessageAppended {
            chat_key: params.chat_key.clone(),
            user_message: user_turn,
        });

        let history = self
            .store
            .get(&params.chat_key)
            .await
            .map_err(ChatError::store)?
            .map(|record| record.data)
            .unwrap_or_default()
            .into_iter()
            .filter(|turn| turn.status != TurnStatus::Loading)
            .map(|turn| turn.message)
            .collect();

        Ok(history)
    }

    /// Consumes the response body, persisting and announcing every frame,
    /// and finalizes the session. Every failure runs the error cleanup before
    /// it is returned.
    pub async fn handle_stream<S: ChunkStream>(
        &self,
        session: &mut StreamSession,
        body: Option<S>,
    ) -> Result<ChatReply, ChatError> {
        let Some(body) = body else {
            return Err(self.fail(session, ChatError::NoResponseBody).await);
        };

        if let Err(e) = self.insert_placeholder(session).await {
            return Err(self.fail(session, e).await);
        }
        session.state = SessionState::Streaming;

        let token = session.token.clone();
        let mut reader = FrameReader::new(body, self.settings.flush_trailing_line);

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => Err(ChatError::Cancelled),
                frame = reader.next_frame() => frame,
            };

            match next {
                Ok(Some(Frame::Delta(delta))) => {
                    let Some(chunk) = session.accumulator.apply(&delta) else {
                        continue;
                    };
                    if let Err(e) = self.persist_progress(session, chunk).await {
                        return Err(self.fail(session, e).await);
                    }
                }
                Ok(Some(Frame::Done)) | Ok(None) => {
                    self.finalize_success(session).await;
                    return Ok(session.reply());
                }
                Err(e) => return Err(self.fail(session, e).await),
            }
        }
    }

    /// Routes a failure to the matching cleanup and hands the error back
    pub async fn fail(&self, session: &mut StreamSession, error: ChatError) -> ChatError {
        match error {
            ChatError::Cancelled => self.finalize_cancelled(session).await,
            ref other => {
                warn!(
                    "[{}] Session {} failed: {}",
                    self.platform, session.id, other
                );
                self.finalize_error(session).await;
            }
        }
        error
    }

    /// Marks both turns done and announces the final reply
    pub async fn finalize_success(&self, session: &mut StreamSession) {
        session.state = SessionState::Completed;
        let params = &session.params;
        let user_id = params.user_dialogue_id.clone();
        let assistant_id = params.dialogue_id.clone();

        self.edit_turns(
            &params.chat_key,
            Box::new(move |data| {
                for turn in data.iter_mut() {
                    if turn.id == user_id || turn.id == assistant_id {
                        turn.status = TurnStatus::Done;
                    }
                }
            }),
        )
        .await;

        debug!(
            "[{}] Session {} completed ({} bytes)",
            self.platform,
            session.id,
            session.accumulator.len()
        );

        self.events.emit(ChatEvent::StreamComplete {
            chat_key: params.chat_key.clone(),
            id: params.dialogue_id.clone(),
            outcome: StreamOutcome::Success {
                reasoning: session.accumulator.reasoning().to_string(),
                message: session.accumulator.content().to_string(),
            },
        });
        self.events.emit(ChatEvent::ConversationListChanged);
    }

    /// Deletes the assistant placeholder, flags the user turn for retry and
    /// announces the failure
    pub async fn finalize_error(&self, session: &mut StreamSession) {
        session.state = SessionState::Failed;
        self.discard_reply(session).await;

        self.events.emit(ChatEvent::StreamComplete {
            chat_key: session.params.chat_key.clone(),
            id: session.params.dialogue_id.clone(),
            outcome: StreamOutcome::Error,
        });
        self.events.emit(ChatEvent::ConversationListChanged);
    }

    /// Same store cleanup as an error, without the completion notice
    pub async fn finalize_cancelled(&self, session: &mut StreamSession) {
        session.state = SessionState::Cancelled;
        info!("[{}] Session {} cancelled", self.platform, session.id);
        self.discard_reply(session).await;
        self.events.emit(ChatEvent::ConversationListChanged);
    }

    async fn discard_reply(&self, session: &StreamSession) {
        let user_id = session.params.user_dialogue_id.clone();
        let assistant_id = session.params.dialogue_id.clone();

        self.edit_turns(
            &session.params.chat_key,
            Box::new(move |data| {
                data.retain(|turn| turn.id != assistant_id);
                for turn in data.iter_mut().filter(|turn| turn.id == user_id) {
                    turn.status = TurnStatus::Error;
                }
            }),
        )
        .await;
    }

    async fn insert_placeholder(&self, session: &StreamSession) -> Result<(), ChatError> {
        let placeholder = TurnRecord {
            id: session.params.dialogue_id.clone(),
            message: ChatMessage::assistant("", ""),
            model: Some(self.model_ref(session)),
            status: TurnStatus::Loading,
            timestamp: now_millis(),
        };

        self.store
            .modify(
                &session.params.chat_key,
                Box::new(move |data| data.push(placeholder)),
            )
            .await
            .map_err(ChatError::store)
    }

    async fn persist_progress(
        &self,
        session: &StreamSession,
        chunk: DeltaChunk,
    ) -> Result<(), ChatError> {
        let assistant_id = session.params.dialogue_id.clone();
        let reasoning = session.accumulator.reasoning().to_string();
        let content = session.accumulator.content().to_string();

        self.store
            .modify(
                &session.params.chat_key,
                Box::new(move |data| {
                    if let Some(turn) = data.iter_mut().find(|turn| turn.id == assistant_id) {
                        turn.message.role = MessageRole::Assistant;
                        turn.message.reasoning = Some(reasoning);
                        turn.message.content = content;
                        turn.timestamp = now_millis();
                    }
                }),
            )
            .await
            .map_err(ChatError::store)?;

        self.events.emit(ChatEvent::StreamChunk {
            chat_key: session.params.chat_key.clone(),
            id: session.params.dialogue_id.clone(),
            reasoning: chunk.reasoning,
            message: chunk.content,
            model: self.model_ref(session),
        });
        Ok(())
    }

    /// Finalization writes are best effort: a failing store is logged and the
    /// session still reaches its terminal state.
    async fn edit_turns(&self, chat_key: &str, edit: crate::store::TurnEdit) {
        if let Err(e) = self.store.modify(chat_key, edit).await {
            error!(
                "[{}] Failed to update conversation {}: {:#}",
                self.platform, chat_key, e
            );
        }
    }

    fn model_ref(&self, session: &StreamSession) -> ModelRef {
        ModelRef {
            platform: self.platform.clone(),
            model: session.params.model.clone(),
        }
    }
}
