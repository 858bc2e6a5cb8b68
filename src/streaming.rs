//! Chunk sources feeding the frame parser
//!
//! The controller consumes any [`ChunkStream`]: a live HTTP response body or a
//! scripted sequence of byte chunks replayed from memory. Both go through the
//! same parsing and persistence path.

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Response;
use std::collections::VecDeque;
use std::time::Duration;

/// Source of raw response bytes, yielded in arrival order
#[async_trait]
pub trait ChunkStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Real HTTP response chunk stream
pub struct HttpChunkStream {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
}

impl HttpChunkStream {
    /// Wraps the response body, or returns `None` when the response declares
    /// an empty body.
    pub fn from_response(response: Response) -> Option<Self> {
        if response.content_length() == Some(0) {
            return None;
        }
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Some(Self { body })
    }
}

#[async_trait]
impl ChunkStream for HttpChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        match self.body.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(anyhow::anyhow!("HTTP chunk error: {}", e)),
            None => Ok(None),
        }
    }
}

enum ScriptedItem {
    Bytes(Vec<u8>),
    Fail(String),
}

/// In-memory chunk stream for replaying captured responses
pub struct ScriptedChunkStream {
    items: VecDeque<ScriptedItem>,
    delay: Option<Duration>,
}

impl ScriptedChunkStream {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            items: chunks
                .into_iter()
                .map(|chunk| ScriptedItem::Bytes(chunk.into()))
                .collect(),
            delay: None,
        }
    }

    /// Splits a captured event stream into one chunk per line, keeping the
    /// line terminators.
    pub fn from_capture(capture: &str) -> Self {
        Self::new(capture.split_inclusive('\n').map(str::to_owned))
    }

    /// Wait this long before handing out each chunk
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make the read after the scripted chunks fail instead of ending cleanly
    pub fn then_fail(mut self, message: impl Into<String>) -> Self {
        self.items.push_back(ScriptedItem::Fail(message.into()));
        self
    }
}

#[async_trait]
impl ChunkStream for ScriptedChunkStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(item) = self.items.pop_front() else {
            return Ok(None);
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match item {
            ScriptedItem::Bytes(bytes) => Ok(Some(bytes)),
            ScriptedItem::Fail(message) => Err(anyhow::anyhow!(message)),
        }
    }
}
