use thiserror::Error;

/// Failure to decode one line of the event stream
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Malformed stream frame '{payload}': {source}")]
    Json {
        payload: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything that can end a chat request without a reply
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Response carried no body")]
    NoResponseBody,

    #[error("Streaming data parsing error: {0}")]
    FrameDecode(#[from] FrameError),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("HTTP status {status}")]
    Status { status: u16, key: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unknown API key: {0}")]
    UnknownApiKey(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Request failed: {0}")]
    Request(String),
}

impl ChatError {
    /// Translatable key surfaced to the UI in the response envelope
    pub fn key(&self) -> String {
        match self {
            ChatError::NoResponseBody => "noResponseBody".to_string(),
            ChatError::FrameDecode(_) => "streamingDataParsingError".to_string(),
            ChatError::Stream(_) => "streamError".to_string(),
            ChatError::Status { key, .. } => key.clone(),
            ChatError::Cancelled => "requestCancelled".to_string(),
            ChatError::Network(_) => "networkError".to_string(),
            ChatError::Timeout(_) => "requestTimeout".to_string(),
            ChatError::InvalidResponse(_) => "invalidResponse".to_string(),
            ChatError::UnknownApiKey(_) | ChatError::Store(_) | ChatError::Request(_) => {
                "requestFailed".to_string()
            }
        }
    }

    /// Classifies a transport failure of the HTTP client
    pub fn from_transport(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            ChatError::Timeout(error.to_string())
        } else if error.is_connect() || error.is_request() {
            ChatError::Network(error.to_string())
        } else if error.is_decode() {
            ChatError::InvalidResponse(error.to_string())
        } else {
            ChatError::Request(error.to_string())
        }
    }

    pub fn store(error: anyhow::Error) -> Self {
        ChatError::Store(format!("{error:#}"))
    }
}
