use super::*;
use anyhow::Result;
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

fn content_frame(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "content": text } }] })
    )
}

fn reasoning_frame(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({ "choices": [{ "index": 0, "delta": { "reasoning_content": text } }] })
    )
}

const DONE: &str = "data: [DONE]\n\n";

/// Streams the chunks one by one, pausing before each
fn sse_response(chunks: Vec<String>, delay: Duration) -> Response {
    let body = stream::iter(chunks).then(move |chunk| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok::<_, std::io::Error>(Bytes::from(chunk))
    });

    Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

async fn spawn_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let server_addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", server_addr)
}

/// Address nothing listens on
async fn closed_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

/// Request bodies the mock chat endpoint received
#[derive(Clone, Default)]
struct RequestLog(Arc<Mutex<Vec<Value>>>);

impl RequestLog {
    fn push(&self, body: Value) {
        self.0.lock().unwrap().push(body);
    }

    fn bodies(&self) -> Vec<Value> {
        self.0.lock().unwrap().clone()
    }
}

/// Chat endpoint that answers `slow` requests with a long, slow stream and
/// everything else with the given chunks
fn chat_router(path: &str, chunks: Vec<String>, log: RequestLog) -> Router {
    Router::new().route(
        path,
        post(move |Json(body): Json<Value>| {
            let chunks = chunks.clone();
            let log = log.clone();
            async move {
                let last = body["messages"]
                    .as_array()
                    .and_then(|messages| messages.last())
                    .and_then(|message| message["content"].as_str())
                    .unwrap_or_default()
                    .to_string();
                log.push(body);

                if last == "slow" {
                    let slow = (0..100).map(|i| content_frame(&format!("{i} "))).collect();
                    sse_response(slow, Duration::from_millis(50))
                } else {
                    sse_response(chunks, Duration::from_millis(5))
                }
            }
        }),
    )
}

fn status_router(path: &str, status: u16) -> Router {
    Router::new().route(
        path,
        post(move || async move {
            (
                axum::http::StatusCode::from_u16(status).unwrap(),
                Json(json!({ "error": { "message": "nope" } })),
            )
                .into_response()
        }),
    )
}

#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<ChatEvent>>>);

impl EventLog {
    fn sink(&self) -> Arc<dyn EventSink> {
        let events = self.0.clone();
        Arc::new(move |event: &ChatEvent| events.lock().unwrap().push(event.clone()))
    }

    fn events(&self) -> Vec<ChatEvent> {
        self.0.lock().unwrap().clone()
    }

    fn completions(&self) -> Vec<(String, StreamOutcome)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ChatEvent::StreamComplete { id, outcome, .. } => Some((id, outcome)),
                _ => None,
            })
            .collect()
    }

    fn chunk_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, ChatEvent::StreamChunk { .. }))
            .count()
    }
}

struct Harness {
    store: Arc<MemoryConversationStore>,
    events: EventLog,
    adapter: Arc<dyn PlatformAdapter>,
}

impl Harness {
    async fn new(kind: PlatformKind, base_url: &str) -> Self {
        Self::with_conversation(kind, base_url, ConversationRecord::new("chat", "Test chat")).await
    }

    async fn with_conversation(
        kind: PlatformKind,
        base_url: &str,
        conversation: ConversationRecord,
    ) -> Self {
        let store = Arc::new(MemoryConversationStore::new());
        store.insert(conversation).await;
        let events = EventLog::default();

        let api_keys = MemoryApiKeyStore::new(vec![ApiKeyRecord {
            key: "k1".to_string(),
            platform: kind.name().to_string(),
            model: None,
            value: "sk-test".to_string(),
            url: base_url.to_string(),
            enabled: true,
        }]);
        let services = ChatServices::new(store.clone(), Arc::new(api_keys), events.sink());
        let adapter = create_adapter(kind, &services).unwrap();

        Self {
            store,
            events,
            adapter,
        }
    }

    async fn conversation(&self) -> ConversationRecord {
        self.store.get("chat").await.unwrap().unwrap()
    }
}

fn params(turn: &str, content: &str) -> ChatParams {
    ChatParams {
        chat_key: "chat".to_string(),
        api_key: "k1".to_string(),
        model: "deepseek-chat".to_string(),
        content: content.to_string(),
        dialogue_id: format!("{turn}-assistant"),
        user_dialogue_id: format!("{turn}-user"),
    }
}

#[tokio::test]
async fn test_stream_end_to_end() -> Result<()> {
    let log = RequestLog::default();
    let chunks = vec![
        reasoning_frame("Thinking"),
        content_frame("A"),
        content_frame("B"),
        DONE.to_string(),
    ];
    let url = spawn_server(chat_router("/chat/completions", chunks, log.clone())).await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;

    let response = harness.adapter.chat(params("t1", "  Hi  ")).await;

    assert!(response.is_ok(), "unexpected error: {}", response.error);
    let reply = response.data.unwrap();
    assert_eq!(reply.content, "AB");
    assert_eq!(reply.reasoning, "Thinking");
    assert_eq!(response.traceability["chatKey"], "chat");

    assert!(matches!(
        &harness.events.events()[0],
        ChatEvent::UserMessageAppended { user_message, .. } if user_message.message.content == "Hi"
    ));
    assert_eq!(harness.events.chunk_count(), 3);
    assert_eq!(
        harness.events.completions(),
        vec![(
            "t1-assistant".to_string(),
            StreamOutcome::Success {
                reasoning: "Thinking".to_string(),
                message: "AB".to_string()
            }
        )]
    );
    assert_eq!(
        harness.events.events().last(),
        Some(&ChatEvent::ConversationListChanged)
    );

    let conversation = harness.conversation().await;
    let user = conversation.turn("t1-user").unwrap();
    assert_eq!(user.status, TurnStatus::Done);
    assert_eq!(user.message.content, "Hi");
    let assistant = conversation.turn("t1-assistant").unwrap();
    assert_eq!(assistant.status, TurnStatus::Done);
    assert_eq!(assistant.message.content, "AB");
    assert_eq!(assistant.message.reasoning.as_deref(), Some("Thinking"));
    assert_eq!(
        assistant.model,
        Some(ModelRef {
            platform: "DeepSeek".to_string(),
            model: "deepseek-chat".to_string()
        })
    );

    let bodies = log.bodies();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["model"], "deepseek-chat");
    assert_eq!(bodies[0]["stream"], true);
    assert_eq!(
        bodies[0]["messages"],
        json!([{ "role": "user", "content": "Hi" }])
    );
    Ok(())
}

#[tokio::test]
async fn test_two_chunk_capture() -> Result<()> {
    let chunks = vec![
        "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n".to_string(),
        "data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\ndata: [DONE]\n".to_string(),
    ];
    let url = spawn_server(chat_router("/chat/completions", chunks, RequestLog::default())).await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;

    harness.adapter.chat(params("t1", "Hi")).await;

    let pieces: Vec<Option<String>> = harness
        .events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ChatEvent::StreamChunk { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(pieces, vec![Some("A".to_string()), Some("B".to_string())]);
    assert_eq!(
        harness.events.completions(),
        vec![(
            "t1-assistant".to_string(),
            StreamOutcome::Success {
                reasoning: String::new(),
                message: "AB".to_string()
            }
        )]
    );

    let conversation = harness.conversation().await;
    let assistant = conversation.turn("t1-assistant").unwrap();
    assert_eq!(assistant.status, TurnStatus::Done);
    assert_eq!(assistant.message.role, MessageRole::Assistant);
    assert_eq!(assistant.message.content, "AB");
    Ok(())
}

#[tokio::test]
async fn test_history_is_sent_without_reasoning() -> Result<()> {
    let log = RequestLog::default();
    let chunks = vec![reasoning_frame("hmm"), content_frame("One"), DONE.to_string()];
    let url = spawn_server(chat_router("/chat/completions", chunks, log.clone())).await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;

    assert!(harness.adapter.chat(params("t1", "First")).await.is_ok());
    assert!(harness.adapter.chat(params("t2", "Second")).await.is_ok());

    let bodies = log.bodies();
    assert_eq!(
        bodies[1]["messages"],
        json!([
            { "role": "user", "content": "First" },
            { "role": "assistant", "content": "One" },
            { "role": "user", "content": "Second" }
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_new_chat_supersedes_running_one() -> Result<()> {
    let chunks = vec![content_frame("fast"), DONE.to_string()];
    let log = RequestLog::default();
    let url = spawn_server(chat_router("/chat/completions", chunks, log.clone())).await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;

    let adapter = harness.adapter.clone();
    let first = tokio::spawn(async move { adapter.chat(params("t1", "slow")).await });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = harness.adapter.chat(params("t2", "quick")).await;
    let first = first.await?;

    assert_eq!(first.error, "requestCancelled");
    assert!(second.is_ok());
    assert_eq!(second.data.unwrap().content, "fast");

    assert_eq!(
        harness.events.completions(),
        vec![(
            "t2-assistant".to_string(),
            StreamOutcome::Success {
                reasoning: String::new(),
                message: "fast".to_string()
            }
        )]
    );

    let conversation = harness.conversation().await;
    assert!(conversation.turn("t1-assistant").is_none());
    assert_eq!(conversation.turn("t1-user").unwrap().status, TurnStatus::Error);
    assert_eq!(conversation.turn("t2-assistant").unwrap().status, TurnStatus::Done);
    assert!(conversation
        .data
        .iter()
        .all(|turn| turn.status != TurnStatus::Loading));

    // The superseded reply never reaches the next request
    let bodies = log.bodies();
    assert_eq!(bodies.len(), 2);
    assert_eq!(
        bodies[1]["messages"],
        json!([
            {"role": "user", "content": "slow"},
            {"role": "user", "content": "quick"}
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_chat_stop_is_silent() -> Result<()> {
    let url = spawn_server(chat_router("/chat/completions", vec![], RequestLog::default())).await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;

    let adapter = harness.adapter.clone();
    let running = tokio::spawn(async move { adapter.chat(params("t1", "slow")).await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    harness.adapter.chat_stop().await;

    let response = running.await?;
    assert_eq!(response.error, "requestCancelled");
    assert!(response.data.is_none());
    assert!(harness.events.chunk_count() > 0);
    assert!(harness.events.completions().is_empty());

    let conversation = harness.conversation().await;
    assert_eq!(conversation.data.len(), 1);
    assert_eq!(conversation.data[0].status, TurnStatus::Error);

    // Stopping again with nothing running changes nothing
    let before = harness.events.events().len();
    harness.adapter.chat_stop().await;
    assert_eq!(harness.events.events().len(), before);
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_leaves_retryable_turn() -> Result<()> {
    let chunks = vec![
        content_frame("A"),
        "data: {\"choices\": [\n".to_string(),
        content_frame("B"),
    ];
    let url = spawn_server(chat_router("/chat/completions", chunks, RequestLog::default())).await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;

    let response = harness.adapter.chat(params("t1", "Hi")).await;

    assert_eq!(response.error, "streamingDataParsingError");
    let conversation = harness.conversation().await;
    assert!(conversation.turn("t1-assistant").is_none());
    let user = conversation.turn("t1-user").unwrap();
    assert_eq!(user.status, TurnStatus::Error);
    assert_eq!(user.message.content, "Hi");
    assert_eq!(
        harness.events.completions(),
        vec![("t1-assistant".to_string(), StreamOutcome::Error)]
    );
    Ok(())
}

#[tokio::test]
async fn test_done_in_final_chunk_completes_once() -> Result<()> {
    let chunks = vec![format!("{}{}", content_frame("AB"), DONE)];
    let url = spawn_server(chat_router("/chat/completions", chunks, RequestLog::default())).await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;

    let response = harness.adapter.chat(params("t1", "Hi")).await;

    assert_eq!(response.data.unwrap().content, "AB");
    assert_eq!(harness.events.completions().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_status_errors_use_platform_keys() -> Result<()> {
    let url = spawn_server(status_router("/chat/completions", 402)).await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;
    let response = harness.adapter.chat(params("t1", "Hi")).await;
    assert_eq!(response.error, "Plugins.DeepSeek.insufficientBalance");
    let conversation = harness.conversation().await;
    assert_eq!(conversation.data.len(), 1);
    assert_eq!(conversation.data[0].status, TurnStatus::Error);

    let url = spawn_server(status_router("/v1/chat/completions", 403)).await;
    let harness = Harness::new(PlatformKind::OpenAI, &url).await;
    let response = harness.adapter.chat(params("t1", "Hi")).await;
    assert_eq!(response.error, "Plugins.OpenAI.invalidArea");

    let url = spawn_server(status_router("/chat/completions", 404)).await;
    let harness = Harness::new(PlatformKind::Kimi, &url).await;
    let response = harness.adapter.chat(params("t1", "Hi")).await;
    assert_eq!(response.error, "Plugins.Kimi.resourceNotFoundError");
    Ok(())
}

#[tokio::test]
async fn test_unknown_api_key_stores_nothing() -> Result<()> {
    let url = closed_url().await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;

    let mut request = params("t1", "Hi");
    request.api_key = "missing".to_string();
    let response = harness.adapter.chat(request).await;

    assert_eq!(response.error, "requestFailed");
    assert!(harness.conversation().await.data.is_empty());
    assert!(harness.events.events().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_platform() -> Result<()> {
    let url = closed_url().await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;

    let response = harness.adapter.chat(params("t1", "Hi")).await;
    assert_eq!(response.error, "networkError");
    assert_eq!(
        harness.conversation().await.data[0].status,
        TurnStatus::Error
    );

    let balance = harness.adapter.balance(KeyParams::new("k1")).await;
    assert_eq!(balance.error, "Plugins.DeepSeek.networkError");
    Ok(())
}

#[tokio::test]
async fn test_deepseek_balance_and_models() -> Result<()> {
    let app = Router::new()
        .route(
            "/user/balance",
            get(|| async {
                Json(json!({
                    "is_available": true,
                    "balance_infos": [{ "currency": "USD", "total_balance": "8.50" }]
                }))
            }),
        )
        .route(
            "/models",
            get(|| async {
                Json(json!({
                    "object": "list",
                    "data": [{ "id": "deepseek-chat" }, { "id": "deepseek-reasoner" }]
                }))
            }),
        );
    let url = spawn_server(app).await;
    let harness = Harness::new(PlatformKind::DeepSeek, &url).await;

    let balance = harness.adapter.balance(KeyParams::new("k1")).await;
    assert_eq!(balance.data.as_deref(), Some("8.50 USD"));
    assert_eq!(balance.traceability["apiKey"], "k1");

    let models = harness.adapter.models(KeyParams::new("k1")).await;
    assert_eq!(
        models.data,
        Some(vec![
            "deepseek-chat".to_string(),
            "deepseek-reasoner".to_string()
        ])
    );

    let unknown = harness.adapter.models(KeyParams::new("nope")).await;
    assert_eq!(unknown.error, "Plugins.DeepSeek.unknownError");
    Ok(())
}

#[tokio::test]
async fn test_openai_balance_makes_no_request() -> Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().fallback(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Json(json!({ "data": [] }))
        }
    });
    let url = spawn_server(app).await;
    let harness = Harness::new(PlatformKind::OpenAI, &url).await;

    let balance = harness.adapter.balance(KeyParams::new("k1")).await;
    assert!(balance.is_ok());
    assert_eq!(balance.data.as_deref(), Some("NULL"));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn test_kimi_models_are_cached() -> Result<()> {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().route(
        "/models",
        get(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Json(json!({ "data": [{ "id": "moonshot-v1-8k" }] }))
            }
        }),
    );
    let url = spawn_server(app).await;
    let harness = Harness::new(PlatformKind::Kimi, &url).await;

    let first = harness.adapter.models(KeyParams::new("k1")).await;
    let second = harness.adapter.models(KeyParams::new("k1")).await;

    assert_eq!(first.data, second.data);
    assert_eq!(first.data, Some(vec!["moonshot-v1-8k".to_string()]));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_kimi_balance_is_truncated() -> Result<()> {
    let app = Router::new().route(
        "/users/me/balance",
        get(|| async { Json(json!({ "code": 0, "data": { "available_balance": 3.14159 } })) }),
    );
    let url = spawn_server(app).await;
    let harness = Harness::new(PlatformKind::Kimi, &url).await;

    let balance = harness.adapter.balance(KeyParams::new("k1")).await;
    assert_eq!(balance.data.as_deref(), Some("3.14 CNY"));
    Ok(())
}

#[tokio::test]
async fn test_kimi_merges_conversation_configs() -> Result<()> {
    let log = RequestLog::default();
    let chunks = vec![content_frame("ok"), DONE.to_string()];
    let url = spawn_server(chat_router("/chat/completions", chunks, log.clone())).await;
    let conversation = ConversationRecord::new("chat", "Tuned")
        .with_configs(json!({ "temperature": 0.3, "max_tokens": 64, "stream": false }));
    let harness = Harness::with_conversation(PlatformKind::Kimi, &url, conversation).await;

    let response = harness.adapter.chat(params("t1", "Hi")).await;
    assert!(response.is_ok());

    let body = &log.bodies()[0];
    assert_eq!(body["temperature"], 0.3);
    assert_eq!(body["max_tokens"], 64);
    assert_eq!(body["stream"], true);
    Ok(())
}

#[tokio::test]
async fn test_event_bus_subscribers_see_the_stream() -> Result<()> {
    let chunks = vec![content_frame("Hello"), DONE.to_string()];
    let url = spawn_server(chat_router("/chat/completions", chunks, RequestLog::default())).await;

    let store = Arc::new(MemoryConversationStore::new());
    store.insert(ConversationRecord::new("chat", "Bus")).await;
    let bus = Arc::new(EventBus::default());
    let mut receiver = bus.subscribe();
    let config = ChatStreamConfig {
        api_keys: vec![ApiKeyRecord {
            key: "k1".to_string(),
            platform: "DeepSeek".to_string(),
            model: None,
            value: "sk-test".to_string(),
            url,
            enabled: true,
        }],
        ..Default::default()
    };
    let services = ChatServices::from_config(&config, store, bus.clone());

    let registry = Arc::new(PlatformRegistry::new());
    let mut host = PluginHost::new(registry.clone(), services);
    for plugin in builtin_plugins() {
        host.add(plugin);
    }
    host.load_all().await;

    let platform = registry.get_platform("DeepSeek").unwrap();
    assert!(platform.adapter.chat(params("t1", "Hi")).await.is_ok());

    let mut received = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        received.push(event);
    }
    assert!(matches!(received[0], ChatEvent::UserMessageAppended { .. }));
    assert!(matches!(
        received[1],
        ChatEvent::StreamChunk { ref message, .. } if message.as_deref() == Some("Hello")
    ));
    assert!(matches!(received[2], ChatEvent::StreamComplete { .. }));
    assert_eq!(received[3], ChatEvent::ConversationListChanged);
    Ok(())
}
