use anyhow::{Context, Result};
use chat_stream::logging::setup_logging;
use chat_stream::{
    builtin_plugins, now_millis, ChatEvent, ChatParams, ChatServices, ChatStreamConfig,
    ConversationRecord, EventSink, KeyParams, MemoryConversationStore, PlatformAdapter,
    PlatformRegistry, PluginHost, ScriptedChunkStream, StreamChatController, StreamOutcome,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to chat-stream.json (default: searched in the config directories)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered platforms
    Platforms,
    /// List the models available to an API key
    Models {
        /// Id of the API key entry in the config
        #[arg(long)]
        api_key: String,
    },
    /// Show the account balance of an API key
    Balance {
        #[arg(long)]
        api_key: String,
    },
    /// Stream a reply to stdout
    Chat {
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        model: String,
        /// Conversation key
        #[arg(long, default_value = "cli")]
        chat: String,
        content: String,
    },
    /// Feed a captured event stream through the pipeline without network access
    Replay {
        file: PathBuf,
        #[arg(long, default_value = "replay")]
        model: String,
    },
}

/// Prints reply text as it arrives. Reasoning goes to stderr.
struct TerminalPrinter;

impl EventSink for TerminalPrinter {
    fn emit(&self, event: ChatEvent) {
        match event {
            ChatEvent::StreamChunk {
                reasoning, message, ..
            } => {
                if let Some(reasoning) = reasoning {
                    eprint!("{reasoning}");
                }
                if let Some(message) = message {
                    print!("{message}");
                    let _ = std::io::stdout().flush();
                }
            }
            ChatEvent::StreamComplete {
                outcome: StreamOutcome::Success { .. },
                ..
            } => println!(),
            _ => {}
        }
    }
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn chat_params(api_key: &str, model: &str, chat: &str, content: &str) -> ChatParams {
    let stamp = now_millis();
    ChatParams {
        chat_key: chat.to_string(),
        api_key: api_key.to_string(),
        model: model.to_string(),
        content: content.to_string(),
        dialogue_id: format!("{stamp}-assistant"),
        user_dialogue_id: format!("{stamp}-user"),
    }
}

fn adapter_for_key(
    config: &ChatStreamConfig,
    registry: &PlatformRegistry,
    api_key: &str,
) -> Result<Arc<dyn PlatformAdapter>> {
    let record = config
        .api_keys
        .iter()
        .find(|record| record.key == api_key)
        .with_context(|| format!("No API key entry named '{api_key}' in the config"))?;

    let platform = registry
        .get_platform(&record.platform)
        .with_context(|| format!("Platform '{}' is not registered", record.platform))?;
    Ok(platform.adapter)
}

async fn replay(
    file: PathBuf,
    model: String,
    config: &ChatStreamConfig,
    store: Arc<MemoryConversationStore>,
) -> Result<()> {
    let capture = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read capture: {}", file.display()))?;

    store.insert(ConversationRecord::new("replay", "Replay")).await;
    let controller = StreamChatController::new(
        "Replay",
        store.clone(),
        Arc::new(TerminalPrinter),
        config.stream.clone(),
    );

    let params = chat_params("replay", &model, "replay", "replay");
    let mut session = controller.begin_session(params).await;
    controller.prepare(&mut session).await?;
    let result = controller
        .handle_stream(&mut session, Some(ScriptedChunkStream::from_capture(&capture)))
        .await;
    controller.end_session(&session).await;

    let reply = result.map_err(|e| anyhow::anyhow!("Replay failed ({}): {}", e.key(), e))?;
    if !reply.reasoning.is_empty() {
        info!("Reasoning: {} bytes", reply.reasoning.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let config = ChatStreamConfig::load_or_default(args.config.clone())?;
    let store = Arc::new(MemoryConversationStore::new());
    let services = ChatServices::from_config(&config, store.clone(), Arc::new(TerminalPrinter));

    let registry = Arc::new(PlatformRegistry::new());
    let mut host = PluginHost::new(registry.clone(), services).with_selection(config.plugins.clone());
    for plugin in builtin_plugins() {
        host.add(plugin);
    }
    host.load_all().await;

    match args.command {
        Command::Platforms => {
            for platform in registry.get_all_platforms() {
                println!("{}\t{}", platform.info.name, platform.info.url);
            }
        }
        Command::Models { api_key } => {
            let adapter = adapter_for_key(&config, &registry, &api_key)?;
            print_json(&adapter.models(KeyParams::new(api_key)).await)?;
        }
        Command::Balance { api_key } => {
            let adapter = adapter_for_key(&config, &registry, &api_key)?;
            print_json(&adapter.balance(KeyParams::new(api_key)).await)?;
        }
        Command::Chat {
            api_key,
            model,
            chat,
            content,
        } => {
            let adapter = adapter_for_key(&config, &registry, &api_key)?;
            store.insert(ConversationRecord::new(chat.clone(), chat.clone())).await;

            let stopper = adapter.clone();
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stopper.chat_stop().await;
                }
            });

            let response = adapter
                .chat(chat_params(&api_key, &model, &chat, &content))
                .await;
            ctrl_c.abort();

            if !response.is_ok() {
                anyhow::bail!("Chat failed: {}", response.error);
            }
        }
        Command::Replay { file, model } => {
            replay(file, model, &config, store).await?;
        }
    }

    host.unload_all().await;
    Ok(())
}
