//! Carrier-facing telephony server binary.
//!
//! Wires the process-wide collaborators (STT/LLM/TTS/embedding upstreams,
//! vector store, history store, webhooks) and the single agent configuration
//! this process serves, then accepts one MediaTransport WebSocket per call
//! and drives it with a [`fae::session::SessionController`].
//!
//! Agent lookup by `agent_id` (spec §9) is out of scope for the core crate:
//! this binary serves exactly one [`fae::config::AgentConfig`], loaded from
//! `FAE_AGENT_CONFIG`.

use axum::extract::ws::{Message, WebSocket};
use axum::routing::get;
use axum::Router;
use fae::config::{AgentConfig, RuntimeConfig};
use fae::embed::HttpEmbedder;
use fae::history::SqliteHistoryStore;
use fae::llm::HttpLlm;
use fae::session::{SessionController, SessionDeps};
use fae::stt::WsStreamingStt;
use fae::tools::NoopToolExecutor;
use fae::transport::{self, AppState, WsMediaTransport};
use fae::tts::WsStreamingTts;
use fae::vectorstore::SqliteVectorStore;
use fae::webhooks::HttpWebhooks;
use futures_util::{SinkExt, StreamExt};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_agent_config() -> anyhow::Result<AgentConfig> {
    let path = env::var("FAE_AGENT_CONFIG").unwrap_or_else(|_| "agent.toml".to_string());
    let text = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("reading agent config {path}: {e}"))?;
    toml::from_str(&text).map_err(|e| anyhow::anyhow!("parsing agent config {path}: {e}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("fae-server starting");

    let runtime_config = RuntimeConfig::load()?;
    let agent_config = load_agent_config()?;
    let agent_id = env_or("FAE_AGENT_ID", "default");

    let deps = Arc::new(SessionDeps {
        stt: Arc::new(WsStreamingStt::new(env_or("FAE_STT_URL", "ws://localhost:9001/stt"))),
        embedder: Arc::new(HttpEmbedder::new(
            env_or("FAE_EMBED_BASE_URL", "http://localhost:9002"),
            env_or("FAE_EMBED_MODEL", "text-embedding-3-small"),
            env::var("FAE_EMBED_API_KEY").ok(),
        )),
        vector_store: Arc::new(SqliteVectorStore::open(&PathBuf::from(env_or(
            "FAE_VECTOR_DB_PATH",
            "vectors.db",
        )))?),
        llm: Arc::new(HttpLlm::new(
            env_or("FAE_LLM_BASE_URL", "http://localhost:9003/v1"),
            agent_config.model_name.clone(),
            env::var("FAE_LLM_API_KEY").ok(),
        )),
        tts: Arc::new(WsStreamingTts::new(env_or("FAE_TTS_URL", "ws://localhost:9004/tts"))),
        tool_executor: Arc::new(NoopToolExecutor),
        history: Arc::new(SqliteHistoryStore::open(&PathBuf::from(env_or(
            "FAE_HISTORY_DB_PATH",
            "history.db",
        )))?),
        webhooks: Arc::new(HttpWebhooks::new(env_or("FAE_WEBHOOK_URL", "http://localhost:9005/events"))),
    });

    let app_state = AppState {
        on_connect: Arc::new(move |socket: WebSocket| {
            let deps = Arc::clone(&deps);
            let runtime_config = runtime_config.clone();
            let agent_config = agent_config.clone();
            let agent_id = agent_id.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_call(socket, deps, runtime_config, agent_config, agent_id).await {
                    error!("call handling failed: {e}");
                }
            });
        }),
    };

    let router = Router::new()
        .route("/media", get(transport::handle_media_upgrade))
        .with_state(app_state);

    let addr = env_or("FAE_LISTEN_ADDR", "0.0.0.0:8080");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "fae-server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Drive one MediaTransport connection (spec §6): wait for `start`, then
/// build the session and forward `media`/`stop` events into it.
async fn handle_call(
    socket: WebSocket,
    deps: Arc<SessionDeps>,
    runtime_config: RuntimeConfig,
    agent_config: AgentConfig,
    agent_id: String,
) -> anyhow::Result<()> {
    let (ws_sink, mut ws_source) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
    let writer = tokio::spawn(async move {
        let mut ws_sink = ws_sink;
        while let Some(msg) = out_rx.recv().await {
            if ws_sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let mut stream_sid = None;
    let mut call_id = Uuid::new_v4().to_string();
    while stream_sid.is_none() {
        let Some(Ok(Message::Text(text))) = ws_source.next().await else {
            writer.abort();
            return Ok(());
        };
        match transport::parse_inbound_event(&text) {
            Some(fae::transport::InboundEvent::Start { stream_sid: sid, start }) => {
                if let Some(id) = start.call_id {
                    call_id = id;
                }
                stream_sid = Some(sid);
            }
            Some(_) | None => continue,
        }
    }
    let stream_sid = stream_sid.expect("loop only exits once set");

    let transport_handle = Arc::new(WsMediaTransport::new(out_tx, stream_sid));
    let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(64);

    let reader = tokio::spawn(async move {
        while let Some(msg) = ws_source.next().await {
            let Ok(Message::Text(text)) = msg else { break };
            match transport::parse_inbound_event(&text) {
                Some(fae::transport::InboundEvent::Media { media, .. }) => {
                    match transport::decode_media_payload(&media.payload) {
                        Ok(mulaw) => {
                            if inbound_tx.send(mulaw).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("dropping malformed media frame: {e}"),
                    }
                }
                Some(fae::transport::InboundEvent::Stop { .. }) => break,
                Some(_) | None => continue,
            }
        }
    });

    let session = SessionController::new(deps, runtime_config, agent_config, call_id, agent_id, transport_handle);
    let status = session.run(inbound_rx).await;
    info!(?status, "call finished");

    reader.abort();
    writer.abort();
    Ok(())
}
