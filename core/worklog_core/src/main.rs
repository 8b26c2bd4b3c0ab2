mod api;
mod codec;
mod duration;
mod error;
mod export;
mod model;
mod reconstruct;
mod service;
mod store;
mod summarizer;
mod summary;

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::Parser;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::api::AppState;
use crate::codec::KeyedCodec;
use crate::store::SqliteStore;
use crate::summarizer::OpenAiSummarizer;

const DEFAULT_PORT: u16 = 17700;

#[derive(Parser, Debug)]
#[command(name = "worklog_core", version)]
struct Args {
    /// Listen address.
    ///
    /// Accepts:
    /// - ip:port (recommended), e.g. 127.0.0.1:17700
    /// - ip (implies port 17700), e.g. 127.0.0.1
    /// - localhost or localhost:port
    #[arg(long, default_value = "127.0.0.1:17700")]
    listen: String,

    /// SQLite database path.
    #[arg(long, default_value = "./data/worklog.db")]
    db: PathBuf,

    /// Key material for task content at rest.
    #[arg(long, env = "WORKLOG_CONTENT_SECRET", hide_env_values = true)]
    content_secret: String,

    /// Base URL of an OpenAI-compatible API.
    #[arg(long, env = "WORKLOG_SUMMARIZER_URL", default_value = "https://api.openai.com/v1")]
    summarizer_url: String,

    #[arg(long, env = "WORKLOG_SUMMARIZER_MODEL", default_value = "gpt-4o-mini")]
    summarizer_model: String,

    /// Without a key the review route answers `upstream_unavailable`.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    summarizer_api_key: Option<String>,

    #[arg(long, default_value_t = 60)]
    summarizer_timeout_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worklog_core=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    if let Some(parent) = args.db.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = SqliteStore::open(&args.db)?;
    let codec = KeyedCodec::new(&args.content_secret)?;
    let summarizer = OpenAiSummarizer::new(
        args.summarizer_url.clone(),
        args.summarizer_api_key.clone(),
        args.summarizer_model.clone(),
        Duration::from_secs(args.summarizer_timeout_seconds),
    )?;
    if args.summarizer_api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
        warn!("no summarizer api key configured; reviews will be unavailable");
    }

    let state = AppState {
        store: Arc::new(Mutex::new(store)),
        codec: Arc::new(codec),
        summarizer: Arc::new(summarizer),
    };
    let app = api::router(state);

    let addr = parse_listen(&args.listen)?;
    info!("Core listening on http://{addr}");
    info!("DB: {}", args.db.display());
    info!("Summarizer: {} ({})", args.summarizer_url, args.summarizer_model);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn parse_listen(input: &str) -> anyhow::Result<SocketAddr> {
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if input == "localhost" {
        return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), DEFAULT_PORT));
    }

    if let Some((host, port_str)) = input.rsplit_once(':') {
        let port: u16 = port_str.parse().map_err(|_| {
            anyhow::anyhow!(
                "invalid --listen '{}': bad port. Example: 127.0.0.1:{}",
                input,
                DEFAULT_PORT
            )
        })?;
        if host == "localhost" {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), port));
        }
        // IPv6 without brackets, e.g. ::1:17700
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, port));
        }
    }

    Err(anyhow::anyhow!(
        "invalid --listen '{}'. Use ip:port (e.g. 127.0.0.1:{}) or ip (e.g. 127.0.0.1).",
        input,
        DEFAULT_PORT
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}
