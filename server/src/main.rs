use std::{net::SocketAddr, sync::Arc};

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use server::config::ServerConfig;
use server::{app, AppState};
use tts_core::{voices, PiperEngine, StreamStore, TtsManager, VoiceCatalog, VoiceRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    async_main().await
}

async fn async_main() -> anyhow::Result<()> {
    info!("Starting Piper TTS server...");

    let config = ServerConfig::from_env();
    info!(
        port = config.port,
        voices = %config.voices_path.display(),
        piper = %config.piper_path.display(),
        stream_ttl_secs = config.stream_ttl_secs,
        "Server configuration loaded"
    );

    let catalog = voices::load_catalog(&config.voices_json_path).unwrap_or_else(|e| {
        warn!("Could not load voice catalog: {e:#}, using empty catalog.");
        VoiceCatalog::new()
    });
    info!("Loaded {} catalog voices", catalog.len());

    let registry = Arc::new(VoiceRegistry::new(
        catalog,
        &config.voices_path,
        config.voices_base_url.clone(),
    ));
    match registry.load_local() {
        Ok(count) => info!("Found {count} voices on disk"),
        Err(e) => warn!("Could not scan {}: {e:#}", config.voices_path.display()),
    }
    registry.preload(&config.preload_voices).await;

    let engine = PiperEngine::new(&config.piper_path, &config.voices_path)
        .with_max_duration(config.max_synthesis());
    let tts = Arc::new(TtsManager::new(registry, engine));

    let shutdown = CancellationToken::new();
    let store = Arc::new(StreamStore::new(config.stream_ttl()));
    let sweeper = store.spawn_sweeper(config.sweep_interval(), shutdown.clone());

    let state = AppState {
        tts,
        store,
        shutdown: shutdown.clone(),
        config: config.clone(),
    };

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind {addr}: {e}. Try a different PORT.")
    })?;

    info!("Server listening on http://{addr}");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    let _ = sweeper.await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, cancelling in-flight syntheses");
    shutdown.cancel();
}
