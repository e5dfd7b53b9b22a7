//! Common utilities for integration tests
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, Response},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use server::{app, config::ServerConfig, AppState};
use tts_core::voices::Voice;
use tts_core::{PiperEngine, StreamStore, TtsManager, VoiceCatalog, VoiceRegistry};

const V1_CONFIG: &str = r#"{"audio":{"sample_rate":16000},"speaker_id_map":{"alice":0,"bob":2}}"#;

/// Voice files plus a `bin/` directory of fake engines, created once so no
/// script is still being written when another test executes one.
fn fixture() -> &'static Path {
    static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let voices = dir.path().join("voices");
        std::fs::create_dir_all(&voices).unwrap();
        std::fs::write(voices.join("v1.onnx"), b"model").unwrap();
        std::fs::write(voices.join("v1.onnx.json"), V1_CONFIG).unwrap();

        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let scripts = [
            ("piper", "cat > /dev/null\nprintf 'pcm:%s' \"$*\"\n"),
            ("slow-piper", "cat > /dev/null\nprintf 'pcm'\nexec sleep 30\n"),
        ];
        for (name, body) in scripts {
            let path = bin.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    })
    .path()
}

pub fn engine_path(name: &str) -> PathBuf {
    fixture().join("bin").join(name)
}

fn catalog() -> VoiceCatalog {
    let mut catalog = VoiceCatalog::new();
    catalog.insert(
        "v1".to_string(),
        Voice {
            key: "v1".to_string(),
            name: "v1".to_string(),
            quality: "low".to_string(),
            num_speakers: 2,
            ..Default::default()
        },
    );
    let mut remote = Voice {
        key: "remote".to_string(),
        ..Default::default()
    };
    remote
        .files
        .insert("xx/remote/remote.onnx".to_string(), Default::default());
    catalog.insert("remote".to_string(), remote);
    catalog
}

/// Application state backed by the fixture voices and the named fake engine.
pub fn test_state(engine: &str, stream_ttl: Duration) -> AppState {
    test_state_with(engine_path(engine), stream_ttl)
}

pub fn test_state_with(piper_path: PathBuf, stream_ttl: Duration) -> AppState {
    let voices_dir = fixture().join("voices");
    // Nothing listens on port 9, so downloads fail fast.
    let registry = Arc::new(VoiceRegistry::new(catalog(), &voices_dir, "http://127.0.0.1:9"));
    registry.load_local().unwrap();

    let engine = PiperEngine::new(&piper_path, &voices_dir);
    let config = ServerConfig {
        voices_path: voices_dir,
        piper_path,
        stream_ttl_secs: stream_ttl.as_secs(),
        ..Default::default()
    };

    AppState {
        tts: Arc::new(TtsManager::new(registry, engine)),
        store: Arc::new(StreamStore::new(stream_ttl)),
        shutdown: CancellationToken::new(),
        config,
    }
}

/// Create a test app instance
pub fn create_test_app() -> Router {
    app(test_state("piper", Duration::from_secs(900)))
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Sample rate declared by a WAV header.
pub fn header_sample_rate(wav: &[u8]) -> u32 {
    u32::from_le_bytes(wav[24..28].try_into().unwrap())
}
