// Configuration constants for the server

use std::path::PathBuf;
use std::time::Duration;

use tts_core::piper::DEFAULT_PIPER_PATH;
use tts_core::store::DEFAULT_STREAM_TTL;
use tts_core::voices::DEFAULT_VOICES_BASE_URL;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub voices_path: PathBuf,
    pub voices_json_path: PathBuf,
    pub voices_base_url: String,
    pub piper_path: PathBuf,
    pub preload_voices: Vec<String>,
    pub stream_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Unset means a synthesis may run for as long as the engine produces
    /// output.
    pub max_synthesis_secs: Option<u64>,
    pub request_timeout_secs: u64,
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            voices_path: PathBuf::from("/voices"),
            voices_json_path: PathBuf::from("/app/voices.json"),
            voices_base_url: DEFAULT_VOICES_BASE_URL.to_string(),
            piper_path: PathBuf::from(DEFAULT_PIPER_PATH),
            preload_voices: Vec::new(),
            stream_ttl_secs: DEFAULT_STREAM_TTL.as_secs(),
            sweep_interval_secs: DEFAULT_STREAM_TTL.as_secs(),
            max_synthesis_secs: None,
            request_timeout_secs: 30,
            cors_allowed_origins: None,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_positive(key: &str) -> Option<u64> {
    env_string(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env_string("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);

        let voices_path = env_string("VOICES_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.voices_path);

        let voices_json_path = env_string("VOICES_JSON_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.voices_json_path);

        let voices_base_url = env_string("VOICES_BASE_URL").unwrap_or(defaults.voices_base_url);

        let piper_path = env_string("PIPER_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.piper_path);

        let preload_voices = env_string("PRELOAD_VOICES")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        let stream_ttl_secs = env_positive("STREAM_TTL_SECS").unwrap_or(defaults.stream_ttl_secs);

        // The sweep runs as often as entries expire unless told otherwise.
        let sweep_interval_secs = env_positive("STREAM_SWEEP_INTERVAL_SECS").unwrap_or(stream_ttl_secs);

        let max_synthesis_secs = env_positive("MAX_SYNTHESIS_SECS");

        let request_timeout_secs =
            env_positive("REQUEST_TIMEOUT_SECS").unwrap_or(defaults.request_timeout_secs);

        let cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS").map(|v| split_list(&v));

        Self {
            port,
            voices_path,
            voices_json_path,
            voices_base_url,
            piper_path,
            preload_voices,
            stream_ttl_secs,
            sweep_interval_secs,
            max_synthesis_secs,
            request_timeout_secs,
            cors_allowed_origins,
        }
    }

    pub fn stream_ttl(&self) -> Duration {
        Duration::from_secs(self.stream_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn max_synthesis(&self) -> Option<Duration> {
        self.max_synthesis_secs.map(Duration::from_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
