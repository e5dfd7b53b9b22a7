use thiserror::Error;

/// Failures raised by the synthesis pipeline before any audio is committed
/// to a client.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("malformed request body: {0}")]
    MalformedRequest(#[source] serde_json::Error),

    #[error("unknown voice: {0}")]
    UnknownVoice(String),

    #[error("failed to resolve voice {voice}: {source}")]
    AssetResolution {
        voice: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to start synthesis engine: {0}")]
    EngineStart(#[source] std::io::Error),

    #[error("failed to write synthesis input: {0}")]
    EngineInput(#[source] std::io::Error),
}

impl TtsError {
    /// True when the failure means the requested voice cannot be used.
    pub fn is_voice_unavailable(&self) -> bool {
        matches!(self, TtsError::UnknownVoice(_) | TtsError::AssetResolution { .. })
    }
}
