pub mod error;
pub mod piper;
pub mod request;
pub mod store;
pub mod voices;
pub mod wav;

#[cfg(all(test, unix))]
mod test_support;

use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use error::TtsError;
pub use piper::{PiperEngine, SynthesisSession};
pub use request::SynthesisRequest;
pub use store::StreamStore;
pub use voices::{VoiceCatalog, VoiceDetails, VoiceRegistry};
pub use wav::AudioFormat;

/// Ties voice resolution to the engine: turns a [`SynthesisRequest`] into a
/// started synthesis plus the WAV format it will be streamed in.
#[derive(Debug)]
pub struct TtsManager {
    voices: Arc<VoiceRegistry>,
    engine: PiperEngine,
}

/// A synthesis that has started successfully but has not produced output yet.
pub struct PreparedStream {
    pub format: AudioFormat,
    pub speaker_id: u32,
    session: SynthesisSession,
}

impl PreparedStream {
    /// The WAV header followed by the engine's raw PCM.
    pub fn into_wav_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        wav::with_header(self.format.header(), self.session.into_stream())
    }
}

impl TtsManager {
    pub fn new(voices: Arc<VoiceRegistry>, engine: PiperEngine) -> Self {
        Self { voices, engine }
    }

    pub fn voices(&self) -> &VoiceRegistry {
        &self.voices
    }

    /// Resolve the voice and start the engine.
    ///
    /// Every failure here happens before any bytes reach the client. An
    /// unknown speaker name selects speaker 0.
    pub async fn prepare(
        &self,
        request: &SynthesisRequest,
        cancel: CancellationToken,
    ) -> Result<PreparedStream, TtsError> {
        let details = self.voices.resolve(&request.voice).await?;
        let speaker_id = details.speaker_id(&request.speaker);
        let format = AudioFormat::for_voice(details.sample_rate(), request.speed);
        debug!(
            voice = %request.voice,
            speaker_id,
            sample_rate = format.sample_rate,
            "prepared synthesis"
        );

        let session = self
            .engine
            .synthesize(&request.voice, speaker_id, &request.text, cancel)
            .await?;

        Ok(PreparedStream {
            format,
            speaker_id,
            session,
        })
    }
}
