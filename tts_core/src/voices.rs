//! Voice catalog and lazily downloaded voice assets.
//!
//! The catalog (`voices.json`) lists every voice that can be fetched from the
//! remote repository. Model files are downloaded the first time a voice is
//! requested and kept on disk; the parsed details stay cached in memory for
//! the life of the process.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::error::TtsError;

pub const DEFAULT_VOICES_BASE_URL: &str = "https://huggingface.co/rhasspy/piper-voices/resolve/main";

const MODEL_CARD: &str = "MODEL_CARD";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Language {
    pub code: String,
    pub family: String,
    pub region: String,
    pub name_native: String,
    pub name_english: String,
    pub country_english: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceFile {
    pub size_bytes: u64,
    pub md5_digest: String,
}

/// One entry of `voices.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Voice {
    pub key: String,
    pub name: String,
    pub language: Language,
    pub quality: String,
    pub num_speakers: u32,
    pub speaker_id_map: BTreeMap<String, serde_json::Value>,
    /// Remote path (relative to the repository base URL) -> metadata.
    pub files: BTreeMap<String, VoiceFile>,
    pub aliases: Vec<String>,
}

/// Voice key -> catalog entry.
pub type VoiceCatalog = BTreeMap<String, Voice>;

pub fn load_catalog<P: AsRef<Path>>(path: P) -> anyhow::Result<VoiceCatalog> {
    let text = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to load {}", path.as_ref().display()))?;
    let catalog: VoiceCatalog = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid voice catalog", path.as_ref().display()))?;
    Ok(catalog)
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceAudio {
    pub sample_rate: u32,
}

/// The subset of `<voice>.onnx.json` the server needs.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceDetails {
    pub audio: VoiceAudio,
    #[serde(default)]
    pub speaker_id_map: HashMap<String, u32>,
}

impl VoiceDetails {
    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate
    }

    /// Numeric id for a speaker name; unknown or empty names map to 0.
    pub fn speaker_id(&self, speaker: &str) -> u32 {
        self.speaker_id_map.get(speaker).copied().unwrap_or(0)
    }
}

/// `<voice>.onnx` inside `voices_dir`.
pub fn model_path(voices_dir: &Path, voice: &str) -> PathBuf {
    voices_dir.join(format!("{voice}.onnx"))
}

/// `<voice>.onnx.json` inside `voices_dir`.
pub fn config_path(voices_dir: &Path, voice: &str) -> PathBuf {
    voices_dir.join(format!("{voice}.onnx.json"))
}

fn parse_details(path: &Path) -> anyhow::Result<VoiceDetails> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read voice config: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid voice config: {}", path.display()))
}

/// Resolves voice names to their details, downloading assets on first use.
#[derive(Debug)]
pub struct VoiceRegistry {
    catalog: VoiceCatalog,
    voices_dir: PathBuf,
    base_url: String,
    client: reqwest::Client,
    // One cell per voice so that concurrent first requests share a single
    // download.
    resolved: Mutex<HashMap<String, Arc<OnceCell<Arc<VoiceDetails>>>>>,
}

impl VoiceRegistry {
    pub fn new(catalog: VoiceCatalog, voices_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            catalog,
            voices_dir: voices_dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            resolved: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    pub fn model_path(&self, voice: &str) -> PathBuf {
        model_path(&self.voices_dir, voice)
    }

    pub fn config_path(&self, voice: &str) -> PathBuf {
        config_path(&self.voices_dir, voice)
    }

    /// Register every voice already present in the voices directory.
    ///
    /// A voice counts as present when both `<voice>.onnx` and
    /// `<voice>.onnx.json` exist. Creates the directory if it is missing.
    pub fn load_local(&self) -> anyhow::Result<usize> {
        std::fs::create_dir_all(&self.voices_dir)
            .with_context(|| format!("Failed to create {}", self.voices_dir.display()))?;

        let mut loaded = 0;
        for entry in std::fs::read_dir(&self.voices_dir)
            .with_context(|| format!("Failed to read {}", self.voices_dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(voice) = file_name.to_str().and_then(|n| n.strip_suffix(".onnx.json")) else {
                continue;
            };
            if !self.model_path(voice).exists() {
                continue;
            }
            match parse_details(&entry.path()) {
                Ok(details) => {
                    self.cell(voice)
                        .set(Arc::new(details))
                        .unwrap_or_else(|_| warn!(voice, "voice already registered"));
                    loaded += 1;
                }
                Err(e) => warn!(voice, error = %e, "skipping voice with unreadable config"),
            }
        }
        Ok(loaded)
    }

    /// Resolve each name in turn, logging failures instead of returning them.
    pub async fn preload<I, S>(&self, voices: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for voice in voices {
            let voice = voice.as_ref().trim();
            if voice.is_empty() {
                continue;
            }
            match self.resolve(voice).await {
                Ok(_) => info!(voice, "preloaded voice"),
                Err(e) => warn!(voice, error = %e, "failed to preload voice"),
            }
        }
    }

    /// Details for `voice`, fetching its assets if they are not cached yet.
    ///
    /// The download runs on its own task and keeps going when the caller is
    /// dropped, so a request timeout never truncates a model file. Later
    /// callers wait on the same in-flight download.
    pub async fn resolve(&self, voice: &str) -> Result<Arc<VoiceDetails>, TtsError> {
        if let Some(details) = self.cached(voice) {
            return Ok(details);
        }
        let Some(entry) = self.catalog.get(voice) else {
            return Err(TtsError::UnknownVoice(voice.to_string()));
        };

        let cell = self.cell(voice);
        let job = Download {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            voices_dir: self.voices_dir.clone(),
            voice: voice.to_string(),
            remote_paths: entry.files.keys().cloned().collect(),
        };
        let task = tokio::spawn(async move {
            cell.get_or_try_init(move || async move { job.run().await.map(Arc::new) })
                .await
                .map(Arc::clone)
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::Error::new(e).context("voice download task failed")),
        };
        result.map_err(|source| TtsError::AssetResolution {
            voice: voice.to_string(),
            source,
        })
    }

    fn cached(&self, voice: &str) -> Option<Arc<VoiceDetails>> {
        let resolved = self
            .resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        resolved.get(voice).and_then(|cell| cell.get().cloned())
    }

    fn cell(&self, voice: &str) -> Arc<OnceCell<Arc<VoiceDetails>>> {
        let mut resolved = self
            .resolved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(resolved.entry(voice.to_string()).or_default())
    }
}

/// Everything needed to fetch one voice, detached from the registry.
struct Download {
    client: reqwest::Client,
    base_url: String,
    voices_dir: PathBuf,
    voice: String,
    remote_paths: Vec<String>,
}

impl Download {
    async fn run(self) -> anyhow::Result<VoiceDetails> {
        for remote_path in &self.remote_paths {
            let Some(file_name) = Path::new(remote_path).file_name() else {
                continue;
            };
            if file_name.to_str() == Some(MODEL_CARD) {
                continue;
            }
            let target = self.voices_dir.join(file_name);
            if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                info!(path = %target.display(), "voice file already present, skipping download");
                continue;
            }
            let url = format!("{}/{}", self.base_url, remote_path.trim_start_matches('/'));
            self.fetch_file(&url, &target).await?;
        }

        parse_details(&config_path(&self.voices_dir, &self.voice))
    }

    async fn fetch_file(&self, url: &str, target: &Path) -> anyhow::Result<()> {
        info!(%url, path = %target.display(), "downloading voice file");

        let mut partial = target.as_os_str().to_owned();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to download {url}"))?
            .error_for_status()
            .with_context(|| format!("Failed to download {url}"))?;

        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.with_context(|| format!("Download of {url} interrupted"))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, target)
            .await
            .with_context(|| format!("Failed to move {} into place", partial.display()))?;
        info!(%url, path = %target.display(), "downloaded voice file");
        Ok(())
    }
}
