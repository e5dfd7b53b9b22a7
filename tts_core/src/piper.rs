//! Piper subprocess orchestration.
//!
//! Every synthesis spawns its own `piper` process. The process reads one line
//! of JSON from stdin and writes raw 16-bit PCM to stdout, which is forwarded
//! chunk by chunk as it arrives.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TtsError;
use crate::voices;

pub const DEFAULT_PIPER_PATH: &str = "/usr/share/piper/piper";

/// Upper bound on the size of a forwarded audio chunk.
pub const CHUNK_SIZE: usize = 4096;

#[derive(Serialize)]
struct EngineInput<'a> {
    text: &'a str,
}

/// Launches `piper` processes for a directory of voice models.
#[derive(Debug, Clone)]
pub struct PiperEngine {
    binary: PathBuf,
    voices_dir: PathBuf,
    max_duration: Option<Duration>,
}

impl PiperEngine {
    pub fn new(binary: impl Into<PathBuf>, voices_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            voices_dir: voices_dir.into(),
            max_duration: None,
        }
    }

    /// Stop streaming once a synthesis has run for `max_duration`.
    pub fn with_max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// The engine invocation for `voice`. A speaker id of 0 selects the
    /// model's default speaker and is not passed.
    pub fn command(&self, voice: &str, speaker_id: u32) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--model")
            .arg(voices::model_path(&self.voices_dir, voice))
            .arg("--config")
            .arg(voices::config_path(&self.voices_dir, voice))
            .arg("--json-input")
            .arg("--output-raw");
        if speaker_id > 0 {
            cmd.arg("--speaker-id").arg(speaker_id.to_string());
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    /// Start the engine and hand it `text`.
    ///
    /// Errors are returned before any audio has been produced, so the caller
    /// can still pick the response status.
    pub async fn synthesize(
        &self,
        voice: &str,
        speaker_id: u32,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<SynthesisSession, TtsError> {
        let mut cmd = self.command(voice, speaker_id);
        info!(voice, speaker_id, binary = %self.binary.display(), "starting piper");

        let mut child = cmd.spawn().map_err(TtsError::EngineStart)?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let mut process = EngineProcess { child: Some(child) };

        let (Some(mut stdin), Some(stdout)) = (stdin, stdout) else {
            process.terminate().await;
            return Err(TtsError::EngineStart(io::Error::new(
                io::ErrorKind::Other,
                "piper stdio was not captured",
            )));
        };

        if let Err(e) = write_input(&mut stdin, text).await {
            process.terminate().await;
            return Err(TtsError::EngineInput(e));
        }
        // Closing stdin tells piper the input is complete.
        drop(stdin);

        Ok(SynthesisSession {
            process,
            stdout,
            cancel,
            deadline: self.max_duration.map(|d| Instant::now() + d),
        })
    }
}

async fn write_input(stdin: &mut ChildStdin, text: &str) -> io::Result<()> {
    let mut payload = serde_json::to_vec(&EngineInput { text })?;
    payload.push(b'\n');
    stdin.write_all(&payload).await?;
    stdin.shutdown().await
}

/// A running engine whose input has been sent.
pub struct SynthesisSession {
    process: EngineProcess,
    stdout: ChildStdout,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl SynthesisSession {
    /// Engine output as a stream of chunks of at most [`CHUNK_SIZE`] bytes.
    ///
    /// The stream ends on end of output, cancellation, deadline, or a read
    /// error. The engine is killed and reaped when the stream finishes, or
    /// from a background task if the stream is dropped early.
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        let SynthesisSession {
            mut process,
            mut stdout,
            cancel,
            deadline,
        } = self;

        async_stream::stream! {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let mut forwarded = 0usize;
            loop {
                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(bytes = forwarded, "synthesis cancelled");
                        break;
                    }
                    _ = deadline_reached(deadline) => {
                        warn!(bytes = forwarded, "synthesis exceeded maximum duration");
                        break;
                    }
                    read = stdout.read(&mut buf) => read,
                };
                match read {
                    Ok(0) => {
                        debug!(bytes = forwarded, "synthesis output complete");
                        break;
                    }
                    Ok(n) => {
                        forwarded += n;
                        yield Bytes::copy_from_slice(&buf[..n]);
                    }
                    Err(e) => {
                        error!(error = %e, bytes = forwarded, "error reading synthesis output");
                        break;
                    }
                }
            }
            process.terminate().await;
        }
    }
}

async fn deadline_reached(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Owns the child process and guarantees it is killed and reaped.
struct EngineProcess {
    child: Option<Child>,
}

impl EngineProcess {
    async fn terminate(&mut self) {
        if let Some(mut child) = self.child.take() {
            // `kill` also waits, so the process never lingers as a zombie.
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to terminate piper");
            }
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            warn!(error = %e, "failed to kill piper");
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = child.wait().await;
            });
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::test_support::engine_script;
    use futures_util::StreamExt;

    fn engine(script: &str) -> PiperEngine {
        PiperEngine::new(engine_script(script), "/voices")
    }

    fn is_alive(pid: u32) -> bool {
        std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("kill -0 {pid} 2>/dev/null"))
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn wait_for_exit(pid: u32) {
        for _ in 0..100 {
            if !is_alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("engine process {pid} still running");
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_command_default_speaker() {
        let engine = PiperEngine::new("piper", "/voices");
        assert_eq!(
            args(&engine.command("en_US-amy-low", 0)),
            [
                "--model",
                "/voices/en_US-amy-low.onnx",
                "--config",
                "/voices/en_US-amy-low.onnx.json",
                "--json-input",
                "--output-raw",
            ]
        );
    }

    #[test]
    fn test_command_explicit_speaker() {
        let engine = PiperEngine::new("piper", "/voices");
        let args = args(&engine.command("v1", 7));
        assert_eq!(&args[args.len() - 2..], ["--speaker-id", "7"]);
    }

    #[test]
    fn test_command_paths_match_registry() {
        let registry =
            voices::VoiceRegistry::new(Default::default(), "/data/voices", "http://127.0.0.1:9");
        let engine = PiperEngine::new("piper", "/data/voices");
        let args = args(&engine.command("v1", 0));
        assert_eq!(args[1], registry.model_path("v1").to_string_lossy());
        assert_eq!(args[3], registry.config_path("v1").to_string_lossy());
    }

    #[tokio::test]
    async fn test_input_is_single_json_line() {
        let session = engine("echo")
            .synthesize("v1", 2, "hello \"world\"", CancellationToken::new())
            .await
            .unwrap();
        let chunks: Vec<Bytes> = session.into_stream().collect().await;
        let output = String::from_utf8(chunks.concat()).unwrap();
        let mut lines = output.lines();
        assert!(lines.next().unwrap().ends_with("--json-input --output-raw --speaker-id 2"));
        assert_eq!(lines.next(), Some(r#"{"text":"hello \"world\""}"#));
        assert_eq!(lines.next(), None);
    }

    #[tokio::test]
    async fn test_output_is_chunked_in_order() {
        let session = engine("large")
            .synthesize("v1", 0, "hi", CancellationToken::new())
            .await
            .unwrap();
        let chunks: Vec<Bytes> = session.into_stream().collect().await;
        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= CHUNK_SIZE));
        assert_eq!(chunks.iter().map(Bytes::len).sum::<usize>(), 10000);
    }

    #[tokio::test]
    async fn test_missing_binary_is_start_failure() {
        let engine = PiperEngine::new("/nonexistent/piper", "/voices");
        let result = engine.synthesize("v1", 0, "hi", CancellationToken::new()).await;
        assert!(matches!(result, Err(TtsError::EngineStart(_))));
    }

    async fn first_pid(stream: &mut (impl Stream<Item = Bytes> + Unpin)) -> u32 {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        std::str::from_utf8(&chunk).unwrap().trim().parse().unwrap()
    }

    #[tokio::test]
    async fn test_cancel_terminates_engine() {
        let cancel = CancellationToken::new();
        let session = engine("slow")
            .synthesize("v1", 0, "hi", cancel.clone())
            .await
            .unwrap();
        let mut stream = Box::pin(session.into_stream());
        let pid = first_pid(&mut stream).await;
        assert!(is_alive(pid));

        cancel.cancel();
        let rest = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(rest.is_none());
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_dropped_stream_terminates_engine() {
        let session = engine("slow")
            .synthesize("v1", 0, "hi", CancellationToken::new())
            .await
            .unwrap();
        let mut stream = Box::pin(session.into_stream());
        let pid = first_pid(&mut stream).await;

        drop(stream);
        wait_for_exit(pid).await;
    }

    #[tokio::test]
    async fn test_max_duration_ends_stream() {
        let session = engine("slow")
            .with_max_duration(Some(Duration::from_millis(200)))
            .synthesize("v1", 0, "hi", CancellationToken::new())
            .await
            .unwrap();
        let mut stream = Box::pin(session.into_stream());
        let pid = first_pid(&mut stream).await;

        let rest = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(rest.is_none());
        assert!(!is_alive(pid));
    }
}
