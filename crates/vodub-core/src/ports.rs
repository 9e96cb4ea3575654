//! Port traits for the external collaborators.
//!
//! The core specifies the providers purely by the capability it consumes.
//! Adapter structs live in `vodub-providers` (HTTP) and `vodub-media`
//! (subprocess); phases receive them as `Arc<dyn …>` from the CLI bootstrap.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors crossing a port boundary.
///
/// `Transient` failures have already been retried inside the adapter; by the
/// time an error reaches a phase it is terminal for this run.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("transient failure after retries: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("credentials missing: {0}")]
    Credentials(String),

    #[error("deadline exceeded: {0}")]
    Timeout(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Content-addressed object store: upload once, hand back a presigned URL.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `path` under `{prefix|parent}/{stem}-{sha256[:8]}{suffix}`.
    /// When the object already exists and `overwrite` is false the upload is
    /// skipped and a presigned URL is returned directly.
    async fn upload(
        &self,
        path: &Path,
        prefix: Option<&str>,
        overwrite: bool,
        expires_seconds: u64,
    ) -> Result<String, PortError>;
}

/// Transcription request handed to the recognizer.
#[derive(Debug, Clone)]
pub struct AsrRequest {
    pub audio_url: String,
    pub audio_format: String,
    pub language: String,
    pub preset: String,
    pub hotwords: Vec<String>,
}

/// Cloud speech recognizer: submit + poll until utterances or a terminal
/// error status. The raw provider JSON is kept verbatim as evidence.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe(&self, request: &AsrRequest) -> Result<Value, PortError>;
}

/// LLM translation: one prompt in, one text out. Retries with exponential
/// backoff happen inside the adapter; a `model not found` class of error
/// short-circuits.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, prompt: &str) -> Result<String, PortError>;
}

/// One synthesis request. Everything that shapes the audio is part of the
/// request so the cache key can be derived from it alone.
#[derive(Debug, Clone)]
pub struct TtsRequest {
    pub text: String,
    pub voice: String,
    pub language: String,
    pub format: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Style knobs (emotion, speech rate offset) as a canonical JSON subtree.
    pub prosody: Value,
}

/// Neural voice synthesizer. Returns canonical-format WAV bytes
/// (24 kHz mono 16-bit PCM).
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    fn engine(&self) -> &str;
    fn engine_version(&self) -> &str;
    async fn synthesize(&self, request: &TtsRequest) -> Result<Vec<u8>, PortError>;
}

/// Ducking/mix parameters forwarded to the filtergraph.
#[derive(Debug, Clone)]
pub struct MixRequest {
    pub speech_path: std::path::PathBuf,
    pub accompaniment_path: Option<std::path::PathBuf>,
    pub vocals_path: Option<std::path::PathBuf>,
    pub video_path: std::path::PathBuf,
    pub output_path: std::path::PathBuf,
    pub mute_original: bool,
    pub mode: String,
    pub tts_volume: f64,
    pub accompaniment_volume: f64,
    pub vocals_volume: f64,
    pub duck_threshold: f64,
    pub duck_ratio: f64,
    pub duck_attack_ms: f64,
    pub duck_release_ms: f64,
    pub target_lufs: f64,
    pub true_peak: f64,
}

/// Thin shell around the multimedia tool. The core only states the
/// capabilities; the filtergraph itself is the adapter's business.
#[async_trait]
pub trait MediaProcessor: Send + Sync {
    /// Extract a mono PCM track at `sample_rate` from the video.
    async fn extract_audio(
        &self,
        video: &Path,
        output: &Path,
        sample_rate: u32,
    ) -> Result<(), PortError>;

    /// Downmix any audio file to 16 kHz mono PCM.
    async fn resample_16k_mono(&self, input: &Path, output: &Path) -> Result<(), PortError>;

    /// Authoritative duration probe in milliseconds.
    async fn probe_duration_ms(&self, path: &Path) -> Result<i64, PortError>;

    /// Change tempo without changing pitch, chaining filter stages so each
    /// stays within the codec-supported range.
    async fn apply_tempo(&self, input: &Path, output: &Path, rate: f64) -> Result<(), PortError>;

    /// Mix dubbed speech against background (and optionally ducked vocals)
    /// into a single loudness-normalized track.
    async fn mix(&self, request: &MixRequest) -> Result<(), PortError>;

    /// Mux the mixed audio back with the video and burn the subtitle.
    async fn burn(
        &self,
        video: &Path,
        audio: &Path,
        subtitle: &Path,
        output: &Path,
    ) -> Result<(), PortError>;
}

/// Vocals/background splitter (demucs-class tool).
#[async_trait]
pub trait SourceSeparator: Send + Sync {
    async fn separate(
        &self,
        audio: &Path,
        vocals_out: &Path,
        accompaniment_out: &Path,
        model: &str,
    ) -> Result<(), PortError>;
}
