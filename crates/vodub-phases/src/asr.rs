//! `asr`: upload the speech track and transcribe it.
//!
//! The provider wants a fetchable URL, so the track goes through the
//! content-addressed object store first (skipped when `audio_url` is
//! configured). The raw provider response is the phase's only artifact —
//! it is evidence, kept verbatim for `sub` to interpret.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use vodub_core::atomic::atomic_write;
use vodub_core::phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
use vodub_core::ports::{AsrRequest, ObjectStore, SpeechRecognizer};
use vodub_core::subtitle::words::raw_utterances;

use crate::{adapter_err, media_err, resolve_media};

const PRESIGN_EXPIRES_SECONDS: u64 = 36_000;

#[derive(Default)]
pub struct AsrPhase {
    object_store: Option<Arc<dyn ObjectStore>>,
    recognizer: Option<Arc<dyn SpeechRecognizer>>,
    media: Option<Arc<dyn vodub_core::ports::MediaProcessor>>,
}

impl AsrPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports(
        object_store: Arc<dyn ObjectStore>,
        recognizer: Arc<dyn SpeechRecognizer>,
        media: Arc<dyn vodub_core::ports::MediaProcessor>,
    ) -> Self {
        Self {
            object_store: Some(object_store),
            recognizer: Some(recognizer),
            media: Some(media),
        }
    }

    /// Series directory name, used as the object-store prefix:
    /// `<dir>/<series>/dub/<stem>` → `<series>`.
    fn series_prefix(ctx: &RunContext) -> Option<String> {
        ctx.workspace
            .parent()
            .and_then(|dub| dub.parent())
            .and_then(|series| series.file_name())
            .and_then(|name| name.to_str())
            .map(str::to_string)
    }
}

#[async_trait]
impl Phase for AsrPhase {
    fn name(&self) -> &'static str {
        "asr"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn requires(&self) -> Vec<String> {
        vec!["demux.audio".to_string()]
    }
    fn provides(&self) -> Vec<String> {
        vec!["asr.raw_response".to_string()]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
        let config = &ctx.config.phases.asr;
        let audio_artifact = inputs
            .get("demux.audio")
            .ok_or_else(|| PhaseError::InputResolution("demux.audio missing".to_string()))?;
        let demux_audio = ctx.workspace.join(&audio_artifact.relpath);
        if !demux_audio.exists() || std::fs::metadata(&demux_audio)?.len() == 0 {
            return Err(PhaseError::DataMissing(format!(
                "audio file missing or empty: {}",
                demux_audio.display()
            )));
        }

        // Prefer the separated vocals (downmixed for the recognizer) when
        // separation has run.
        let vocals = ctx.workspace.join("audio/vocals.wav");
        let upload_source = if config.use_vocals && vocals.exists() {
            let downmix = ctx.workspace.join("audio/vocals-16k.wav");
            let media = resolve_media(self.media.as_ref())?;
            media
                .resample_16k_mono(&vocals, &downmix)
                .await
                .map_err(media_err)?;
            downmix
        } else {
            demux_audio.clone()
        };

        let audio_url = match &config.audio_url {
            Some(url) => url.clone(),
            None => {
                let store: Arc<dyn ObjectStore> = match &self.object_store {
                    Some(store) => Arc::clone(store),
                    None => Arc::new(
                        vodub_providers::TosObjectStore::from_env().map_err(adapter_err)?,
                    ),
                };
                store
                    .upload(
                        &upload_source,
                        Self::series_prefix(ctx).as_deref(),
                        false,
                        PRESIGN_EXPIRES_SECONDS,
                    )
                    .await
                    .map_err(adapter_err)?
            }
        };

        let recognizer: Arc<dyn SpeechRecognizer> = match &self.recognizer {
            Some(recognizer) => Arc::clone(recognizer),
            None => {
                let asr_config = vodub_providers::asr::DoubaoAsrConfig::from_env(
                    config.poll_interval_s,
                    config.max_wait_s,
                )
                .map_err(adapter_err)?;
                Arc::new(vodub_providers::DoubaoAsrClient::new(asr_config))
            }
        };

        let request = AsrRequest {
            audio_format: vodub_providers::asr::guess_audio_format(&audio_url).to_string(),
            audio_url,
            language: config.language.clone(),
            preset: config.preset.clone(),
            hotwords: config.hotwords.clone(),
        };
        let raw = recognizer
            .transcribe(&request)
            .await
            .map_err(adapter_err)?;

        let utterance_count = raw_utterances(&raw).len();
        if utterance_count == 0 {
            return Err(PhaseError::DataMissing(
                "ASR produced no utterances".to_string(),
            ));
        }
        info!(utterances = utterance_count, "transcription complete");

        let raw_path = outputs.path("asr.raw_response")?;
        let pretty = serde_json::to_string_pretty(&raw)?;
        atomic_write(pretty.as_bytes(), raw_path)?;

        Ok(PhaseSuccess::with_outputs(&["asr.raw_response"])
            .metric("utterances_count", json!(utterance_count)))
    }
}
