//! `mix`: combine the dubbed speech with the background into one
//! loudness-normalized track.
//!
//! Failed TTS segments are already silence on the speech timeline, so the
//! mix proceeds and only warns; refusing is the burn phase's decision.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use vodub_core::phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
use vodub_core::ports::{MediaProcessor, MixRequest};
use vodub_core::schema::TtsReport;

use crate::{media_err, resolve_media};

#[derive(Default)]
pub struct MixPhase {
    media: Option<Arc<dyn MediaProcessor>>,
}

impl MixPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media: Some(media) }
    }
}

#[async_trait]
impl Phase for MixPhase {
    fn name(&self) -> &'static str {
        "mix"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn requires(&self) -> Vec<String> {
        vec![
            "align.dub_manifest".to_string(),
            "tts.speech".to_string(),
            "tts.report".to_string(),
        ]
    }
    fn provides(&self) -> Vec<String> {
        vec!["mix.audio".to_string()]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
        let config = &ctx.config.phases.mix;
        let video_path = ctx
            .config
            .video_path
            .clone()
            .ok_or_else(|| PhaseError::Config("video_path not set".to_string()))?;

        let speech_artifact = inputs
            .get("tts.speech")
            .ok_or_else(|| PhaseError::InputResolution("tts.speech missing".to_string()))?;
        let speech_path = ctx.workspace.join(&speech_artifact.relpath);
        if !speech_path.exists() {
            return Err(PhaseError::DataMissing(format!(
                "dubbed speech track not found: {}",
                speech_path.display()
            )));
        }

        let report_artifact = inputs
            .get("tts.report")
            .ok_or_else(|| PhaseError::InputResolution("tts.report missing".to_string()))?;
        let report: TtsReport = serde_json::from_str(&std::fs::read_to_string(
            ctx.workspace.join(&report_artifact.relpath),
        )?)?;
        let mut warnings = Vec::new();
        if report.failed_count > 0 {
            let message = format!(
                "{} segment(s) failed synthesis; mixing silence in their place",
                report.failed_count
            );
            warn!("{message}");
            warnings.push(message);
        }

        // Separated tracks are optional collaborators: use them when the
        // sep phase has run, degrade to the video's own audio otherwise.
        let accompaniment = ctx.workspace.join("audio/accompaniment.wav");
        let vocals = ctx.workspace.join("audio/vocals.wav");

        let output_path = outputs.path("mix.audio")?;
        let request = MixRequest {
            speech_path,
            accompaniment_path: accompaniment.exists().then_some(accompaniment),
            vocals_path: vocals.exists().then_some(vocals),
            video_path,
            output_path: output_path.clone(),
            mute_original: config.mute_original,
            mode: config.mode.clone(),
            tts_volume: config.tts_volume,
            accompaniment_volume: config.accompaniment_volume,
            vocals_volume: config.vocals_volume,
            duck_threshold: config.duck_threshold,
            duck_ratio: config.duck_ratio,
            duck_attack_ms: config.duck_attack_ms,
            duck_release_ms: config.duck_release_ms,
            target_lufs: config.target_lufs,
            true_peak: config.true_peak,
        };

        let media = resolve_media(self.media.as_ref())?;
        media.mix(&request).await.map_err(media_err)?;

        let size = std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(PhaseError::OutputValidation(format!(
                "mix produced an empty file: {}",
                output_path.display()
            )));
        }
        info!(size_mb = size as f64 / 1024.0 / 1024.0, "mix complete");

        let mut success = PhaseSuccess::with_outputs(&["mix.audio"])
            .metric("mix_audio_size_mb", json!(size as f64 / 1024.0 / 1024.0))
            .metric("failed_segments", json!(report.failed_count));
        success.warnings = warnings;
        Ok(success)
    }
}
