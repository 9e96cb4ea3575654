//! `sub`: build the Subtitle Model (SSOT) from the raw ASR response.
//!
//! The only producer of the SSOT. Downstream phases read it; none of them
//! write it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use vodub_core::atomic::atomic_write;
use vodub_core::phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
use vodub_core::ports::MediaProcessor;
use vodub_core::schema::SubtitleModel;
use vodub_core::subtitle::build::build_subtitle_model;
use vodub_core::subtitle::srt::{SrtCue, render_srt};

use crate::{media_err, resolve_media};

#[derive(Default)]
pub struct SubPhase {
    media: Option<Arc<dyn MediaProcessor>>,
}

impl SubPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media: Some(media) }
    }
}

/// The source SRT is a pure projection of the cues.
fn model_to_srt(model: &SubtitleModel) -> String {
    let cues: Vec<SrtCue> = model
        .utterances
        .iter()
        .flat_map(|utt| utt.cues.iter())
        .map(|cue| SrtCue {
            start_ms: cue.start_ms,
            end_ms: cue.end_ms,
            text: cue.source.text.clone(),
        })
        .collect();
    render_srt(&cues)
}

#[async_trait]
impl Phase for SubPhase {
    fn name(&self) -> &'static str {
        "sub"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn requires(&self) -> Vec<String> {
        vec!["asr.raw_response".to_string(), "demux.audio".to_string()]
    }
    fn provides(&self) -> Vec<String> {
        vec!["sub.subtitle_model".to_string(), "sub.zh_srt".to_string()]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
        let raw_artifact = inputs
            .get("asr.raw_response")
            .ok_or_else(|| PhaseError::InputResolution("asr.raw_response missing".to_string()))?;
        let raw_path = ctx.workspace.join(&raw_artifact.relpath);
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(&raw_path)?)?;

        let audio_artifact = inputs
            .get("demux.audio")
            .ok_or_else(|| PhaseError::InputResolution("demux.audio missing".to_string()))?;
        let audio_path = ctx.workspace.join(&audio_artifact.relpath);
        let media = resolve_media(self.media.as_ref())?;
        let duration_ms = media
            .probe_duration_ms(&audio_path)
            .await
            .map_err(media_err)?;

        let config = &ctx.config.phases.sub;
        info!(
            silence_split_ms = config.silence_split_threshold_ms,
            min_dur_ms = config.min_utterance_duration_ms,
            max_dur_ms = config.max_utterance_duration_ms,
            "building subtitle model"
        );

        let (model, metrics) = build_subtitle_model(&raw, config, Some(duration_ms))
            .map_err(PhaseError::DataMissing)?;

        let total_cues: usize = model.utterances.iter().map(|u| u.cues.len()).sum();
        info!(
            utterances = model.utterances.len(),
            cues = total_cues,
            "subtitle model ready"
        );

        let model_path = outputs.path("sub.subtitle_model")?;
        atomic_write(serde_json::to_string_pretty(&model)?.as_bytes(), model_path)?;

        let srt_path = outputs.path("sub.zh_srt")?;
        atomic_write(model_to_srt(&model).as_bytes(), srt_path)?;

        Ok(
            PhaseSuccess::with_outputs(&["sub.subtitle_model", "sub.zh_srt"])
                .metric("utterances_count", json!(model.utterances.len()))
                .metric("cues_count", json!(total_cues))
                .metric("hard_splits", json!(metrics.hard_splits)),
        )
    }
}
