//! `burn`: mux the mixed audio back with the video and burn the English
//! subtitle.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use vodub_core::phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
use vodub_core::ports::MediaProcessor;
use vodub_core::schema::TtsReport;

use crate::{media_err, resolve_media};

#[derive(Default)]
pub struct BurnPhase {
    media: Option<Arc<dyn MediaProcessor>>,
}

impl BurnPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media: Some(media) }
    }
}

#[async_trait]
impl Phase for BurnPhase {
    fn name(&self) -> &'static str {
        "burn"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn requires(&self) -> Vec<String> {
        vec!["mix.audio".to_string(), "align.en_srt".to_string()]
    }
    fn provides(&self) -> Vec<String> {
        vec!["burn.video".to_string()]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
        let video_path = ctx
            .config
            .video_path
            .clone()
            .ok_or_else(|| PhaseError::Config("video_path not set".to_string()))?;

        let mix_artifact = inputs
            .get("mix.audio")
            .ok_or_else(|| PhaseError::InputResolution("mix.audio missing".to_string()))?;
        let mix_path = ctx.workspace.join(&mix_artifact.relpath);

        let srt_artifact = inputs
            .get("align.en_srt")
            .ok_or_else(|| PhaseError::InputResolution("align.en_srt missing".to_string()))?;
        let srt_path = ctx.workspace.join(&srt_artifact.relpath);

        for path in [&mix_path, &srt_path] {
            if !path.exists() {
                return Err(PhaseError::DataMissing(format!(
                    "input file not found: {}",
                    path.display()
                )));
            }
        }

        // The burn phase decides whether failed TTS segments block release.
        if ctx.config.phases.burn.refuse_on_failed_segments {
            let report_path = ctx.workspace.join("tts/tts_report.json");
            if report_path.exists() {
                let report: TtsReport =
                    serde_json::from_str(&std::fs::read_to_string(&report_path)?)?;
                if report.failed_count > 0 {
                    return Err(PhaseError::ContractViolation(format!(
                        "refusing to burn: {} TTS segment(s) failed",
                        report.failed_count
                    )));
                }
            }
        }

        let output_path = outputs.path("burn.video")?;
        let media = resolve_media(self.media.as_ref())?;
        media
            .burn(&video_path, &mix_path, &srt_path, output_path)
            .await
            .map_err(media_err)?;

        let size = std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(PhaseError::OutputValidation(format!(
                "burn produced an empty file: {}",
                output_path.display()
            )));
        }
        info!(output = %output_path.display(), "dubbed episode ready");

        Ok(PhaseSuccess::with_outputs(&["burn.video"])
            .metric("output_video_size_mb", json!(size as f64 / 1024.0 / 1024.0)))
    }
}
