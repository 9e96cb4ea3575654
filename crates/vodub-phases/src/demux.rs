//! `demux`: extract a mono PCM track from the episode video.

use std::sync::Arc;

use async_trait::async_trait;

use vodub_core::phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
use vodub_core::ports::MediaProcessor;

use crate::resolve_media;

#[derive(Default)]
pub struct DemuxPhase {
    media: Option<Arc<dyn MediaProcessor>>,
}

impl DemuxPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media: Some(media) }
    }
}

#[async_trait]
impl Phase for DemuxPhase {
    fn name(&self) -> &'static str {
        "demux"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn requires(&self) -> Vec<String> {
        vec![]
    }
    fn provides(&self) -> Vec<String> {
        vec!["demux.audio".to_string()]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        _inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
        let video = ctx
            .config
            .video_path
            .as_ref()
            .ok_or_else(|| PhaseError::Config("video_path not set".to_string()))?;
        if !video.exists() {
            return Err(PhaseError::Config(format!(
                "video file not found: {}",
                video.display()
            )));
        }
        if std::fs::metadata(video)?.len() == 0 {
            return Err(PhaseError::DataMissing(format!(
                "video file is empty: {}",
                video.display()
            )));
        }

        let audio_path = outputs.path("demux.audio")?;
        let media = resolve_media(self.media.as_ref())?;
        media
            .extract_audio(video, audio_path, ctx.config.phases.demux.sample_rate)
            .await
            .map_err(crate::media_err)?;

        let size = std::fs::metadata(audio_path).map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(PhaseError::OutputValidation(format!(
                "audio extraction produced an empty file: {}",
                audio_path.display()
            )));
        }

        Ok(PhaseSuccess::with_outputs(&["demux.audio"])
            .metric("audio_size_mb", size as f64 / 1024.0 / 1024.0))
    }
}
