//! `sep`: split the demuxed audio into vocals and accompaniment.
//!
//! Separation is the quality patch of the pipeline: it feeds ASR a cleaner
//! voice track and gives the mix a dialogue-free background.

use std::sync::Arc;

use async_trait::async_trait;

use vodub_core::phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
use vodub_core::ports::SourceSeparator;

use crate::{adapter_err, media_err};

#[derive(Default)]
pub struct SepPhase {
    separator: Option<Arc<dyn SourceSeparator>>,
}

impl SepPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_separator(separator: Arc<dyn SourceSeparator>) -> Self {
        Self {
            separator: Some(separator),
        }
    }
}

#[async_trait]
impl Phase for SepPhase {
    fn name(&self) -> &'static str {
        "sep"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn requires(&self) -> Vec<String> {
        vec!["demux.audio".to_string()]
    }
    fn provides(&self) -> Vec<String> {
        vec!["sep.vocals".to_string(), "sep.accompaniment".to_string()]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
        let audio_artifact = inputs
            .get("demux.audio")
            .ok_or_else(|| PhaseError::InputResolution("demux.audio missing".to_string()))?;
        let audio_path = ctx.workspace.join(&audio_artifact.relpath);
        if !audio_path.exists() {
            return Err(PhaseError::DataMissing(format!(
                "audio file not found: {}",
                audio_path.display()
            )));
        }

        let vocals_path = outputs.path("sep.vocals")?;
        let accompaniment_path = outputs.path("sep.accompaniment")?;

        let separator: Arc<dyn SourceSeparator> = match &self.separator {
            Some(separator) => Arc::clone(separator),
            None => Arc::new(vodub_media::DemucsSeparator::discover().map_err(media_err)?),
        };
        separator
            .separate(
                &audio_path,
                vocals_path,
                accompaniment_path,
                &ctx.config.phases.sep.model,
            )
            .await
            .map_err(adapter_err)?;

        for (label, path) in [("vocals", vocals_path), ("accompaniment", accompaniment_path)] {
            let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
            if size == 0 {
                return Err(PhaseError::OutputValidation(format!(
                    "separation produced an empty {label} track: {}",
                    path.display()
                )));
            }
        }

        Ok(PhaseSuccess::with_outputs(&[
            "sep.vocals",
            "sep.accompaniment",
        ]))
    }
}
