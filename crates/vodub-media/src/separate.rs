//! demucs adapter implementing the `SourceSeparator` port.
//!
//! Runs `demucs --two-stems vocals` and moves the stems from the model's
//! output layout (`<out>/<model>/<stem>/{vocals,no_vocals}.wav`) to the
//! workspace paths the phase allocated.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use vodub_core::atomic::atomic_copy;
use vodub_core::ports::{PortError, SourceSeparator};

#[derive(Debug, Clone)]
pub struct DemucsSeparator {
    binary: PathBuf,
}

impl DemucsSeparator {
    pub fn discover() -> Result<Self, PortError> {
        let binary = which::which("demucs")
            .map_err(|e| PortError::Permanent(format!("demucs not found on PATH: {e}")))?;
        Ok(Self { binary })
    }
}

#[async_trait]
impl SourceSeparator for DemucsSeparator {
    async fn separate(
        &self,
        audio: &Path,
        vocals_out: &Path,
        accompaniment_out: &Path,
        model: &str,
    ) -> Result<(), PortError> {
        let work_dir = audio
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(".demucs");
        tokio::fs::create_dir_all(&work_dir).await?;

        info!(audio = %audio.display(), model, "separating vocals and accompaniment");
        let output = Command::new(&self.binary)
            .arg("--two-stems")
            .arg("vocals")
            .arg("-n")
            .arg(model)
            .arg("-o")
            .arg(&work_dir)
            .arg(audio)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(PortError::Permanent(format!(
                "demucs failed ({}): {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
                    .chars()
                    .take(2000)
                    .collect::<String>()
            )));
        }

        let stem = audio
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("audio");
        let stem_dir = work_dir.join(model).join(stem);
        let produced_vocals = stem_dir.join("vocals.wav");
        let produced_accomp = stem_dir.join("no_vocals.wav");
        for (produced, target) in [
            (&produced_vocals, vocals_out),
            (&produced_accomp, accompaniment_out),
        ] {
            if !produced.exists() {
                return Err(PortError::Permanent(format!(
                    "demucs did not produce expected stem: {}",
                    produced.display()
                )));
            }
            atomic_copy(produced, target)?;
        }

        let _ = tokio::fs::remove_dir_all(&work_dir).await;
        Ok(())
    }
}
