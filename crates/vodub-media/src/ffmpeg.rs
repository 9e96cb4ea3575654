//! ffmpeg/ffprobe adapter implementing the `MediaProcessor` port.
//!
//! Every operation shells out to the system binaries located once at
//! construction. Filtergraphs are built here; the core only sees the
//! capability contract.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use vodub_core::ports::{MediaProcessor, MixRequest, PortError};

/// Chain of `atempo` factors, each inside the filter's supported
/// `[0.5, 2.0]` range, multiplying to `rate`.
pub fn atempo_chain(rate: f64) -> Vec<f64> {
    let mut factors = Vec::new();
    let mut remaining = rate;
    if remaining <= 0.0 {
        return vec![1.0];
    }
    while remaining > 2.0 {
        factors.push(2.0);
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        factors.push(0.5);
        remaining /= 0.5;
    }
    factors.push(remaining);
    factors
}

fn atempo_filter(rate: f64) -> String {
    atempo_chain(rate)
        .iter()
        .map(|f| format!("atempo={f:.6}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Escape a path for use inside the `subtitles=` filter argument.
fn escape_filter_path(path: &Path) -> String {
    path.display()
        .to_string()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

#[derive(Debug, Clone)]
pub struct FfmpegMediaProcessor {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegMediaProcessor {
    /// Locate `ffmpeg` and `ffprobe` on PATH.
    pub fn discover() -> Result<Self, PortError> {
        let ffmpeg = which::which("ffmpeg")
            .map_err(|e| PortError::Permanent(format!("ffmpeg not found on PATH: {e}")))?;
        let ffprobe = which::which("ffprobe")
            .map_err(|e| PortError::Permanent(format!("ffprobe not found on PATH: {e}")))?;
        Ok(Self { ffmpeg, ffprobe })
    }

    async fn run_ffmpeg(&self, args: &[String]) -> Result<(), PortError> {
        debug!(args = ?args, "ffmpeg");
        let output = Command::new(&self.ffmpeg)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PortError::Permanent(format!(
                "ffmpeg failed ({}): {}",
                output.status,
                stderr.chars().take(2000).collect::<String>()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaProcessor for FfmpegMediaProcessor {
    async fn extract_audio(
        &self,
        video: &Path,
        output: &Path,
        sample_rate: u32,
    ) -> Result<(), PortError> {
        info!(video = %video.display(), output = %output.display(), "extracting audio");
        self.run_ffmpeg(&[
            "-i".into(),
            video.display().to_string(),
            "-vn".into(),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-ar".into(),
            sample_rate.to_string(),
            "-ac".into(),
            "1".into(),
            "-y".into(),
            output.display().to_string(),
        ])
        .await
    }

    async fn resample_16k_mono(&self, input: &Path, output: &Path) -> Result<(), PortError> {
        self.run_ffmpeg(&[
            "-i".into(),
            input.display().to_string(),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-ar".into(),
            "16000".into(),
            "-ac".into(),
            "1".into(),
            "-y".into(),
            output.display().to_string(),
        ])
        .await
    }

    async fn probe_duration_ms(&self, path: &Path) -> Result<i64, PortError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await?;
        if !output.status.success() {
            return Err(PortError::Permanent(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if raw.is_empty() || raw == "N/A" {
            return Err(PortError::Permanent(format!(
                "ffprobe returned no duration for {}",
                path.display()
            )));
        }
        let seconds: f64 = raw
            .parse()
            .map_err(|e| PortError::Permanent(format!("ffprobe duration '{raw}': {e}")))?;
        Ok((seconds * 1000.0) as i64)
    }

    async fn apply_tempo(&self, input: &Path, output: &Path, rate: f64) -> Result<(), PortError> {
        self.run_ffmpeg(&[
            "-i".into(),
            input.display().to_string(),
            "-filter:a".into(),
            atempo_filter(rate),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-y".into(),
            output.display().to_string(),
        ])
        .await
    }

    async fn mix(&self, request: &MixRequest) -> Result<(), PortError> {
        // Inputs: 0 video (fallback original audio), 1 dubbed speech,
        // then optional accompaniment and vocals. A labeled stream is never
        // consumed twice; the speech splits only when ducking needs a key.
        let mut inputs: Vec<&Path> = vec![&request.video_path, &request.speech_path];
        let accomp_idx = request.accompaniment_path.as_deref().map(|p| {
            inputs.push(p);
            inputs.len() - 1
        });
        let vocals_idx = request.vocals_path.as_deref().map(|p| {
            inputs.push(p);
            inputs.len() - 1
        });

        let ducking = !request.mute_original && request.mode == "ducking";
        let mut filters: Vec<String> = Vec::new();

        if ducking {
            filters.push(format!(
                "[1:a]volume={},asplit=2[spc_sc][spc_mix]",
                request.tts_volume
            ));
        } else {
            filters.push(format!("[1:a]volume={}[spc_mix]", request.tts_volume));
        }

        if let Some(idx) = accomp_idx {
            filters.push(format!(
                "[{idx}:a]volume={}[bg]",
                request.accompaniment_volume
            ));
        } else {
            filters.push("[0:a]anull[bg]".to_string());
        }

        if request.mute_original {
            filters.push(
                "[bg][spc_mix]amix=inputs=2:duration=longest:weights=1 3[mix]".to_string(),
            );
        } else {
            if let Some(idx) = vocals_idx {
                filters.push(format!("[{idx}:a]volume={}[orig]", request.vocals_volume));
            } else {
                filters.push(format!("[0:a]volume={}[orig]", request.vocals_volume));
            }
            if ducking {
                filters.push(format!(
                    "[orig][spc_sc]sidechaincompress=threshold={}:ratio={}:attack={}:release={}:detection=peak:link=maximum[orig_duck]",
                    request.duck_threshold,
                    request.duck_ratio,
                    request.duck_attack_ms,
                    request.duck_release_ms
                ));
            } else {
                filters.push("[orig]anull[orig_duck]".to_string());
            }
            filters.push(
                "[bg][orig_duck][spc_mix]amix=inputs=3:duration=longest:weights=1 1 3[mix]"
                    .to_string(),
            );
        }

        // Loudness normalization is a single pass over the final mix;
        // per-segment normalization destroys relative dynamics.
        filters.push(format!(
            "[mix]loudnorm=I={}:TP={}:LRA=11:linear=true[final]",
            request.target_lufs, request.true_peak
        ));

        let mut args: Vec<String> = Vec::new();
        for input in &inputs {
            args.push("-i".into());
            args.push(input.display().to_string());
        }
        args.extend([
            "-filter_complex".into(),
            filters.join(";"),
            "-map".into(),
            "[final]".into(),
            "-acodec".into(),
            "pcm_s16le".into(),
            "-y".into(),
            request.output_path.display().to_string(),
        ]);

        info!(
            mode = %request.mode,
            mute_original = request.mute_original,
            has_accomp = accomp_idx.is_some(),
            has_vocals = vocals_idx.is_some(),
            "mixing audio"
        );
        self.run_ffmpeg(&args).await
    }

    async fn burn(
        &self,
        video: &Path,
        audio: &Path,
        subtitle: &Path,
        output: &Path,
    ) -> Result<(), PortError> {
        info!(output = %output.display(), "burning subtitles and muxing audio");
        self.run_ffmpeg(&[
            "-i".into(),
            video.display().to_string(),
            "-i".into(),
            audio.display().to_string(),
            "-vf".into(),
            format!("subtitles={}", escape_filter_path(subtitle)),
            "-c:v".into(),
            "libx264".into(),
            "-c:a".into(),
            "aac".into(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
            "-y".into(),
            output.display().to_string(),
        ])
        .await
    }
}
