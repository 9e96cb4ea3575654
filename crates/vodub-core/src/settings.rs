//! Pipeline configuration.
//!
//! One typed document, loadable from a JSON file and merged over defaults.
//! Each phase reads its own section; [`config_fingerprint`] hashes the
//! canonicalized section (plus the global fields the phase consumes) so the
//! manifest can record what configuration a run saw.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fingerprint::hash_json;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Root configuration passed to every phase via `RunContext`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineConfig {
    /// Absolute path of the episode video. Set by the CLI, not the file.
    pub video_path: Option<PathBuf>,
    pub phases: PhasesConfig,
}

impl PipelineConfig {
    /// Load from a JSON file; absent keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PhasesConfig {
    pub demux: DemuxConfig,
    pub sep: SepConfig,
    pub asr: AsrConfig,
    pub sub: SubConfig,
    pub mt: MtConfig,
    pub align: AlignConfig,
    pub tts: TtsConfig,
    pub mix: MixConfig,
    pub burn: BurnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Demuxed audio sample rate (Hz). The ASR provider wants 16 kHz mono.
    pub sample_rate: u32,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self { sample_rate: 16_000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SepConfig {
    /// Source-separation model passed to demucs.
    pub model: String,
}

impl Default for SepConfig {
    fn default() -> Self {
        Self {
            model: "htdemucs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// Provider preset name.
    pub preset: String,
    /// Optional hotword list forwarded to the recognizer.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hotwords: Vec<String>,
    /// Pre-uploaded audio URL; skips the object-store upload when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Transcribe the separated vocals track (downmixed to 16 kHz) instead
    /// of the raw demux audio when separation has run.
    pub use_vocals: bool,
    pub language: String,
    pub poll_interval_s: f64,
    pub max_wait_s: u64,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            preset: "asr_vad_spk".to_string(),
            hotwords: Vec::new(),
            audio_url: None,
            use_vocals: true,
            language: "zh-CN".to_string(),
            poll_interval_s: 2.0,
            max_wait_s: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubConfig {
    pub silence_split_threshold_ms: i64,
    pub min_utterance_duration_ms: i64,
    pub max_utterance_duration_ms: i64,
    pub max_merge_gap_ms: i64,
    pub trailing_silence_cap_ms: i64,
    pub keep_gap_as_field: bool,
    /// Axis cut threshold for cue segmentation inside an utterance.
    pub soft_gap_ms: i64,
    pub cue_max_chars: usize,
    pub cue_max_dur_ms: i64,
}

impl Default for SubConfig {
    fn default() -> Self {
        Self {
            silence_split_threshold_ms: 450,
            min_utterance_duration_ms: 900,
            max_utterance_duration_ms: 8000,
            max_merge_gap_ms: 1000,
            trailing_silence_cap_ms: 350,
            keep_gap_as_field: true,
            soft_gap_ms: 400,
            cue_max_chars: 18,
            cue_max_dur_ms: 2800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MtConfig {
    /// Explicit engine (`"openai"` | `"gemini"`). When unset the engine is
    /// inferred from the model name prefix, then falls back to `"gemini"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub max_retries: u32,
    /// Cross-engine fallback. Off by default: mixing engines across attempts
    /// breaks cross-utterance consistency.
    pub fallback_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_model: Option<String>,
    /// Optional plot synopsis injected into prompts as context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_overview: Option<String>,
    pub episode_context_max_chars: usize,
}

impl Default for MtConfig {
    fn default() -> Self {
        Self {
            engine: None,
            model: None,
            temperature: None,
            max_retries: 3,
            fallback_enabled: false,
            fallback_model: None,
            plot_overview: None,
            episode_context_max_chars: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignConfig {
    /// English speech-rate model used to re-time cues inside an utterance.
    pub target_wps: f64,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self { target_wps: 2.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub engine: String,
    pub resource_id: String,
    pub max_workers: usize,
    /// Largest allowed tempo multiplier before a segment fails.
    pub max_rate: f64,
    /// Extra milliseconds a segment may steal from the following gap.
    pub allow_extend_ms: i64,
    /// Utterances shorter than this get their extension allowance raised.
    pub min_tts_window_ms: i64,
    pub max_extend_cap_ms: i64,
    pub sample_rate: u32,
    /// Shared content-addressed synthesis cache. Defaults to
    /// `<series>/dub/cache/tts` next to the workspace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Explicit speaker → voice assignments; unmapped speakers fall back to
    /// the gender-based default pool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voices: Option<std::collections::BTreeMap<String, String>>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: "volcengine".to_string(),
            resource_id: "seed-tts-1.0".to_string(),
            max_workers: 4,
            max_rate: 1.3,
            allow_extend_ms: 500,
            min_tts_window_ms: 900,
            max_extend_cap_ms: 800,
            sample_rate: 24_000,
            cache_dir: None,
            voices: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixConfig {
    /// `"ducking"` (sidechain compression of the original voice) or
    /// `"simple"` (fixed attenuation).
    pub mode: String,
    /// Drop the original vocals entirely: background + dub only.
    pub mute_original: bool,
    pub tts_volume: f64,
    pub accompaniment_volume: f64,
    pub vocals_volume: f64,
    pub duck_threshold: f64,
    pub duck_ratio: f64,
    pub duck_attack_ms: f64,
    pub duck_release_ms: f64,
    pub target_lufs: f64,
    pub true_peak: f64,
    /// Trailing silence allowance appended to the declared duration.
    pub tail_ms: i64,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            mode: "ducking".to_string(),
            mute_original: true,
            tts_volume: 1.0,
            accompaniment_volume: 0.8,
            vocals_volume: 0.15,
            duck_threshold: 0.05,
            duck_ratio: 10.0,
            duck_attack_ms: 20.0,
            duck_release_ms: 400.0,
            target_lufs: -16.0,
            true_peak: -1.0,
            tail_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BurnConfig {
    /// Refuse to mux when the TTS report carries failed segments.
    pub refuse_on_failed_segments: bool,
}

impl Default for BurnConfig {
    fn default() -> Self {
        Self {
            refuse_on_failed_segments: false,
        }
    }
}

/// Phases that consume `video_path` directly from the global config.
const VIDEO_PATH_PHASES: [&str; 3] = ["demux", "mix", "burn"];

/// Hash the canonicalized config subtree a phase consumes.
///
/// Stored on every phase record; deliberately not consulted by `should_run`
/// so cosmetic config edits do not invalidate succeeded phases.
pub fn config_fingerprint(phase_name: &str, config: &PipelineConfig) -> Option<String> {
    let phases = serde_json::to_value(&config.phases).ok()?;
    let mut section = phases.get(phase_name).cloned().unwrap_or_else(|| {
        serde_json::Value::Object(serde_json::Map::new())
    });
    if VIDEO_PATH_PHASES.contains(&phase_name) {
        if let Some(video_path) = &config.video_path {
            if let serde_json::Value::Object(map) = &mut section {
                map.insert(
                    "video_path".to_string(),
                    serde_json::Value::String(video_path.display().to_string()),
                );
            }
        }
    }
    Some(hash_json(&section))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PipelineConfig::default();
        assert_eq!(config.phases.sub.silence_split_threshold_ms, 450);
        assert_eq!(config.phases.tts.max_workers, 4);
        assert!((config.phases.tts.max_rate - 1.3).abs() < f64::EPSILON);
        assert!(config.phases.mix.mute_original);
    }

    #[test]
    fn partial_config_file_merges_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"phases": {"tts": {"max_rate": 1.5}, "mt": {"model": "gpt-4o-mini"}}}"#,
        )
        .unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert!((config.phases.tts.max_rate - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.phases.tts.max_workers, 4);
        assert_eq!(config.phases.mt.model.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn config_fingerprint_changes_only_with_own_section() {
        let base = PipelineConfig::default();
        let mut tts_changed = base.clone();
        tts_changed.phases.tts.max_rate = 1.4;

        assert_ne!(
            config_fingerprint("tts", &base),
            config_fingerprint("tts", &tts_changed)
        );
        assert_eq!(
            config_fingerprint("mt", &base),
            config_fingerprint("mt", &tts_changed)
        );
    }

    #[test]
    fn video_path_feeds_demux_fingerprint() {
        let mut a = PipelineConfig::default();
        a.video_path = Some(PathBuf::from("/videos/s/1.mp4"));
        let mut b = PipelineConfig::default();
        b.video_path = Some(PathBuf::from("/videos/s/2.mp4"));

        assert_ne!(config_fingerprint("demux", &a), config_fingerprint("demux", &b));
        assert_eq!(config_fingerprint("sub", &a), config_fingerprint("sub", &b));
    }
}
