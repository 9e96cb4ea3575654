//! Subtitle Model (SSOT), the aligned English view, and the MT line formats.
//!
//! The Subtitle Model is the single source of truth for an episode's
//! dialogue. `sub` is the only producer; `mt`, `align`, `tts` and `mix`
//! never write it. It holds original facts only — no translation, no
//! execution state.
//!
//! Hard invariants (asserted by the builders, property-tested):
//! - `utterance.start_ms == cues[0].start_ms`,
//!   `utterance.end_ms == cues[last].end_ms`
//! - cues inside an utterance do not overlap
//! - utterances do not overlap in time

use serde::{Deserialize, Serialize};

pub const SUBTITLE_MODEL_SCHEMA: (&str, &str) = ("subtitle.model", "1.2");
pub const SUBTITLE_ALIGN_SCHEMA: (&str, &str) = ("subtitle.align", "1.3");

/// Schema tag at the top of every subtitle document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
    pub version: String,
}

impl SchemaInfo {
    pub fn subtitle_model() -> Self {
        Self {
            name: SUBTITLE_MODEL_SCHEMA.0.to_string(),
            version: SUBTITLE_MODEL_SCHEMA.1.to_string(),
        }
    }

    pub fn subtitle_align() -> Self {
        Self {
            name: SUBTITLE_ALIGN_SCHEMA.0.to_string(),
            version: SUBTITLE_ALIGN_SCHEMA.1.to_string(),
        }
    }
}

/// A word with timestamps, as extracted from the raw ASR response.
/// Utterance-level punctuation is redistributed onto the word it follows
/// before any segmentation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub speaker: String,
}

/// Source-language text carried by a cue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceText {
    pub lang: String,
    pub text: String,
}

/// Utterance-level emotion hint for TTS styling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionInfo {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intensity: Option<String>,
}

/// Source-language speech rate: tokens per second over the union of word
/// intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRate {
    pub zh_tps: f64,
}

/// English speech rate stored on aligned utterances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnSpeechRate {
    pub en_wps: f64,
}

/// One rendered subtitle line. Position within its parent utterance is its
/// identity; there is no id and no speaker at this level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleCue {
    pub start_ms: i64,
    pub end_ms: i64,
    pub source: SourceText,
}

/// A continuous speech unit rebuilt from word timestamps and silences —
/// deliberately distinct from the recognizer's own utterance boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleUtterance {
    pub utt_id: String,
    pub speaker: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub speech_rate: SpeechRate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<EmotionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    /// Concatenation of cue source texts, kept for the translation phase.
    pub text: String,
    /// Silence after this utterance, reported when `keep_gap_as_field` is on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap_after_ms: Option<i64>,
    pub cues: Vec<SubtitleCue>,
}

impl SubtitleUtterance {
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub duration_ms: i64,
}

/// The SSOT written by `sub`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleModel {
    pub schema: SchemaInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioInfo>,
    pub utterances: Vec<SubtitleUtterance>,
}

/// An aligned utterance: the SSOT time window with English text and a time
/// axis recomputed from the English speech-rate model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedUtterance {
    pub utt_id: String,
    pub speaker: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub speech_rate: EnSpeechRate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<EmotionInfo>,
    /// Full English text for this utterance, consumed by TTS.
    pub text: String,
    pub cues: Vec<SubtitleCue>,
}

/// The English view written by `align`; same shape family as the SSOT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedSubtitle {
    pub schema: SchemaInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioInfo>,
    pub utterances: Vec<AlignedUtterance>,
}

// ── MT jsonl line formats ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtConstraints {
    pub window_ms: i64,
    pub zh_tps: f64,
    pub k: f64,
    pub budget_ms: f64,
}

/// One line of `mt_input.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtInputLine {
    pub utt_id: String,
    pub source: SourceText,
    pub constraints: MtConstraints,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetText {
    pub lang: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtStats {
    pub en_est_ms: f64,
    pub budget_ms: f64,
    pub retries: u32,
}

/// One line of `mt_output.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MtOutputLine {
    pub utt_id: String,
    pub target: TargetText,
    pub stats: MtStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtitle_model_round_trips_through_json() {
        let model = SubtitleModel {
            schema: SchemaInfo::subtitle_model(),
            audio: Some(AudioInfo { duration_ms: 60_000 }),
            utterances: vec![SubtitleUtterance {
                utt_id: "utt_0001".to_string(),
                speaker: "spk_1".to_string(),
                start_ms: 100,
                end_ms: 2100,
                speech_rate: SpeechRate { zh_tps: 4.5 },
                emotion: None,
                gender: Some("male".to_string()),
                text: "你好。".to_string(),
                gap_after_ms: Some(350),
                cues: vec![SubtitleCue {
                    start_ms: 100,
                    end_ms: 2100,
                    source: SourceText {
                        lang: "zh".to_string(),
                        text: "你好。".to_string(),
                    },
                }],
            }],
        };
        let json = serde_json::to_string(&model).unwrap();
        let back: SubtitleModel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn optional_fields_are_omitted() {
        let utt = SubtitleUtterance {
            utt_id: "utt_0001".to_string(),
            speaker: "spk_1".to_string(),
            start_ms: 0,
            end_ms: 1000,
            speech_rate: SpeechRate { zh_tps: 5.0 },
            emotion: None,
            gender: None,
            text: String::new(),
            gap_after_ms: None,
            cues: vec![],
        };
        let json = serde_json::to_string(&utt).unwrap();
        assert!(!json.contains("emotion"));
        assert!(!json.contains("gender"));
        assert!(!json.contains("gap_after_ms"));
    }

    #[test]
    fn mt_lines_round_trip() {
        let line = MtOutputLine {
            utt_id: "utt_0002".to_string(),
            target: TargetText {
                lang: "en".to_string(),
                text: "Get out!".to_string(),
            },
            stats: MtStats {
                en_est_ms: 500.0,
                budget_ms: 700.0,
                retries: 1,
            },
        };
        let json = serde_json::to_string(&line).unwrap();
        let back: MtOutputLine = serde_json::from_str(&json).unwrap();
        assert_eq!(back, line);
    }
}
