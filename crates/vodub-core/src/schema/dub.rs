//! Dubbing manifest: the execution plan `align` hands to `tts` and `mix`.

use serde::{Deserialize, Serialize};

use super::subtitle::EmotionInfo;

/// Per-utterance synthesis policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsPolicy {
    /// Largest allowed tempo multiplier.
    pub max_rate: f64,
    /// Extra time the utterance may steal from the following gap.
    pub allow_extend_ms: i64,
}

/// One utterance to synthesize. `budget_ms` is always
/// `end_ms - start_ms`; the window is the ASR-derived SSOT window and is
/// never extended here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DubUtterance {
    pub utt_id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub budget_ms: i64,
    pub text_zh: String,
    pub text_en: String,
    pub speaker: String,
    pub tts_policy: TtsPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<EmotionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

/// Written by `align` (`dub/dub.model.json`), read by `tts` and `mix`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DubManifest {
    /// Authoritative episode duration probed from the demuxed audio — not a
    /// sum of utterance ends.
    pub audio_duration_ms: i64,
    pub utterances: Vec<DubUtterance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dub_manifest_round_trips() {
        let manifest = DubManifest {
            audio_duration_ms: 61_500,
            utterances: vec![DubUtterance {
                utt_id: "utt_0001".to_string(),
                start_ms: 700,
                end_ms: 1400,
                budget_ms: 700,
                text_zh: "滚出去！".to_string(),
                text_en: "Get out!".to_string(),
                speaker: "spk_1".to_string(),
                tts_policy: TtsPolicy {
                    max_rate: 1.3,
                    allow_extend_ms: 500,
                },
                emotion: None,
                gender: Some("male".to_string()),
            }],
        };
        let json = serde_json::to_string_pretty(&manifest).unwrap();
        let back: DubManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
        assert_eq!(
            back.utterances[0].budget_ms,
            back.utterances[0].end_ms - back.utterances[0].start_ms
        );
    }
}
