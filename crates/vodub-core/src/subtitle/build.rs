//! Subtitle Model construction: raw ASR response → SSOT.
//!
//! `sub` is the sole producer of the Subtitle Model. The raw response stays
//! on disk as an opaque evidence artifact; everything here reads it through
//! tolerant accessors and rebuilds the utterance axis from scratch.

use serde_json::Value;

use crate::schema::{
    AudioInfo, EmotionInfo, SchemaInfo, SpeechRate, SubtitleModel, SubtitleUtterance,
};
use crate::settings::SubConfig;

use super::cue::segment_cues;
use super::normalize::{NormalizationMetrics, NormalizedUtterance, normalize_utterances};
use super::rate::speech_rate_tps;
use super::words::{extract_words, raw_utterances};

/// Normalize a recognizer speaker id (`"1"`, `"speaker_2"`) to `spk_{n}`.
pub fn normalize_speaker_id(speaker: &str) -> String {
    if speaker.starts_with("spk_") {
        return speaker.to_string();
    }
    let digits: String = speaker.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        format!("spk_{speaker}")
    } else {
        format!("spk_{digits}")
    }
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

/// Emotion for a rebuilt utterance: take the raw utterance with the largest
/// time overlap and read its `additions`.
fn aggregate_emotion(raw: &Value, utt: &NormalizedUtterance) -> Option<EmotionInfo> {
    let mut best_overlap = 0i64;
    let mut best: Option<&Value> = None;

    for raw_utt in raw_utterances(raw) {
        let raw_start = raw_utt
            .get("start_time")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let raw_end = raw_utt
            .get("end_time")
            .and_then(Value::as_i64)
            .unwrap_or(raw_start);
        let overlap = utt.end_ms.min(raw_end) - utt.start_ms.max(raw_start);
        if overlap > best_overlap {
            best_overlap = overlap;
            best = Some(raw_utt);
        }
    }

    let additions = best?.get("additions")?;
    let label = additions.get("emotion")?.as_str()?.trim().to_string();
    if label.is_empty() {
        return None;
    }
    Some(EmotionInfo {
        label,
        confidence: as_f64(additions.get("emotion_score")),
        intensity: additions
            .get("emotion_degree")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Build the SSOT from the raw ASR response.
///
/// Returns the model plus normalization metrics for the phase record.
/// Errors with a description when the response carries no usable words or an
/// invariant check fails.
pub fn build_subtitle_model(
    raw: &Value,
    config: &SubConfig,
    audio_duration_ms: Option<i64>,
) -> Result<(SubtitleModel, NormalizationMetrics), String> {
    let (words, gender_map) = extract_words(raw);
    // Non-positive durations never survive into the axis.
    let words: Vec<_> = words
        .into_iter()
        .filter(|w| w.end_ms > w.start_ms)
        .collect();
    if words.is_empty() {
        return Err("ASR raw response contains no usable words".to_string());
    }

    let (normalized, metrics) = normalize_utterances(&words, config, &gender_map);
    if normalized.is_empty() {
        return Err("utterance normalization produced no utterances".to_string());
    }

    let mut utterances = Vec::with_capacity(normalized.len());
    for (i, norm) in normalized.iter().enumerate() {
        let cues = segment_cues(norm, config, "zh");
        if cues.is_empty() {
            continue;
        }
        let zh_tps = speech_rate_tps(&norm.words);
        let text: String = cues.iter().map(|c| c.source.text.as_str()).collect();

        utterances.push(SubtitleUtterance {
            utt_id: format!("utt_{:04}", i + 1),
            speaker: normalize_speaker_id(&norm.speaker),
            start_ms: norm.start_ms,
            end_ms: norm.end_ms,
            speech_rate: SpeechRate { zh_tps },
            emotion: aggregate_emotion(raw, norm),
            gender: if norm.gender.is_empty() {
                None
            } else {
                Some(norm.gender.clone())
            },
            text,
            gap_after_ms: if config.keep_gap_as_field {
                Some(norm.gap_after_ms)
            } else {
                None
            },
            cues,
        });
    }

    validate_model_invariants(&utterances)?;

    let audio = audio_duration_ms
        .or_else(|| utterances.last().map(|u| u.end_ms))
        .map(|duration_ms| AudioInfo { duration_ms });

    Ok((
        SubtitleModel {
            schema: SchemaInfo::subtitle_model(),
            audio,
            utterances,
        },
        metrics,
    ))
}

/// Hard checks: cue coverage per utterance and global non-overlap.
pub fn validate_model_invariants(utterances: &[SubtitleUtterance]) -> Result<(), String> {
    for utt in utterances {
        let Some(first) = utt.cues.first() else {
            return Err(format!("{}: utterance has no cues", utt.utt_id));
        };
        let last = utt.cues.last().expect("non-empty");
        if first.start_ms != utt.start_ms || last.end_ms != utt.end_ms {
            return Err(format!(
                "{}: cues [{}, {}] disagree with utterance boundary [{}, {}]",
                utt.utt_id, first.start_ms, last.end_ms, utt.start_ms, utt.end_ms
            ));
        }
        for pair in utt.cues.windows(2) {
            if pair[0].end_ms > pair[1].start_ms {
                return Err(format!("{}: cues overlap", utt.utt_id));
            }
        }
    }
    for pair in utterances.windows(2) {
        if pair[0].end_ms > pair[1].start_ms {
            return Err(format!(
                "utterances {} and {} overlap in time",
                pair[0].utt_id, pair[1].utt_id
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_raw() -> Value {
        json!({
            "result": {
                "text": "坐牢十年。我出来了！",
                "utterances": [{
                    "text": "坐牢十年。我出来了！",
                    "start_time": 0,
                    "end_time": 4000,
                    "additions": {"speaker": "1", "gender": "male", "emotion": "angry", "emotion_score": "0.8"},
                    "words": [
                        {"text": "坐", "start_time": 0, "end_time": 300},
                        {"text": "牢", "start_time": 300, "end_time": 600},
                        {"text": "十", "start_time": 600, "end_time": 900},
                        {"text": "年", "start_time": 900, "end_time": 1200},
                        {"text": "我", "start_time": 1800, "end_time": 2100},
                        {"text": "出", "start_time": 2100, "end_time": 2400},
                        {"text": "来", "start_time": 2400, "end_time": 2700},
                        {"text": "了", "start_time": 2700, "end_time": 3000}
                    ]
                }]
            }
        })
    }

    #[test]
    fn builds_a_valid_model() {
        let (model, _) =
            build_subtitle_model(&sample_raw(), &SubConfig::default(), Some(60_000)).unwrap();
        assert_eq!(model.schema.name, "subtitle.model");
        assert!(!model.utterances.is_empty());
        assert_eq!(model.audio.as_ref().unwrap().duration_ms, 60_000);
        let utt = &model.utterances[0];
        assert_eq!(utt.utt_id, "utt_0001");
        assert_eq!(utt.speaker, "spk_1");
        assert!(utt.speech_rate.zh_tps > 0.0);
        assert_eq!(utt.gender.as_deref(), Some("male"));
        assert_eq!(utt.emotion.as_ref().unwrap().label, "angry");
        validate_model_invariants(&model.utterances).unwrap();
    }

    #[test]
    fn punctuation_reaches_cue_texts() {
        let (model, _) =
            build_subtitle_model(&sample_raw(), &SubConfig::default(), None).unwrap();
        let all_text: String = model
            .utterances
            .iter()
            .map(|u| u.text.as_str())
            .collect();
        assert!(all_text.contains('。'));
    }

    #[test]
    fn no_words_is_an_error() {
        let raw = json!({"result": {"utterances": []}});
        assert!(build_subtitle_model(&raw, &SubConfig::default(), None).is_err());
    }

    #[test]
    fn speaker_ids_are_normalized() {
        assert_eq!(normalize_speaker_id("1"), "spk_1");
        assert_eq!(normalize_speaker_id("speaker_3"), "spk_3");
        assert_eq!(normalize_speaker_id("spk_2"), "spk_2");
        assert_eq!(normalize_speaker_id("narrator"), "spk_narrator");
    }

    #[test]
    fn validator_rejects_overlapping_utterances() {
        let (model, _) =
            build_subtitle_model(&sample_raw(), &SubConfig::default(), None).unwrap();
        let mut utts = model.utterances;
        if utts.len() == 1 {
            let mut clone = utts[0].clone();
            clone.utt_id = "utt_0002".to_string();
            utts.push(clone);
        }
        assert!(validate_model_invariants(&utts).is_err());
    }
}
