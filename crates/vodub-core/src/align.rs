//! Alignment: re-time English text inside a fixed utterance window.
//!
//! The utterance window is the ASR-derived SSOT value and is never
//! extended — per-utterance extensions compound across an episode and push
//! the total audio past the video. The English time axis is rebuilt from a
//! words-per-second model and scaled to fit the window exactly; the
//! source-language cue timings are never reused.

use std::sync::LazyLock;

use regex::Regex;

use crate::settings::TtsConfig;

static SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,\.\?!—;:]\s*").expect("static regex"));

/// One re-timed English segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnSegment {
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

fn is_only_punctuation(text: &str) -> bool {
    !text.chars().any(char::is_alphanumeric)
}

/// Split English text at punctuation; without any, chunk by 8–12 words
/// scaled to roughly two seconds per chunk.
fn split_text(en_text: &str, window_ms: i64) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut last = 0usize;
    for m in SPLIT_RE.find_iter(en_text) {
        if m.end() > last {
            let piece = en_text[last..m.end()].trim();
            if !piece.is_empty() && !is_only_punctuation(piece) {
                pieces.push(piece.to_string());
            }
            last = m.end();
        }
    }
    if last < en_text.len() {
        let piece = en_text[last..].trim();
        if !piece.is_empty() && !is_only_punctuation(piece) {
            pieces.push(piece.to_string());
        }
    }

    if !pieces.is_empty() {
        return pieces;
    }

    let words: Vec<&str> = en_text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let per_chunk = (words.len() as i64 / (window_ms / 2000).max(1))
        .clamp(8, 12) as usize;
    words
        .chunks(per_chunk)
        .map(|chunk| chunk.join(" "))
        .collect()
}

/// Re-segment an utterance's English inside `[utt_start_ms, utt_end_ms]`.
///
/// Each piece's duration is estimated as `words / target_wps`, then all
/// estimates are scaled so the pieces cover the window exactly; the last
/// segment ends at `utt_end_ms` precisely. Pure-punctuation input yields no
/// segments.
pub fn resegment_utterance(
    en_text: &str,
    utt_start_ms: i64,
    utt_end_ms: i64,
    target_wps: f64,
) -> Vec<EnSegment> {
    let trimmed = en_text.trim();
    if trimmed.is_empty() || is_only_punctuation(trimmed) {
        return Vec::new();
    }
    let window_ms = utt_end_ms - utt_start_ms;
    if window_ms <= 0 {
        return Vec::new();
    }

    let pieces = split_text(trimmed, window_ms);
    if pieces.is_empty() {
        return Vec::new();
    }

    let estimates: Vec<f64> = pieces
        .iter()
        .map(|piece| {
            let words = piece.split_whitespace().count().max(1);
            if target_wps > 0.0 {
                words as f64 / target_wps * 1000.0
            } else {
                500.0
            }
        })
        .collect();
    let total_est: f64 = estimates.iter().sum();

    let mut segments = Vec::with_capacity(pieces.len());
    let mut cursor = utt_start_ms as f64;
    let scale = if total_est > 0.0 {
        window_ms as f64 / total_est
    } else {
        window_ms as f64 / pieces.len() as f64
    };

    for (piece, est) in pieces.into_iter().zip(estimates) {
        let duration = if total_est > 0.0 { est * scale } else { scale };
        let start = cursor as i64;
        let mut end = (cursor + duration) as i64;
        if end > utt_end_ms {
            end = utt_end_ms;
        }
        segments.push(EnSegment {
            start_ms: start,
            end_ms: end,
            text: piece,
        });
        cursor += duration;
    }

    segments.last_mut().expect("non-empty").end_ms = utt_end_ms;
    segments
}

/// English speech rate over the fixed window.
pub fn english_wps(en_text: &str, window_ms: i64) -> f64 {
    if window_ms <= 0 {
        return 0.0;
    }
    en_text.split_whitespace().count() as f64 / (window_ms as f64 / 1000.0)
}

/// Extension allowance for a TTS window (boundary rule B1): utterances
/// shorter than the minimum window get enough extra time to speak, capped.
pub fn allow_extend_for(budget_ms: i64, tts: &TtsConfig) -> i64 {
    if budget_ms >= tts.min_tts_window_ms {
        return tts.allow_extend_ms;
    }
    tts.allow_extend_ms
        .max((tts.min_tts_window_ms - budget_ms).min(tts.max_extend_cap_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_cover_window_exactly() {
        let segs = resegment_utterance(
            "First part, second part. And a third one!",
            1000,
            7000,
            2.5,
        );
        assert!(segs.len() >= 2);
        assert_eq!(segs.first().unwrap().start_ms, 1000);
        assert_eq!(segs.last().unwrap().end_ms, 7000);
        for pair in segs.windows(2) {
            assert!(pair[0].end_ms <= pair[1].start_ms);
        }
    }

    #[test]
    fn longer_pieces_get_proportionally_more_time() {
        let segs = resegment_utterance("One two three four five six, seven.", 0, 7000, 2.5);
        assert_eq!(segs.len(), 2);
        let first = segs[0].end_ms - segs[0].start_ms;
        let second = segs[1].end_ms - segs[1].start_ms;
        assert!(first > second);
    }

    #[test]
    fn no_punctuation_chunks_by_words() {
        let text = (0..30).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let segs = resegment_utterance(&text, 0, 12_000, 2.5);
        assert!(segs.len() >= 2);
        assert_eq!(segs.last().unwrap().end_ms, 12_000);
    }

    #[test]
    fn punctuation_only_yields_nothing() {
        assert!(resegment_utterance(", !", 0, 1000, 2.5).is_empty());
        assert!(resegment_utterance("", 0, 1000, 2.5).is_empty());
    }

    #[test]
    fn zero_window_yields_nothing() {
        assert!(resegment_utterance("words here", 500, 500, 2.5).is_empty());
    }

    #[test]
    fn en_wps_over_window() {
        assert!((english_wps("one two three four", 2000) - 2.0).abs() < 1e-9);
        assert!(english_wps("x", 0).abs() < f64::EPSILON);
    }

    #[test]
    fn short_window_raises_extension_allowance() {
        let tts = TtsConfig::default();
        // 700 ms budget < 900 min window ⇒ at least 200 ms, but the default
        // 500 ms allowance already covers it.
        assert_eq!(allow_extend_for(700, &tts), 500);

        let mut small_allow = TtsConfig::default();
        small_allow.allow_extend_ms = 100;
        assert_eq!(allow_extend_for(700, &small_allow), 200);
        // Raise is capped.
        assert_eq!(allow_extend_for(50, &small_allow), 800);
        // Long utterances keep the default.
        assert_eq!(allow_extend_for(2000, &small_allow), 100);
    }
}
