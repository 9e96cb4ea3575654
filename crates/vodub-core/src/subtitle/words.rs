//! Word extraction from the raw ASR response.
//!
//! The recognizer's word stream carries no punctuation; the utterance-level
//! text does. Punctuation is redistributed onto the last word it follows
//! before any segmentation runs — cue cuts are driven by punctuation at the
//! word level, so this step is a precondition for everything downstream.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::schema::Word;

/// Punctuation/whitespace characters ignored while matching and attached to
/// the preceding word afterwards.
const PUNC_CHARS: &str = "，。！？、；：,.!?;:\"'（）()【】[]《》<>…—- ";

fn is_punc(ch: char) -> bool {
    PUNC_CHARS.contains(ch) || ch.is_whitespace()
}

/// Append the punctuation run following each matched word in the utterance
/// text onto that word's text. Unmatched words are returned unchanged.
pub fn attach_trailing_punctuation(utt_text: &str, word_texts: &[String]) -> Vec<String> {
    let chars: Vec<char> = utt_text.chars().collect();
    let mut result: Vec<String> = word_texts.to_vec();
    let mut utt_pos = 0usize;

    for (idx, wt) in word_texts.iter().enumerate() {
        if wt.is_empty() {
            continue;
        }
        let word_chars: Vec<char> = wt.chars().collect();
        let first = word_chars[0];

        let mut found_at = None;
        let mut scan = utt_pos;
        while scan < chars.len() {
            if chars[scan] == first
                && scan + word_chars.len() <= chars.len()
                && chars[scan..scan + word_chars.len()] == word_chars[..]
            {
                found_at = Some(scan);
                break;
            }
            scan += 1;
        }
        let Some(start) = found_at else { continue };
        utt_pos = start + word_chars.len();

        let mut trailing = String::new();
        while utt_pos < chars.len() && is_punc(chars[utt_pos]) {
            trailing.push(chars[utt_pos]);
            utt_pos += 1;
        }
        if !trailing.is_empty() {
            result[idx] = format!("{wt}{trailing}");
        }
    }

    result
}

fn as_i64(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or_else(|| {
            n.as_f64().map_or(0, |f| f as i64)
        }),
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_str(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Raw utterances live at `result.utterances[]` in the provider response.
pub fn raw_utterances(raw: &Value) -> Vec<&Value> {
    raw.get("result")
        .and_then(|r| r.get("utterances"))
        .and_then(Value::as_array)
        .map(|items| items.iter().collect())
        .unwrap_or_default()
}

/// The full episode transcript the provider assembled, used as translation
/// context only.
pub fn episode_text(raw: &Value) -> String {
    raw.get("result")
        .and_then(|r| r.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Extract every word with attached punctuation, plus a speaker → gender
/// map from the raw utterance metadata. The recognizer's own utterance
/// boundaries are intentionally discarded; only word timestamps survive.
///
/// Words with empty text are dropped. Output is globally sorted by
/// `(start_ms, end_ms)`.
pub fn extract_words(raw: &Value) -> (Vec<Word>, BTreeMap<String, String>) {
    let mut all_words = Vec::new();
    let mut gender_map = BTreeMap::new();

    for raw_utt in raw_utterances(raw) {
        let additions = raw_utt.get("additions");
        let default_speaker = {
            let s = as_str(additions.and_then(|a| a.get("speaker")));
            if s.is_empty() { "0".to_string() } else { s }
        };
        let gender = as_str(additions.and_then(|a| a.get("gender")));
        if !default_speaker.is_empty() && !gender.is_empty() {
            gender_map
                .entry(default_speaker.clone())
                .or_insert(gender);
        }

        let Some(words_list) = raw_utt.get("words").and_then(Value::as_array) else {
            continue;
        };
        if words_list.is_empty() {
            continue;
        }

        let utt_text = as_str(raw_utt.get("text"));
        let word_texts: Vec<String> = words_list
            .iter()
            .map(|w| as_str(w.get("text")))
            .collect();
        let enriched = attach_trailing_punctuation(&utt_text, &word_texts);

        for (i, w) in words_list.iter().enumerate() {
            let text = enriched
                .get(i)
                .cloned()
                .unwrap_or_else(|| as_str(w.get("text")));
            if text.is_empty() {
                continue;
            }
            let start_ms = as_i64(w.get("start_time"));
            let end_ms = {
                let end = as_i64(w.get("end_time"));
                if end == 0 && w.get("end_time").is_none() { start_ms } else { end }
            };
            let speaker = {
                let s = as_str(w.get("additions").and_then(|a| a.get("speaker")));
                if s.is_empty() { default_speaker.clone() } else { s }
            };
            all_words.push(Word {
                start_ms,
                end_ms,
                text,
                speaker,
            });
        }
    }

    all_words.sort_by_key(|w| (w.start_ms, w.end_ms));
    (all_words, gender_map)
}
