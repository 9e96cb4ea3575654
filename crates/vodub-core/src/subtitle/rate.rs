//! Source-language speech rate: tokens per second over the union of word
//! intervals.

use crate::schema::Word;

/// `zh_tps = valid token count / seconds covered by the union of word
/// intervals`. Tokens with negative times or blank text are discarded;
/// overlapping intervals are merged before summing. Zero union ⇒ 0.0.
pub fn speech_rate_tps(words: &[Word]) -> f64 {
    let valid: Vec<&Word> = words
        .iter()
        .filter(|w| w.start_ms >= 0 && w.end_ms >= 0 && !w.text.trim().is_empty())
        .collect();
    if valid.is_empty() {
        return 0.0;
    }

    let mut intervals: Vec<(i64, i64)> = valid.iter().map(|w| (w.start_ms, w.end_ms)).collect();
    intervals.sort_unstable();

    let mut merged: Vec<(i64, i64)> = Vec::with_capacity(intervals.len());
    for (start, end) in intervals {
        match merged.last_mut() {
            Some((_, last_end)) if start <= *last_end => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }

    let total_ms: i64 = merged
        .iter()
        .map(|(start, end)| (end - start).max(0))
        .sum();
    if total_ms <= 0 {
        return 0.0;
    }

    valid.len() as f64 / (total_ms as f64 / 1000.0)
}
