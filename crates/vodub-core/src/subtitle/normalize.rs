//! Utterance normalization: rebuild visually-usable utterances from word
//! timestamps and silences.
//!
//! The recognizer's own utterance boundaries are model-oriented, not
//! viewing-oriented, and are never trusted. Boundaries here come from
//! silence gaps and speaker changes, then get squeezed through min/max
//! duration constraints.

use std::collections::BTreeMap;

use crate::schema::Word;
use crate::settings::SubConfig;

/// A normalized utterance: the true SSOT unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedUtterance {
    /// Voicing start.
    pub start_ms: i64,
    /// Voicing end, excluding trailing silence when `keep_gap_as_field`.
    pub end_ms: i64,
    pub words: Vec<Word>,
    pub speaker: String,
    pub gender: String,
    /// Silence until the next utterance.
    pub gap_after_ms: i64,
}

impl NormalizedUtterance {
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    pub fn text(&self) -> String {
        self.words.iter().map(|w| w.text.as_str()).collect()
    }
}

/// Counters surfaced in the phase metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizationMetrics {
    pub initial_chunks: usize,
    pub merged_chunks: usize,
    pub hard_splits: usize,
}

type Chunk = Vec<Word>;

fn chunk_duration(chunk: &[Word]) -> i64 {
    match (chunk.first(), chunk.last()) {
        (Some(first), Some(last)) => last.end_ms - first.start_ms,
        _ => 0,
    }
}

fn chunk_speaker(chunk: &[Word]) -> &str {
    chunk
        .iter()
        .find(|w| !w.speaker.is_empty())
        .map_or("", |w| w.speaker.as_str())
}

fn gap_between(prev: &[Word], next: &[Word]) -> i64 {
    match (prev.last(), next.first()) {
        (Some(p), Some(n)) => n.start_ms - p.end_ms,
        _ => 0,
    }
}

fn can_merge(prev: &[Word], next: &[Word], max_merge_gap_ms: i64) -> bool {
    if prev.is_empty() || next.is_empty() {
        return false;
    }
    if chunk_speaker(prev) != chunk_speaker(next) {
        return false;
    }
    gap_between(prev, next) <= max_merge_gap_ms
}

/// Start a new chunk on a silence ≥ threshold or on a speaker change
/// between two non-empty speakers.
fn split_by_silence(words: &[Word], threshold_ms: i64) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let Some(first) = words.first() else {
        return chunks;
    };
    let mut current: Chunk = vec![first.clone()];

    for pair in words.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        let gap = curr.start_ms - prev.end_ms;
        let speaker_changed = !curr.speaker.is_empty()
            && !prev.speaker.is_empty()
            && curr.speaker != prev.speaker;

        if gap >= threshold_ms || speaker_changed {
            chunks.push(std::mem::take(&mut current));
            current.push(curr.clone());
        } else {
            current.push(curr.clone());
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Merge too-short chunks. Three conditions, all required: the chunk is
/// shorter than the minimum, the gap to the neighbour is within
/// `max_merge_gap_ms`, and both carry the same speaker. Merges prefer the
/// earlier neighbour; residual violations at both ends get swept afterwards.
fn merge_short_chunks(
    chunks: Vec<Chunk>,
    min_duration_ms: i64,
    max_merge_gap_ms: i64,
) -> (Vec<Chunk>, usize) {
    let mut merged = 0usize;
    let mut result: Vec<Chunk> = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let duration = chunk_duration(&chunk);
        if duration >= min_duration_ms {
            result.push(chunk);
        } else if result
            .last()
            .is_some_and(|prev| can_merge(prev, &chunk, max_merge_gap_ms))
        {
            result.last_mut().expect("checked").extend(chunk);
            merged += 1;
        } else {
            result.push(chunk);
        }
    }

    // Residual sweep: last chunk.
    while result.len() > 1 {
        let last_too_short = chunk_duration(result.last().expect("non-empty")) < min_duration_ms;
        let mergeable = last_too_short
            && can_merge(
                &result[result.len() - 2],
                result.last().expect("non-empty"),
                max_merge_gap_ms,
            );
        if !mergeable {
            break;
        }
        let tail = result.pop().expect("non-empty");
        result.last_mut().expect("non-empty").extend(tail);
        merged += 1;
    }

    // Residual sweep: first chunk.
    while result.len() > 1 {
        let first_too_short = chunk_duration(&result[0]) < min_duration_ms;
        let mergeable = first_too_short && can_merge(&result[0], &result[1], max_merge_gap_ms);
        if !mergeable {
            break;
        }
        let mut head = result.remove(0);
        head.extend(std::mem::take(&mut result[0]));
        result[0] = head;
        merged += 1;
    }

    (result, merged)
}

/// Find the index of the largest internal word gap; the hard-split point of
/// last resort.
fn best_split_index(words: &[Word]) -> usize {
    if words.len() <= 1 {
        return 0;
    }
    let mut max_gap = -1i64;
    let mut best = words.len() / 2;
    for i in 1..words.len() {
        let gap = words[i].start_ms - words[i - 1].end_ms;
        if gap > max_gap {
            max_gap = gap;
            best = i;
        }
    }
    best
}

fn hard_split_chunk(chunk: Chunk, max_duration_ms: i64) -> Vec<Chunk> {
    let mut result = Vec::new();
    let mut current: Chunk = Vec::new();
    let mut current_start = chunk.first().map_or(0, |w| w.start_ms);

    for word in chunk {
        let word_end = word.end_ms;
        current.push(word);
        if word_end - current_start >= max_duration_ms && current.len() > 1 {
            let split_at = best_split_index(&current);
            if split_at > 0 {
                let rest = current.split_off(split_at);
                result.push(std::mem::replace(&mut current, rest));
                current_start = current.first().map_or(word_end, |w| w.start_ms);
            }
        }
    }
    if !current.is_empty() {
        result.push(current);
    }
    result
}

/// Re-split chunks above the maximum using the secondary silence threshold;
/// anything still too long gets a hard split at the largest internal gap.
fn split_long_chunks(
    chunks: Vec<Chunk>,
    max_duration_ms: i64,
    secondary_threshold_ms: i64,
) -> (Vec<Chunk>, usize) {
    let mut hard_splits = 0usize;
    let mut result = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        if chunk_duration(&chunk) <= max_duration_ms {
            result.push(chunk);
            continue;
        }
        for sub in split_by_silence(&chunk, secondary_threshold_ms) {
            if chunk_duration(&sub) <= max_duration_ms {
                result.push(sub);
            } else {
                let pieces = hard_split_chunk(sub, max_duration_ms);
                hard_splits += pieces.len().saturating_sub(1);
                result.extend(pieces);
            }
        }
    }
    (result, hard_splits)
}

/// Rebuild utterance boundaries from word timestamps. Deterministic.
pub fn normalize_utterances(
    words: &[Word],
    config: &SubConfig,
    gender_map: &BTreeMap<String, String>,
) -> (Vec<NormalizedUtterance>, NormalizationMetrics) {
    if words.is_empty() {
        return (Vec::new(), NormalizationMetrics::default());
    }

    let mut sorted = words.to_vec();
    sorted.sort_by_key(|w| (w.start_ms, w.end_ms));

    let raw_chunks = split_by_silence(&sorted, config.silence_split_threshold_ms);
    let initial_chunks = raw_chunks.len();

    let (merged, merged_count) = merge_short_chunks(
        raw_chunks,
        config.min_utterance_duration_ms,
        config.max_merge_gap_ms,
    );

    let secondary = config.silence_split_threshold_ms / 2;
    let (final_chunks, hard_splits) =
        split_long_chunks(merged, config.max_utterance_duration_ms, secondary);

    let mut utterances = Vec::with_capacity(final_chunks.len());
    for (i, chunk) in final_chunks.iter().enumerate() {
        if chunk.is_empty() {
            continue;
        }
        let speaker = chunk_speaker(chunk).to_string();
        let start_ms = chunk[0].start_ms;
        let mut end_ms = chunk.last().expect("non-empty").end_ms;

        let mut gap_after_ms = final_chunks
            .get(i + 1)
            .and_then(|next| next.first())
            .map_or(0, |next_word| next_word.start_ms - end_ms);

        if !config.keep_gap_as_field {
            let folded = gap_after_ms.min(config.trailing_silence_cap_ms);
            end_ms += folded;
            gap_after_ms = (gap_after_ms - folded).max(0);
        }

        utterances.push(NormalizedUtterance {
            start_ms,
            end_ms,
            words: chunk.clone(),
            gender: gender_map.get(&speaker).cloned().unwrap_or_default(),
            speaker,
            gap_after_ms,
        });
    }

    (
        utterances,
        NormalizationMetrics {
            initial_chunks,
            merged_chunks: merged_count,
            hard_splits,
        },
    )
}
