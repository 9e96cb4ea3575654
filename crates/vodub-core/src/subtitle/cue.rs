//! Cue segmentation inside a single utterance.
//!
//! Axis-first: any perceptible pause (word gap at `soft_gap_ms`) is a cut,
//! and cuts are irreversible — this stage never merges. Within an axis
//! piece, hard punctuation forces a cut; soft punctuation is used when a
//! piece exceeds `cue_max_chars`; a plain character-count cut is the last
//! resort. Cues cover the utterance exactly and never overlap.

use crate::schema::{SourceText, SubtitleCue};
use crate::settings::SubConfig;

use super::normalize::NormalizedUtterance;

const HARD_PUNC: [char; 4] = ['。', '！', '？', '；'];
const SOFT_PUNC: [char; 1] = ['，'];

fn trailing_char(text: &str) -> Option<char> {
    text.chars().next_back()
}

fn ends_with_any(text: &str, set: &[char]) -> bool {
    trailing_char(text).is_some_and(|c| set.contains(&c))
}

/// Count display characters, punctuation excluded.
fn plain_char_count(text: &str) -> usize {
    text.chars()
        .filter(|c| !c.is_whitespace() && !HARD_PUNC.contains(c) && !SOFT_PUNC.contains(c))
        .count()
}

#[derive(Debug, Clone)]
struct Piece {
    words: Vec<crate::schema::Word>,
}

impl Piece {
    fn start_ms(&self) -> i64 {
        self.words.first().map_or(0, |w| w.start_ms)
    }

    fn end_ms(&self) -> i64 {
        self.words.last().map_or(0, |w| w.end_ms)
    }

    fn text(&self) -> String {
        self.words.iter().map(|w| w.text.as_str()).collect()
    }
}

/// Split an axis piece at punctuation/length boundaries.
fn split_bounded(words: &[crate::schema::Word], config: &SubConfig) -> Vec<Piece> {
    let mut pieces: Vec<Piece> = Vec::new();
    let mut current: Vec<crate::schema::Word> = Vec::new();
    let mut last_soft: Option<usize> = None;

    for word in words {
        current.push(word.clone());

        if ends_with_any(&word.text, &HARD_PUNC) {
            pieces.push(Piece {
                words: std::mem::take(&mut current),
            });
            last_soft = None;
            continue;
        }
        if ends_with_any(&word.text, &SOFT_PUNC) {
            last_soft = Some(current.len() - 1);
        }

        let chars: usize = current.iter().map(|w| plain_char_count(&w.text)).sum();
        let duration = current.last().map_or(0, |w| w.end_ms)
            - current.first().map_or(0, |w| w.start_ms);

        if chars > config.cue_max_chars || duration > config.cue_max_dur_ms {
            if let Some(idx) = last_soft.filter(|idx| idx + 1 < current.len()) {
                let rest = current.split_off(idx + 1);
                pieces.push(Piece {
                    words: std::mem::replace(&mut current, rest),
                });
            } else if current.len() > 1 {
                let carried = current.pop().expect("len > 1");
                pieces.push(Piece {
                    words: std::mem::replace(&mut current, vec![carried]),
                });
            } else {
                // A single word over the limit stands alone.
                pieces.push(Piece {
                    words: std::mem::take(&mut current),
                });
            }
            last_soft = None;
        }
    }

    if !current.is_empty() {
        pieces.push(Piece { words: current });
    }
    pieces
}

/// Produce the cues of one utterance. The returned cues satisfy:
/// `cues[0].start_ms == utt.start_ms`, `cues[last].end_ms == utt.end_ms`,
/// and `cues[i].end_ms <= cues[i+1].start_ms`.
pub fn segment_cues(utt: &NormalizedUtterance, config: &SubConfig, lang: &str) -> Vec<SubtitleCue> {
    if utt.words.is_empty() {
        return Vec::new();
    }

    // Axis cut: every word gap at the threshold is a boundary.
    let mut axis_groups: Vec<Vec<crate::schema::Word>> = Vec::new();
    let mut current = vec![utt.words[0].clone()];
    for pair in utt.words.windows(2) {
        let gap = pair[1].start_ms - pair[0].end_ms;
        if gap >= config.soft_gap_ms {
            axis_groups.push(std::mem::take(&mut current));
        }
        current.push(pair[1].clone());
    }
    if !current.is_empty() {
        axis_groups.push(current);
    }

    let mut cues: Vec<SubtitleCue> = Vec::new();
    for group in &axis_groups {
        for piece in split_bounded(group, config) {
            let text = piece.text();
            if text.trim().is_empty() {
                continue;
            }
            cues.push(SubtitleCue {
                start_ms: piece.start_ms(),
                end_ms: piece.end_ms(),
                source: SourceText {
                    lang: lang.to_string(),
                    text,
                },
            });
        }
    }

    if cues.is_empty() {
        return cues;
    }

    // Coverage invariants: the cue axis equals the utterance window.
    cues.first_mut().expect("non-empty").start_ms = utt.start_ms;
    cues.last_mut().expect("non-empty").end_ms = utt.end_ms;
    for i in 1..cues.len() {
        if cues[i].start_ms < cues[i - 1].end_ms {
            cues[i].start_ms = cues[i - 1].end_ms;
        }
        if cues[i].end_ms < cues[i].start_ms {
            cues[i].end_ms = cues[i].start_ms;
        }
    }
    cues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Word;

    fn word(start: i64, end: i64, text: &str) -> Word {
        Word {
            start_ms: start,
            end_ms: end,
            text: text.to_string(),
            speaker: "1".to_string(),
        }
    }

    fn utt(words: Vec<Word>) -> NormalizedUtterance {
        let start = words.first().map_or(0, |w| w.start_ms);
        let end = words.last().map_or(0, |w| w.end_ms);
        NormalizedUtterance {
            start_ms: start,
            end_ms: end,
            words,
            speaker: "1".to_string(),
            gender: String::new(),
            gap_after_ms: 0,
        }
    }

    fn config() -> SubConfig {
        SubConfig::default()
    }

    #[test]
    fn hard_punctuation_forces_a_cut() {
        let u = utt(vec![
            word(0, 300, "好。"),
            word(320, 600, "走"),
            word(620, 900, "吧"),
        ]);
        let cues = segment_cues(&u, &config(), "zh");
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].source.text, "好。");
        assert_eq!(cues[1].source.text, "走吧");
    }

    #[test]
    fn axis_gap_cuts_before_anything_else() {
        let u = utt(vec![
            word(0, 300, "先"),
            // 450 ms pause ≥ 400 axis threshold
            word(750, 1000, "后"),
        ]);
        let cues = segment_cues(&u, &config(), "zh");
        assert_eq!(cues.len(), 2);
    }

    #[test]
    fn soft_punctuation_used_when_over_max_chars() {
        let mut words = Vec::new();
        let mut t = 0i64;
        for i in 0..20 {
            let text = if i == 9 { "字，" } else { "字" };
            words.push(word(t, t + 100, text));
            t += 110;
        }
        let cues = segment_cues(&utt(words), &config(), "zh");
        assert!(cues.len() >= 2);
        assert!(cues[0].source.text.ends_with('，'));
    }

    #[test]
    fn character_cut_when_no_punctuation_exists() {
        let mut words = Vec::new();
        let mut t = 0i64;
        for _ in 0..40 {
            words.push(word(t, t + 60, "字"));
            t += 65;
        }
        let cues = segment_cues(&utt(words), &config(), "zh");
        assert!(cues.len() >= 2);
        for cue in &cues {
            assert!(cue.source.text.chars().count() <= 19);
        }
    }

    #[test]
    fn cues_cover_utterance_exactly_and_do_not_overlap() {
        let mut words = Vec::new();
        let mut t = 100i64;
        for i in 0..30 {
            let text = if i % 8 == 7 { "句。" } else { "词" };
            words.push(word(t, t + 150, text));
            t += 160 + if i % 5 == 4 { 420 } else { 0 };
        }
        let u = utt(words);
        let cues = segment_cues(&u, &config(), "zh");
        assert_eq!(cues.first().unwrap().start_ms, u.start_ms);
        assert_eq!(cues.last().unwrap().end_ms, u.end_ms);
        for pair in cues.windows(2) {
            assert!(pair[0].end_ms <= pair[1].start_ms);
        }
    }

    #[test]
    fn duration_ceiling_triggers_resplit() {
        // 4 s of slow speech, no punctuation: must split under 2.8 s.
        let mut words = Vec::new();
        let mut t = 0i64;
        for _ in 0..10 {
            words.push(word(t, t + 380, "慢"));
            t += 400;
        }
        let cues = segment_cues(&utt(words), &config(), "zh");
        assert!(cues.len() >= 2);
    }
}
