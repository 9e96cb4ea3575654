//! SRT rendering and parsing.
//!
//! The SRT files are pure projections of cue lists; parsing a rendered file
//! yields the same times and texts that went in.

use std::fmt::Write as _;

/// One SRT entry, language-agnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtCue {
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
}

/// `HH:MM:SS,mmm`
pub fn srt_timestamp(ms: i64) -> String {
    let total = ms.max(0);
    let hh = total / 3_600_000;
    let mm = (total % 3_600_000) / 60_000;
    let ss = (total % 60_000) / 1_000;
    let millis = total % 1_000;
    format!("{hh:02}:{mm:02}:{ss:02},{millis:03}")
}

fn parse_timestamp(s: &str) -> Option<i64> {
    let (time, millis) = s.trim().split_once(',')?;
    let mut parts = time.split(':');
    let hh: i64 = parts.next()?.parse().ok()?;
    let mm: i64 = parts.next()?.parse().ok()?;
    let ss: i64 = parts.next()?.parse().ok()?;
    let ms: i64 = millis.trim().parse().ok()?;
    Some(hh * 3_600_000 + mm * 60_000 + ss * 1_000 + ms)
}

/// Render cues in order; empty texts are skipped and indices stay dense.
pub fn render_srt(cues: &[SrtCue]) -> String {
    let mut out = String::new();
    let mut index = 1usize;
    for cue in cues {
        let text = cue.text.trim();
        if text.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{index}");
        let _ = writeln!(
            out,
            "{} --> {}",
            srt_timestamp(cue.start_ms),
            srt_timestamp(cue.end_ms)
        );
        let _ = writeln!(out, "{text}");
        let _ = writeln!(out);
        index += 1;
    }
    out
}

/// Parse SRT content back into cues. Multi-line texts collapse to single
/// lines joined by spaces; blank entries are dropped.
pub fn parse_srt(content: &str) -> Vec<SrtCue> {
    let mut cues = Vec::new();
    for block in content.split("\n\n") {
        let mut lines = block.lines().filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else { continue };
        // The numeric index line is optional garbage for us; the timing line
        // is the anchor.
        let timing = if first.contains("-->") {
            first
        } else {
            match lines.next() {
                Some(line) if line.contains("-->") => line,
                _ => continue,
            }
        };
        let Some((start_raw, end_raw)) = timing.split_once("-->") else {
            continue;
        };
        let (Some(start_ms), Some(end_ms)) = (parse_timestamp(start_raw), parse_timestamp(end_raw))
        else {
            continue;
        };
        let text = lines.collect::<Vec<_>>().join(" ").trim().to_string();
        if text.is_empty() {
            continue;
        }
        cues.push(SrtCue {
            start_ms,
            end_ms,
            text,
        });
    }
    cues
}
