//! Time budgets for translated utterances.
//!
//! The window an utterance may occupy when spoken is its source window
//! scaled by a speech-rate coefficient: fast source speech gets no slack,
//! slow speech gets up to 20%.

/// Speech-rate tiers (tokens per second).
pub const SPEECH_RATE_FAST_THRESHOLD: f64 = 5.5;
pub const SPEECH_RATE_NORMAL_THRESHOLD: f64 = 4.0;

pub const K_FAST: f64 = 1.00;
pub const K_NORMAL: f64 = 1.15;
pub const K_SLOW: f64 = 1.20;

/// English characters per second used to estimate spoken duration.
pub const EN_CPS: f64 = 14.0;

/// Pick the budget coefficient for a source speech rate.
pub fn pick_k(zh_tps: f64) -> f64 {
    if zh_tps >= SPEECH_RATE_FAST_THRESHOLD {
        K_FAST
    } else if zh_tps >= SPEECH_RATE_NORMAL_THRESHOLD {
        K_NORMAL
    } else {
        K_SLOW
    }
}

/// Estimated spoken duration of an English text in milliseconds.
/// Only letters and digits count; punctuation and spaces are free.
pub fn estimate_en_duration_ms(text: &str) -> f64 {
    let chars = text.chars().filter(char::is_ascii_alphanumeric).count();
    if chars == 0 {
        return 0.0;
    }
    chars as f64 / EN_CPS * 1000.0
}

/// The character allowance communicated to the model when compressing.
pub fn max_chars_for_budget(budget_ms: f64) -> usize {
    ((budget_ms / 1000.0) * EN_CPS).floor().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn k_ladder_matches_tiers() {
        assert!((pick_k(6.0) - 1.00).abs() < f64::EPSILON);
        assert!((pick_k(5.5) - 1.00).abs() < f64::EPSILON);
        assert!((pick_k(4.5) - 1.15).abs() < f64::EPSILON);
        assert!((pick_k(4.0) - 1.15).abs() < f64::EPSILON);
        assert!((pick_k(3.9) - 1.20).abs() < f64::EPSILON);
        assert!((pick_k(0.0) - 1.20).abs() < f64::EPSILON);
    }

    #[test]
    fn estimate_counts_alphanumerics_only() {
        // "Get out!" → 6 letters → 6/14 s
        let est = estimate_en_duration_ms("Get out!");
        assert!((est - 6.0 / 14.0 * 1000.0).abs() < 1e-9);
        assert!(estimate_en_duration_ms("?!, ").abs() < f64::EPSILON);
    }

    #[test]
    fn max_chars_floor() {
        assert_eq!(max_chars_for_budget(1000.0), 14);
        assert_eq!(max_chars_for_budget(2500.0), 35);
        assert_eq!(max_chars_for_budget(0.0), 0);
    }
}
