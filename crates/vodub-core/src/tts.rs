//! TTS planning: cache identity and the fit-or-fail decision.
//!
//! Both are pure so the accounting invariants can be tested without audio:
//! exactly one of pad / rate-adjust / extend / fail applies to every
//! segment, and two requests that sound the same share one cache entry.

use serde_json::{Value, json};

use crate::fingerprint::{canonicalize_json, hash_string};

/// Everything that shapes the synthesized audio. Two requests with equal
/// fields produce byte-equal audio and therefore share a cache slot.
#[derive(Debug, Clone)]
pub struct CacheKeyInput<'a> {
    pub engine: &'a str,
    pub engine_version: &'a str,
    pub voice: &'a str,
    pub lang: &'a str,
    pub format: &'a str,
    pub sample_rate: u32,
    pub channels: u16,
    pub prosody: &'a Value,
    pub text: &'a str,
}

/// Whitespace-normalized text: synthesis ignores layout differences.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Content-addressed cache key: bare hex SHA-256 over the canonical JSON of
/// the request identity.
pub fn cache_key(input: &CacheKeyInput<'_>) -> String {
    let identity = json!({
        "engine": input.engine,
        "engine_ver": input.engine_version,
        "voice": input.voice,
        "lang": input.lang,
        "format": input.format,
        "sample_rate": input.sample_rate,
        "channels": input.channels,
        "prosody": input.prosody,
        "normalized_text": normalize_text(input.text),
    });
    hash_string(&canonicalize_json(&identity))
        .trim_start_matches("sha256:")
        .to_string()
}

/// Fit policy for one utterance, from the dubbing manifest.
#[derive(Debug, Clone, Copy)]
pub struct FitPolicy {
    pub max_rate: f64,
    pub allow_extend_ms: i64,
}

/// The decided treatment for a synthesized clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FitPlan {
    /// Fits at natural tempo; pad with silence to exactly the budget.
    Pad { final_ms: i64 },
    /// Tempo-adjust to the budget, then pad to exactly the budget.
    RateAdjust { rate: f64, final_ms: i64 },
    /// Extend minimally into the following gap, tempo-adjusted.
    Extend { rate: f64, final_ms: i64 },
    /// Cannot fit even with maximum rate and extension.
    Fail { required_rate: f64, excess_ms: i64 },
}

/// Decide how a trimmed clip fits its budget.
///
/// The extension branch grants the smallest Δ that brings the required rate
/// under `max_rate`, so `final_ms = budget_ms + Δ` with `0 < Δ ≤
/// allow_extend_ms` and the applied rate stays in `(1.0, max_rate]`.
pub fn plan_fit(trimmed_ms: i64, budget_ms: i64, policy: FitPolicy) -> FitPlan {
    if trimmed_ms <= budget_ms {
        return FitPlan::Pad { final_ms: budget_ms };
    }

    let rate = trimmed_ms as f64 / budget_ms as f64;
    if rate <= policy.max_rate {
        return FitPlan::RateAdjust {
            rate,
            final_ms: budget_ms,
        };
    }

    if policy.allow_extend_ms > 0 {
        let min_window = (trimmed_ms as f64 / policy.max_rate).ceil() as i64;
        let delta = min_window - budget_ms;
        if delta <= policy.allow_extend_ms {
            let final_ms = budget_ms + delta;
            return FitPlan::Extend {
                rate: trimmed_ms as f64 / final_ms as f64,
                final_ms,
            };
        }
    }

    let max_window = budget_ms + policy.allow_extend_ms.max(0);
    FitPlan::Fail {
        required_rate: trimmed_ms as f64 / max_window as f64,
        excess_ms: trimmed_ms - max_window,
    }
}
