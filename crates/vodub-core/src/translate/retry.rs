//! Retry-with-tightened-compression.
//!
//! Attempt 0 uses the normal prompt; each further attempt asks the model to
//! shorten to the budgeted character allowance. The loop stops as soon as
//! the estimated English duration fits the budget, or retries run out — in
//! which case the last candidate is returned anyway and the caller decides.

use tracing::warn;

use crate::ports::{PortError, Translator};

use super::budget::estimate_en_duration_ms;
use super::prompt::{PromptContext, append_glossary_violation, build_utterance_prompt};

pub struct RetryOutcome {
    pub text: String,
    pub retries: u32,
}

/// Translate one utterance under a time budget.
///
/// When `violations` is non-empty the attempt re-uses the level-0 prompt
/// with the missed glossary mappings appended (the stricter-retry path).
pub async fn translate_utterance_with_retry(
    translator: &dyn Translator,
    zh_text: &str,
    budget_ms: f64,
    max_retries: u32,
    ctx: &PromptContext,
    violations: &[String],
) -> Result<RetryOutcome, PortError> {
    let attempts = max_retries.max(1);
    let mut last_text = String::new();

    for retry in 0..attempts {
        let prompt = if violations.is_empty() {
            build_utterance_prompt(zh_text, budget_ms, retry, ctx)
        } else {
            let base = build_utterance_prompt(zh_text, budget_ms, 0, ctx);
            append_glossary_violation(&base, violations)
        };

        let text = translator.translate(&prompt).await?;
        if text.is_empty() {
            continue;
        }
        last_text = text;

        let en_est_ms = estimate_en_duration_ms(&last_text);
        if en_est_ms <= budget_ms {
            return Ok(RetryOutcome {
                text: last_text,
                retries: retry,
            });
        }
        if retry + 1 < attempts {
            warn!(
                en_est_ms = en_est_ms as i64,
                budget_ms = budget_ms as i64,
                attempt = retry + 2,
                max = attempts,
                "translation too long, retrying with compression"
            );
        }
    }

    Ok(RetryOutcome {
        text: last_text,
        retries: attempts - 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedTranslator {
        responses: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedTranslator {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().rev().map(|s| (*s).to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Translator for ScriptedTranslator {
        async fn translate(&self, prompt: &str) -> Result<String, PortError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self
                .responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn stops_when_estimate_fits() {
        let translator = ScriptedTranslator::new(&["Short enough."]);
        let out = translate_utterance_with_retry(
            &translator,
            "短",
            2000.0,
            3,
            &PromptContext::default(),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(out.text, "Short enough.");
        assert_eq!(out.retries, 0);
    }

    #[tokio::test]
    async fn compresses_until_it_fits() {
        // ~90 letters ≈ 6.4 s; budget is 1 s, so the first answer is over.
        let long = "a".repeat(90);
        let translator = ScriptedTranslator::new(&[&long, "ok"]);
        let out = translate_utterance_with_retry(
            &translator,
            "长",
            1000.0,
            3,
            &PromptContext::default(),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(out.text, "ok");
        assert_eq!(out.retries, 1);
        let prompts = translator.prompts.lock().unwrap();
        assert!(prompts[1].contains("Shorten"));
    }

    #[tokio::test]
    async fn returns_last_candidate_when_retries_exhaust() {
        let long = "b".repeat(90);
        let translator = ScriptedTranslator::new(&[&long, &long, &long]);
        let out = translate_utterance_with_retry(
            &translator,
            "长",
            1000.0,
            3,
            &PromptContext::default(),
            &[],
        )
        .await
        .unwrap();
        assert_eq!(out.text, long);
        assert_eq!(out.retries, 2);
    }

    #[tokio::test]
    async fn violation_retry_appends_missed_mappings() {
        let translator = ScriptedTranslator::new(&["all in!"]);
        let violations = vec!["梭哈 -> all in".to_string()];
        let out = translate_utterance_with_retry(
            &translator,
            "梭哈",
            2000.0,
            1,
            &PromptContext::default(),
            &violations,
        )
        .await
        .unwrap();
        assert_eq!(out.text, "all in!");
        let prompts = translator.prompts.lock().unwrap();
        assert!(prompts[0].contains("violated the glossary"));
    }
}
