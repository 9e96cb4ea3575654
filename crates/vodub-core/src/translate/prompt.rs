//! Prompt construction for the translation model.
//!
//! Attempt 0 gets the full system prompt with context, glossary and length
//! constraints; retry attempts switch to explicit compression prompts that
//! name the character allowance.

use super::budget::max_chars_for_budget;

/// Everything an utterance prompt may carry besides the text itself.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// Whole-episode dialogue, already truncated by the caller.
    pub episode_context: String,
    /// Optional plot synopsis.
    pub plot_overview: String,
    /// Glossary lines (`source -> english`) matched against this utterance.
    pub glossary: String,
}

/// A naming prompt for one unknown personal name; the answer becomes the
/// first-write-wins dictionary entry.
pub fn build_naming_prompt(src_name: &str) -> String {
    format!(
        "Give the standard English rendering of the Chinese personal name \"{src_name}\" \
for subtitles. Use pinyin or a surname-based form. Do NOT invent a Western name and \
do NOT translate the meaning of the name. Answer with the name only, nothing else."
    )
}

/// Build the translation prompt for one utterance.
///
/// `retry_level` 0 is the normal prompt; 1 asks to shorten; 2 and above
/// allow dropping filler to fit.
pub fn build_utterance_prompt(
    zh_text: &str,
    budget_ms: f64,
    retry_level: u32,
    ctx: &PromptContext,
) -> String {
    let budget_sec = budget_ms / 1000.0;
    let max_chars = max_chars_for_budget(budget_ms);

    if retry_level == 0 {
        let mut system = vec![
            "You are a professional subtitle translator for a drama series.".to_string(),
            String::new(),
            "Rules:".to_string(),
            "1) The input may contain <<NAME_i:...>> which is a personal name in the source language.".to_string(),
            "   Translate the name into English (pinyin or surname-based). Do NOT invent Western names.".to_string(),
            "   Do NOT translate name meanings.".to_string(),
            "2) Translate naturally. Do NOT translate word by word.".to_string(),
            "3) Output must be clean English for subtitles:".to_string(),
            "   - Remove all <<NAME_i:...>> placeholders (render the translated name).".to_string(),
            "   - Remove <sep> separators (use punctuation/pauses naturally).".to_string(),
            "Return ONLY the final English text.".to_string(),
        ];
        if !ctx.glossary.is_empty() {
            system.push(String::new());
            system.push("Glossary (MUST follow EXACTLY if these phrases appear):".to_string());
            system.push(ctx.glossary.clone());
        }

        let mut user = Vec::new();
        if !ctx.plot_overview.is_empty() {
            user.push(format!("Plot overview:\n{}\n", ctx.plot_overview));
        }
        if !ctx.episode_context.is_empty() {
            user.push(format!("Episode dialogue context:\n{}\n", ctx.episode_context));
        }
        user.push("Constraints:".to_string());
        user.push(format!(
            "- This subtitle will be displayed for {budget_sec:.2} seconds."
        ));
        user.push(format!(
            "- Maximum allowed length: approximately {max_chars} English characters (including spaces)."
        ));
        user.push("- The translation must be natural, concise, and readable.".to_string());
        user.push("- Do NOT add explanations or notes.".to_string());
        user.push("- Do NOT exceed the maximum length.".to_string());
        user.push(String::new());
        user.push("Translate ONLY this utterance into natural English for subtitles:".to_string());
        user.push(format!("\"{zh_text}\""));

        return format!("{}\n\n{}", system.join("\n"), user.join("\n"));
    }

    let softener = if retry_level == 1 {
        "while keeping the core meaning."
    } else {
        "You may omit filler words, repetitions, or minor details, but keep the core meaning."
    };
    format!(
        "Shorten the following subtitle translation to fit within {budget_sec:.2} seconds \
(approximately {max_chars} characters), {softener}

Important: If the text contains <<NAME_x:...>> placeholders, translate them to English names.
Do NOT keep any <<NAME_x>> or <<NAME_x:...>> in the output.

Subtitle:
\"{zh_text}\"

Output ONLY the shortened English subtitle text (with all names translated, no placeholders)."
    )
}

/// Stricter prompt used after a glossary violation: the normal prompt plus
/// the missed mappings spelled out.
pub fn append_glossary_violation(prompt: &str, violations: &[String]) -> String {
    let mut out = prompt.to_string();
    out.push_str("\n\nIMPORTANT: You violated the glossary. The following mappings were not followed:\n");
    for violation in violations {
        out.push_str("- ");
        out.push_str(violation);
        out.push('\n');
    }
    out.push_str("\nRe-translate and strictly follow the glossary mappings above.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_carries_context_and_glossary() {
        let ctx = PromptContext {
            episode_context: "全集台词".to_string(),
            plot_overview: "剧情简介".to_string(),
            glossary: "梭哈 -> all in".to_string(),
        };
        let prompt = build_utterance_prompt("我要梭哈", 2000.0, 0, &ctx);
        assert!(prompt.contains("Episode dialogue context"));
        assert!(prompt.contains("Plot overview"));
        assert!(prompt.contains("梭哈 -> all in"));
        assert!(prompt.contains("2.00 seconds"));
        assert!(prompt.contains("28 English characters"));
    }

    #[test]
    fn retry_prompts_demand_shortening() {
        let ctx = PromptContext::default();
        let level1 = build_utterance_prompt("长句", 1000.0, 1, &ctx);
        assert!(level1.contains("Shorten"));
        assert!(level1.contains("14 characters"));
        let level2 = build_utterance_prompt("长句", 1000.0, 2, &ctx);
        assert!(level2.contains("omit filler words"));
    }

    #[test]
    fn violation_appendix_lists_missed_mappings() {
        let prompt = append_glossary_violation("base", &["梭哈 -> all in".to_string()]);
        assert!(prompt.contains("violated the glossary"));
        assert!(prompt.contains("梭哈 -> all in"));
    }

    #[test]
    fn naming_prompt_forbids_western_names() {
        let prompt = build_naming_prompt("平安");
        assert!(prompt.contains("平安"));
        assert!(prompt.contains("Do NOT invent a Western name"));
    }
}
