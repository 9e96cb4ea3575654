//! Output hygiene for translated text.
//!
//! The final English must carry no system markers: no `<<NAME_i…>>`
//! placeholders, no `<sep>`, no `<SLANG:…>`, and no source-language
//! codepoints. Cleaning is defensive; the checks afterwards are hard.

use std::sync::LazyLock;

use regex::Regex;

static SEP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*<sep>\s*").expect("static regex"));
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<<NAME_\d+(?::[^>]*)?>>").expect("static regex"));
static SLANG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<SLANG:[^>]+>").expect("static regex"));
static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

/// Strip residual system markers and collapse whitespace.
pub fn clean_translation_output(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = SEP_RE.replace_all(text, " ");
    let text = NAME_RE.replace_all(&text, "");
    let text = SLANG_RE.replace_all(&text, "");
    SPACE_RE.replace_all(&text, " ").trim().to_string()
}

/// True when the text contains no actual words, only punctuation/space.
pub fn is_only_punctuation(text: &str) -> bool {
    !text.chars().any(char::is_alphanumeric)
}

pub fn has_name_placeholder(text: &str) -> bool {
    text.contains("<<NAME_")
}

pub fn has_sep_marker(text: &str) -> bool {
    text.contains("<sep>")
}

/// CJK unified ideographs — a source-language codepoint in the English
/// output is a contract violation.
pub fn has_source_language_chars(text: &str) -> bool {
    text.chars()
        .any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

/// Every reason the cleaned output is still unacceptable, for error
/// messages.
pub fn cleanliness_issues(text: &str) -> Vec<&'static str> {
    let mut issues = Vec::new();
    if has_name_placeholder(text) {
        issues.push("NAME placeholder");
    }
    if has_sep_marker(text) {
        issues.push("<sep> marker");
    }
    if has_source_language_chars(text) {
        issues.push("source-language characters");
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_all_marker_kinds() {
        let raw = "Hello <sep> there <<NAME_0:平安>> friend <SLANG:炸金花>  end";
        assert_eq!(clean_translation_output(raw), "Hello there friend end");
    }

    #[test]
    fn strips_bare_placeholders_too() {
        assert_eq!(clean_translation_output("Hi <<NAME_3>>!"), "Hi !");
    }

    #[test]
    fn punctuation_only_detection() {
        assert!(is_only_punctuation(", !"));
        assert!(is_only_punctuation(""));
        assert!(!is_only_punctuation("ok."));
    }

    #[test]
    fn source_language_detection() {
        assert!(has_source_language_chars("Hello 世界"));
        assert!(!has_source_language_chars("Hello world"));
    }

    #[test]
    fn issues_collects_every_violation() {
        let text = "<<NAME_0>> said <sep> 你好";
        let issues = cleanliness_issues(text);
        assert_eq!(issues.len(), 3);
        assert!(cleanliness_issues("clean English.").is_empty());
    }
}
