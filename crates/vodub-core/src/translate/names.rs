//! Name handling: detection, placeholder plumbing and enforcement.
//!
//! Personal names travel through the model as opaque placeholders
//! (`<<NAME_i:源名>>`). The source name inside the token is visible for
//! context; the final English must contain the dictionary rendering of the
//! name — pinyin- or surname-style, never an invented Western name. If the
//! model ignores the instruction, the dictionary form is forced in.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<<NAME_(\d+)(?::[^>]*)?>>").expect("static regex"));

/// Detects known personal names in source text and swaps them for stable
/// placeholders. Known names come from the dictionary plus any configured
/// extras; longest names match first so "王小明" wins over "王".
#[derive(Debug)]
pub struct NameGuard {
    known_names: Vec<String>,
}

impl NameGuard {
    pub fn new(known: impl IntoIterator<Item = String>) -> Self {
        let mut known_names: Vec<String> = known.into_iter().filter(|n| !n.is_empty()).collect();
        known_names.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
        known_names.dedup();
        Self { known_names }
    }

    /// Replace each known name with `<<NAME_i>>`; `i` is assigned per
    /// distinct name in order of first appearance. Returns the rewritten
    /// text and the `placeholder → source name` map.
    pub fn extract_and_replace(&self, text: &str) -> (String, BTreeMap<String, String>) {
        let mut rewritten = text.to_string();
        let mut map = BTreeMap::new();
        let mut next_index = 0usize;

        for name in &self.known_names {
            if !rewritten.contains(name.as_str()) {
                continue;
            }
            let placeholder = format!("<<NAME_{next_index}>>");
            rewritten = rewritten.replace(name.as_str(), &placeholder);
            map.insert(placeholder, name.clone());
            next_index += 1;
        }
        (rewritten, map)
    }
}

/// `<<NAME_0>>` → `<<NAME_0:平安>>`: the model sees the source name for
/// context but is told to render the English form, not the token.
pub fn annotate_placeholders(text: &str, map: &BTreeMap<String, String>) -> String {
    let mut out = text.to_string();
    for (placeholder, src_name) in map {
        let inner = placeholder
            .trim_start_matches("<<")
            .trim_end_matches(">>");
        out = out.replace(placeholder, &format!("<<{inner}:{src_name}>>"));
    }
    out
}

/// Replace residual placeholders in the model output with the resolved
/// English names. Errors with the unresolvable source name — every name
/// must be in the dictionary before translation starts.
pub fn substitute_placeholders(
    en_text: &str,
    map: &BTreeMap<String, String>,
    resolve: impl Fn(&str) -> Option<String>,
) -> Result<String, String> {
    let mut out = String::with_capacity(en_text.len());
    let mut last = 0usize;
    for caps in PLACEHOLDER_RE.captures_iter(en_text) {
        let whole = caps.get(0).expect("match");
        let index = &caps[1];
        out.push_str(&en_text[last..whole.start()]);
        last = whole.end();

        let bare = format!("<<NAME_{index}>>");
        let Some(src_name) = map.get(&bare) else {
            return Err(format!("placeholder {bare} has no recorded source name"));
        };
        let Some(en_name) = resolve(src_name) else {
            return Err(format!(
                "no English rendering for name '{src_name}' (placeholder {bare})"
            ));
        };
        out.push_str(&en_name);
    }
    out.push_str(&en_text[last..]);
    Ok(out)
}

/// Common wrong renderings of a two-part English name: apostrophized and
/// concatenated pinyin plus recorded alternatives.
pub fn build_name_variants(en_name: &str, alternatives: &[String]) -> Vec<String> {
    let mut variants: Vec<String> = alternatives.to_vec();
    let parts: Vec<&str> = en_name.split_whitespace().collect();
    if parts.len() == 2 {
        let (a, b) = (parts[0], parts[1]);
        let b_lower = b.to_lowercase();
        variants.push(format!("{a}'{b_lower}"));
        variants.push(format!("{a}{b_lower}"));
        variants.push(format!("{}'{b_lower}", a.to_lowercase()));
        variants.push(format!("{a}{b}"));
    }
    variants.retain(|v| !v.eq_ignore_ascii_case(en_name));
    variants.dedup();
    variants
}

/// Force the dictionary rendering when the model translated a name its own
/// way. Returns the corrected text and whether anything changed.
pub fn force_name_substitution(
    en_text: &str,
    names: &[(String, Vec<String>)],
) -> (String, bool) {
    let mut out = en_text.to_string();
    let mut changed = false;

    for (en_name, alternatives) in names {
        if out.to_lowercase().contains(&en_name.to_lowercase()) {
            continue;
        }
        let mut replaced = false;
        for variant in build_name_variants(en_name, alternatives) {
            if let Ok(re) = Regex::new(&format!("(?i){}", regex::escape(&variant))) {
                if re.is_match(&out) {
                    out = re.replace_all(&out, en_name.as_str()).into_owned();
                    changed = true;
                    replaced = true;
                    break;
                }
            }
        }
        if !replaced {
            // Very short outputs that are really just the name: replace
            // wholesale rather than leaving a wrong rendering.
            let stripped = out.trim().trim_end_matches(['.', ',', '!', '?', ';', ':']);
            if !stripped.is_empty() && stripped.split_whitespace().count() <= 2 {
                let punct: String = out
                    .trim()
                    .chars()
                    .rev()
                    .take_while(|c| ['.', ',', '!', '?', ';', ':'].contains(c))
                    .collect();
                let punct = if punct.is_empty() { ".".to_string() } else { punct };
                out = format!("{en_name}{punct}");
                changed = true;
            }
        }
    }
    (out, changed)
}

/// Last-ditch synthesis when the cleaned output collapsed to punctuation:
/// `"<Name>[, kin-suffix]<end-punct>"` from the dictionary names present in
/// the source text.
pub fn punctuation_collapse_fallback(
    zh_text: &str,
    map: &BTreeMap<String, String>,
    resolve: impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let mut ordered: Vec<(&String, &String)> = map.iter().collect();
    ordered.sort_by_key(|(placeholder, _)| {
        PLACEHOLDER_RE
            .captures(placeholder)
            .and_then(|c| c[1].parse::<usize>().ok())
            .unwrap_or(usize::MAX)
    });

    let mut seen = std::collections::BTreeSet::new();
    let mut en_names = Vec::new();
    for (_, src_name) in ordered {
        if !seen.insert(src_name.clone()) {
            continue;
        }
        if let Some(en) = resolve(src_name) {
            en_names.push(en);
        }
    }
    if en_names.is_empty() {
        return None;
    }

    let mut base = en_names.join(", ");
    if zh_text.contains('哥') {
        base.push_str(", bro");
    } else if zh_text.contains('姐') {
        base.push_str(", sis");
    }
    let end = if zh_text.contains('！') || zh_text.contains('!') {
        '!'
    } else {
        '.'
    };
    base.push(end);
    Some(base)
}
