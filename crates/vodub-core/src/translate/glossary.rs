//! Series dictionaries: names (highest priority) and slang glossary.
//!
//! Both live under the series-level `dub/dict/` directory so every episode
//! of a series shares one vocabulary. Name entries are first-write-wins: a
//! name is not a translation result, it is a naming decision made once.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::atomic::atomic_write;

/// A locked-in name rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameEntry {
    /// The one English form in effect, never replaced once written.
    pub target: String,
    /// Rendering style (`pinyin`, `surname`, `dict`, `manual`) for review.
    pub style: String,
    /// First context (job id) that minted the entry.
    pub first_seen: String,
    /// `llm | rule | manual | dict`
    pub source: String,
    /// Later alternatives are recorded, never used.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
}

/// Loader for `dub/dict/{names,slang}.json`.
#[derive(Debug)]
pub struct DictLoader {
    dict_dir: PathBuf,
    pub names: BTreeMap<String, NameEntry>,
    pub slang: BTreeMap<String, String>,
}

impl DictLoader {
    pub fn load(dict_dir: PathBuf) -> Self {
        let names_path = dict_dir.join("names.json");
        let names = if names_path.exists() {
            match std::fs::read_to_string(&names_path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
            {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %names_path.display(), error = %e, "failed to load names.json");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        let slang_path = dict_dir.join("slang.json");
        let slang = if slang_path.exists() {
            match std::fs::read_to_string(&slang_path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()))
            {
                Ok(map) => map,
                Err(e) => {
                    warn!(path = %slang_path.display(), error = %e, "failed to load slang.json");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };

        info!(
            names = names.len(),
            slang = slang.len(),
            dir = %dict_dir.display(),
            "dictionaries loaded"
        );
        Self {
            dict_dir,
            names,
            slang,
        }
    }

    pub fn resolve_name(&self, src_name: &str) -> Option<&str> {
        self.names.get(src_name).map(|e| e.target.as_str())
    }

    pub fn has_name(&self, src_name: &str) -> bool {
        self.names.contains_key(src_name)
    }

    /// First-write-wins. Returns false when the name already exists.
    pub fn add_name(&mut self, src_name: &str, entry: NameEntry) -> bool {
        if self.names.contains_key(src_name) {
            return false;
        }
        self.names.insert(src_name.to_string(), entry);
        true
    }

    pub fn save_names(&self) -> std::io::Result<()> {
        let path = self.dict_dir.join("names.json");
        let content = serde_json::to_string_pretty(&self.names)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        atomic_write(content.as_bytes(), &path)
    }

    /// Glossary lines matched against one utterance's source text, ready to
    /// inject into the prompt.
    pub fn glossary_hits(&self, src_text: &str) -> String {
        let mut lines = Vec::new();
        for (term, translation) in &self.slang {
            if src_text.contains(term.as_str()) {
                lines.push(format!("{term} -> {translation}"));
            }
        }
        lines.join("\n")
    }

    /// Glossary violations: the source contains a term whose English target
    /// is absent from the output (case-insensitive).
    pub fn check_glossary_violation(&self, src_text: &str, out_text: &str) -> Vec<String> {
        let out_lower = out_text.to_lowercase();
        let mut violations = Vec::new();
        for (term, translation) in &self.slang {
            if src_text.contains(term.as_str())
                && !out_lower.contains(&translation.to_lowercase())
            {
                violations.push(format!("{term} -> {translation}"));
            }
        }
        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader_with(names: &[(&str, &str)], slang: &[(&str, &str)]) -> DictLoader {
        let dir = tempfile::tempdir().unwrap();
        let mut loader = DictLoader::load(dir.path().to_path_buf());
        for (src, target) in names {
            loader.add_name(
                src,
                NameEntry {
                    target: (*target).to_string(),
                    style: "dict".to_string(),
                    first_seen: "test".to_string(),
                    source: "manual".to_string(),
                    alternatives: vec![],
                },
            );
        }
        for (term, translation) in slang {
            loader
                .slang
                .insert((*term).to_string(), (*translation).to_string());
        }
        loader
    }

    #[test]
    fn first_write_wins() {
        let mut loader = loader_with(&[("平安", "Ping An")], &[]);
        let overwritten = loader.add_name(
            "平安",
            NameEntry {
                target: "Peace".to_string(),
                style: "semantic".to_string(),
                first_seen: "later".to_string(),
                source: "llm".to_string(),
                alternatives: vec![],
            },
        );
        assert!(!overwritten);
        assert_eq!(loader.resolve_name("平安"), Some("Ping An"));
    }

    #[test]
    fn glossary_hits_only_matched_terms() {
        let loader = loader_with(&[], &[("炸金花", "three-card brag"), ("梭哈", "all in")]);
        let hits = loader.glossary_hits("来一把炸金花");
        assert_eq!(hits, "炸金花 -> three-card brag");
    }

    #[test]
    fn violation_is_case_insensitive() {
        let loader = loader_with(&[], &[("梭哈", "All In")]);
        assert!(loader
            .check_glossary_violation("我要梭哈", "I'm going all in!")
            .is_empty());
        let violations = loader.check_glossary_violation("我要梭哈", "I bet everything");
        assert_eq!(violations, vec!["梭哈 -> All In".to_string()]);
    }

    #[test]
    fn names_persist_across_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut loader = DictLoader::load(dir.path().to_path_buf());
            loader.add_name(
                "阿强",
                NameEntry {
                    target: "Qiang".to_string(),
                    style: "given-name".to_string(),
                    first_seen: "ep01".to_string(),
                    source: "llm".to_string(),
                    alternatives: vec![],
                },
            );
            loader.save_names().unwrap();
        }
        let reloaded = DictLoader::load(dir.path().to_path_buf());
        assert_eq!(reloaded.resolve_name("阿强"), Some("Qiang"));
    }
}
