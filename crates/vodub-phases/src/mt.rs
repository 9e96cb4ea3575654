//! `mt`: translate each utterance under its time budget.
//!
//! Per-utterance translation is serial: name-dictionary first-writes must
//! be visible before later utterances translate. The episode transcript is
//! context only, never the target of translation. The phase writes
//! `mt_input.jsonl` (constraints included) and `mt_output.jsonl` (clean
//! English only — a placeholder, `<sep>` marker or source-language
//! codepoint in the output fails the phase).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use vodub_core::atomic::atomic_write;
use vodub_core::layout::dict_dir_for;
use vodub_core::phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
use vodub_core::ports::Translator;
use vodub_core::schema::{
    MtConstraints, MtInputLine, MtOutputLine, MtStats, SourceText, SubtitleModel, TargetText,
};
use vodub_core::subtitle::words::episode_text;
use vodub_core::translate::budget::{estimate_en_duration_ms, pick_k};
use vodub_core::translate::clean::{
    clean_translation_output, cleanliness_issues, is_only_punctuation,
};
use vodub_core::translate::glossary::{DictLoader, NameEntry};
use vodub_core::translate::names::{
    NameGuard, annotate_placeholders, force_name_substitution, punctuation_collapse_fallback,
    substitute_placeholders,
};
use vodub_core::translate::prompt::{PromptContext, build_naming_prompt};
use vodub_core::translate::retry::translate_utterance_with_retry;

use crate::adapter_err;

#[derive(Default)]
pub struct MtPhase {
    translator: Option<Arc<dyn Translator>>,
}

impl MtPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_translator(translator: Arc<dyn Translator>) -> Self {
        Self {
            translator: Some(translator),
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

/// Complete the name dictionary before any translation: every detected
/// source name gets an English form, first-write-wins.
async fn complete_names(
    translator: &dyn Translator,
    dict: &mut DictLoader,
    src_names: &std::collections::BTreeSet<String>,
    job_id: &str,
) -> Result<(), PhaseError> {
    let missing: Vec<&String> = src_names.iter().filter(|n| !dict.has_name(n)).collect();
    if missing.is_empty() {
        return Ok(());
    }
    info!(count = missing.len(), "completing name dictionary");
    for src_name in missing {
        let answer = translator
            .translate(&build_naming_prompt(src_name))
            .await
            .map_err(adapter_err)?;
        let en_name = clean_translation_output(&answer);
        if en_name.is_empty() || is_only_punctuation(&en_name) {
            return Err(PhaseError::DataMissing(format!(
                "naming prompt for '{src_name}' produced no usable name"
            )));
        }
        let added = dict.add_name(
            src_name,
            NameEntry {
                target: en_name.clone(),
                style: "pinyin".to_string(),
                first_seen: job_id.to_string(),
                source: "llm".to_string(),
                alternatives: vec![],
            },
        );
        if added {
            info!(src = %src_name, en = %en_name, "name committed to dictionary");
        }
    }
    dict.save_names()?;
    Ok(())
}

#[async_trait]
impl Phase for MtPhase {
    fn name(&self) -> &'static str {
        "mt"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn requires(&self) -> Vec<String> {
        vec![
            "sub.subtitle_model".to_string(),
            "asr.raw_response".to_string(),
        ]
    }
    fn provides(&self) -> Vec<String> {
        vec!["mt.mt_input".to_string(), "mt.mt_output".to_string()]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
        let config = &ctx.config.phases.mt;

        let model_artifact = inputs.get("sub.subtitle_model").ok_or_else(|| {
            PhaseError::InputResolution("sub.subtitle_model missing".to_string())
        })?;
        let model: SubtitleModel = serde_json::from_str(&std::fs::read_to_string(
            ctx.workspace.join(&model_artifact.relpath),
        )?)?;
        if model.utterances.is_empty() {
            return Err(PhaseError::DataMissing(
                "no utterances in subtitle model".to_string(),
            ));
        }

        let raw_artifact = inputs
            .get("asr.raw_response")
            .ok_or_else(|| PhaseError::InputResolution("asr.raw_response missing".to_string()))?;
        let raw: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(
            ctx.workspace.join(&raw_artifact.relpath),
        )?)?;
        let episode_context =
            truncate_chars(&episode_text(&raw), config.episode_context_max_chars);

        let mut dict = DictLoader::load(dict_dir_for(&ctx.workspace));
        let guard = NameGuard::new(dict.names.keys().cloned());

        // Pass 1: build mt_input lines, detect names, collect placeholders.
        let mut input_lines: Vec<MtInputLine> = Vec::new();
        let mut placeholder_maps: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        let mut all_src_names = std::collections::BTreeSet::new();

        for utt in &model.utterances {
            let zh_text = utt.text.trim().to_string();
            if zh_text.is_empty() {
                warn!(utt_id = %utt.utt_id, "empty utterance text, skipping");
                continue;
            }

            let (replaced, map) = guard.extract_and_replace(&zh_text);
            let prompt_text = if map.is_empty() {
                replaced
            } else {
                all_src_names.extend(map.values().cloned());
                placeholder_maps.insert(utt.utt_id.clone(), map.clone());
                annotate_placeholders(&replaced, &map)
            };

            let window_ms = utt.end_ms - utt.start_ms;
            let k = pick_k(utt.speech_rate.zh_tps);
            input_lines.push(MtInputLine {
                utt_id: utt.utt_id.clone(),
                source: SourceText {
                    lang: "zh".to_string(),
                    text: prompt_text,
                },
                constraints: MtConstraints {
                    window_ms,
                    zh_tps: utt.speech_rate.zh_tps,
                    k,
                    budget_ms: window_ms as f64 * k,
                },
            });
        }

        let translator: Arc<dyn Translator> = match &self.translator {
            Some(translator) => Arc::clone(translator),
            None => vodub_providers::build_translator(config).map_err(adapter_err)?,
        };

        // Dictionary completion is a barrier: later utterances must see the
        // first-write-wins decisions.
        complete_names(translator.as_ref(), &mut dict, &all_src_names, &ctx.job_id).await?;

        let input_path = outputs.path("mt.mt_input")?;
        let mut input_doc = String::new();
        for line in &input_lines {
            input_doc.push_str(&serde_json::to_string(line)?);
            input_doc.push('\n');
        }
        atomic_write(input_doc.as_bytes(), input_path)?;
        info!(utterances = input_lines.len(), "mt_input written");

        // Pass 2: translate serially.
        let plot_overview = config.plot_overview.clone().unwrap_or_default();
        let mut output_lines: Vec<MtOutputLine> = Vec::new();
        let mut ok_count = 0usize;
        let mut total_retries = 0u32;
        let mut warnings: Vec<String> = Vec::new();

        for line in &input_lines {
            let zh_text = &line.source.text;
            let budget_ms = line.constraints.budget_ms;

            if zh_text.is_empty() {
                output_lines.push(MtOutputLine {
                    utt_id: line.utt_id.clone(),
                    target: TargetText {
                        lang: "en".to_string(),
                        text: String::new(),
                    },
                    stats: MtStats {
                        en_est_ms: 0.0,
                        budget_ms,
                        retries: 0,
                    },
                });
                continue;
            }

            let prompt_ctx = PromptContext {
                episode_context: episode_context.clone(),
                plot_overview: plot_overview.clone(),
                glossary: dict.glossary_hits(zh_text),
            };
            let outcome = translate_utterance_with_retry(
                translator.as_ref(),
                zh_text,
                budget_ms,
                config.max_retries,
                &prompt_ctx,
                &[],
            )
            .await
            .map_err(adapter_err)?;
            let mut en_text = outcome.text;
            let mut retries = outcome.retries;

            // Glossary enforcement: one stricter retry, then accept with a
            // warning.
            if !dict.slang.is_empty() {
                let violations = dict.check_glossary_violation(zh_text, &en_text);
                if !violations.is_empty() && retries < config.max_retries {
                    warn!(utt_id = %line.utt_id, ?violations, "glossary violation, retrying");
                    let strict = translate_utterance_with_retry(
                        translator.as_ref(),
                        zh_text,
                        budget_ms,
                        1,
                        &prompt_ctx,
                        &violations,
                    )
                    .await
                    .map_err(adapter_err)?;
                    if !strict.text.is_empty() {
                        en_text = strict.text;
                        retries += 1;
                    }
                    let still = dict.check_glossary_violation(zh_text, &en_text);
                    if !still.is_empty() {
                        warnings.push(format!(
                            "{}: glossary not honored: {}",
                            line.utt_id,
                            still.join("; ")
                        ));
                    }
                }
            }

            // Resolve residual placeholders, then strip any other marker.
            let placeholder_map = placeholder_maps
                .get(&line.utt_id)
                .cloned()
                .unwrap_or_default();
            if !placeholder_map.is_empty() {
                en_text = substitute_placeholders(&en_text, &placeholder_map, |src| {
                    dict.resolve_name(src).map(str::to_string)
                })
                .map_err(PhaseError::ContractViolation)?;
            }
            en_text = clean_translation_output(&en_text);

            // The model sometimes renders a name its own way; the dictionary
            // form wins.
            if !placeholder_map.is_empty() {
                let names: Vec<(String, Vec<String>)> = placeholder_map
                    .values()
                    .filter_map(|src| {
                        let entry = dict.names.get(src)?;
                        Some((entry.target.clone(), entry.alternatives.clone()))
                    })
                    .collect();
                let (fixed, changed) = force_name_substitution(&en_text, &names);
                if changed {
                    info!(utt_id = %line.utt_id, "forced dictionary name into output");
                }
                en_text = fixed;

                if is_only_punctuation(&en_text) {
                    if let Some(fallback) =
                        punctuation_collapse_fallback(zh_text, &placeholder_map, |src| {
                            dict.resolve_name(src).map(str::to_string)
                        })
                    {
                        warn!(utt_id = %line.utt_id, %fallback, "output collapsed to punctuation, synthesized from dictionary names");
                        en_text = fallback;
                    }
                }
            }

            // Hard post-checks.
            let issues = cleanliness_issues(&en_text);
            if !issues.is_empty() {
                return Err(PhaseError::ContractViolation(format!(
                    "translation output for {} still contains {}: {}",
                    line.utt_id,
                    issues.join(", "),
                    truncate_chars(&en_text, 200)
                )));
            }

            if !en_text.is_empty() {
                ok_count += 1;
            }
            total_retries += retries;
            output_lines.push(MtOutputLine {
                utt_id: line.utt_id.clone(),
                target: TargetText {
                    lang: "en".to_string(),
                    text: en_text.clone(),
                },
                stats: MtStats {
                    en_est_ms: estimate_en_duration_ms(&en_text),
                    budget_ms,
                    retries,
                },
            });
        }

        if output_lines.iter().all(|l| l.target.text.is_empty()) {
            return Err(PhaseError::DataMissing(
                "MT produced no translations".to_string(),
            ));
        }

        // Belt-and-braces: the file on disk must be clean (P8).
        for line in &output_lines {
            let issues = cleanliness_issues(&line.target.text);
            if !issues.is_empty() {
                return Err(PhaseError::ContractViolation(format!(
                    "mt_output line {} failed cleanliness check: {}",
                    line.utt_id,
                    issues.join(", ")
                )));
            }
        }

        let output_path = outputs.path("mt.mt_output")?;
        let mut output_doc = String::new();
        for line in &output_lines {
            output_doc.push_str(&serde_json::to_string(line)?);
            output_doc.push('\n');
        }
        atomic_write(output_doc.as_bytes(), output_path)?;
        info!(utterances = output_lines.len(), ok = ok_count, "mt_output written");

        let mut success = PhaseSuccess::with_outputs(&["mt.mt_input", "mt.mt_output"])
            .metric("utterances_count", json!(output_lines.len()))
            .metric("ok_count", json!(ok_count))
            .metric("total_retries", json!(total_retries));
        success.warnings = warnings;
        Ok(success)
    }
}
