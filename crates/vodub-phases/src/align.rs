//! `align`: commit the dubbing manifest and the English subtitle view.
//!
//! The utterance time windows are fixed at their SSOT values; only the cue
//! axis inside each window is recomputed, from the English speech-rate
//! model. The demuxed audio's probed duration is the authoritative episode
//! length.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use vodub_core::align::{allow_extend_for, english_wps, resegment_utterance};
use vodub_core::atomic::atomic_write;
use vodub_core::phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
use vodub_core::ports::MediaProcessor;
use vodub_core::schema::{
    AlignedSubtitle, AlignedUtterance, AudioInfo, DubManifest, DubUtterance, EnSpeechRate,
    MtOutputLine, SchemaInfo, SourceText, SubtitleCue, SubtitleModel, TtsPolicy,
};
use vodub_core::subtitle::srt::{SrtCue, render_srt};
use vodub_core::translate::clean::{has_name_placeholder, is_only_punctuation};

use crate::{media_err, resolve_media};

#[derive(Default)]
pub struct AlignPhase {
    media: Option<Arc<dyn MediaProcessor>>,
}

impl AlignPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_media(media: Arc<dyn MediaProcessor>) -> Self {
        Self { media: Some(media) }
    }
}

fn read_mt_output(path: &std::path::Path) -> Result<BTreeMap<String, MtOutputLine>, PhaseError> {
    let mut map = BTreeMap::new();
    for line in std::fs::read_to_string(path)?.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: MtOutputLine = serde_json::from_str(line)?;
        map.insert(parsed.utt_id.clone(), parsed);
    }
    Ok(map)
}

#[async_trait]
impl Phase for AlignPhase {
    fn name(&self) -> &'static str {
        "align"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn requires(&self) -> Vec<String> {
        vec![
            "sub.subtitle_model".to_string(),
            "mt.mt_output".to_string(),
            "demux.audio".to_string(),
        ]
    }
    fn provides(&self) -> Vec<String> {
        vec![
            "align.subtitle_align".to_string(),
            "align.en_srt".to_string(),
            "align.dub_manifest".to_string(),
        ]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
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

        let mt_artifact = inputs
            .get("mt.mt_output")
            .ok_or_else(|| PhaseError::InputResolution("mt.mt_output missing".to_string()))?;
        let translations = read_mt_output(&ctx.workspace.join(&mt_artifact.relpath))?;
        if translations.is_empty() {
            return Err(PhaseError::DataMissing(
                "no translations in mt_output.jsonl".to_string(),
            ));
        }

        // The probed duration is authoritative — never a sum of utterance
        // ends.
        let audio_artifact = inputs
            .get("demux.audio")
            .ok_or_else(|| PhaseError::InputResolution("demux.audio missing".to_string()))?;
        let media = resolve_media(self.media.as_ref())?;
        let audio_duration_ms = media
            .probe_duration_ms(&ctx.workspace.join(&audio_artifact.relpath))
            .await
            .map_err(media_err)?;
        info!(audio_duration_ms, "probed episode duration");

        let target_wps = ctx.config.phases.align.target_wps;
        let tts_config = &ctx.config.phases.tts;

        let mut aligned_utterances: Vec<AlignedUtterance> = Vec::new();
        let mut dub_utterances: Vec<DubUtterance> = Vec::new();
        let mut srt_cues: Vec<SrtCue> = Vec::new();
        let mut skipped = 0usize;

        for utt in &model.utterances {
            let Some(translation) = translations.get(&utt.utt_id) else {
                warn!(utt_id = %utt.utt_id, "no translation found, skipping");
                skipped += 1;
                continue;
            };
            let en_text = translation.target.text.trim();
            if en_text.is_empty() || is_only_punctuation(en_text) {
                // B2: an utterance whose translation carries no words is
                // dropped, never emitted as an empty cue.
                if !en_text.is_empty() {
                    warn!(utt_id = %utt.utt_id, text = %en_text, "translation is punctuation only, skipping");
                }
                skipped += 1;
                continue;
            }
            if has_name_placeholder(en_text) {
                warn!(utt_id = %utt.utt_id, "mt_output still carries a NAME placeholder");
            }

            // The window stays fixed at the SSOT value (P7).
            let segments = resegment_utterance(en_text, utt.start_ms, utt.end_ms, target_wps);
            if segments.is_empty() {
                skipped += 1;
                continue;
            }

            let cues: Vec<SubtitleCue> = segments
                .iter()
                .map(|seg| SubtitleCue {
                    start_ms: seg.start_ms,
                    end_ms: seg.end_ms,
                    source: SourceText {
                        lang: "en".to_string(),
                        text: seg.text.clone(),
                    },
                })
                .collect();
            for seg in &segments {
                srt_cues.push(SrtCue {
                    start_ms: seg.start_ms,
                    end_ms: seg.end_ms,
                    text: seg.text.clone(),
                });
            }

            aligned_utterances.push(AlignedUtterance {
                utt_id: utt.utt_id.clone(),
                speaker: utt.speaker.clone(),
                start_ms: utt.start_ms,
                end_ms: utt.end_ms,
                speech_rate: EnSpeechRate {
                    en_wps: english_wps(en_text, utt.end_ms - utt.start_ms),
                },
                emotion: utt.emotion.clone(),
                text: en_text.to_string(),
                cues,
            });

            let budget_ms = utt.end_ms - utt.start_ms;
            if budget_ms <= 0 {
                warn!(utt_id = %utt.utt_id, budget_ms, "invalid budget, skipping");
                continue;
            }
            let text_zh = utt
                .cues
                .iter()
                .map(|c| c.source.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let allow_extend_ms = allow_extend_for(budget_ms, tts_config);
            if budget_ms < tts_config.min_tts_window_ms {
                info!(
                    utt_id = %utt.utt_id,
                    budget_ms,
                    allow_extend_ms,
                    "short utterance, extension allowance raised"
                );
            }
            dub_utterances.push(DubUtterance {
                utt_id: utt.utt_id.clone(),
                start_ms: utt.start_ms,
                end_ms: utt.end_ms,
                budget_ms,
                text_zh,
                text_en: en_text.to_string(),
                speaker: utt.speaker.clone(),
                tts_policy: TtsPolicy {
                    max_rate: tts_config.max_rate,
                    allow_extend_ms,
                },
                emotion: utt.emotion.clone(),
                gender: utt.gender.clone(),
            });
        }

        if aligned_utterances.is_empty() {
            return Err(PhaseError::DataMissing(
                "alignment produced no utterances".to_string(),
            ));
        }

        // Final check: nothing system-internal may leak into the SRT.
        srt_cues.sort_by_key(|c| c.start_ms);
        for cue in &srt_cues {
            if has_name_placeholder(&cue.text) {
                return Err(PhaseError::ContractViolation(format!(
                    "en.srt would contain a NAME placeholder: {}",
                    cue.text.chars().take(200).collect::<String>()
                )));
            }
        }

        let aligned = AlignedSubtitle {
            schema: SchemaInfo::subtitle_align(),
            audio: Some(AudioInfo {
                duration_ms: audio_duration_ms,
            }),
            utterances: aligned_utterances,
        };
        atomic_write(
            serde_json::to_string_pretty(&aligned)?.as_bytes(),
            outputs.path("align.subtitle_align")?,
        )?;
        atomic_write(render_srt(&srt_cues).as_bytes(), outputs.path("align.en_srt")?)?;

        let manifest = DubManifest {
            audio_duration_ms,
            utterances: dub_utterances,
        };
        atomic_write(
            serde_json::to_string_pretty(&manifest)?.as_bytes(),
            outputs.path("align.dub_manifest")?,
        )?;
        info!(
            utterances = aligned.utterances.len(),
            dub_utterances = manifest.utterances.len(),
            segments = srt_cues.len(),
            "alignment committed"
        );

        Ok(PhaseSuccess::with_outputs(&[
            "align.subtitle_align",
            "align.en_srt",
            "align.dub_manifest",
        ])
        .metric("utterances_count", json!(aligned.utterances.len()))
        .metric("segments_count", json!(srt_cues.len()))
        .metric("skipped_count", json!(skipped))
        .metric("audio_duration_ms", json!(audio_duration_ms)))
    }
}
