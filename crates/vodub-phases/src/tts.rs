//! `tts`: synthesize every utterance and fit it to its budget.
//!
//! Per utterance: synthesize (through the content-addressed cache), trim
//! silence only when over budget (trimming can clip speech), then pad /
//! rate-adjust / extend / fail. Failed segments keep their trimmed audio on
//! disk so a debugger can listen. Synthesis runs with a bounded worker
//! count; reports are aggregated in manifest order regardless of which
//! worker finished first.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use vodub_core::atomic::{atomic_copy, atomic_write};
use vodub_core::layout::{tts_cache_dir_for, tts_segment_relpath};
use vodub_core::phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
use vodub_core::ports::{MediaProcessor, SpeechSynthesizer, TtsRequest};
use vodub_core::schema::{DubManifest, DubUtterance, TtsReport, TtsSegmentReport, TtsSegmentStatus};
use vodub_core::settings::TtsConfig;
use vodub_core::translate::clean::is_only_punctuation;
use vodub_core::tts::{CacheKeyInput, FitPlan, FitPolicy, cache_key, plan_fit};
use vodub_media::wave;

use crate::voices::resolve_voice;
use crate::{adapter_err, media_err, resolve_media};

#[derive(Default)]
pub struct TtsPhase {
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    media: Option<Arc<dyn MediaProcessor>>,
}

impl TtsPhase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        media: Arc<dyn MediaProcessor>,
    ) -> Self {
        Self {
            synthesizer: Some(synthesizer),
            media: Some(media),
        }
    }
}

fn wave_err(e: wave::WaveError) -> PhaseError {
    PhaseError::media(e.to_string())
}

struct SegmentJob<'a> {
    utt: &'a DubUtterance,
    seg_relpath: String,
    seg_abs: PathBuf,
    work_dir: PathBuf,
    cache_dir: PathBuf,
    config: &'a TtsConfig,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    media: Arc<dyn MediaProcessor>,
}

async fn synthesize_segment(job: SegmentJob<'_>) -> Result<TtsSegmentReport, PhaseError> {
    let utt = job.utt;
    let sample_rate = job.config.sample_rate;
    let budget_ms = utt.budget_ms;

    // Nothing to say: the slot is silence and that is a success.
    if utt.text_en.trim().is_empty() || is_only_punctuation(&utt.text_en) {
        wave::write_silence(&job.seg_abs, budget_ms, sample_rate).map_err(wave_err)?;
        return Ok(TtsSegmentReport {
            utt_id: utt.utt_id.clone(),
            budget_ms,
            raw_ms: 0,
            trimmed_ms: 0,
            final_ms: budget_ms,
            rate: 1.0,
            status: TtsSegmentStatus::Success,
            output_path: job.seg_relpath,
            error: None,
        });
    }

    let voice = resolve_voice(
        &utt.speaker,
        utt.gender.as_deref(),
        job.config.voices.as_ref(),
    );
    let prosody = utt
        .emotion
        .as_ref()
        .map_or(Value::Null, |e| json!({"emotion": e.label}));
    let request = TtsRequest {
        text: utt.text_en.clone(),
        voice: voice.clone(),
        language: "en-US".to_string(),
        format: "pcm".to_string(),
        sample_rate,
        channels: 1,
        prosody,
    };

    let key = cache_key(&CacheKeyInput {
        engine: job.synthesizer.engine(),
        engine_version: job.synthesizer.engine_version(),
        voice: &voice,
        lang: &request.language,
        format: &request.format,
        sample_rate,
        channels: 1,
        prosody: &request.prosody,
        text: &request.text,
    });
    let cache_path = job.cache_dir.join(format!("{key}.wav"));
    let raw_path = job.work_dir.join(format!("raw_{}.wav", utt.utt_id));

    if cache_path.exists() {
        atomic_copy(&cache_path, &raw_path)?;
    } else {
        let bytes = job
            .synthesizer
            .synthesize(&request)
            .await
            .map_err(adapter_err)?;
        atomic_write(&bytes, &cache_path)?;
        atomic_copy(&cache_path, &raw_path)?;
    }

    let raw_ms = wave::duration_ms(&raw_path).map_err(wave_err)?;

    // Within budget: skip trimming entirely, it can clip speech.
    let (fit_input, trimmed_ms) = if raw_ms <= budget_ms {
        (raw_path.clone(), raw_ms)
    } else {
        let trim_path = job.work_dir.join(format!("trim_{}.wav", utt.utt_id));
        let trimmed_ms = wave::trim_silence(&raw_path, &trim_path).map_err(wave_err)?;
        (trim_path, trimmed_ms)
    };

    let plan = plan_fit(
        trimmed_ms,
        budget_ms,
        FitPolicy {
            max_rate: utt.tts_policy.max_rate,
            allow_extend_ms: utt.tts_policy.allow_extend_ms,
        },
    );

    let report = match plan {
        FitPlan::Pad { final_ms } => {
            wave::pad_to(&fit_input, &job.seg_abs, final_ms).map_err(wave_err)?;
            TtsSegmentReport {
                utt_id: utt.utt_id.clone(),
                budget_ms,
                raw_ms,
                trimmed_ms,
                final_ms,
                rate: 1.0,
                status: TtsSegmentStatus::Success,
                output_path: job.seg_relpath,
                error: None,
            }
        }
        FitPlan::RateAdjust { rate, final_ms } | FitPlan::Extend { rate, final_ms } => {
            let tempo_path = job.work_dir.join(format!("tempo_{}.wav", utt.utt_id));
            job.media
                .apply_tempo(&fit_input, &tempo_path, rate)
                .await
                .map_err(media_err)?;
            wave::pad_to(&tempo_path, &job.seg_abs, final_ms).map_err(wave_err)?;
            let status = if matches!(plan, FitPlan::Extend { .. }) {
                TtsSegmentStatus::Extended
            } else {
                TtsSegmentStatus::RateAdjusted
            };
            TtsSegmentReport {
                utt_id: utt.utt_id.clone(),
                budget_ms,
                raw_ms,
                trimmed_ms,
                final_ms,
                rate,
                status,
                output_path: job.seg_relpath,
                error: None,
            }
        }
        FitPlan::Fail {
            required_rate,
            excess_ms,
        } => {
            // Keep the untouched trimmed audio for listening.
            atomic_copy(&fit_input, &job.seg_abs)?;
            TtsSegmentReport {
                utt_id: utt.utt_id.clone(),
                budget_ms,
                raw_ms,
                trimmed_ms,
                final_ms: trimmed_ms,
                rate: 1.0,
                status: TtsSegmentStatus::Failed,
                output_path: job.seg_relpath,
                error: Some(format!(
                    "clip exceeds budget by {excess_ms}ms even with allow_extend; \
would need rate {required_rate:.2} > max {:.2}",
                    utt.tts_policy.max_rate
                )),
            }
        }
    };
    Ok(report)
}

#[async_trait]
impl Phase for TtsPhase {
    fn name(&self) -> &'static str {
        "tts"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn requires(&self) -> Vec<String> {
        vec!["align.dub_manifest".to_string()]
    }
    fn provides(&self) -> Vec<String> {
        vec!["tts.report".to_string(), "tts.speech".to_string()]
    }

    async fn run(
        &self,
        ctx: &RunContext,
        inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
        let config = &ctx.config.phases.tts;
        let manifest_artifact = inputs.get("align.dub_manifest").ok_or_else(|| {
            PhaseError::InputResolution("align.dub_manifest missing".to_string())
        })?;
        let manifest: DubManifest = serde_json::from_str(&std::fs::read_to_string(
            ctx.workspace.join(&manifest_artifact.relpath),
        )?)?;
        if manifest.utterances.is_empty() {
            return Err(PhaseError::DataMissing(
                "dub manifest has no utterances".to_string(),
            ));
        }

        let cache_dir = config
            .cache_dir
            .clone()
            .unwrap_or_else(|| tts_cache_dir_for(&ctx.workspace));
        std::fs::create_dir_all(&cache_dir)?;
        let work_dir = ctx.workspace.join("tts/.work");
        std::fs::create_dir_all(&work_dir)?;

        let synthesizer: Arc<dyn SpeechSynthesizer> = match &self.synthesizer {
            Some(synthesizer) => Arc::clone(synthesizer),
            None => match config.engine.as_str() {
                "volcengine" => {
                    let volc_config =
                        vodub_providers::tts::VolcTtsConfig::from_env(&config.resource_id)
                            .map_err(adapter_err)?;
                    Arc::new(vodub_providers::VolcTtsClient::new(volc_config))
                }
                "azure" => {
                    Arc::new(vodub_providers::AzureTtsClient::from_env().map_err(adapter_err)?)
                }
                other => {
                    return Err(PhaseError::Config(format!(
                        "unknown tts engine '{other}' (expected 'volcengine' or 'azure')"
                    )));
                }
            },
        };
        let media = resolve_media(self.media.as_ref())?;

        info!(
            utterances = manifest.utterances.len(),
            workers = config.max_workers,
            engine = synthesizer.engine(),
            "synthesizing segments"
        );

        let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
        let futures = manifest.utterances.iter().map(|utt| {
            let semaphore = Arc::clone(&semaphore);
            let seg_relpath = tts_segment_relpath(&utt.utt_id);
            let job = SegmentJob {
                utt,
                seg_abs: ctx.workspace.join(&seg_relpath),
                seg_relpath,
                work_dir: work_dir.clone(),
                cache_dir: cache_dir.clone(),
                config,
                synthesizer: Arc::clone(&synthesizer),
                media: Arc::clone(&media),
            };
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                synthesize_segment(job).await
            }
        });

        // join_all keeps manifest order, so aggregation is deterministic.
        let mut segments = Vec::with_capacity(manifest.utterances.len());
        for result in join_all(futures).await {
            segments.push(result?);
        }

        let report = TtsReport::new(manifest.audio_duration_ms, "tts", segments);
        let mut warnings = Vec::new();
        for failed in report.failed() {
            warn!(utt_id = %failed.utt_id, error = ?failed.error, "segment failed to fit");
            warnings.push(format!(
                "{}: {}",
                failed.utt_id,
                failed.error.as_deref().unwrap_or("failed")
            ));
        }

        // Place the finished segments on the episode timeline; failed slots
        // stay silent. Extended segments near the end may spill past the
        // declared duration, capped at the trailing allowance.
        let mut timeline_segments = Vec::new();
        let mut total_ms = manifest.audio_duration_ms;
        for (utt, segment) in manifest.utterances.iter().zip(&report.segments) {
            if segment.status == TtsSegmentStatus::Failed {
                continue;
            }
            total_ms = total_ms.max(utt.start_ms + segment.final_ms);
            timeline_segments.push(wave::TimelineSegment {
                path: ctx.workspace.join(&segment.output_path),
                start_ms: utt.start_ms,
            });
        }
        total_ms = total_ms.min(manifest.audio_duration_ms + ctx.config.phases.mix.tail_ms);
        wave::assemble_timeline(
            &timeline_segments,
            total_ms,
            config.sample_rate,
            outputs.path("tts.speech")?,
        )
        .map_err(wave_err)?;

        atomic_write(
            serde_json::to_string_pretty(&report)?.as_bytes(),
            outputs.path("tts.report")?,
        )?;

        let _ = std::fs::remove_dir_all(&work_dir);

        let rate_adjusted = report
            .segments
            .iter()
            .filter(|s| s.status == TtsSegmentStatus::RateAdjusted)
            .count();
        let extended = report
            .segments
            .iter()
            .filter(|s| s.status == TtsSegmentStatus::Extended)
            .count();
        info!(
            total = report.total_segments,
            success = report.success_count,
            rate_adjusted,
            extended,
            failed = report.failed_count,
            "synthesis complete"
        );

        let mut success = PhaseSuccess::with_outputs(&["tts.report", "tts.speech"])
            .metric("total_segments", json!(report.total_segments))
            .metric("rate_adjusted_count", json!(rate_adjusted))
            .metric("extended_count", json!(extended))
            .metric("failed_count", json!(report.failed_count));
        success.warnings = warnings;
        Ok(success)
    }
}
