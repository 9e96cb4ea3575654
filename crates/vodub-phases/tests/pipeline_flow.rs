//! Whole-pipeline flow over a temp workspace with fake collaborators:
//! demux → sep → asr → sub → mt → align → tts → mix → burn, then the resume
//! behavior on a rerun.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use vodub_core::manifest::Manifest;
use vodub_core::phase::{Phase, RunContext};
use vodub_core::ports::{
    AsrRequest, MediaProcessor, MixRequest, ObjectStore, PortError, SourceSeparator,
    SpeechRecognizer, SpeechSynthesizer, Translator, TtsRequest,
};
use vodub_core::runner::PhaseRunner;
use vodub_core::schema::{AlignedSubtitle, DubManifest, SubtitleModel, TtsReport};
use vodub_core::settings::PipelineConfig;
use vodub_core::subtitle::srt::parse_srt;
use vodub_phases::{
    AlignPhase, AsrPhase, BurnPhase, DemuxPhase, MixPhase, MtPhase, SepPhase, SubPhase, TtsPhase,
};

const EPISODE_MS: i64 = 60_000;

fn write_wav(path: &Path, ms: i64, sample_rate: u32, tone: bool) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let samples = (ms * i64::from(sample_rate) / 1000) as usize;
    for i in 0..samples {
        let value = if tone {
            if i % 2 == 0 { 6000 } else { -6000 }
        } else {
            0
        };
        writer.write_sample(value).unwrap();
    }
    writer.finalize().unwrap();
}

fn wav_ms(path: &Path) -> i64 {
    let reader = hound::WavReader::open(path).unwrap();
    let spec = reader.spec();
    i64::from(reader.duration()) * 1000 / i64::from(spec.sample_rate)
}

struct FakeMedia;

#[async_trait]
impl MediaProcessor for FakeMedia {
    async fn extract_audio(
        &self,
        _video: &Path,
        output: &Path,
        sample_rate: u32,
    ) -> Result<(), PortError> {
        write_wav(output, EPISODE_MS, sample_rate, true);
        Ok(())
    }

    async fn resample_16k_mono(&self, input: &Path, output: &Path) -> Result<(), PortError> {
        std::fs::copy(input, output)?;
        Ok(())
    }

    async fn probe_duration_ms(&self, path: &Path) -> Result<i64, PortError> {
        Ok(wav_ms(path))
    }

    async fn apply_tempo(&self, input: &Path, output: &Path, rate: f64) -> Result<(), PortError> {
        let mut reader = hound::WavReader::open(input).unwrap();
        let spec = reader.spec();
        let samples: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        let target = (samples.len() as f64 / rate) as usize;
        let mut writer = hound::WavWriter::create(output, spec).unwrap();
        for i in 0..target {
            let src = ((i as f64) * rate) as usize;
            writer
                .write_sample(*samples.get(src).unwrap_or(&0))
                .unwrap();
        }
        writer.finalize().unwrap();
        Ok(())
    }

    async fn mix(&self, request: &MixRequest) -> Result<(), PortError> {
        std::fs::copy(&request.speech_path, &request.output_path)?;
        Ok(())
    }

    async fn burn(
        &self,
        _video: &Path,
        audio: &Path,
        subtitle: &Path,
        output: &Path,
    ) -> Result<(), PortError> {
        assert!(audio.exists() && subtitle.exists());
        std::fs::write(output, b"mp4-bytes")?;
        Ok(())
    }
}

struct FakeSeparator;

#[async_trait]
impl SourceSeparator for FakeSeparator {
    async fn separate(
        &self,
        audio: &Path,
        vocals_out: &Path,
        accompaniment_out: &Path,
        _model: &str,
    ) -> Result<(), PortError> {
        let ms = wav_ms(audio);
        write_wav(vocals_out, ms, 16_000, true);
        write_wav(accompaniment_out, ms, 16_000, true);
        Ok(())
    }
}

struct FakeStore;

#[async_trait]
impl ObjectStore for FakeStore {
    async fn upload(
        &self,
        path: &Path,
        _prefix: Option<&str>,
        _overwrite: bool,
        _expires_seconds: u64,
    ) -> Result<String, PortError> {
        assert!(path.exists());
        Ok("https://store.example/audio-abc12345.wav".to_string())
    }
}

struct FakeRecognizer;

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn transcribe(&self, _request: &AsrRequest) -> Result<Value, PortError> {
        Ok(json!({
            "result": {
                "text": "你要走了吗。我不想留在这里！",
                "utterances": [
                    {
                        "text": "你要走了吗。",
                        "start_time": 1000,
                        "end_time": 3000,
                        "additions": {"speaker": "1", "gender": "male"},
                        "words": [
                            {"text": "你", "start_time": 1000, "end_time": 1400},
                            {"text": "要", "start_time": 1400, "end_time": 1800},
                            {"text": "走", "start_time": 1800, "end_time": 2200},
                            {"text": "了", "start_time": 2200, "end_time": 2600},
                            {"text": "吗", "start_time": 2600, "end_time": 3000}
                        ]
                    },
                    {
                        "text": "我不想留在这里！",
                        "start_time": 5000,
                        "end_time": 8000,
                        "additions": {"speaker": "2", "gender": "female"},
                        "words": [
                            {"text": "我", "start_time": 5000, "end_time": 5400},
                            {"text": "不", "start_time": 5400, "end_time": 5800},
                            {"text": "想", "start_time": 5800, "end_time": 6200},
                            {"text": "留", "start_time": 6200, "end_time": 6600},
                            {"text": "在", "start_time": 6600, "end_time": 7000},
                            {"text": "这", "start_time": 7000, "end_time": 7400},
                            {"text": "里", "start_time": 7400, "end_time": 8000}
                        ]
                    }
                ]
            }
        }))
    }
}

struct FakeTranslator;

#[async_trait]
impl Translator for FakeTranslator {
    async fn translate(&self, prompt: &str) -> Result<String, PortError> {
        if prompt.contains("Shorten") || prompt.contains("much shorter") {
            return Ok("Stay here.".to_string());
        }
        // The episode context carries the whole transcript; only the quoted
        // focus line identifies the utterance under translation.
        if prompt.contains("\"我不想留在这里！\"") {
            Ok("I don't want to stay here!".to_string())
        } else {
            Ok("Are you leaving?".to_string())
        }
    }
}

/// Synthesizes a tone whose duration tracks the text length, long enough to
/// push the second utterance into rate adjustment.
struct FakeSynth;

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    fn engine(&self) -> &str {
        "fake"
    }
    fn engine_version(&self) -> &str {
        "1"
    }
    async fn synthesize(&self, request: &TtsRequest) -> Result<Vec<u8>, PortError> {
        let letters = request
            .text
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .count() as i64;
        let ms = letters * 1000 / 8; // slowish speech
        let samples = (ms * i64::from(request.sample_rate) / 1000) as usize;
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: request.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..samples {
                writer
                    .write_sample(if i % 2 == 0 { 5000i16 } else { -5000 })
                    .unwrap();
            }
            writer.finalize().unwrap();
        }
        Ok(cursor.into_inner())
    }
}

fn build_phases() -> Vec<Arc<dyn Phase>> {
    let media: Arc<dyn MediaProcessor> = Arc::new(FakeMedia);
    vec![
        Arc::new(DemuxPhase::with_media(Arc::clone(&media))),
        Arc::new(SepPhase::with_separator(Arc::new(FakeSeparator))),
        Arc::new(AsrPhase::with_ports(
            Arc::new(FakeStore),
            Arc::new(FakeRecognizer),
            Arc::clone(&media),
        )),
        Arc::new(SubPhase::with_media(Arc::clone(&media))),
        Arc::new(MtPhase::with_translator(Arc::new(FakeTranslator))),
        Arc::new(AlignPhase::with_media(Arc::clone(&media))),
        Arc::new(TtsPhase::with_ports(
            Arc::new(FakeSynth),
            Arc::clone(&media),
        )),
        Arc::new(MixPhase::with_media(Arc::clone(&media))),
        Arc::new(BurnPhase::with_media(media)),
    ]
}

fn setup(root: &Path) -> (PhaseRunner, RunContext, PathBuf) {
    let video = root.join("series/ep1.mp4");
    std::fs::create_dir_all(video.parent().unwrap()).unwrap();
    std::fs::write(&video, b"fake video").unwrap();
    let workspace = vodub_core::layout::workspace_for(&video);
    std::fs::create_dir_all(&workspace).unwrap();

    let manifest = Manifest::load(&workspace.join("manifest.json")).unwrap();
    let runner = PhaseRunner::new(manifest, workspace.clone());
    let mut config = PipelineConfig::default();
    config.video_path = Some(video);
    let ctx = RunContext {
        job_id: "job-e2e".to_string(),
        workspace: workspace.clone(),
        config,
    };
    (runner, ctx, workspace)
}

#[tokio::test]
async fn happy_path_to_burn() {
    let dir = tempfile::tempdir().unwrap();
    let (mut runner, ctx, workspace) = setup(dir.path());
    let phases = build_phases();

    let outputs = runner
        .run_pipeline(&phases, &ctx, Some("burn"), None)
        .await
        .unwrap();
    assert!(outputs["burn.video"].exists());
    assert!(outputs["burn.video"].ends_with("ep1-dubbed.mp4"));

    // SSOT invariants: utterances do not overlap, cues cover windows.
    let model: SubtitleModel = serde_json::from_str(
        &std::fs::read_to_string(workspace.join("subs/subtitle.model.json")).unwrap(),
    )
    .unwrap();
    assert!(!model.utterances.is_empty());
    for pair in model.utterances.windows(2) {
        assert!(pair[0].end_ms <= pair[1].start_ms);
    }
    for utt in &model.utterances {
        assert_eq!(utt.cues.first().unwrap().start_ms, utt.start_ms);
        assert_eq!(utt.cues.last().unwrap().end_ms, utt.end_ms);
    }

    // Alignment preserved every time window (P7) and stayed clean (P8).
    let aligned: AlignedSubtitle = serde_json::from_str(
        &std::fs::read_to_string(workspace.join("subs/subtitle.align.json")).unwrap(),
    )
    .unwrap();
    for aligned_utt in &aligned.utterances {
        let source = model
            .utterances
            .iter()
            .find(|u| u.utt_id == aligned_utt.utt_id)
            .unwrap();
        assert_eq!(aligned_utt.start_ms, source.start_ms);
        assert_eq!(aligned_utt.end_ms, source.end_ms);
        for cue in &aligned_utt.cues {
            assert!(!cue.source.text.contains("<<NAME_"));
            assert!(!cue.source.text.contains("<sep>"));
            assert!(!cue.source.text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c)));
        }
    }

    // The English SRT parses with strictly increasing cue times.
    let srt = std::fs::read_to_string(workspace.join("subs/en.srt")).unwrap();
    let cues = parse_srt(&srt);
    assert!(!cues.is_empty());
    for pair in cues.windows(2) {
        assert!(pair[0].start_ms <= pair[1].start_ms);
    }

    // TTS report accounting (P9): every segment landed in a valid state.
    let report: TtsReport = serde_json::from_str(
        &std::fs::read_to_string(workspace.join("tts/tts_report.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report.failed_count, 0);
    for segment in &report.segments {
        match segment.status {
            vodub_core::schema::TtsSegmentStatus::Success => {
                assert!((segment.rate - 1.0).abs() < f64::EPSILON);
                assert_eq!(segment.final_ms, segment.budget_ms);
            }
            vodub_core::schema::TtsSegmentStatus::RateAdjusted => {
                assert!(segment.rate > 1.0 && segment.rate <= 1.3 + 1e-9);
                assert_eq!(segment.final_ms, segment.budget_ms);
            }
            vodub_core::schema::TtsSegmentStatus::Extended => {
                assert!(segment.rate > 1.0 && segment.rate <= 1.3 + 1e-9);
                assert!(segment.final_ms > segment.budget_ms);
            }
            vodub_core::schema::TtsSegmentStatus::Failed => {
                assert!(segment.error.is_some());
            }
        }
        let seg_path = workspace.join(&segment.output_path);
        assert!(seg_path.exists(), "segment wav missing: {segment:?}");
    }

    // The dubbed speech track covers the whole episode.
    let speech_ms = wav_ms(&workspace.join("audio/dub-speech.wav"));
    assert!(speech_ms >= EPISODE_MS);
    assert!(speech_ms <= EPISODE_MS + 1000);

    // The dub manifest budgets equal their windows.
    let dub: DubManifest = serde_json::from_str(
        &std::fs::read_to_string(workspace.join("dub/dub.model.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(dub.audio_duration_ms, EPISODE_MS);
    for utt in &dub.utterances {
        assert_eq!(utt.budget_ms, utt.end_ms - utt.start_ms);
    }
}

#[tokio::test]
async fn rerun_skips_every_phase() {
    let dir = tempfile::tempdir().unwrap();
    let (mut runner, ctx, _workspace) = setup(dir.path());
    let phases = build_phases();

    runner
        .run_pipeline(&phases, &ctx, Some("burn"), None)
        .await
        .unwrap();

    // L3: nothing changed, so every phase passes all skip checks.
    for phase in &phases {
        let (needs_run, reason) = runner.should_run(phase.as_ref(), false);
        assert!(!needs_run, "{} would rerun: {reason}", phase.name());
        assert_eq!(reason, "all checks passed");
    }
}

#[tokio::test]
async fn force_from_mt_reruns_translation_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let (mut runner, ctx, _workspace) = setup(dir.path());
    let phases = build_phases();

    runner
        .run_pipeline(&phases, &ctx, Some("burn"), None)
        .await
        .unwrap();
    runner
        .run_pipeline(&phases, &ctx, Some("burn"), Some("mt"))
        .await
        .unwrap();

    let manifest = runner.manifest();
    // Forced suffix executed; earlier phases skipped.
    for name in ["mt", "align", "tts", "mix", "burn"] {
        let record = manifest.get_phase_data(name).unwrap();
        assert_eq!(record.skipped, Some(false), "{name} should have run");
    }
    for name in ["demux", "sep", "asr", "sub"] {
        let record = manifest.get_phase_data(name).unwrap();
        assert_eq!(record.skipped, Some(true), "{name} should have skipped");
    }
}
