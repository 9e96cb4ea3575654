//! Runner protocol tests over a real temp workspace: skip decisions,
//! artifact integrity, rerun idempotence and bless.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use vodub_core::fingerprint::hash_file;
use vodub_core::manifest::{Manifest, PhaseStatus};
use vodub_core::phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
use vodub_core::runner::{BlessOutcome, PhaseRunner, RunnerError};
use vodub_core::settings::PipelineConfig;

/// A phase that writes fixed content to every provided key and counts its
/// executions.
struct CountingPhase {
    name: &'static str,
    version: &'static str,
    requires: Vec<String>,
    provides: Vec<String>,
    content: String,
    runs: Arc<AtomicUsize>,
}

impl CountingPhase {
    fn new(
        name: &'static str,
        requires: &[&str],
        provides: &[&str],
        content: &str,
    ) -> (Arc<Self>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let phase = Arc::new(Self {
            name,
            version: "1.0.0",
            requires: requires.iter().map(|s| (*s).to_string()).collect(),
            provides: provides.iter().map(|s| (*s).to_string()).collect(),
            content: content.to_string(),
            runs: Arc::clone(&runs),
        });
        (phase, runs)
    }
}

#[async_trait]
impl Phase for CountingPhase {
    fn name(&self) -> &'static str {
        self.name
    }
    fn version(&self) -> &'static str {
        self.version
    }
    fn requires(&self) -> Vec<String> {
        self.requires.clone()
    }
    fn provides(&self) -> Vec<String> {
        self.provides.clone()
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for key in &self.provides {
            let path = outputs.path(key)?;
            std::fs::write(path, &self.content)?;
        }
        Ok(PhaseSuccess {
            outputs: self.provides.clone(),
            ..PhaseSuccess::default()
        })
    }
}

struct FailingPhase;

#[async_trait]
impl Phase for FailingPhase {
    fn name(&self) -> &'static str {
        "boom"
    }
    fn version(&self) -> &'static str {
        "1.0.0"
    }
    fn requires(&self) -> Vec<String> {
        vec!["first.out".to_string()]
    }
    fn provides(&self) -> Vec<String> {
        vec!["boom.out".to_string()]
    }

    async fn run(
        &self,
        _ctx: &RunContext,
        _inputs: &ResolvedInputs,
        _outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError> {
        Err(PhaseError::adapter("provider offline"))
    }
}

fn setup(workspace: &std::path::Path) -> (PhaseRunner, RunContext) {
    let manifest = Manifest::load(&workspace.join("manifest.json")).unwrap();
    let runner = PhaseRunner::new(manifest, workspace.to_path_buf());
    let ctx = RunContext {
        job_id: "job-test".to_string(),
        workspace: workspace.to_path_buf(),
        config: PipelineConfig::default(),
    };
    (runner, ctx)
}

#[tokio::test]
async fn pipeline_runs_then_skips_everything_on_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let (first, first_runs) = CountingPhase::new("first", &[], &["first.out"], "one");
    let (second, second_runs) =
        CountingPhase::new("second", &["first.out"], &["second.out"], "two");
    let phases: Vec<Arc<dyn Phase>> = vec![first, second];

    let (mut runner, ctx) = setup(dir.path());
    let outputs = runner
        .run_pipeline(&phases, &ctx, Some("second"), None)
        .await
        .unwrap();
    assert_eq!(first_runs.load(Ordering::SeqCst), 1);
    assert_eq!(second_runs.load(Ordering::SeqCst), 1);
    assert!(outputs.contains_key("second.out"));

    // P3: every published artifact's fingerprint matches the bytes on disk.
    for key in ["first.out", "second.out"] {
        let artifact = runner.manifest().get_artifact(key, None).unwrap().clone();
        let on_disk = hash_file(&dir.path().join(&artifact.relpath)).unwrap();
        assert_eq!(artifact.fingerprint, on_disk);
    }

    // L3: a second run performs zero executions; phases skip.
    runner
        .run_pipeline(&phases, &ctx, Some("second"), None)
        .await
        .unwrap();
    assert_eq!(first_runs.load(Ordering::SeqCst), 1);
    assert_eq!(second_runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        runner.manifest().get_phase_status("second"),
        Some(PhaseStatus::Succeeded)
    );
}

#[tokio::test]
async fn should_run_is_deterministic_without_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let (phase, _) = CountingPhase::new("solo", &[], &["solo.out"], "content");
    let phases: Vec<Arc<dyn Phase>> = vec![Arc::clone(&phase) as Arc<dyn Phase>];

    let (mut runner, ctx) = setup(dir.path());
    runner
        .run_pipeline(&phases, &ctx, None, None)
        .await
        .unwrap();

    // P1/P2: repeated calls agree while nothing changes underneath.
    let first = runner.should_run(phase.as_ref(), false);
    let second = runner.should_run(phase.as_ref(), false);
    assert_eq!(first, second);
    assert!(!first.0);
    assert_eq!(first.1, "all checks passed");
}

#[tokio::test]
async fn edited_artifact_forces_rerun_and_bless_absorbs_it() {
    let dir = tempfile::tempdir().unwrap();
    let (producer, producer_runs) = CountingPhase::new("first", &[], &["first.out"], "v1");
    let (consumer, consumer_runs) =
        CountingPhase::new("second", &["first.out"], &["second.out"], "view");
    let phases: Vec<Arc<dyn Phase>> = vec![Arc::clone(&producer) as Arc<dyn Phase>, consumer];

    let (mut runner, ctx) = setup(dir.path());
    runner
        .run_pipeline(&phases, &ctx, Some("second"), None)
        .await
        .unwrap();

    // Hand-edit the producer's artifact.
    let relpath = runner
        .manifest()
        .get_artifact("first.out", None)
        .unwrap()
        .relpath
        .clone();
    std::fs::write(dir.path().join(&relpath), "hand edited").unwrap();

    // The producer would rerun (its published fingerprint no longer
    // matches), which is exactly what bless is for.
    let (needs_run, reason) = runner.should_run(producer.as_ref(), false);
    assert!(needs_run);
    assert!(reason.contains("fingerprint mismatch"));

    let outcomes = runner.bless("first").unwrap();
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, BlessOutcome::Updated { key, .. } if key == "first.out")));
    // Bless keeps the phase succeeded.
    assert_eq!(
        runner.manifest().get_phase_status("first"),
        Some(PhaseStatus::Succeeded)
    );

    // After bless: the producer skips, the consumer reruns because its
    // inputs fingerprint changed.
    runner
        .run_pipeline(&phases, &ctx, Some("second"), None)
        .await
        .unwrap();
    assert_eq!(producer_runs.load(Ordering::SeqCst), 1);
    assert_eq!(consumer_runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failure_is_recorded_and_retried_on_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let (first, _) = CountingPhase::new("first", &[], &["first.out"], "ok");
    let phases: Vec<Arc<dyn Phase>> = vec![first, Arc::new(FailingPhase)];

    let (mut runner, ctx) = setup(dir.path());
    let err = runner
        .run_pipeline(&phases, &ctx, Some("boom"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::PhaseFailed(name) if name == "boom"));

    let record = runner.manifest().get_phase_data("boom").unwrap();
    assert_eq!(record.status, Some(PhaseStatus::Failed));
    let error = record.error.as_ref().unwrap();
    assert_eq!(error.kind, "AdapterError");
    assert!(error.message.contains("provider offline"));

    // A failed record always reruns.
    let (needs_run, reason) = runner.should_run(&FailingPhase, false);
    assert!(needs_run);
    assert!(reason.contains("status"));
}

#[tokio::test]
async fn from_phase_forces_a_contiguous_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let (a, a_runs) = CountingPhase::new("a", &[], &["a.out"], "a");
    let (b, b_runs) = CountingPhase::new("b", &["a.out"], &["b.out"], "b");
    let (c, c_runs) = CountingPhase::new("c", &["b.out"], &["c.out"], "c");
    let phases: Vec<Arc<dyn Phase>> = vec![a, b, c];

    let (mut runner, ctx) = setup(dir.path());
    runner
        .run_pipeline(&phases, &ctx, Some("c"), None)
        .await
        .unwrap();
    runner
        .run_pipeline(&phases, &ctx, Some("c"), Some("b"))
        .await
        .unwrap();

    assert_eq!(a_runs.load(Ordering::SeqCst), 1);
    assert_eq!(b_runs.load(Ordering::SeqCst), 2);
    assert_eq!(c_runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn undeclared_output_is_an_output_validation_failure() {
    struct Liar;

    #[async_trait]
    impl Phase for Liar {
        fn name(&self) -> &'static str {
            "liar"
        }
        fn version(&self) -> &'static str {
            "1.0.0"
        }
        fn requires(&self) -> Vec<String> {
            vec![]
        }
        fn provides(&self) -> Vec<String> {
            vec!["liar.out".to_string()]
        }
        async fn run(
            &self,
            _ctx: &RunContext,
            _inputs: &ResolvedInputs,
            _outputs: &ResolvedOutputs,
        ) -> Result<PhaseSuccess, PhaseError> {
            // Declares success for a key it never wrote.
            Ok(PhaseSuccess::with_outputs(&["liar.out"]))
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let (mut runner, ctx) = setup(dir.path());
    let ok = runner.run_phase(&Liar, &ctx, false).await.unwrap();
    assert!(!ok);
    let record = runner.manifest().get_phase_data("liar").unwrap();
    assert_eq!(record.status, Some(PhaseStatus::Failed));
    assert_eq!(
        record.error.as_ref().unwrap().kind,
        "OutputValidationError"
    );
}

#[tokio::test]
async fn bless_reports_missing_files() {
    let dir = tempfile::tempdir().unwrap();
    let (phase, _) = CountingPhase::new("first", &[], &["first.out"], "x");
    let phases: Vec<Arc<dyn Phase>> = vec![phase];
    let (mut runner, ctx) = setup(dir.path());
    runner
        .run_pipeline(&phases, &ctx, None, None)
        .await
        .unwrap();

    let relpath = runner
        .manifest()
        .get_artifact("first.out", None)
        .unwrap()
        .relpath
        .clone();
    std::fs::remove_file(dir.path().join(&relpath)).unwrap();

    let outcomes = runner.bless("first").unwrap();
    assert!(outcomes
        .iter()
        .any(|o| matches!(o, BlessOutcome::Missing { key, .. } if key == "first.out")));
}
