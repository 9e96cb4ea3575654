//! The phase runner: skip decisions, execution protocol and manifest commits.
//!
//! The runner is the only writer of the manifest. Phases write files to the
//! paths the runner allocates; the runner validates, fingerprints and
//! registers them after a successful run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::fingerprint::{compute_inputs_fingerprint, hash_file};
use crate::layout::{artifact_kind, artifact_relpath};
use crate::manifest::{
    ArtifactRecord, ErrorInfo, Manifest, ManifestError, PhaseStatus, PhaseUpdate, now_iso,
};
use crate::phase::{Phase, PhaseError, ResolvedInputs, ResolvedOutputs, RunContext};
use crate::settings::config_fingerprint;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("unknown phase: {0}")]
    UnknownPhase(String),

    #[error("from_phase ({from}) must not be after to_phase ({to})")]
    InvertedRange { from: String, to: String },

    #[error("phase '{0}' failed")]
    PhaseFailed(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Outcome of a `bless` pass, per artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlessOutcome {
    Unchanged(String),
    Updated { key: String, old: String, new: String },
    Missing { key: String, path: PathBuf },
}

pub struct PhaseRunner {
    manifest: Manifest,
    workspace: PathBuf,
}

impl PhaseRunner {
    pub fn new(manifest: Manifest, workspace: PathBuf) -> Self {
        Self { manifest, workspace }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    fn stem(&self) -> String {
        self.workspace
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("episode")
            .to_string()
    }

    /// Decide whether a phase must run. Read-only over the manifest and the
    /// workspace; calling it twice without intervening mutation returns the
    /// same decision.
    pub fn should_run(&self, phase: &dyn Phase, force: bool) -> (bool, String) {
        if force {
            return (true, "forced".to_string());
        }

        let Some(record) = self.manifest.get_phase_data(phase.name()) else {
            return (true, "not in manifest".to_string());
        };

        if record.status != Some(PhaseStatus::Succeeded) {
            return (true, format!("status is {:?}", record.status));
        }

        if record.version != phase.version() {
            return (
                true,
                format!(
                    "version changed: {} -> {}",
                    record.version,
                    phase.version()
                ),
            );
        }

        let artifacts = self.manifest.get_all_artifacts();
        match compute_inputs_fingerprint(&phase.requires(), artifacts) {
            Ok(current) => {
                if record.inputs_fingerprint.as_deref() != Some(current.as_str()) {
                    return (
                        true,
                        format!(
                            "inputs_fingerprint changed: {:?} -> {current}",
                            record.inputs_fingerprint
                        ),
                    );
                }
            }
            Err(detail) => {
                return (true, format!("missing required artifact: {detail}"));
            }
        }

        for key in phase.provides() {
            let Ok(artifact) = self.manifest.get_artifact(&key, None) else {
                return (true, format!("output artifact '{key}' not found"));
            };
            let path = self.workspace.join(&artifact.relpath);
            if !path.exists() {
                return (
                    true,
                    format!("output artifact '{key}' file not found: {}", path.display()),
                );
            }
            match hash_file(&path) {
                Ok(current) if current == artifact.fingerprint => {}
                Ok(current) => {
                    return (
                        true,
                        format!(
                            "output artifact '{key}' fingerprint mismatch: {} != {current}",
                            artifact.fingerprint
                        ),
                    );
                }
                Err(e) => {
                    return (true, format!("output artifact '{key}' unreadable: {e}"));
                }
            }
        }

        (false, "all checks passed".to_string())
    }

    fn resolve_inputs(&self, phase: &dyn Phase) -> Result<ResolvedInputs, ManifestError> {
        let mut inputs = BTreeMap::new();
        for key in phase.requires() {
            let artifact = self.manifest.get_artifact(&key, Some(phase.name()))?;
            inputs.insert(key, artifact.clone());
        }
        Ok(inputs)
    }

    fn allocate_outputs(&self, phase: &dyn Phase) -> std::io::Result<ResolvedOutputs> {
        let stem = self.stem();
        let mut paths = BTreeMap::new();
        for key in phase.provides() {
            let absolute = self.workspace.join(artifact_relpath(&key, &stem));
            if let Some(parent) = absolute.parent() {
                std::fs::create_dir_all(parent)?;
            }
            paths.insert(key, absolute);
        }
        Ok(ResolvedOutputs::new(paths))
    }

    fn record_failure(&mut self, phase: &dyn Phase, err: &PhaseError) -> Result<(), RunnerError> {
        let mut update = PhaseUpdate::new(phase.version(), PhaseStatus::Failed);
        update.finished_at = Some(now_iso());
        update.error = Some(ErrorInfo {
            kind: err.kind().to_string(),
            message: err.to_string(),
            traceback: Some(err.chain()),
        });
        self.manifest.update_phase(phase.name(), update);
        self.manifest.save()?;
        Ok(())
    }

    /// Run one phase under the full execution protocol. Returns whether the
    /// phase is in a succeeded state afterwards.
    pub async fn run_phase(
        &mut self,
        phase: &dyn Phase,
        ctx: &RunContext,
        force: bool,
    ) -> Result<bool, RunnerError> {
        let (needs_run, reason) = self.should_run(phase, force);

        if !needs_run {
            info!(phase = phase.name(), reason = %reason, "phase skipped");
            // A succeeded phase keeps its status; demoting to `skipped`
            // would force a rerun on the next invocation.
            let prior = self.manifest.get_phase_status(phase.name());
            let status = if prior == Some(PhaseStatus::Succeeded) {
                PhaseStatus::Succeeded
            } else {
                PhaseStatus::Skipped
            };
            let mut update = PhaseUpdate::new(phase.version(), status);
            update.finished_at = Some(now_iso());
            update.skipped = Some(true);
            self.manifest.update_phase(phase.name(), update);
            self.manifest.save()?;
            return Ok(true);
        }

        info!(phase = phase.name(), reason = %reason, "running phase");

        let inputs = match self.resolve_inputs(phase) {
            Ok(inputs) => inputs,
            Err(e) => {
                error!(phase = phase.name(), error = %e, "input resolution failed");
                self.record_failure(phase, &PhaseError::InputResolution(e.to_string()))?;
                return Ok(false);
            }
        };

        let artifacts = self.manifest.get_all_artifacts();
        let inputs_fp = compute_inputs_fingerprint(&phase.requires(), artifacts).ok();
        let config_fp = config_fingerprint(phase.name(), &ctx.config);

        let mut running = PhaseUpdate::new(phase.version(), PhaseStatus::Running);
        running.started_at = Some(now_iso());
        running.requires = Some(phase.requires());
        running.provides = Some(phase.provides());
        running.inputs_fingerprint = inputs_fp;
        running.config_fingerprint = config_fp;
        running.skipped = Some(false);
        running.attempt = Some(
            self.manifest
                .get_phase_data(phase.name())
                .and_then(|r| r.attempt)
                .map_or(1, |n| n + 1),
        );
        self.manifest.update_phase(phase.name(), running);
        self.manifest.save()?;

        let outputs = match self.allocate_outputs(phase) {
            Ok(outputs) => outputs,
            Err(e) => {
                self.record_failure(phase, &PhaseError::Io(e))?;
                return Ok(false);
            }
        };

        match phase.run(ctx, &inputs, &outputs).await {
            Ok(success) => {
                let mut published: BTreeMap<String, ArtifactRecord> = BTreeMap::new();
                for key in &success.outputs {
                    if !outputs.contains(key) {
                        let err = PhaseError::OutputValidation(format!(
                            "phase '{}' declared output '{key}' which is not in phase.provides()",
                            phase.name()
                        ));
                        self.record_failure(phase, &err)?;
                        return Ok(false);
                    }
                    let abs_path = match outputs.path(key) {
                        Ok(path) => path.clone(),
                        Err(err) => {
                            self.record_failure(phase, &err)?;
                            return Ok(false);
                        }
                    };
                    if !abs_path.exists() {
                        let err = PhaseError::OutputValidation(format!(
                            "phase '{}' did not write output file: {} (artifact key: {key})",
                            phase.name(),
                            abs_path.display()
                        ));
                        self.record_failure(phase, &err)?;
                        return Ok(false);
                    }

                    let relpath = abs_path
                        .strip_prefix(&self.workspace)
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|_| abs_path.display().to_string());
                    let fingerprint = match hash_file(&abs_path) {
                        Ok(fp) => fp,
                        Err(e) => {
                            self.record_failure(phase, &PhaseError::Io(e))?;
                            return Ok(false);
                        }
                    };

                    let artifact = ArtifactRecord {
                        key: key.clone(),
                        relpath,
                        kind: artifact_kind(&abs_path).to_string(),
                        fingerprint,
                        meta: serde_json::Map::new(),
                    };
                    self.manifest.register_artifact(artifact.clone());
                    published.insert(key.clone(), artifact);
                }

                let mut update = PhaseUpdate::new(phase.version(), PhaseStatus::Succeeded);
                update.finished_at = Some(now_iso());
                update.artifacts = Some(published);
                update.metrics = Some(success.metrics);
                update.warnings = Some(success.warnings.clone());
                self.manifest.update_phase(phase.name(), update);
                self.manifest.save()?;

                for warning in &success.warnings {
                    warn!(phase = phase.name(), "{warning}");
                }
                info!(phase = phase.name(), "phase succeeded");
                Ok(true)
            }
            Err(err) => {
                error!(phase = phase.name(), error = %err, "phase failed");
                self.record_failure(phase, &err)?;
                Ok(false)
            }
        }
    }

    /// Run the pipeline up to `to_phase`, forcing a contiguous suffix
    /// starting at `from_phase` when given. Aborts on first failure and
    /// returns the absolute paths of the final phase's provided artifacts.
    pub async fn run_pipeline(
        &mut self,
        phases: &[Arc<dyn Phase>],
        ctx: &RunContext,
        to_phase: Option<&str>,
        from_phase: Option<&str>,
    ) -> Result<BTreeMap<String, PathBuf>, RunnerError> {
        let index_of = |name: &str| -> Result<usize, RunnerError> {
            phases
                .iter()
                .position(|p| p.name() == name)
                .ok_or_else(|| RunnerError::UnknownPhase(name.to_string()))
        };

        let to_idx = match to_phase {
            Some(name) => index_of(name)?,
            None => phases.len().saturating_sub(1),
        };
        let force_from = match from_phase {
            Some(name) => {
                let idx = index_of(name)?;
                if idx > to_idx {
                    return Err(RunnerError::InvertedRange {
                        from: name.to_string(),
                        to: phases[to_idx].name().to_string(),
                    });
                }
                Some(idx)
            }
            None => None,
        };

        for (idx, phase) in phases.iter().take(to_idx + 1).enumerate() {
            let force = force_from.is_some_and(|from| idx >= from);
            let ok = self.run_phase(phase.as_ref(), ctx, force).await?;
            if !ok {
                return Err(RunnerError::PhaseFailed(phase.name().to_string()));
            }
        }

        let final_phase = &phases[to_idx];
        let mut outputs = BTreeMap::new();
        for key in final_phase.provides() {
            let artifact = self.manifest.get_artifact(&key, None)?;
            outputs.insert(key, self.workspace.join(&artifact.relpath));
        }
        Ok(outputs)
    }

    /// Accept manual edits: recompute the fingerprints of a phase's output
    /// artifacts from the files on disk. Never alters phase status.
    pub fn bless(&mut self, phase_name: &str) -> Result<Vec<BlessOutcome>, RunnerError> {
        let Some(record) = self.manifest.get_phase_data(phase_name) else {
            return Err(RunnerError::UnknownPhase(phase_name.to_string()));
        };
        let keys: Vec<(String, String)> = record
            .artifacts
            .iter()
            .flatten()
            .map(|(key, artifact)| (key.clone(), artifact.relpath.clone()))
            .collect();

        let mut outcomes = Vec::with_capacity(keys.len());
        let mut changed = false;
        for (key, relpath) in keys {
            let path = self.workspace.join(&relpath);
            if !path.exists() {
                outcomes.push(BlessOutcome::Missing { key, path });
                continue;
            }
            let new_fp = hash_file(&path).map_err(|e| {
                RunnerError::Manifest(ManifestError::Read {
                    path: path.clone(),
                    source: e,
                })
            })?;
            let old_fp = self
                .manifest
                .get_artifact(&key, None)
                .map(|a| a.fingerprint.clone())
                .unwrap_or_default();
            if old_fp == new_fp {
                outcomes.push(BlessOutcome::Unchanged(key));
                continue;
            }
            if let Some(rec) = self.manifest.get_phase_data_mut(phase_name) {
                if let Some(artifacts) = rec.artifacts.as_mut() {
                    if let Some(artifact) = artifacts.get_mut(&key) {
                        artifact.fingerprint = new_fp.clone();
                    }
                }
            }
            if let Some(artifact) = self.manifest.data.artifacts.get_mut(&key) {
                artifact.fingerprint = new_fp.clone();
            }
            changed = true;
            outcomes.push(BlessOutcome::Updated {
                key,
                old: old_fp,
                new: new_fp,
            });
        }

        if changed {
            self.manifest.save()?;
        }
        Ok(outcomes)
    }
}
