//! Workspace manifest: artifact registry + per-phase execution records.
//!
//! Exactly one manifest per workspace (`manifest.json`). There is no cache
//! beyond the in-memory document; every mutation is persisted by the caller
//! via [`Manifest::save`], which writes atomically. Concurrent mutation by
//! two processes is out of scope — the workspace has a single owner.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::atomic::atomic_write;

pub const SCHEMA_VERSION: &str = "1.0";

/// Current UTC time as an ISO-8601 string.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Errors surfaced by manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write manifest {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("manifest {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(
        "required artifact '{key}' not found in manifest{}. Available artifacts: [{available}]",
        .required_by.as_ref().map(|p| format!(" (required by phase '{p}')")).unwrap_or_default()
    )]
    MissingArtifact {
        key: String,
        required_by: Option<String>,
        available: String,
    },
}

/// Phase execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// An immutable, content-addressed record of a file produced by a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Dotted `"domain.name"` identifier chosen by the producing phase.
    pub key: String,
    /// Workspace-relative path (`path` on the wire).
    #[serde(rename = "path")]
    pub relpath: String,
    /// Short tag: `json|srt|wav|mp4|jsonl|file`.
    pub kind: String,
    /// `"sha256:" + hex` of the file bytes.
    pub fingerprint: String,
    /// Free-form small metadata object.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

/// Structured error information recorded on a failed phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// One execution record per phase.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhaseRecord {
    pub name: String,
    pub version: String,
    pub status: Option<PhaseStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provides: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<String, ArtifactRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
}

/// Job identity stored at the top of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestData {
    pub schema_version: String,
    #[serde(default)]
    pub job: JobInfo,
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactRecord>,
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseRecord>,
}

impl Default for ManifestData {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            job: JobInfo::default(),
            artifacts: BTreeMap::new(),
            phases: BTreeMap::new(),
        }
    }
}

/// Field-merge update applied to a phase record. Unset options leave the
/// existing value untouched.
#[derive(Debug, Clone, Default)]
pub struct PhaseUpdate {
    pub version: String,
    pub status: Option<PhaseStatus>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub attempt: Option<u32>,
    pub requires: Option<Vec<String>>,
    pub provides: Option<Vec<String>>,
    pub inputs_fingerprint: Option<String>,
    pub config_fingerprint: Option<String>,
    pub artifacts: Option<BTreeMap<String, ArtifactRecord>>,
    pub metrics: Option<Map<String, Value>>,
    pub warnings: Option<Vec<String>>,
    pub error: Option<ErrorInfo>,
    pub skipped: Option<bool>,
}

impl PhaseUpdate {
    pub fn new(version: &str, status: PhaseStatus) -> Self {
        Self {
            version: version.to_string(),
            status: Some(status),
            ..Self::default()
        }
    }
}

/// The manifest document plus its on-disk location.
#[derive(Debug)]
pub struct Manifest {
    path: PathBuf,
    pub data: ManifestData,
}

impl Manifest {
    /// Load the manifest from disk, or initialise an empty one with the
    /// current schema version.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let data = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            serde_json::from_str(&raw).map_err(|source| ManifestError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            ManifestData::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    /// Persist atomically.
    pub fn save(&self) -> Result<(), ManifestError> {
        let content =
            serde_json::to_string_pretty(&self.data).map_err(|source| ManifestError::Parse {
                path: self.path.clone(),
                source,
            })?;
        atomic_write(content.as_bytes(), &self.path).map_err(|source| ManifestError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn set_job(&mut self, job_id: &str, workspace: &str) {
        self.data.job = JobInfo {
            job_id: Some(job_id.to_string()),
            workspace: Some(workspace.to_string()),
        };
    }

    /// Register (or replace) an artifact in the global registry.
    pub fn register_artifact(&mut self, artifact: ArtifactRecord) {
        self.data.artifacts.insert(artifact.key.clone(), artifact);
    }

    /// Look up an artifact; the error lists the available keys so a missing
    /// `requires()` entry is immediately diagnosable.
    pub fn get_artifact(
        &self,
        key: &str,
        required_by: Option<&str>,
    ) -> Result<&ArtifactRecord, ManifestError> {
        self.data
            .artifacts
            .get(key)
            .ok_or_else(|| ManifestError::MissingArtifact {
                key: key.to_string(),
                required_by: required_by.map(str::to_string),
                available: self
                    .data
                    .artifacts
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub fn get_all_artifacts(&self) -> &BTreeMap<String, ArtifactRecord> {
        &self.data.artifacts
    }

    pub fn get_phase_status(&self, phase_name: &str) -> Option<PhaseStatus> {
        self.data.phases.get(phase_name).and_then(|p| p.status)
    }

    pub fn get_phase_data(&self, phase_name: &str) -> Option<&PhaseRecord> {
        self.data.phases.get(phase_name)
    }

    pub fn get_phase_data_mut(&mut self, phase_name: &str) -> Option<&mut PhaseRecord> {
        self.data.phases.get_mut(phase_name)
    }

    /// Merge the provided fields into the phase record, creating it if absent.
    pub fn update_phase(&mut self, phase_name: &str, update: PhaseUpdate) {
        let record = self.data.phases.entry(phase_name.to_string()).or_default();
        record.name = phase_name.to_string();
        record.version = update.version;
        if update.status.is_some() {
            record.status = update.status;
        }
        if let Some(v) = update.started_at {
            record.started_at = Some(v);
        }
        if let Some(v) = update.finished_at {
            record.finished_at = Some(v);
        }
        if let Some(v) = update.attempt {
            record.attempt = Some(v);
        }
        if let Some(v) = update.requires {
            record.requires = Some(v);
        }
        if let Some(v) = update.provides {
            record.provides = Some(v);
        }
        if let Some(v) = update.inputs_fingerprint {
            record.inputs_fingerprint = Some(v);
        }
        if let Some(v) = update.config_fingerprint {
            record.config_fingerprint = Some(v);
        }
        if let Some(v) = update.artifacts {
            record.artifacts = Some(v);
        }
        if let Some(v) = update.metrics {
            record.metrics = Some(v);
        }
        if let Some(v) = update.warnings {
            record.warnings = Some(v);
        }
        if let Some(v) = update.error {
            record.error = Some(v);
        }
        if let Some(v) = update.skipped {
            record.skipped = Some(v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_artifact(key: &str) -> ArtifactRecord {
        ArtifactRecord {
            key: key.to_string(),
            relpath: format!("{key}.json"),
            kind: "json".to_string(),
            fingerprint: "sha256:deadbeef".to_string(),
            meta: Map::new(),
        }
    }

    #[test]
    fn load_initialises_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let m = Manifest::load(&dir.path().join("manifest.json")).unwrap();
        assert_eq!(m.data.schema_version, SCHEMA_VERSION);
        assert!(m.data.artifacts.is_empty());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let mut m = Manifest::load(&path).unwrap();
        m.set_job("job-1", "/tmp/ws");
        m.register_artifact(sample_artifact("sub.subtitle_model"));
        m.update_phase("sub", PhaseUpdate::new("1.0.0", PhaseStatus::Succeeded));
        m.save().unwrap();

        let reloaded = Manifest::load(&path).unwrap();
        assert_eq!(reloaded.data.job.job_id.as_deref(), Some("job-1"));
        assert!(reloaded.data.artifacts.contains_key("sub.subtitle_model"));
        assert_eq!(
            reloaded.get_phase_status("sub"),
            Some(PhaseStatus::Succeeded)
        );
    }

    #[test]
    fn register_artifact_overwrites_prior_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = Manifest::load(&dir.path().join("manifest.json")).unwrap();
        m.register_artifact(sample_artifact("demux.audio"));
        let mut replacement = sample_artifact("demux.audio");
        replacement.fingerprint = "sha256:cafebabe".to_string();
        m.register_artifact(replacement);
        assert_eq!(
            m.get_artifact("demux.audio", None).unwrap().fingerprint,
            "sha256:cafebabe"
        );
    }

    #[test]
    fn missing_artifact_error_lists_available_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = Manifest::load(&dir.path().join("manifest.json")).unwrap();
        m.register_artifact(sample_artifact("demux.audio"));
        let err = m.get_artifact("sep.vocals", Some("asr")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("sep.vocals"));
        assert!(message.contains("asr"));
        assert!(message.contains("demux.audio"));
    }

    #[test]
    fn update_phase_merges_fields() {
        let dir = tempfile::tempdir().unwrap();
        let mut m = Manifest::load(&dir.path().join("manifest.json")).unwrap();
        let mut first = PhaseUpdate::new("1.0.0", PhaseStatus::Running);
        first.started_at = Some("2026-01-01T00:00:00Z".to_string());
        m.update_phase("mt", first);

        let mut second = PhaseUpdate::new("1.0.0", PhaseStatus::Succeeded);
        second.finished_at = Some("2026-01-01T00:05:00Z".to_string());
        m.update_phase("mt", second);

        let record = m.get_phase_data("mt").unwrap();
        assert_eq!(record.status, Some(PhaseStatus::Succeeded));
        assert_eq!(record.started_at.as_deref(), Some("2026-01-01T00:00:00Z"));
        assert_eq!(record.finished_at.as_deref(), Some("2026-01-01T00:05:00Z"));
    }
}
