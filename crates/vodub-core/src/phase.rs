//! The phase contract: the unit of pipeline execution.
//!
//! A phase declares the artifact keys it reads (`requires`) and writes
//! (`provides`), carries a `version` whose bump invalidates prior succeeded
//! state, and implements `run`. The runner owns everything else: skip
//! decisions, input resolution, output path allocation, fingerprinting and
//! manifest commits.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::manifest::ArtifactRecord;
use crate::settings::PipelineConfig;

/// Context handed to every phase run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: String,
    pub workspace: PathBuf,
    pub config: PipelineConfig,
}

/// Inputs resolved by the runner: required key → registered artifact.
pub type ResolvedInputs = BTreeMap<String, ArtifactRecord>;

/// Output paths pre-allocated by the runner: provided key → absolute path.
/// Parent directories exist before `run` is invoked; phases must write to
/// these paths and nowhere else under their `provides()`.
#[derive(Debug, Clone, Default)]
pub struct ResolvedOutputs {
    paths: BTreeMap<String, PathBuf>,
}

impl ResolvedOutputs {
    pub fn new(paths: BTreeMap<String, PathBuf>) -> Self {
        Self { paths }
    }

    /// Path for a provided key. Asking for a key outside `provides()` is a
    /// phase programming error.
    pub fn path(&self, key: &str) -> Result<&PathBuf, PhaseError> {
        self.paths.get(key).ok_or_else(|| {
            PhaseError::OutputValidation(format!("no allocated output path for key '{key}'"))
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.paths.contains_key(key)
    }
}

/// What a successful run reports back to the runner.
#[derive(Debug, Clone, Default)]
pub struct PhaseSuccess {
    /// Which of the provided keys were actually written.
    pub outputs: Vec<String>,
    pub metrics: Map<String, Value>,
    pub warnings: Vec<String>,
}

impl PhaseSuccess {
    pub fn with_outputs(outputs: &[&str]) -> Self {
        Self {
            outputs: outputs.iter().map(|s| (*s).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn metric(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }

    pub fn warning(mut self, message: impl Into<String>) -> Self {
        self.warnings.push(message.into());
        self
    }
}

/// The failure taxonomy, ordered roughly by local recoverability.
///
/// The runner records `kind()` as the manifest error `type` and the full
/// source chain in the `traceback` field.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// A required artifact key is absent from the manifest.
    #[error("{0}")]
    InputResolution(String),

    /// A declared output was not written, or an undeclared one was declared.
    #[error("{0}")]
    OutputValidation(String),

    /// An invariant the data model guarantees was observed broken.
    #[error("{0}")]
    ContractViolation(String),

    /// Upstream produced nothing to work with.
    #[error("{0}")]
    DataMissing(String),

    /// A permanent failure in an external collaborator.
    #[error("{message}")]
    Adapter {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Subprocess / media-tool failure.
    #[error("{message}")]
    Media {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("missing configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl PhaseError {
    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter {
            message: message.into(),
            source: None,
        }
    }

    pub fn adapter_with(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Adapter {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn media(message: impl Into<String>) -> Self {
        Self::Media {
            message: message.into(),
            source: None,
        }
    }

    pub fn media_with(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Media {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Stable error-kind name recorded in the manifest.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InputResolution(_) => "InputResolutionError",
            Self::OutputValidation(_) => "OutputValidationError",
            Self::ContractViolation(_) => "ContractViolation",
            Self::DataMissing(_) => "DataMissingError",
            Self::Adapter { .. } => "AdapterError",
            Self::Media { .. } => "MediaError",
            Self::Config(_) => "ConfigError",
            Self::Io(_) => "IoError",
            Self::Json(_) => "JsonError",
        }
    }

    /// Render the error plus its source chain, one frame per line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            out.push_str("\ncaused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        out
    }
}

/// An element of the linear pipeline.
#[async_trait]
pub trait Phase: Send + Sync {
    fn name(&self) -> &'static str;

    /// Bump on any logic or contract change; invalidates prior succeeded
    /// state.
    fn version(&self) -> &'static str;

    /// Artifact keys read from the manifest.
    fn requires(&self) -> Vec<String>;

    /// Artifact keys this phase writes.
    fn provides(&self) -> Vec<String>;

    async fn run(
        &self,
        ctx: &RunContext,
        inputs: &ResolvedInputs,
        outputs: &ResolvedOutputs,
    ) -> Result<PhaseSuccess, PhaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_names_are_stable() {
        assert_eq!(
            PhaseError::InputResolution(String::new()).kind(),
            "InputResolutionError"
        );
        assert_eq!(
            PhaseError::ContractViolation(String::new()).kind(),
            "ContractViolation"
        );
        assert_eq!(PhaseError::adapter("x").kind(), "AdapterError");
    }

    #[test]
    fn chain_includes_sources() {
        let inner = anyhow::anyhow!("connection reset");
        let err = PhaseError::adapter_with("upload failed", inner);
        let chain = err.chain();
        assert!(chain.contains("upload failed"));
        assert!(chain.contains("connection reset"));
    }
}
