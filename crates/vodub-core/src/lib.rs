//! Core of the vodub dubbing pipeline: the phase engine, the data-model
//! contracts that pass between phases, and the domain logic for subtitles,
//! translation budgeting, alignment and TTS planning.
//!
//! Adapter crates (`vodub-media`, `vodub-providers`) implement the port
//! traits defined here; `vodub-phases` wires them into the nine pipeline
//! phases; `vodub-cli` is the composition root.

pub mod align;
pub mod atomic;
pub mod fingerprint;
pub mod layout;
pub mod manifest;
pub mod phase;
pub mod ports;
pub mod runner;
pub mod schema;
pub mod settings;
pub mod subtitle;
pub mod translate;
pub mod tts;

pub use manifest::{
    ArtifactRecord, ErrorInfo, Manifest, ManifestError, PhaseRecord, PhaseStatus, PhaseUpdate,
};
pub use phase::{
    Phase, PhaseError, PhaseSuccess, ResolvedInputs, ResolvedOutputs, RunContext,
};
pub use runner::{BlessOutcome, PhaseRunner, RunnerError};
pub use settings::{PipelineConfig, config_fingerprint};

// Silence unused dev-dependency warnings until mock-based tests grow
#[cfg(test)]
use mockall as _;
#[cfg(test)]
use tokio_test as _;
