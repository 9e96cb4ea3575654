//! The nine pipeline phases: `demux → sep → asr → sub → mt → align → tts →
//! mix → burn`.
//!
//! Each phase owns its adapters: by default they are resolved from the
//! environment at phase start (so credentials are only required for phases
//! that actually run), and every phase accepts injected ports for tests.

pub mod align;
pub mod asr;
pub mod burn;
pub mod demux;
pub mod mix;
pub mod mt;
pub mod sub;
pub mod sep;
pub mod tts;
pub mod voices;

use std::sync::Arc;

use vodub_core::phase::{Phase, PhaseError};
use vodub_core::ports::{MediaProcessor, PortError};

pub use align::AlignPhase;
pub use asr::AsrPhase;
pub use burn::BurnPhase;
pub use demux::DemuxPhase;
pub use mix::MixPhase;
pub use mt::MtPhase;
pub use sub::SubPhase;
pub use sep::SepPhase;
pub use tts::TtsPhase;

/// All phases in pipeline order.
pub fn all_phases() -> Vec<Arc<dyn Phase>> {
    vec![
        Arc::new(DemuxPhase::new()),
        Arc::new(SepPhase::new()),
        Arc::new(AsrPhase::new()),
        Arc::new(SubPhase::new()),
        Arc::new(MtPhase::new()),
        Arc::new(AlignPhase::new()),
        Arc::new(TtsPhase::new()),
        Arc::new(MixPhase::new()),
        Arc::new(BurnPhase::new()),
    ]
}

/// Map a port failure into the phase error taxonomy: missing credentials
/// are configuration errors, everything else is an adapter failure.
pub(crate) fn adapter_err(e: PortError) -> PhaseError {
    match e {
        PortError::Credentials(msg) => PhaseError::Config(msg),
        other => PhaseError::adapter(other.to_string()),
    }
}

/// Same mapping for the local media tool.
pub(crate) fn media_err(e: PortError) -> PhaseError {
    PhaseError::media(e.to_string())
}

/// Resolve the injected media port or discover ffmpeg on PATH.
pub(crate) fn resolve_media(
    injected: Option<&Arc<dyn MediaProcessor>>,
) -> Result<Arc<dyn MediaProcessor>, PhaseError> {
    match injected {
        Some(media) => Ok(Arc::clone(media)),
        None => Ok(Arc::new(
            vodub_media::FfmpegMediaProcessor::discover().map_err(media_err)?,
        )),
    }
}
