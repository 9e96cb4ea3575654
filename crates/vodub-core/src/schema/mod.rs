//! On-disk data-model contracts passed between phases.

pub mod dub;
pub mod subtitle;
pub mod tts_report;

pub use dub::{DubManifest, DubUtterance, TtsPolicy};
pub use subtitle::{
    AlignedSubtitle, AlignedUtterance, AudioInfo, EmotionInfo, EnSpeechRate, MtConstraints,
    MtInputLine, MtOutputLine, MtStats, SchemaInfo, SourceText, SpeechRate, SubtitleCue,
    SubtitleModel, SubtitleUtterance, TargetText, Word,
};
pub use tts_report::{TtsReport, TtsSegmentReport, TtsSegmentStatus};
