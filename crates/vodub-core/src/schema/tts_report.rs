//! Per-segment TTS synthesis report.
//!
//! The report is the ground truth `mix` uses to place segments: `final_ms`
//! is the real on-disk duration after trimming, rate adjustment and padding.

use serde::{Deserialize, Serialize};

/// Outcome of one segment's fit procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TtsSegmentStatus {
    /// Fits within budget at natural tempo.
    Success,
    /// Tempo applied to fit the budget.
    RateAdjusted,
    /// Spilled into the following gap via `allow_extend_ms`.
    Extended,
    /// Could not fit even with maximum adjustments.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsSegmentReport {
    pub utt_id: String,
    pub budget_ms: i64,
    pub raw_ms: i64,
    pub trimmed_ms: i64,
    pub final_ms: i64,
    pub rate: f64,
    pub status: TtsSegmentStatus,
    /// Workspace-relative path of the segment WAV.
    pub output_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsReport {
    pub audio_duration_ms: i64,
    pub segments_dir: String,
    pub total_segments: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub segments: Vec<TtsSegmentReport>,
}

impl TtsReport {
    pub fn new(audio_duration_ms: i64, segments_dir: &str, segments: Vec<TtsSegmentReport>) -> Self {
        let failed_count = segments
            .iter()
            .filter(|s| s.status == TtsSegmentStatus::Failed)
            .count();
        Self {
            audio_duration_ms,
            segments_dir: segments_dir.to_string(),
            total_segments: segments.len(),
            success_count: segments.len() - failed_count,
            failed_count,
            segments,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed_count == 0
    }

    pub fn failed(&self) -> impl Iterator<Item = &TtsSegmentReport> {
        self.segments
            .iter()
            .filter(|s| s.status == TtsSegmentStatus::Failed)
    }
}
