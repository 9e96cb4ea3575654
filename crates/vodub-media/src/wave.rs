//! Sample-level WAV operations on the pipeline's canonical format
//! (mono 16-bit PCM).
//!
//! Everything here is deterministic and file-local: duration probing,
//! silence trimming and padding for TTS segments, and placing segments onto
//! the episode timeline for the mix phase.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use thiserror::Error;

/// Amplitude below which a sample counts as silence when trimming.
pub const TRIM_THRESHOLD: i16 = 330; // ≈1% of full scale

#[derive(Debug, Error)]
pub enum WaveError {
    #[error("wav error at {path}: {source}")]
    Hound {
        path: String,
        #[source]
        source: hound::Error,
    },

    #[error("{0}")]
    Unsupported(String),
}

fn hound_err(path: &Path) -> impl FnOnce(hound::Error) -> WaveError + '_ {
    move |source| WaveError::Hound {
        path: path.display().to_string(),
        source,
    }
}

/// Canonical spec for a given sample rate: mono 16-bit PCM.
pub fn canonical_spec(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn read_mono_i16(path: &Path) -> Result<(WavSpec, Vec<i16>), WaveError> {
    let mut reader = WavReader::open(path).map_err(hound_err(path))?;
    let spec = reader.spec();
    if spec.bits_per_sample != 16 || spec.sample_format != SampleFormat::Int {
        return Err(WaveError::Unsupported(format!(
            "{}: expected 16-bit PCM, got {} bits {:?}",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format
        )));
    }
    let channels = usize::from(spec.channels);
    let samples: Result<Vec<i16>, _> = reader.samples::<i16>().collect();
    let samples = samples.map_err(hound_err(path))?;
    if channels == 1 {
        return Ok((spec, samples));
    }
    // Downmix interleaved channels by averaging.
    let mono: Vec<i16> = samples
        .chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|s| i32::from(*s)).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect();
    let mut mono_spec = spec;
    mono_spec.channels = 1;
    Ok((mono_spec, mono))
}

fn write_mono_i16(path: &Path, sample_rate: u32, samples: &[i16]) -> Result<(), WaveError> {
    let mut writer =
        WavWriter::create(path, canonical_spec(sample_rate)).map_err(hound_err(path))?;
    for sample in samples {
        writer.write_sample(*sample).map_err(hound_err(path))?;
    }
    writer.finalize().map_err(hound_err(path))
}

fn ms_to_samples(ms: i64, sample_rate: u32) -> usize {
    ((ms.max(0) as u64) * u64::from(sample_rate) / 1000) as usize
}

/// Duration of a WAV file in milliseconds.
pub fn duration_ms(path: &Path) -> Result<i64, WaveError> {
    let reader = WavReader::open(path).map_err(hound_err(path))?;
    let spec = reader.spec();
    let frames = i64::from(reader.duration());
    Ok(frames * 1000 / i64::from(spec.sample_rate))
}

/// Write `ms` of digital silence.
pub fn write_silence(path: &Path, ms: i64, sample_rate: u32) -> Result<(), WaveError> {
    let samples = vec![0i16; ms_to_samples(ms, sample_rate)];
    write_mono_i16(path, sample_rate, &samples)
}

/// Trim leading and trailing silence. Returns the trimmed duration in
/// milliseconds. An all-silent input collapses to an empty clip.
pub fn trim_silence(input: &Path, output: &Path) -> Result<i64, WaveError> {
    let (spec, samples) = read_mono_i16(input)?;
    let first = samples.iter().position(|s| s.abs() > TRIM_THRESHOLD);
    let trimmed: &[i16] = match first {
        Some(start) => {
            let end = samples
                .iter()
                .rposition(|s| s.abs() > TRIM_THRESHOLD)
                .expect("first implies last");
            &samples[start..=end]
        }
        None => &[],
    };
    write_mono_i16(output, spec.sample_rate, trimmed)?;
    Ok(trimmed.len() as i64 * 1000 / i64::from(spec.sample_rate))
}

/// Pad with trailing silence to exactly `target_ms`. A clip already at or
/// over the target is copied unchanged.
pub fn pad_to(input: &Path, output: &Path, target_ms: i64) -> Result<(), WaveError> {
    let (spec, mut samples) = read_mono_i16(input)?;
    let target = ms_to_samples(target_ms, spec.sample_rate);
    if samples.len() < target {
        samples.resize(target, 0);
    }
    write_mono_i16(output, spec.sample_rate, &samples)
}

/// A clip to place on the episode timeline.
#[derive(Debug, Clone)]
pub struct TimelineSegment {
    pub path: std::path::PathBuf,
    pub start_ms: i64,
}

/// Assemble segments onto a silent timeline of `total_ms`. Overlapping
/// samples are summed with saturation; positions past the end are clipped.
pub fn assemble_timeline(
    segments: &[TimelineSegment],
    total_ms: i64,
    sample_rate: u32,
    output: &Path,
) -> Result<(), WaveError> {
    let total = ms_to_samples(total_ms, sample_rate);
    let mut timeline = vec![0i32; total];

    for segment in segments {
        let (spec, samples) = read_mono_i16(&segment.path)?;
        if spec.sample_rate != sample_rate {
            return Err(WaveError::Unsupported(format!(
                "{}: sample rate {} != timeline rate {sample_rate}",
                segment.path.display(),
                spec.sample_rate
            )));
        }
        let offset = ms_to_samples(segment.start_ms, sample_rate);
        for (i, sample) in samples.iter().enumerate() {
            let Some(slot) = timeline.get_mut(offset + i) else {
                break;
            };
            *slot += i32::from(*sample);
        }
    }

    let clamped: Vec<i16> = timeline
        .into_iter()
        .map(|s| s.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16)
        .collect();
    write_mono_i16(output, sample_rate, &clamped)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 24_000;

    fn write_tone(path: &Path, lead_silence_ms: i64, tone_ms: i64, tail_silence_ms: i64) {
        let mut samples = vec![0i16; ms_to_samples(lead_silence_ms, SR)];
        let tone_len = ms_to_samples(tone_ms, SR);
        for i in 0..tone_len {
            let v = if i % 2 == 0 { 8000 } else { -8000 };
            samples.push(v);
        }
        samples.extend(vec![0i16; ms_to_samples(tail_silence_ms, SR)]);
        write_mono_i16(path, SR, &samples).unwrap();
    }

    #[test]
    fn duration_is_exact_for_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.wav");
        write_silence(&path, 700, SR).unwrap();
        assert_eq!(duration_ms(&path).unwrap(), 700);
    }

    #[test]
    fn trim_removes_leading_and_trailing_silence() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_tone(&input, 200, 500, 300);
        let trimmed = trim_silence(&input, &output).unwrap();
        assert!((trimmed - 500).abs() <= 2);
    }

    #[test]
    fn trim_of_pure_silence_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_silence(&input, 400, SR).unwrap();
        assert_eq!(trim_silence(&input, &output).unwrap(), 0);
    }

    #[test]
    fn pad_reaches_exact_target() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_tone(&input, 0, 300, 0);
        pad_to(&input, &output, 700).unwrap();
        assert_eq!(duration_ms(&output).unwrap(), 700);
    }

    #[test]
    fn pad_never_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.wav");
        let output = dir.path().join("out.wav");
        write_tone(&input, 0, 900, 0);
        pad_to(&input, &output, 700).unwrap();
        assert_eq!(duration_ms(&output).unwrap(), 900);
    }

    #[test]
    fn timeline_places_segments_at_their_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let seg = dir.path().join("seg.wav");
        write_tone(&seg, 0, 100, 0);
        let out = dir.path().join("timeline.wav");
        assemble_timeline(
            &[
                TimelineSegment {
                    path: seg.clone(),
                    start_ms: 500,
                },
                TimelineSegment {
                    path: seg.clone(),
                    start_ms: 1500,
                },
            ],
            2000,
            SR,
            &out,
        )
        .unwrap();
        assert_eq!(duration_ms(&out).unwrap(), 2000);

        let (_, samples) = read_mono_i16(&out).unwrap();
        // Silence before the first clip, audio at 500 ms, silence between.
        assert_eq!(samples[ms_to_samples(250, SR)], 0);
        assert_ne!(samples[ms_to_samples(520, SR)], 0);
        assert_eq!(samples[ms_to_samples(1200, SR)], 0);
        assert_ne!(samples[ms_to_samples(1520, SR)], 0);
    }

    #[test]
    fn timeline_clips_segments_past_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let seg = dir.path().join("seg.wav");
        write_tone(&seg, 0, 500, 0);
        let out = dir.path().join("timeline.wav");
        assemble_timeline(
            &[TimelineSegment {
                path: seg,
                start_ms: 800,
            }],
            1000,
            SR,
            &out,
        )
        .unwrap();
        assert_eq!(duration_ms(&out).unwrap(), 1000);
    }
}
