//! Workspace layout: the fixed artifact key → path table and workspace
//! derivation from the episode video path.

use std::path::{Path, PathBuf};

/// Derive the episode workspace from its video path:
/// `<dir>/<stem>.<ext>` → `<dir>/dub/<stem>/`.
pub fn workspace_for(video_path: &Path) -> PathBuf {
    let parent = video_path.parent().unwrap_or_else(|| Path::new("."));
    let stem = video_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("episode");
    parent.join("dub").join(stem)
}

/// Series-level dictionary directory: `<dir>/dub/dict/` next to the episode
/// workspaces, shared across episodes of the series.
pub fn dict_dir_for(workspace: &Path) -> PathBuf {
    workspace
        .parent()
        .map_or_else(|| PathBuf::from("dict"), |dub| dub.join("dict"))
}

/// Default shared TTS cache directory: `<dir>/dub/cache/tts/`.
pub fn tts_cache_dir_for(workspace: &Path) -> PathBuf {
    workspace
        .parent()
        .map_or_else(|| PathBuf::from("cache/tts"), |dub| dub.join("cache").join("tts"))
}

/// Workspace-relative path for an artifact key. `{stem}` expands to the
/// workspace directory name.
///
/// Unknown keys fall back to `domain/name` so a new phase can publish
/// without touching this table, though every shipped key is listed.
pub fn artifact_relpath(key: &str, stem: &str) -> String {
    match key {
        "demux.audio" => format!("audio/{stem}.wav"),
        "sep.vocals" => "audio/vocals.wav".to_string(),
        "sep.accompaniment" => "audio/accompaniment.wav".to_string(),
        "asr.raw_response" => "subs/asr-raw-response.json".to_string(),
        "sub.subtitle_model" => "subs/subtitle.model.json".to_string(),
        "sub.zh_srt" => "subs/zh.srt".to_string(),
        "mt.mt_input" => "subs/mt_input.jsonl".to_string(),
        "mt.mt_output" => "subs/mt_output.jsonl".to_string(),
        "align.subtitle_align" => "subs/subtitle.align.json".to_string(),
        "align.en_srt" => "subs/en.srt".to_string(),
        "align.dub_manifest" => "dub/dub.model.json".to_string(),
        "tts.report" => "tts/tts_report.json".to_string(),
        "tts.speech" => "audio/dub-speech.wav".to_string(),
        "mix.audio" => "audio/mix.wav".to_string(),
        "burn.video" => format!("{stem}-dubbed.mp4"),
        other => {
            let (domain, name) = other.split_once('.').unwrap_or(("misc", other));
            format!("{domain}/{name}")
        }
    }
}

/// Per-utterance TTS segment path, relative to the workspace.
pub fn tts_segment_relpath(utt_id: &str) -> String {
    format!("tts/seg_{utt_id}.wav")
}

/// Guess the artifact kind tag from the file extension.
pub fn artifact_kind(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("json") => "json",
        Some("jsonl") => "jsonl",
        Some("srt") => "srt",
        Some("wav") => "wav",
        Some("mp4") => "mp4",
        Some("mp3") => "mp3",
        _ => "file",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_is_dub_subdir_next_to_video() {
        let ws = workspace_for(Path::new("/videos/series/1.mp4"));
        assert_eq!(ws, PathBuf::from("/videos/series/dub/1"));
    }

    #[test]
    fn dict_dir_is_shared_across_episodes() {
        let ws = workspace_for(Path::new("/videos/series/1.mp4"));
        assert_eq!(dict_dir_for(&ws), PathBuf::from("/videos/series/dub/dict"));
        let ws2 = workspace_for(Path::new("/videos/series/2.mp4"));
        assert_eq!(dict_dir_for(&ws2), dict_dir_for(&ws));
    }

    #[test]
    fn stem_expands_in_templates() {
        assert_eq!(artifact_relpath("demux.audio", "ep01"), "audio/ep01.wav");
        assert_eq!(artifact_relpath("burn.video", "ep01"), "ep01-dubbed.mp4");
        assert_eq!(
            artifact_relpath("sub.subtitle_model", "ep01"),
            "subs/subtitle.model.json"
        );
    }

    #[test]
    fn unknown_keys_fall_back_to_domain_slash_name() {
        assert_eq!(artifact_relpath("extra.thing", "x"), "extra/thing");
    }

    #[test]
    fn kind_follows_extension() {
        assert_eq!(artifact_kind(Path::new("a/b.json")), "json");
        assert_eq!(artifact_kind(Path::new("a/b.srt")), "srt");
        assert_eq!(artifact_kind(Path::new("a/b.bin")), "file");
    }
}
