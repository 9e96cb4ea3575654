//! Speaker → voice resolution.
//!
//! Explicit assignments from the config win; unmapped speakers draw from a
//! gender-keyed default pool with a stable per-speaker index, so the same
//! speaker keeps the same voice across reruns.

use std::collections::BTreeMap;

const MALE_POOL: [&str; 4] = [
    "en_male_adam",
    "en_male_smith",
    "en_male_dryw",
    "en_male_bruce",
];
const FEMALE_POOL: [&str; 4] = [
    "en_female_sarah",
    "en_female_anna",
    "en_female_amanda",
    "en_female_candice",
];

fn stable_index(speaker: &str) -> usize {
    // `spk_{n}` carries its own stable index; anything else hashes bytes.
    let digits: String = speaker.chars().filter(char::is_ascii_digit).collect();
    if let Ok(n) = digits.parse::<usize>() {
        return n;
    }
    speaker.bytes().map(usize::from).sum()
}

pub fn resolve_voice(
    speaker: &str,
    gender: Option<&str>,
    overrides: Option<&BTreeMap<String, String>>,
) -> String {
    if let Some(voice) = overrides.and_then(|map| map.get(speaker)) {
        return voice.clone();
    }
    let pool: &[&str] = match gender.map(str::to_lowercase).as_deref() {
        Some("female") => &FEMALE_POOL,
        _ => &MALE_POOL,
    };
    pool[stable_index(speaker) % pool.len()].to_string()
}
