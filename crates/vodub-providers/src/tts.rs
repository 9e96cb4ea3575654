//! TTS clients.
//!
//! The VolcEngine-style client streams newline-delimited JSON events:
//! `code == 0` events carry base64 audio chunks (and optionally per-sentence
//! timestamp data), `code == 20000000` terminates the stream, any other
//! positive code is an error. Raw PCM is wrapped into the cache's canonical
//! format: 24 kHz mono 16-bit WAV.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures_util::StreamExt;
use serde_json::{Value, json};
use tracing::debug;
use uuid::Uuid;

use vodub_core::ports::{PortError, SpeechSynthesizer, TtsRequest};

const VOLC_TTS_URL: &str = "https://openspeech.bytedance.com/api/v3/tts/unidirectional";
const END_CODE: i64 = 20_000_000;

/// Wrap raw PCM s16le samples into a WAV container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16) -> Result<Vec<u8>, PortError> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| PortError::Permanent(format!("wav writer: {e}")))?;
        for frame in pcm.chunks_exact(2) {
            let sample = i16::from_le_bytes([frame[0], frame[1]]);
            writer
                .write_sample(sample)
                .map_err(|e| PortError::Permanent(format!("wav write: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| PortError::Permanent(format!("wav finalize: {e}")))?;
    }
    Ok(cursor.into_inner())
}

/// Parse one stream event; returns decoded audio bytes, end-of-stream flag.
fn parse_event(line: &str) -> Result<(Option<Vec<u8>>, bool), PortError> {
    let event: Value = serde_json::from_str(line)
        .map_err(|e| PortError::Permanent(format!("TTS stream returned non-JSON event: {e}")))?;
    let code = event.get("code").and_then(Value::as_i64).unwrap_or(0);

    if code == END_CODE {
        return Ok((None, true));
    }
    if code > 0 {
        let message = event
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(PortError::Permanent(format!(
            "TTS provider error: code={code}, message={message}"
        )));
    }
    let audio = match event.get("data").and_then(Value::as_str) {
        Some(data) if !data.is_empty() => Some(
            BASE64
                .decode(data)
                .map_err(|e| PortError::Permanent(format!("TTS chunk base64: {e}")))?,
        ),
        _ => None,
    };
    Ok((audio, false))
}

#[derive(Debug, Clone)]
pub struct VolcTtsConfig {
    pub app_id: String,
    pub access_key: String,
    pub resource_id: String,
}

impl VolcTtsConfig {
    pub fn from_env(resource_id: &str) -> Result<Self, PortError> {
        let app_id = std::env::var("APP_ID")
            .map_err(|_| PortError::Credentials("APP_ID is not set".to_string()))?;
        let access_key = std::env::var("ACCESS_KEY")
            .map_err(|_| PortError::Credentials("ACCESS_KEY is not set".to_string()))?;
        Ok(Self {
            app_id,
            access_key,
            resource_id: resource_id.to_string(),
        })
    }
}

pub struct VolcTtsClient {
    config: VolcTtsConfig,
    client: reqwest::Client,
}

impl VolcTtsClient {
    pub fn new(config: VolcTtsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("client builder with static options"),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for VolcTtsClient {
    fn engine(&self) -> &str {
        "volcengine"
    }

    fn engine_version(&self) -> &str {
        &self.config.resource_id
    }

    async fn synthesize(&self, request: &TtsRequest) -> Result<Vec<u8>, PortError> {
        let mut audio_params = json!({
            "format": request.format,
            "sample_rate": request.sample_rate,
        });
        if let Value::Object(prosody) = &request.prosody {
            for (key, value) in prosody {
                audio_params[key] = value.clone();
            }
        }
        let body = json!({
            "user": {"uid": self.config.app_id},
            "req_params": {
                "text": request.text,
                "speaker": request.voice,
                "audio_params": audio_params,
            },
        });

        let response = self
            .client
            .post(VOLC_TTS_URL)
            .header("X-Api-App-Id", &self.config.app_id)
            .header("X-Api-Access-Key", &self.config.access_key)
            .header("X-Api-Resource-Id", &self.config.resource_id)
            .header("X-Api-Request-Id", Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| PortError::Transient(format!("TTS request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PortError::Permanent(format!(
                "TTS http {}",
                response.status()
            )));
        }

        let mut audio = Vec::new();
        let mut buffer = String::new();
        let mut ended = false;
        let mut stream = response.bytes_stream();
        let mut chunks = 0usize;

        'stream: while let Some(piece) = stream.next().await {
            let piece =
                piece.map_err(|e| PortError::Transient(format!("TTS stream read: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&piece));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);
                if line.is_empty() {
                    continue;
                }
                let (chunk, end) = parse_event(&line)?;
                if let Some(bytes) = chunk {
                    chunks += 1;
                    audio.extend_from_slice(&bytes);
                }
                if end {
                    ended = true;
                    break 'stream;
                }
            }
        }
        // A trailing event without a newline still counts.
        let tail = buffer.trim();
        if !ended && !tail.is_empty() {
            let (chunk, _) = parse_event(tail)?;
            if let Some(bytes) = chunk {
                chunks += 1;
                audio.extend_from_slice(&bytes);
            }
        }

        if audio.is_empty() {
            return Err(PortError::Permanent(
                "TTS stream produced no audio".to_string(),
            ));
        }
        debug!(chunks, bytes = audio.len(), "TTS stream collected");

        if request.format == "pcm" {
            pcm_to_wav(&audio, request.sample_rate, request.channels)
        } else {
            Ok(audio)
        }
    }
}

/// Azure alternative: single POST with an SSML body, WAV bytes back.
pub struct AzureTtsClient {
    key: String,
    region: String,
    client: reqwest::Client,
}

impl AzureTtsClient {
    pub fn from_env() -> Result<Self, PortError> {
        let key = std::env::var("AZURE_SPEECH_KEY")
            .map_err(|_| PortError::Credentials("AZURE_SPEECH_KEY is not set".to_string()))?;
        let region = std::env::var("AZURE_SPEECH_REGION")
            .map_err(|_| PortError::Credentials("AZURE_SPEECH_REGION is not set".to_string()))?;
        Ok(Self {
            key,
            region,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("client builder with static options"),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for AzureTtsClient {
    fn engine(&self) -> &str {
        "azure"
    }

    fn engine_version(&self) -> &str {
        "v1"
    }

    async fn synthesize(&self, request: &TtsRequest) -> Result<Vec<u8>, PortError> {
        let url = format!(
            "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
            self.region
        );
        let escaped = request
            .text
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        let ssml = format!(
            "<speak version='1.0' xml:lang='{lang}'><voice name='{voice}'>{escaped}</voice></speak>",
            lang = request.language,
            voice = request.voice,
        );
        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", "riff-24khz-16bit-mono-pcm")
            .body(ssml)
            .send()
            .await
            .map_err(|e| PortError::Transient(format!("Azure TTS request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(PortError::Permanent(format!(
                "Azure TTS http {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PortError::Transient(format!("Azure TTS body read: {e}")))?;
        Ok(bytes.to_vec())
    }
}
