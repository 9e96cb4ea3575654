//! Doubao-style ASR client: submit + poll.
//!
//! The provider reports business status in the `X-Api-Status-Code` response
//! header (body can be empty on submit). Four codes are acceptable; a
//! missing header is a hard error so a silently-degraded deployment never
//! passes. Polling runs at a fixed interval until the response carries
//! utterances, a terminal error status appears anywhere in the result, or
//! the deadline fires.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};
use uuid::Uuid;

use vodub_core::ports::{AsrRequest, PortError, SpeechRecognizer};

const SUBMIT_URL: &str = "https://openspeech.bytedance.com/api/v3/auc/bigmodel/submit";
const QUERY_URL: &str = "https://openspeech.bytedance.com/api/v3/auc/bigmodel/query";
const RESOURCE_ID: &str = "volc.seedasr.auc";

const OK_CODES: [&str; 4] = ["20000000", "20000001", "20000002", "20000003"];
const ERROR_STATUSES: [&str; 5] = ["failed", "error", "timeout", "cancelled", "rejected"];

#[derive(Debug, Clone)]
pub struct DoubaoAsrConfig {
    pub app_id: String,
    pub access_token: String,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl DoubaoAsrConfig {
    pub fn from_env(poll_interval_s: f64, max_wait_s: u64) -> Result<Self, PortError> {
        let app_id = std::env::var("DOUBAO_APPID")
            .map_err(|_| PortError::Credentials("DOUBAO_APPID is not set".to_string()))?;
        let access_token = std::env::var("DOUBAO_ACCESS_TOKEN")
            .map_err(|_| PortError::Credentials("DOUBAO_ACCESS_TOKEN is not set".to_string()))?;
        Ok(Self {
            app_id,
            access_token,
            poll_interval: Duration::from_secs_f64(poll_interval_s.max(0.1)),
            max_wait: Duration::from_secs(max_wait_s),
        })
    }
}

pub struct DoubaoAsrClient {
    config: DoubaoAsrConfig,
    client: reqwest::Client,
}

/// Guess the provider audio-format tag from a URL or path.
pub fn guess_audio_format(url_or_path: &str) -> &'static str {
    let lower = url_or_path.to_lowercase();
    // Query strings on presigned URLs hide the extension; check the path part.
    let path = lower.split('?').next().unwrap_or(&lower);
    for (ext, tag) in [
        (".mp3", "mp3"),
        (".wav", "wav"),
        (".m4a", "m4a"),
        (".aac", "aac"),
        (".ogg", "ogg"),
        (".opus", "ogg"),
    ] {
        if path.ends_with(ext) {
            return tag;
        }
    }
    "wav"
}

/// True when any nested `status` field carries a documented error state.
pub fn has_terminal_error(response: &Value) -> Option<String> {
    fn status_of(value: &Value) -> Option<String> {
        let status = value.get("status")?.as_str()?.to_lowercase();
        ERROR_STATUSES.contains(&status.as_str()).then_some(status)
    }

    if let Some(status) = status_of(response) {
        return Some(status);
    }
    match response.get("result") {
        Some(result @ Value::Object(_)) => status_of(result),
        Some(Value::Array(items)) => items.iter().find_map(status_of),
        _ => None,
    }
}

/// True when the response carries utterances, i.e. recognition finished.
pub fn has_utterances(response: &Value) -> bool {
    match response.get("result") {
        Some(result @ Value::Object(_)) => result
            .get("utterances")
            .and_then(Value::as_array)
            .is_some_and(|u| !u.is_empty()),
        Some(Value::Array(items)) => items.iter().any(|item| {
            item.get("utterances")
                .and_then(Value::as_array)
                .is_some_and(|u| !u.is_empty())
        }),
        _ => false,
    }
}

impl DoubaoAsrClient {
    pub fn new(config: DoubaoAsrConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("client builder with static options"),
        }
    }

    fn headers(&self, request_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("X-Api-App-Key", self.config.app_id.clone()),
            ("X-Api-Access-Key", self.config.access_token.clone()),
            ("X-Api-Resource-Id", RESOURCE_ID.to_string()),
            ("X-Api-Request-Id", request_id.to_string()),
            ("X-Api-Sequence", "-1".to_string()),
        ]
    }

    fn check_status_header(
        response: &reqwest::Response,
        operation: &str,
    ) -> Result<(), PortError> {
        let status_code = response
            .headers()
            .get("X-Api-Status-Code")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let message = response
            .headers()
            .get("X-Api-Message")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        match status_code {
            None => Err(PortError::Permanent(format!(
                "{operation} returned no X-Api-Status-Code header (http {})",
                response.status()
            ))),
            Some(code) if OK_CODES.contains(&code.as_str()) => Ok(()),
            Some(code) => Err(PortError::Permanent(format!(
                "{operation} failed: X-Api-Status-Code={code}, X-Api-Message={message}"
            ))),
        }
    }

    /// Submit the transcription task; returns the request id to poll with.
    pub async fn submit(&self, request: &AsrRequest) -> Result<String, PortError> {
        let request_id = Uuid::new_v4().to_string();
        let mut req_section = json!({"model_name": request.preset});
        if !request.hotwords.is_empty() {
            req_section["corpus"] = json!({"hot_words": request.hotwords.join(",")});
        }
        let body = json!({
            "user": {"uid": self.config.app_id},
            "audio": {
                "url": request.audio_url,
                "format": request.audio_format,
                "language": request.language,
                "rate": 16_000,
                "bits": 16,
                "channel": 1,
            },
            "request": req_section,
        });

        let mut builder = self.client.post(SUBMIT_URL).json(&body);
        for (name, value) in self.headers(&request_id) {
            builder = builder.header(name, value);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| PortError::Transient(format!("ASR submit failed: {e}")))?;
        if response.status().as_u16() >= 400 {
            return Err(PortError::Permanent(format!(
                "ASR submit http {}",
                response.status()
            )));
        }
        Self::check_status_header(&response, "ASR submit")?;
        Ok(request_id)
    }

    pub async fn query(&self, request_id: &str) -> Result<Value, PortError> {
        let mut builder = self.client.post(QUERY_URL).json(&json!({}));
        for (name, value) in self.headers(request_id) {
            builder = builder.header(name, value);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| PortError::Transient(format!("ASR query failed: {e}")))?;
        if response.status().as_u16() >= 400 {
            return Err(PortError::Permanent(format!(
                "ASR query http {}",
                response.status()
            )));
        }
        Self::check_status_header(&response, "ASR query")?;
        response
            .json()
            .await
            .map_err(|e| PortError::Permanent(format!("ASR query returned non-JSON: {e}")))
    }

    pub async fn submit_and_poll(&self, request: &AsrRequest) -> Result<Value, PortError> {
        info!(url = %request.audio_url, preset = %request.preset, "submitting ASR task");
        let request_id = self.submit(request).await?;
        info!(request_id, "ASR task submitted, polling");

        let deadline = tokio::time::Instant::now() + self.config.max_wait;
        let mut polls = 0u32;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(PortError::Timeout(format!(
                    "ASR polling exceeded {}s after {polls} polls",
                    self.config.max_wait.as_secs()
                )));
            }
            polls += 1;
            let response = self.query(&request_id).await?;

            if has_utterances(&response) {
                info!(polls, "ASR task completed");
                return Ok(response);
            }
            if let Some(status) = has_terminal_error(&response) {
                return Err(PortError::Permanent(format!(
                    "ASR task ended with status '{status}'"
                )));
            }
            debug!(polls, "ASR still processing");
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

#[async_trait]
impl SpeechRecognizer for DoubaoAsrClient {
    async fn transcribe(&self, request: &AsrRequest) -> Result<Value, PortError> {
        self.submit_and_poll(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_guess_handles_presigned_urls() {
        assert_eq!(guess_audio_format("https://h/b/a.wav?X-Sig=abc"), "wav");
        assert_eq!(guess_audio_format("/local/a.mp3"), "mp3");
        assert_eq!(guess_audio_format("mystery"), "wav");
        assert_eq!(guess_audio_format("a.opus"), "ogg");
    }

    #[test]
    fn utterance_detection_covers_both_result_shapes() {
        let object = json!({"result": {"utterances": [{"text": "好"}]}});
        assert!(has_utterances(&object));
        let array = json!({"result": [{"utterances": [{"text": "好"}]}]});
        assert!(has_utterances(&array));
        let empty = json!({"result": {"utterances": []}});
        assert!(!has_utterances(&empty));
        let processing = json!({"result": {"status": "processing"}});
        assert!(!has_utterances(&processing));
    }

    #[test]
    fn terminal_error_detection_is_nested() {
        assert_eq!(
            has_terminal_error(&json!({"status": "Failed"})),
            Some("failed".to_string())
        );
        assert_eq!(
            has_terminal_error(&json!({"result": {"status": "timeout"}})),
            Some("timeout".to_string())
        );
        assert_eq!(
            has_terminal_error(&json!({"result": [{"status": "cancelled"}]})),
            Some("cancelled".to_string())
        );
        assert_eq!(has_terminal_error(&json!({"result": {"status": "processing"}})), None);
    }
}
