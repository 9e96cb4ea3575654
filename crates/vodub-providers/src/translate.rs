//! MT clients: OpenAI-style and Gemini-style chat completion with retry.
//!
//! Transient failures are retried up to three times with exponential
//! backoff inside the adapter; a `model not found / not supported` class of
//! error short-circuits immediately. A cross-engine fallback can be
//! configured but is off by default — mixing engines across attempts breaks
//! cross-utterance consistency.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{info, warn};

use vodub_core::ports::{PortError, Translator};
use vodub_core::settings::MtConfig;

const MAX_HTTP_RETRIES: u32 = 3;

/// Resolve the engine name: explicit config, then model-name prefix, then
/// the global default.
pub fn resolve_engine(explicit: Option<&str>, model: Option<&str>) -> String {
    if let Some(engine) = explicit {
        return engine.to_lowercase();
    }
    if let Some(model) = model {
        if model.starts_with("gemini") {
            return "gemini".to_string();
        }
        if model.starts_with("gpt") || model.starts_with("o1") {
            return "openai".to_string();
        }
    }
    "gemini".to_string()
}

fn is_model_missing_error(status: reqwest::StatusCode, body: &str) -> bool {
    status == reqwest::StatusCode::NOT_FOUND
        || body.contains("model not found")
        || body.contains("is not supported")
        || body.contains("does not exist")
}

async fn post_with_retry(
    build: impl Fn() -> reqwest::RequestBuilder,
    extract: impl Fn(&Value) -> Option<String>,
    label: &str,
) -> Result<String, PortError> {
    let mut backoff = Duration::from_secs(1);
    let mut last_error = String::new();

    for attempt in 0..MAX_HTTP_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
        let response = match build().send().await {
            Ok(response) => response,
            Err(e) => {
                last_error = format!("{label} request failed: {e}");
                warn!(attempt, error = %last_error, "translation call failed, retrying");
                continue;
            }
        };
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.is_success() {
            let value: Value = serde_json::from_str(&body).map_err(|e| {
                PortError::Permanent(format!("{label} returned non-JSON: {e}"))
            })?;
            return extract(&value).ok_or_else(|| {
                PortError::Permanent(format!(
                    "{label} response missing text: {}",
                    body.chars().take(300).collect::<String>()
                ))
            });
        }
        if is_model_missing_error(status, &body) {
            return Err(PortError::Permanent(format!(
                "{label} model error ({status}): {}",
                body.chars().take(300).collect::<String>()
            )));
        }
        if status.is_client_error() {
            return Err(PortError::Permanent(format!(
                "{label} rejected request ({status}): {}",
                body.chars().take(300).collect::<String>()
            )));
        }
        last_error = format!("{label} http {status}");
        warn!(attempt, error = %last_error, "transient translation failure");
    }

    Err(PortError::Transient(last_error))
}

/// OpenAI-style chat-completion translator. The prompt's first paragraph is
/// the system message; the rest is the user message.
pub struct OpenAiTranslator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
}

impl OpenAiTranslator {
    pub fn from_env(model: &str, temperature: f64) -> Result<Self, PortError> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| PortError::Credentials("OPENAI_API_KEY is not set".to_string()))?;
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("client builder with static options"),
            api_key,
            model: model.to_string(),
            temperature,
        })
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    async fn translate(&self, prompt: &str) -> Result<String, PortError> {
        let (system, user) = prompt
            .split_once("\n\n")
            .unwrap_or(("You are a professional subtitle translator.", prompt));
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        post_with_retry(
            || {
                self.client
                    .post("https://api.openai.com/v1/chat/completions")
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            |value| {
                value["choices"][0]["message"]["content"]
                    .as_str()
                    .map(|s| s.trim().to_string())
            },
            "openai",
        )
        .await
    }
}

/// Gemini-style generateContent translator.
pub struct GeminiTranslator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
}

impl GeminiTranslator {
    pub fn from_env(model: &str, temperature: f64) -> Result<Self, PortError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| PortError::Credentials("GEMINI_API_KEY is not set".to_string()))?;
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .expect("client builder with static options"),
            api_key,
            model: model.to_string(),
            temperature,
        })
    }
}

#[async_trait]
impl Translator for GeminiTranslator {
    async fn translate(&self, prompt: &str) -> Result<String, PortError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": self.temperature},
        });
        post_with_retry(
            || self.client.post(&url).json(&body),
            |value| {
                value["candidates"][0]["content"]["parts"][0]["text"]
                    .as_str()
                    .map(|s| s.trim().to_string())
            },
            "gemini",
        )
        .await
    }
}

/// Primary engine with an optional cross-engine fallback.
pub struct FallbackTranslator {
    primary: Arc<dyn Translator>,
    fallback: Option<Arc<dyn Translator>>,
}

#[async_trait]
impl Translator for FallbackTranslator {
    async fn translate(&self, prompt: &str) -> Result<String, PortError> {
        match self.primary.translate(prompt).await {
            Ok(text) => Ok(text),
            Err(primary_err) => {
                let Some(fallback) = &self.fallback else {
                    return Err(primary_err);
                };
                warn!(error = %primary_err, "primary engine failed, trying fallback");
                fallback.translate(prompt).await
            }
        }
    }
}

/// Build the translator stack from the phase config and environment.
pub fn build_translator(config: &MtConfig) -> Result<Arc<dyn Translator>, PortError> {
    let engine = resolve_engine(config.engine.as_deref(), config.model.as_deref());
    let primary: Arc<dyn Translator> = match engine.as_str() {
        "gemini" => {
            let model = config.model.clone().unwrap_or_else(|| "gemini-1.5-flash".to_string());
            let temperature = config.temperature.unwrap_or(0.4);
            info!(model, "translation engine: gemini");
            Arc::new(GeminiTranslator::from_env(&model, temperature)?)
        }
        "openai" => {
            let model = config.model.clone().unwrap_or_else(|| "gpt-4o-mini".to_string());
            let temperature = config.temperature.unwrap_or(0.3);
            info!(model, "translation engine: openai");
            Arc::new(OpenAiTranslator::from_env(&model, temperature)?)
        }
        other => {
            return Err(PortError::Permanent(format!(
                "unknown translation engine '{other}' (expected 'gemini' or 'openai')"
            )));
        }
    };

    if !config.fallback_enabled {
        return Ok(primary);
    }

    // The fallback is the other engine.
    let fallback: Option<Arc<dyn Translator>> = match engine.as_str() {
        "gemini" => {
            let model = config
                .fallback_model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string());
            match OpenAiTranslator::from_env(&model, 0.3) {
                Ok(t) => Some(Arc::new(t)),
                Err(e) => {
                    warn!(error = %e, "fallback enabled but unavailable");
                    None
                }
            }
        }
        _ => {
            let model = config
                .fallback_model
                .clone()
                .unwrap_or_else(|| "gemini-1.5-flash".to_string());
            match GeminiTranslator::from_env(&model, 0.4) {
                Ok(t) => Some(Arc::new(t)),
                Err(e) => {
                    warn!(error = %e, "fallback enabled but unavailable");
                    None
                }
            }
        }
    };
    if fallback.is_some() {
        warn!("cross-engine fallback enabled; output consistency may suffer");
    }
    Ok(Arc::new(FallbackTranslator { primary, fallback }))
}
