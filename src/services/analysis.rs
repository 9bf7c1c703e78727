use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use super::{AnalysisService, Verdict};
use crate::{config::AnalysisSettings, error::SessionError};

/// Builds the instruction sent with every batch of captures.
pub fn productivity_prompt(task: &str) -> String {
    format!(
        r#"The user said they want to be doing: {task}

The images are captures of the user's screens (and webcam, when present) taken a few seconds apart, oldest first.
Decide whether the user is making progress on that task by comparing them.

Signs of progress: code or text changing between captures, terminal or training output advancing, an AI assistant being prompted or its output reviewed, video lectures advancing, pages being scrolled while taking notes, or the user writing on paper at the desk.
Signs of distraction: identical screens with no activity in any capture, entertainment or social feeds in focus, a video playing with no work happening, or the user looking down at a phone.
Background audio is fine as long as work is visibly moving.

Respond with JSON only: {{"productive": "yes" or "no", "reason": "..."}}
Keep the reason to two short sentences, address the user as "you" and mention their task.
When productive, open with encouragement. When not, be gentle and unsure; they may be thinking."#
    )
}

/// Extracts the verdict from a model response.
///
/// Reads the outermost `{...}` as JSON; when that fails, falls back to looking
/// for `"productive": "yes"` anywhere in the text with an empty reason.
pub fn parse_verdict(raw: &str) -> Verdict {
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&raw[start..=end]) {
                let is_productive = map
                    .get("productive")
                    .and_then(Value::as_str)
                    .map(|value| value.trim().eq_ignore_ascii_case("yes"))
                    .unwrap_or(false);
                let reason = map
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Verdict {
                    is_productive,
                    reason,
                    raw: raw.to_string(),
                };
            }
        }
    }

    Verdict {
        is_productive: raw.to_lowercase().contains("\"productive\": \"yes"),
        reason: String::new(),
        raw: raw.to_string(),
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Vision model client for any OpenAI-compatible chat completions endpoint.
pub struct VisionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl VisionClient {
    /// Fails when a remote endpoint is configured without an API key.
    pub fn new(settings: &AnalysisSettings) -> std::result::Result<Self, SessionError> {
        let api_key = settings.resolved_api_key();
        if api_key.is_none() && !settings.is_local() {
            return Err(SessionError::Config(format!(
                "no API key for {}; set analysis.api_key or {}",
                settings.base_url, settings.api_key_env
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| SessionError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            api_key,
        })
    }

    fn request_body(&self, images: &[Vec<u8>], prompt: &str) -> Value {
        let mut content = vec![json!({ "type": "text", "text": prompt })];
        content.extend(images.iter().map(|png| {
            json!({
                "type": "image_url",
                "image_url": { "url": format!("data:image/png;base64,{}", STANDARD.encode(png)) }
            })
        }));

        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
        })
    }
}

#[async_trait]
impl AnalysisService for VisionClient {
    async fn analyze(&self, images: &[Vec<u8>], prompt: &str) -> Result<Verdict> {
        log::info!(
            "Sending {} capture(s) to {} ({})",
            images.len(),
            self.endpoint,
            self.model
        );

        let mut request = self.client.post(&self.endpoint).json(&self.request_body(images, prompt));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send request to vision endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Vision API error ({status}): {body}");
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse vision API response")?;

        let raw = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("Vision API returned no message content")?;

        log::debug!("Vision response: {raw}");
        Ok(parse_verdict(&raw))
    }
}
