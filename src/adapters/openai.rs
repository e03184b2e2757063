use super::{ProviderClient, WireMessage, CLOUD_MAX_TOKENS};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MISSING_KEY: &str = "Missing API key";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [WireMessage],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions client for OpenAI.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(http: Client, base_url: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
            timeout,
        }
    }

    /// Returns the first choice's content, or a short error description.
    pub async fn complete(&self, model: &str, messages: &[WireMessage]) -> Result<String, String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(MISSING_KEY.to_string());
        };

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .timeout(self.timeout)
            .bearer_auth(api_key)
            .json(&CompletionRequest {
                model,
                messages,
                max_tokens: CLOUD_MAX_TOKENS,
            })
            .send()
            .await
            .map_err(|error| error.to_string())?;

        let status = response.status();
        let body = response.text().await.map_err(|error| error.to_string())?;
        if !status.is_success() {
            tracing::warn!(%status, model, "openai request rejected");
            return Err(ProviderClient::error_message_from_body(status, &body));
        }

        let parsed: CompletionResponse = serde_json::from_str(&body).map_err(|error| error.to_string())?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or_else(|| "response contained no choices".to_string())
    }
}
