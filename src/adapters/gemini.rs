use super::openai::MISSING_KEY;
use super::{ProviderClient, WireMessage};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Content,
}

fn gemini_role(role: &str) -> &'static str {
    match role {
        "assistant" => "model",
        _ => "user",
    }
}

/// Generative-content client for Gemini.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(http: Client, base_url: &str, api_key: Option<&str>, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(ToString::to_string),
            timeout,
        }
    }

    pub async fn complete(&self, model: &str, messages: &[WireMessage]) -> Result<String, String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(MISSING_KEY.to_string());
        };

        let request = GenerateContentRequest {
            contents: messages
                .iter()
                .map(|message| Content {
                    role: Some(gemini_role(&message.role).to_string()),
                    parts: vec![Part {
                        text: Some(message.content.clone()),
                    }],
                })
                .collect(),
        };

        let response = self
            .http
            .post(format!("{}/v1beta/models/{}:generateContent", self.base_url, model))
            .timeout(self.timeout)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| error.to_string())?;

        let status = response.status();
        let body = response.text().await.map_err(|error| error.to_string())?;
        if !status.is_success() {
            tracing::warn!(%status, model, "gemini request rejected");
            return Err(ProviderClient::error_message_from_body(status, &body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body).map_err(|error| error.to_string())?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .map(|candidate| {
                candidate
                    .content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect()
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err("no text in response".to_string());
        }
        Ok(text)
    }
}
