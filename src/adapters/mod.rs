pub mod gemini;
pub mod line_buffer;
pub mod ollama;
pub mod openai;

use crate::config::AppConfig;
use crate::errors::AppResult;
use crate::models::{ChatReply, ChatTurn, Provider, ReplyFallback};
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

pub use gemini::GeminiClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// Cap on output tokens for the cloud providers.
pub const CLOUD_MAX_TOKENS: u32 = 200;

/// The reply of any backend, seen as a sequence of text fragments.
///
/// Streaming backends yield one fragment per decoded line; single-shot
/// backends yield exactly one complete string. Either way the fragments
/// concatenated in order form the final reply. The sequence is lazy and can
/// only be consumed once.
pub struct ReplyStream {
    inner: BoxStream<'static, String>,
}

impl ReplyStream {
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = String> + Send + 'static,
    {
        Self { inner: stream.boxed() }
    }

    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = String> + Send + 'static,
    {
        Self::from_stream(stream::once(future))
    }

    pub fn once(text: impl Into<String>) -> Self {
        Self::from_stream(stream::iter([text.into()]))
    }

    pub async fn next_fragment(&mut self) -> Option<String> {
        self.inner.next().await
    }

    pub async fn collect_text(self) -> String {
        self.inner
            .fold(String::new(), |mut text, fragment| async move {
                text.push_str(&fragment);
                text
            })
            .await
    }
}

impl Stream for ReplyStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ReplyStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyStream").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

impl WireMessage {
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }
}

pub fn wire_messages(history: &[ChatTurn]) -> Vec<WireMessage> {
    history
        .iter()
        .map(|turn| WireMessage {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        })
        .collect()
}

/// Formats a cloud outcome the way it is shown inline in the chat.
pub fn cloud_reply_text(provider: Provider, outcome: Result<String, String>) -> String {
    match outcome {
        Ok(text) => text,
        Err(message) => format!("[{} error: {}]", provider.display_name(), message),
    }
}

/// Routes calls to the backend of the requested provider.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    ollama: OllamaClient,
    openai: OpenAiClient,
    gemini: GeminiClient,
}

impl ProviderClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        // No client-wide read timeout: each call bounds its own wait.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            ollama: OllamaClient::new(http.clone(), config),
            openai: OpenAiClient::new(
                http.clone(),
                &config.openai_url,
                config.credentials.for_provider(Provider::OpenAi),
                config.cloud_timeout,
            ),
            gemini: GeminiClient::new(
                http,
                &config.gemini_url,
                config.credentials.for_provider(Provider::Gemini),
                config.cloud_timeout,
            ),
        })
    }

    pub fn ollama(&self) -> &OllamaClient {
        &self.ollama
    }

    /// Single prompt in, fragment sequence out.
    pub fn generate(&self, provider: Provider, model: &str, prompt: &str) -> ReplyStream {
        tracing::debug!(provider = provider.as_str(), model, "generate");
        match provider {
            Provider::Local => self.ollama.stream_generate(model, prompt),
            Provider::OpenAi => {
                let client = self.openai.clone();
                let (model, prompt) = (model.to_string(), prompt.to_string());
                ReplyStream::from_future(async move {
                    let outcome = client.complete(&model, &[WireMessage::user(&prompt)]).await;
                    cloud_reply_text(Provider::OpenAi, outcome)
                })
            }
            Provider::Gemini => {
                let client = self.gemini.clone();
                let (model, prompt) = (model.to_string(), prompt.to_string());
                ReplyStream::from_future(async move {
                    let outcome = client.complete(&model, &[WireMessage::user(&prompt)]).await;
                    cloud_reply_text(Provider::Gemini, outcome)
                })
            }
        }
    }

    /// Full history in, one complete reply plus elapsed time out.
    pub async fn chat(&self, provider: Provider, model: &str, history: &[ChatTurn]) -> ChatReply {
        tracing::debug!(provider = provider.as_str(), model, turns = history.len(), "chat");
        let started = Instant::now();
        let outcome = match provider {
            Provider::Local => return self.ollama.chat(model, history).await,
            Provider::OpenAi => self.openai.complete(model, &wire_messages(history)).await,
            Provider::Gemini => self.gemini.complete(model, &wire_messages(history)).await,
        };
        let fallback = outcome.is_err().then_some(ReplyFallback::RequestFailed);
        ChatReply {
            content: cloud_reply_text(provider, outcome),
            elapsed: started.elapsed(),
            fallback,
        }
    }

    /// Reads an error payload of the shape `{"error": {"message": ...}}`,
    /// which OpenAI, Gemini and Ollama all share closely enough.
    pub(crate) fn error_message_from_body(status: reqwest::StatusCode, body: &str) -> String {
        let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
        let message = parsed.as_ref().and_then(|value| {
            let error = value.get("error")?;
            error
                .get("message")
                .and_then(|message| message.as_str())
                .or_else(|| error.as_str())
                .map(ToString::to_string)
        });
        match message {
            Some(message) if !message.trim().is_empty() => message,
            _ => format!("HTTP {}", status),
        }
    }
}
