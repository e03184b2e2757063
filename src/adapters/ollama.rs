use super::line_buffer::LineBuffer;
use super::{wire_messages, ProviderClient, ReplyStream, WireMessage};
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{ChatReply, ChatTurn, Parsed, ReplyFallback};
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Largest unterminated line kept while waiting for its newline.
const MAX_PENDING_LINE_BYTES: usize = 1024 * 1024;

pub const UNCLEAR_REPLY_FALLBACK: &str = "Sorry, I couldn't process your request directly, but I'm here to assist. \
Please try to rephrase your question if you see this message.";

pub fn request_failed_reply(error: &str) -> String {
    format!(
        "Sorry, there was an error answering your request: {}. \
But I'm always ready to help – please try again, or try a different query!",
        error
    )
}

pub fn streaming_error_fragment(error: &str) -> String {
    format!("[Streaming error: {}]", error)
}

fn stall_message(limit: Duration) -> String {
    format!("no data from server within {}s", limit.as_secs_f64())
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatResponseMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

/// Decodes one line of the `/api/generate` stream.
///
/// `valid` is false when the line is not a JSON object; `value` is the
/// `response` field when present.
pub fn decode_generate_line(line: &str) -> Parsed<Option<String>> {
    match serde_json::from_str::<GenerateLine>(line.trim()) {
        Ok(decoded) => Parsed::ok(decoded.response),
        Err(_) => Parsed::invalid(),
    }
}

fn fragment_from_line(line: &str) -> Option<String> {
    if line.trim().is_empty() {
        return None;
    }
    let decoded = decode_generate_line(line);
    if !decoded.valid {
        tracing::debug!(line_len = line.len(), "skipping undecodable stream line");
        return None;
    }
    decoded.value.filter(|fragment| !fragment.is_empty())
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
    generate_timeout: Duration,
    chat_timeout: Duration,
    tags_timeout: Duration,
    models_timeout: Duration,
    context_fallback: bool,
}

impl OllamaClient {
    pub fn new(http: Client, config: &AppConfig) -> Self {
        Self {
            http,
            base_url: config.ollama_url.clone(),
            generate_timeout: config.generate_timeout,
            chat_timeout: config.chat_timeout,
            tags_timeout: config.tags_timeout,
            models_timeout: config.models_timeout,
            context_fallback: config.context_fallback,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Streams `/api/generate`. Waiting for the headers and for each body
    /// chunk is bounded by `generate_timeout`; a stall ends the stream with
    /// an error fragment.
    pub fn stream_generate(&self, model: &str, prompt: &str) -> ReplyStream {
        let request = self.http.post(self.url("/api/generate")).json(&GenerateRequest {
            model,
            prompt,
            stream: true,
        });
        let read_timeout = self.generate_timeout;

        ReplyStream::from_stream(async_stream::stream! {
            let sent = match timeout(read_timeout, request.send()).await {
                Ok(sent) => sent,
                Err(_) => {
                    tracing::warn!(?read_timeout, "ollama generate request timed out");
                    yield streaming_error_fragment(&stall_message(read_timeout));
                    return;
                }
            };
            let response = match sent.and_then(|response| response.error_for_status()) {
                Ok(response) => response,
                Err(error) => {
                    tracing::warn!(error = %error, "ollama generate request failed");
                    yield streaming_error_fragment(&error.to_string());
                    return;
                }
            };

            let mut body = response.bytes_stream();
            let mut lines = LineBuffer::new(Some(MAX_PENDING_LINE_BYTES));
            loop {
                let next = match timeout(read_timeout, body.next()).await {
                    Ok(Some(next)) => next,
                    Ok(None) => break,
                    Err(_) => {
                        tracing::warn!(?read_timeout, "ollama generate stream stalled");
                        yield streaming_error_fragment(&stall_message(read_timeout));
                        return;
                    }
                };
                let bytes = match next {
                    Ok(bytes) => bytes,
                    Err(error) => {
                        tracing::warn!(error = %error, "ollama generate stream broke off");
                        yield streaming_error_fragment(&error.to_string());
                        return;
                    }
                };
                for line in lines.push(&bytes) {
                    if let Some(fragment) = fragment_from_line(&line) {
                        yield fragment;
                    }
                }
                let dropped = lines.consume_overflowed_bytes();
                if dropped > 0 {
                    tracing::warn!(dropped, "oversized stream line truncated");
                }
            }
            if let Some(rest) = lines.flush() {
                if let Some(fragment) = fragment_from_line(&rest) {
                    yield fragment;
                }
            }
        })
    }

    /// Non-streaming chat over the whole history.
    ///
    /// Never fails: request errors and unusable replies are replaced by
    /// fixed fallback sentences, flagged on the returned reply.
    pub async fn chat(&self, model: &str, history: &[ChatTurn]) -> ChatReply {
        let started = Instant::now();
        let outcome = self.request_chat(model, history).await;
        let (content, fallback) = match outcome {
            Ok(reply) => self.screen_reply(reply),
            Err(error) => {
                tracing::warn!(error = %error, model, "ollama chat request failed");
                (request_failed_reply(&error.to_string()), Some(ReplyFallback::RequestFailed))
            }
        };
        ChatReply {
            content,
            elapsed: started.elapsed(),
            fallback,
        }
    }

    async fn request_chat(&self, model: &str, history: &[ChatTurn]) -> Result<String, reqwest::Error> {
        let response = self
            .http
            .post(self.url("/api/chat"))
            .timeout(self.chat_timeout)
            .json(&ChatRequest {
                model,
                messages: wire_messages(history),
                stream: false,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;
        Ok(response.message.map(|message| message.content).unwrap_or_default())
    }

    fn screen_reply(&self, reply: String) -> (String, Option<ReplyFallback>) {
        if reply.is_empty() {
            return (UNCLEAR_REPLY_FALLBACK.to_string(), Some(ReplyFallback::Unclear));
        }
        // Replies mentioning "context" are treated as the server complaining
        // about its context window. This also catches legitimate answers.
        if self.context_fallback && reply.to_lowercase().contains("context") {
            tracing::warn!(reply_len = reply.len(), "reply mentions context; substituting fallback text");
            return (UNCLEAR_REPLY_FALLBACK.to_string(), Some(ReplyFallback::Unclear));
        }
        (reply, None)
    }

    /// Fetches the raw `/api/tags` listing, retrying as POST when GET fails.
    pub async fn export_tags(&self) -> AppResult<serde_json::Value> {
        match self.fetch_tags(reqwest::Method::GET).await {
            Ok(value) => Ok(value),
            Err(error) => {
                tracing::debug!(error = %error, "GET /api/tags failed; retrying with POST");
                self.fetch_tags(reqwest::Method::POST).await
            }
        }
    }

    async fn fetch_tags(&self, method: reqwest::Method) -> AppResult<serde_json::Value> {
        let mut request = self
            .http
            .request(method.clone(), self.url("/api/tags"))
            .timeout(self.tags_timeout);
        if method == reqwest::Method::POST {
            request = request.json(&serde_json::json!({}));
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Http(ProviderClient::error_message_from_body(status, &body)));
        }
        Ok(response.json::<serde_json::Value>().await?)
    }

    /// Model names known to the local server, empty when it is unreachable.
    pub async fn local_models(&self) -> Vec<String> {
        let result = async {
            self.http
                .get(self.url("/api/tags"))
                .timeout(self.models_timeout)
                .send()
                .await?
                .error_for_status()?
                .json::<TagsResponse>()
                .await
        }
        .await;

        match result {
            Ok(tags) => tags.models.into_iter().map(|model| model.name).collect(),
            Err(error) => {
                tracing::debug!(error = %error, "listing local models over HTTP failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_generate_line, fragment_from_line, request_failed_reply, OllamaClient, UNCLEAR_REPLY_FALLBACK};
    use crate::config::AppConfig;
    use crate::models::ReplyFallback;

    fn client(context_fallback: bool) -> OllamaClient {
        let config = AppConfig {
            context_fallback,
            ..AppConfig::default()
        };
        OllamaClient::new(reqwest::Client::new(), &config)
    }

    #[test]
    fn decodes_response_field_and_flags_garbage() {
        let decoded = decode_generate_line(r#"{"model":"llama3.2","response":"Hi","done":false}"#);
        assert!(decoded.valid);
        assert_eq!(decoded.value.as_deref(), Some("Hi"));

        let done = decode_generate_line(r#"{"done":true,"total_duration":123}"#);
        assert!(done.valid);
        assert_eq!(done.value, None);

        let garbage = decode_generate_line("not json at all");
        assert!(!garbage.valid);
        assert_eq!(garbage.value, None);
    }

    #[test]
    fn only_non_empty_fragments_are_yielded() {
        assert_eq!(fragment_from_line(r#"{"response":" world"}"#).as_deref(), Some(" world"));
        assert_eq!(fragment_from_line(r#"{"response":""}"#), None);
        assert_eq!(fragment_from_line("   "), None);
        assert_eq!(fragment_from_line("{broken"), None);
    }

    #[test]
    fn screening_replaces_empty_and_context_replies() {
        let ollama = client(true);
        assert_eq!(
            ollama.screen_reply(String::new()),
            (UNCLEAR_REPLY_FALLBACK.to_string(), Some(ReplyFallback::Unclear))
        );
        assert_eq!(
            ollama.screen_reply("I lost the CONTEXT of our talk".to_string()).1,
            Some(ReplyFallback::Unclear)
        );
        assert_eq!(ollama.screen_reply("Paris.".to_string()), ("Paris.".to_string(), None));
        assert_eq!(ollama.screen_reply("\n ".to_string()), ("\n ".to_string(), None));
    }

    #[test]
    fn context_heuristic_can_be_disabled() {
        let ollama = client(false);
        let reply = "Context windows bound the prompt size.".to_string();
        assert_eq!(ollama.screen_reply(reply.clone()), (reply, None));
    }

    #[test]
    fn request_failure_text_embeds_error() {
        let text = request_failed_reply("connection refused");
        assert!(text.starts_with("Sorry, there was an error answering your request: connection refused."));
        assert!(text.ends_with("try a different query!"));
    }
}
