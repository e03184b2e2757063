use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    #[serde(rename = "ollama")]
    Local,
    #[serde(rename = "openai")]
    OpenAi,
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Local, Provider::OpenAi, Provider::Gemini];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "ollama",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// Name shown to users and embedded in inline error replies.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Local => "Ollama",
            Self::OpenAi => "OpenAI",
            Self::Gemini => "Gemini",
        }
    }

    pub fn is_cloud(self) -> bool {
        !matches!(self, Self::Local)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Ok(Self::Local),
            "openai" | "chatgpt" => Ok(Self::OpenAi),
            "gemini" => Ok(Self::Gemini),
            other => Err(format!("Unknown provider '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(format!("Unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationRecord {
    pub id: String,
    pub title: String,
    pub provider: Provider,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// One entry of an in-memory chat history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_secs: Option<f64>,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            elapsed_secs: None,
        }
    }

    pub fn assistant(content: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            elapsed_secs: Some(elapsed.as_secs_f64()),
        }
    }
}

impl From<&MessageRecord> for ChatTurn {
    fn from(message: &MessageRecord) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            elapsed_secs: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFallback {
    /// The backend answered, but with an empty or unusable reply.
    Unclear,
    /// The request itself failed.
    RequestFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub content: String,
    pub elapsed: Duration,
    pub fallback: Option<ReplyFallback>,
}

/// A value parsed from untrusted text, with a flag telling whether parsing
/// actually succeeded or the default was substituted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Parsed<T> {
    pub value: T,
    pub valid: bool,
}

impl<T> Parsed<T> {
    pub fn ok(value: T) -> Self {
        Self { value, valid: true }
    }

    pub fn fallback(value: T) -> Self {
        Self { value, valid: false }
    }
}

impl<T: Default> Parsed<T> {
    pub fn invalid() -> Self {
        Self::fallback(T::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryRow {
    pub name: String,
    pub id: String,
    pub size_gb: f64,
    pub cpu_pct: u8,
    pub gpu_pct: u8,
    pub raw: String,
    pub memory_reported: bool,
    pub utilization_reported: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorSample {
    pub taken_at: DateTime<Utc>,
    pub rows: Vec<TelemetryRow>,
}
