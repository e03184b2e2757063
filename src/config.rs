use crate::errors::{AppError, AppResult};
use crate::models::Provider;
use std::path::PathBuf;
use std::time::Duration;

const KEYRING_SERVICE: &str = "ollama-connect";

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
}

impl Credentials {
    pub fn for_provider(&self, provider: Provider) -> Option<&str> {
        let key = match provider {
            Provider::Local => None,
            Provider::OpenAi => self.openai_api_key.as_deref(),
            Provider::Gemini => self.gemini_api_key.as_deref(),
        };
        key.filter(|value| !value.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ollama_url: String,
    pub openai_url: String,
    pub gemini_url: String,
    pub ollama_bin: String,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub tags_timeout: Duration,
    pub models_timeout: Duration,
    pub generate_timeout: Duration,
    pub chat_timeout: Duration,
    pub cloud_timeout: Duration,
    pub command_timeout: Duration,
    pub monitor_interval: Duration,
    pub context_fallback: bool,
    pub credentials: Credentials,
}

impl Default for AppConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            openai_url: DEFAULT_OPENAI_URL.to_string(),
            gemini_url: DEFAULT_GEMINI_URL.to_string(),
            ollama_bin: "ollama".to_string(),
            db_path: data_dir.join("conversations.db"),
            data_dir,
            tags_timeout: Duration::from_secs(10),
            models_timeout: Duration::from_secs(5),
            generate_timeout: Duration::from_secs(60),
            chat_timeout: Duration::from_secs(120),
            cloud_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(10),
            monitor_interval: Duration::from_millis(2000),
            context_fallback: true,
            credentials: Credentials::default(),
        }
    }
}

impl AppConfig {
    /// Reads the process environment, then falls back to the OS keyring for
    /// API keys that are not set there.
    pub fn from_env() -> AppResult<Self> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        for provider in [Provider::OpenAi, Provider::Gemini] {
            if config.credentials.for_provider(provider).is_some() {
                continue;
            }
            if let Some(token) = load_provider_token(provider) {
                tracing::debug!(provider = provider.as_str(), "using API key from keyring");
                match provider {
                    Provider::OpenAi => config.credentials.openai_api_key = Some(token),
                    Provider::Gemini => config.credentials.gemini_api_key = Some(token),
                    Provider::Local => {}
                }
            }
        }
        Ok(config)
    }

    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
        let mut config = Self::default();

        if let Some(url) = get("OLLAMA_CONNECT_OLLAMA_URL") {
            config.ollama_url = trim_base_url(&url);
        }
        if let Some(url) = get("OLLAMA_CONNECT_OPENAI_URL") {
            config.openai_url = trim_base_url(&url);
        }
        if let Some(url) = get("OLLAMA_CONNECT_GEMINI_URL") {
            config.gemini_url = trim_base_url(&url);
        }
        if let Some(bin) = get("OLLAMA_CONNECT_OLLAMA_BIN") {
            config.ollama_bin = bin;
        }
        if let Some(dir) = get("OLLAMA_CONNECT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
            config.db_path = config.data_dir.join("conversations.db");
        }
        if let Some(path) = get("OLLAMA_CONNECT_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(raw) = get("OLLAMA_CONNECT_MONITOR_INTERVAL_MS") {
            let millis = raw.parse::<u64>().map_err(|_| {
                AppError::Config(format!("OLLAMA_CONNECT_MONITOR_INTERVAL_MS must be an integer, got '{}'", raw))
            })?;
            if millis == 0 {
                return Err(AppError::Config(
                    "OLLAMA_CONNECT_MONITOR_INTERVAL_MS must be greater than zero".to_string(),
                ));
            }
            config.monitor_interval = Duration::from_millis(millis);
        }
        if let Some(raw) = get("OLLAMA_CONNECT_CONTEXT_FALLBACK") {
            config.context_fallback = parse_bool(&raw).ok_or_else(|| {
                AppError::Config(format!("OLLAMA_CONNECT_CONTEXT_FALLBACK must be a boolean, got '{}'", raw))
            })?;
        }

        config.credentials = Credentials {
            openai_api_key: get("OPENAI_API_KEY"),
            gemini_api_key: get("GEMINI_API_KEY"),
        };

        Ok(config)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "ollama-connect")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".ollama-connect"))
}

fn trim_base_url(raw: &str) -> String {
    raw.trim_end_matches('/').to_string()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn keyring_entry(provider: Provider) -> AppResult<keyring::Entry> {
    keyring::Entry::new(KEYRING_SERVICE, provider.as_str()).map_err(|error| AppError::Io(error.to_string()))
}

fn load_provider_token(provider: Provider) -> Option<String> {
    let entry = keyring_entry(provider).ok()?;
    match entry.get_password() {
        Ok(value) if !value.trim().is_empty() => Some(value),
        Ok(_) | Err(keyring::Error::NoEntry) => None,
        Err(error) => {
            tracing::debug!(provider = provider.as_str(), error = %error, "keyring lookup failed");
            None
        }
    }
}

pub fn save_provider_token(provider: Provider, token: &str) -> AppResult<()> {
    if !provider.is_cloud() {
        return Err(AppError::Config(format!("{} does not use an API key", provider)));
    }
    keyring_entry(provider)?
        .set_password(token)
        .map_err(|error| AppError::Io(error.to_string()))
}

pub fn clear_provider_token(provider: Provider) -> AppResult<()> {
    match keyring_entry(provider)?.delete_credential() {
        Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(error) => Err(AppError::Io(error.to_string())),
    }
}

pub fn has_provider_token(provider: Provider) -> AppResult<bool> {
    match keyring_entry(provider)?.get_password() {
        Ok(value) => Ok(!value.is_empty()),
        Err(keyring::Error::NoEntry) => Ok(false),
        Err(error) => Err(AppError::Io(error.to_string())),
    }
}
