use crate::adapters::ProviderClient;
use crate::config::AppConfig;
use crate::db::{derive_title, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{ChatTurn, MonitorSample, Provider, TelemetryRow};
use crate::telemetry::Telemetry;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Samples kept for the monitor view; older ones are dropped first.
pub const MONITOR_HISTORY_LIMIT: usize = 120;

pub type HistoryKey = (Provider, String);

/// Where a history lives in the store and how much of it is already there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedThread {
    pub conversation_id: String,
    pub persisted_turns: usize,
}

/// All state of one interactive session. Controller actions take it by
/// value and hand back the updated copy.
#[derive(Debug, Clone)]
pub struct Session {
    pub provider: Provider,
    pub selected_models: Vec<String>,
    pub histories: HashMap<HistoryKey, Vec<ChatTurn>>,
    pub saved: HashMap<HistoryKey, SavedThread>,
    pub monitor_history: VecDeque<MonitorSample>,
    pub live_monitor: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Provider::Local)
    }
}

impl Session {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            selected_models: Vec::new(),
            histories: HashMap::new(),
            saved: HashMap::new(),
            monitor_history: VecDeque::new(),
            live_monitor: false,
        }
    }

    fn key(&self, model: &str) -> HistoryKey {
        (self.provider, model.to_string())
    }

    /// History of `model` under the current provider.
    pub fn history(&self, model: &str) -> &[ChatTurn] {
        self.histories.get(&self.key(model)).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn saved_thread(&self, model: &str) -> Option<&SavedThread> {
        self.saved.get(&self.key(model))
    }

    pub fn latest_sample(&self) -> Option<&MonitorSample> {
        self.monitor_history.back()
    }
}

pub struct Controller {
    client: ProviderClient,
    telemetry: Telemetry,
    store: Option<Arc<Database>>,
}

impl Controller {
    pub fn new(client: ProviderClient, telemetry: Telemetry, store: Option<Arc<Database>>) -> Self {
        Self {
            client,
            telemetry,
            store,
        }
    }

    pub fn from_config(config: &AppConfig, store: Option<Arc<Database>>) -> AppResult<Self> {
        Ok(Self::new(ProviderClient::new(config)?, Telemetry::from_config(config), store))
    }

    pub fn client(&self) -> &ProviderClient {
        &self.client
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    pub fn select_provider(&self, mut session: Session, provider: Provider) -> Session {
        if session.provider != provider {
            tracing::debug!(from = session.provider.as_str(), to = provider.as_str(), "provider switched");
            session.provider = provider;
            session.selected_models.clear();
        }
        session
    }

    pub fn select_models(&self, mut session: Session, models: Vec<String>) -> Session {
        let mut selected: Vec<String> = Vec::with_capacity(models.len());
        for model in models {
            let model = model.trim().to_string();
            if !model.is_empty() && !selected.contains(&model) {
                selected.push(model);
            }
        }
        session.selected_models = selected;
        session
    }

    pub fn set_live_monitor(&self, mut session: Session, enabled: bool) -> Session {
        session.live_monitor = enabled;
        session
    }

    /// One chat round over the whole history of `model`.
    pub async fn send_message(&self, mut session: Session, model: &str, input: &str) -> Session {
        if input.trim().is_empty() {
            return session;
        }
        let provider = session.provider;
        let history = session.histories.entry((provider, model.to_string())).or_default();
        history.push(ChatTurn::user(input));

        let reply = self.client.chat(provider, model, history).await;
        if let Some(fallback) = reply.fallback {
            tracing::warn!(provider = provider.as_str(), model, ?fallback, "chat reply replaced by fallback text");
        }
        history.push(ChatTurn::assistant(reply.content, reply.elapsed));
        session
    }

    /// Streams a single-prompt reply, handing each fragment to `on_fragment`
    /// as it arrives, then records the whole reply.
    pub async fn stream_message<F>(&self, mut session: Session, model: &str, input: &str, mut on_fragment: F) -> Session
    where
        F: FnMut(&str),
    {
        if input.trim().is_empty() {
            return session;
        }
        let provider = session.provider;
        let started = Instant::now();
        let mut reply = self.client.generate(provider, model, input);
        let mut text = String::new();
        while let Some(fragment) = reply.next_fragment().await {
            on_fragment(&fragment);
            text.push_str(&fragment);
        }

        let history = session.histories.entry((provider, model.to_string())).or_default();
        history.push(ChatTurn::user(input));
        history.push(ChatTurn::assistant(text, started.elapsed()));
        session
    }

    /// Persists the history of `model`, creating its conversation on first
    /// save. Later saves append only the turns written since.
    pub fn save_thread(&self, mut session: Session, model: &str) -> (Session, AppResult<String>) {
        let result = self.persist_history(&mut session, model);
        (session, result)
    }

    fn persist_history(&self, session: &mut Session, model: &str) -> AppResult<String> {
        let store = self.require_store()?;
        let key = session.key(model);
        let history = session.histories.get(&key).map(Vec::as_slice).unwrap_or_default();
        if history.is_empty() {
            return Err(AppError::NotFound(format!(
                "No messages to save for {} model {}",
                key.0.display_name(),
                model
            )));
        }

        let thread = match session.saved.get(&key) {
            Some(thread) => thread.clone(),
            None => {
                let title = derive_title(history.iter().map(|turn| (turn.role, turn.content.as_str())));
                let conversation_id = store.create_conversation(&title, key.0, model)?;
                tracing::info!(conversation_id = %conversation_id, provider = key.0.as_str(), model, "conversation created");
                SavedThread {
                    conversation_id,
                    persisted_turns: 0,
                }
            }
        };

        let mut persisted = thread.persisted_turns.min(history.len());
        let mut outcome = Ok(());
        for turn in &history[persisted..] {
            if let Err(error) = store.save_message(&thread.conversation_id, turn.role, &turn.content) {
                outcome = Err(error);
                break;
            }
            persisted += 1;
        }

        let conversation_id = thread.conversation_id.clone();
        session.saved.insert(
            key,
            SavedThread {
                conversation_id: thread.conversation_id,
                persisted_turns: persisted,
            },
        );
        outcome.map(|()| conversation_id)
    }

    /// Replaces the matching history with a stored conversation and makes
    /// its provider and model current.
    pub fn load_conversation(&self, mut session: Session, conversation_id: &str) -> (Session, AppResult<()>) {
        let result = self.restore_history(&mut session, conversation_id);
        (session, result)
    }

    fn restore_history(&self, session: &mut Session, conversation_id: &str) -> AppResult<()> {
        let store = self.require_store()?;
        let conversation = store
            .get_conversation(conversation_id)
            .ok_or_else(|| AppError::NotFound(format!("Conversation {} not found", conversation_id)))?;

        let turns: Vec<ChatTurn> = store.list_messages(conversation_id).iter().map(ChatTurn::from).collect();
        let key = (conversation.provider, conversation.model.clone());
        session.saved.insert(
            key.clone(),
            SavedThread {
                conversation_id: conversation.id,
                persisted_turns: turns.len(),
            },
        );
        session.histories.insert(key, turns);

        session.provider = conversation.provider;
        if !session.selected_models.contains(&conversation.model) {
            session.selected_models.push(conversation.model);
        }
        Ok(())
    }

    /// Takes one telemetry sample of the selected models.
    pub async fn poll_monitor(&self, mut session: Session) -> Session {
        let rows = self.telemetry.running_models().await;
        let rows = filter_rows(rows, &session.selected_models);
        session.monitor_history.push_back(MonitorSample {
            taken_at: Utc::now(),
            rows,
        });
        while session.monitor_history.len() > MONITOR_HISTORY_LIMIT {
            session.monitor_history.pop_front();
        }
        session
    }

    fn require_store(&self) -> AppResult<&Database> {
        self.store
            .as_deref()
            .ok_or_else(|| AppError::Config("Conversation store is not configured".to_string()))
    }
}

/// Keeps rows whose model is selected. `ollama ps` reports the `:latest`
/// tag explicitly, so a bare selected name also matches its `:latest` row.
/// An empty selection keeps everything.
fn filter_rows(rows: Vec<TelemetryRow>, selected: &[String]) -> Vec<TelemetryRow> {
    if selected.is_empty() {
        return rows;
    }
    rows.into_iter()
        .filter(|row| {
            selected.iter().any(|model| {
                row.name == *model || row.name.strip_suffix(":latest").is_some_and(|bare| bare == model)
            })
        })
        .collect()
}
