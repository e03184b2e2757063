use crate::errors::{AppError, AppResult};
use crate::models::{ConversationRecord, MessageRecord, Provider, Role};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

pub const DEFAULT_CONVERSATION_LIMIT: usize = 50;
pub const DEFAULT_TITLE: &str = "New Conversation";
pub const TITLE_MAX_CHARS: usize = 50;

/// Conversation and message persistence on SQLite.
///
/// Writes (`create_conversation`, `save_message`) return errors so callers
/// can retry or alert. Reads and best-effort updates log failures and answer
/// with an empty result instead.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Database {
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| AppError::Storage(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(|error| {
            tracing::error!(path = %path.display(), error = %error, "database connection failed");
            AppError::from(error)
        })?;
        Self::initialize(conn, Some(path.to_path_buf()))
    }

    pub fn open_in_memory() -> AppResult<Self> {
        Self::initialize(Connection::open_in_memory()?, None)
    }

    fn initialize(conn: Connection, db_path: Option<PathBuf>) -> AppResult<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::info!(path = ?db_path, "conversation store ready");
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Storage("database mutex poisoned".to_string()))
    }

    pub fn create_conversation(&self, title: &str, provider: Provider, model: &str) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());
        let title = normalize_title(title);

        let result = (|| -> AppResult<()> {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO conversations (id, title, provider, model, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![id, title, provider.as_str(), model, now],
            )?;
            tx.commit()?;
            Ok(())
        })();

        match result {
            Ok(()) => Ok(id),
            Err(error) => {
                tracing::error!(error = %error, "failed to create conversation");
                Err(error)
            }
        }
    }

    /// Most recently active first.
    pub fn list_conversations(&self, limit: usize) -> Vec<ConversationRecord> {
        let result = (|| -> AppResult<Vec<ConversationRecord>> {
            let conn = self.lock()?;
            let mut statement = conn.prepare(
                "SELECT id, title, provider, model, created_at, updated_at
                 FROM conversations
                 ORDER BY updated_at DESC, created_at DESC, rowid DESC
                 LIMIT ?1",
            )?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = statement
                .query_map([limit], parse_conversation_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })();

        result.unwrap_or_else(|error| {
            tracing::error!(error = %error, "failed to list conversations");
            Vec::new()
        })
    }

    pub fn get_conversation(&self, conversation_id: &str) -> Option<ConversationRecord> {
        let result = (|| -> AppResult<Option<ConversationRecord>> {
            let conn = self.lock()?;
            let record = conn
                .query_row(
                    "SELECT id, title, provider, model, created_at, updated_at
                     FROM conversations WHERE id = ?1",
                    [conversation_id],
                    parse_conversation_row,
                )
                .optional()?;
            Ok(record)
        })();

        result.unwrap_or_else(|error| {
            tracing::error!(conversation_id, error = %error, "failed to get conversation");
            None
        })
    }

    pub fn update_title(&self, conversation_id: &str, title: &str) -> bool {
        let title = normalize_title(title);
        let now = timestamp(Utc::now());
        let result = (|| -> AppResult<usize> {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE conversations SET title = ?1, updated_at = MAX(updated_at, ?2) WHERE id = ?3",
                params![title, now, conversation_id],
            )?;
            tx.commit()?;
            Ok(changed)
        })();

        match result {
            Ok(changed) => changed > 0,
            Err(error) => {
                tracing::error!(conversation_id, error = %error, "failed to update conversation title");
                false
            }
        }
    }

    /// Removes the conversation; its messages go with it.
    pub fn delete_conversation(&self, conversation_id: &str) -> bool {
        let result = (|| -> AppResult<usize> {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let changed = tx.execute("DELETE FROM conversations WHERE id = ?1", [conversation_id])?;
            tx.commit()?;
            Ok(changed)
        })();

        match result {
            Ok(changed) => changed > 0,
            Err(error) => {
                tracing::error!(conversation_id, error = %error, "failed to delete conversation");
                false
            }
        }
    }

    /// Appends a message and bumps the parent's `updated_at` atomically.
    pub fn save_message(&self, conversation_id: &str, role: Role, content: &str) -> AppResult<String> {
        let id = Uuid::new_v4().to_string();
        let now = timestamp(Utc::now());

        let result = (|| -> AppResult<()> {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            // Never sort before an earlier message of the same conversation,
            // even if the wall clock stepped back.
            tx.execute(
                "INSERT INTO messages (id, conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4,
                         MAX(?5, COALESCE((SELECT MAX(created_at) FROM messages WHERE conversation_id = ?2), ?5)))",
                params![id, conversation_id, role.as_str(), content, now],
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = MAX(updated_at, ?1) WHERE id = ?2",
                params![now, conversation_id],
            )?;
            tx.commit()?;
            Ok(())
        })();

        match result {
            Ok(()) => Ok(id),
            Err(error) => {
                tracing::error!(conversation_id, error = %error, "failed to save message");
                Err(error)
            }
        }
    }

    /// Oldest first.
    pub fn list_messages(&self, conversation_id: &str) -> Vec<MessageRecord> {
        let result = (|| -> AppResult<Vec<MessageRecord>> {
            let conn = self.lock()?;
            let mut statement = conn.prepare(
                "SELECT id, conversation_id, role, content, created_at
                 FROM messages
                 WHERE conversation_id = ?1
                 ORDER BY created_at ASC, rowid ASC",
            )?;
            let rows = statement
                .query_map([conversation_id], parse_message_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })();

        result.unwrap_or_else(|error| {
            tracing::error!(conversation_id, error = %error, "failed to list messages");
            Vec::new()
        })
    }

    pub fn count_messages(&self, conversation_id: &str) -> usize {
        let result = (|| -> AppResult<i64> {
            let conn = self.lock()?;
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })();

        match result {
            Ok(count) => usize::try_from(count).unwrap_or_default(),
            Err(error) => {
                tracing::error!(conversation_id, error = %error, "failed to count messages");
                0
            }
        }
    }
}

/// Title taken from the first user message: its first line, cut to 50
/// characters with `...` appended when cut.
pub fn derive_title<'a, I>(messages: I) -> String
where
    I: IntoIterator<Item = (Role, &'a str)>,
{
    let Some((_, content)) = messages.into_iter().find(|(role, _)| *role == Role::User) else {
        return DEFAULT_TITLE.to_string();
    };

    let first_line = content.trim().split('\n').next().unwrap_or_default();
    let mut title: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
    if title.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if first_line.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

fn normalize_title(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        DEFAULT_TITLE.to_string()
    } else {
        trimmed.to_string()
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationRecord> {
    Ok(ConversationRecord {
        id: row.get(0)?,
        title: row.get(1)?,
        provider: parse_enum::<Provider>(&row.get::<_, String>(2)?)?,
        model: row.get(3)?,
        created_at: parse_time(&row.get::<_, String>(4)?)?,
        updated_at: parse_time(&row.get::<_, String>(5)?)?,
    })
}

fn parse_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: parse_enum::<Role>(&row.get::<_, String>(2)?)?,
        content: row.get(3)?,
        created_at: parse_time(&row.get::<_, String>(4)?)?,
    })
}

fn conversion_error(message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

fn parse_enum<T>(raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>().map_err(conversion_error)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| conversion_error(error.to_string()))
}
