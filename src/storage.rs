use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Pool, Row, Sqlite, SqliteConnection, sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous}};

use crate::session::{ChatMessage, ChatSession, DebugSession, DebugSessionSummary};

#[async_trait]
pub trait ChatRepository: Send + Sync {
    async fn insert_chat(&self, session: &ChatSession) -> anyhow::Result<()>;
    /// Appends only when `(session_id, owner_id)` matches a stored session.
    /// Returns the session as of the append, or `None` when nothing matched.
    async fn append_chat_message(&self, session_id: &str, owner_id: &str, msg: &ChatMessage) -> anyhow::Result<Option<ChatSession>>;
    async fn get_chat(&self, session_id: &str, owner_id: &str) -> anyhow::Result<Option<ChatSession>>;
    async fn list_chats(&self, owner_id: &str) -> anyhow::Result<Vec<ChatSession>>;
}

#[async_trait]
pub trait DebugRepository: Send + Sync {
    async fn insert_debug_session(&self, session: &DebugSession) -> anyhow::Result<()>;
    async fn get_debug_session(&self, session_id: &str, owner_id: &str) -> anyhow::Result<Option<DebugSession>>;
    async fn list_debug_sessions(&self, owner_id: &str) -> anyhow::Result<Vec<DebugSessionSummary>>;
}

#[derive(Clone)]
pub struct SqliteRepository {
    pool: Pool<Sqlite>,
}

impl SqliteRepository {
    pub async fn initialize(database_url: Option<String>) -> anyhow::Result<Self> {
        let url = match database_url {
            Some(u) => u,
            None => resolve_default_db_url()?,
        };
        let options = url.parse::<SqliteConnectOptions>()?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);
        let pool = Pool::<Sqlite>::connect_with(options).await
            .with_context(|| format!("connecting to {}", url))?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::debug!(%url, "database ready");
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Sqlite> { &self.pool }
}

fn resolve_default_db_url() -> anyhow::Result<String> {
    let base = std::env::var("XDG_DATA_HOME").ok().map(PathBuf::from).unwrap_or_else(|| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
        PathBuf::from(home).join(".local").join("share")
    });
    let dir = base.join("support_bot");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join("support_bot.db");
    Ok(format!("sqlite://{}", path.to_string_lossy()))
}

// Fixed width so that ORDER BY on the text column is chronological.
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw).with_context(|| format!("bad timestamp {:?}", raw))?;
    Ok(parsed.with_timezone(&Utc))
}

fn message_from_row(r: &SqliteRow) -> anyhow::Result<ChatMessage> {
    let created_at: String = r.get("created_at");
    Ok(ChatMessage {
        prompt: r.get("prompt"),
        response: r.get("response"),
        created_at: decode_ts(&created_at)?,
    })
}

fn debug_session_from_row(r: &SqliteRow) -> anyhow::Result<DebugSession> {
    let logs_json: String = r.get("logs_json");
    let metrics_json: String = r.get("metrics_json");
    let timestamp: String = r.get("timestamp");
    Ok(DebugSession {
        session_id: r.get("session_id"),
        owner_id: r.get("owner_id"),
        resource_type: r.get("resource_type"),
        resource_id: r.get("resource_id"),
        logs: serde_json::from_str(&logs_json)?,
        metrics: serde_json::from_str(&metrics_json)?,
        genai_response: r.get("genai_response"),
        timestamp: decode_ts(&timestamp)?,
    })
}

async fn load_chat(conn: &mut SqliteConnection, session_id: &str, owner_id: &str) -> anyhow::Result<Option<ChatSession>> {
    let row = sqlx::query("SELECT session_id, owner_id, created_at FROM chat_sessions WHERE session_id = ?1 AND owner_id = ?2")
        .bind(session_id)
        .bind(owner_id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(r) = row else { return Ok(None) };
    let message_rows = sqlx::query("SELECT prompt, response, created_at FROM chat_messages WHERE session_id = ?1 ORDER BY position ASC")
        .bind(session_id)
        .fetch_all(&mut *conn)
        .await?;
    let messages = message_rows.iter().map(message_from_row).collect::<anyhow::Result<Vec<_>>>()?;
    let created_at: String = r.get("created_at");
    Ok(Some(ChatSession {
        session_id: r.get("session_id"),
        owner_id: r.get("owner_id"),
        created_at: decode_ts(&created_at)?,
        messages,
    }))
}

#[async_trait]
impl ChatRepository for SqliteRepository {
    async fn insert_chat(&self, session: &ChatSession) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT INTO chat_sessions (session_id, owner_id, created_at) VALUES (?1, ?2, ?3)")
            .bind(&session.session_id)
            .bind(&session.owner_id)
            .bind(encode_ts(session.created_at))
            .execute(&mut *tx).await?;
        for (position, msg) in session.messages.iter().enumerate() {
            sqlx::query("INSERT INTO chat_messages (session_id, position, prompt, response, created_at) VALUES (?1, ?2, ?3, ?4, ?5)")
                .bind(&session.session_id)
                .bind(position as i64)
                .bind(&msg.prompt)
                .bind(&msg.response)
                .bind(encode_ts(msg.created_at))
                .execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn append_chat_message(&self, session_id: &str, owner_id: &str, msg: &ChatMessage) -> anyhow::Result<Option<ChatSession>> {
        let mut tx = self.pool.begin().await?;
        // Owner check and position assignment happen inside the one write statement.
        let res = sqlx::query(
            "INSERT INTO chat_messages (session_id, position, prompt, response, created_at) \
             SELECT s.session_id, \
                    (SELECT COALESCE(MAX(m.position) + 1, 0) FROM chat_messages m WHERE m.session_id = s.session_id), \
                    ?3, ?4, ?5 \
             FROM chat_sessions s WHERE s.session_id = ?1 AND s.owner_id = ?2",
        )
            .bind(session_id)
            .bind(owner_id)
            .bind(&msg.prompt)
            .bind(&msg.response)
            .bind(encode_ts(msg.created_at))
            .execute(&mut *tx).await?;
        if res.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        let session = load_chat(&mut tx, session_id, owner_id).await?;
        tx.commit().await?;
        Ok(session)
    }

    async fn get_chat(&self, session_id: &str, owner_id: &str) -> anyhow::Result<Option<ChatSession>> {
        let mut conn = self.pool.acquire().await?;
        load_chat(&mut conn, session_id, owner_id).await
    }

    async fn list_chats(&self, owner_id: &str) -> anyhow::Result<Vec<ChatSession>> {
        let session_rows = sqlx::query("SELECT session_id, owner_id, created_at FROM chat_sessions WHERE owner_id = ?1 ORDER BY created_at DESC, rowid DESC")
            .bind(owner_id)
            .fetch_all(&self.pool).await?;
        let message_rows = sqlx::query(
            "SELECT m.session_id, m.prompt, m.response, m.created_at FROM chat_messages m \
             JOIN chat_sessions s ON s.session_id = m.session_id \
             WHERE s.owner_id = ?1 ORDER BY m.session_id, m.position ASC",
        )
            .bind(owner_id)
            .fetch_all(&self.pool).await?;

        let mut by_session: HashMap<String, Vec<ChatMessage>> = HashMap::new();
        for m in &message_rows {
            let sid: String = m.get("session_id");
            by_session.entry(sid).or_default().push(message_from_row(m)?);
        }
        session_rows.iter().map(|r| {
            let session_id: String = r.get("session_id");
            let created_at: String = r.get("created_at");
            Ok(ChatSession {
                messages: by_session.remove(&session_id).unwrap_or_default(),
                owner_id: r.get("owner_id"),
                created_at: decode_ts(&created_at)?,
                session_id,
            })
        }).collect()
    }
}

#[async_trait]
impl DebugRepository for SqliteRepository {
    async fn insert_debug_session(&self, session: &DebugSession) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO debug_sessions (session_id, owner_id, resource_type, resource_id, logs_json, metrics_json, genai_response, timestamp) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)")
            .bind(&session.session_id)
            .bind(&session.owner_id)
            .bind(&session.resource_type)
            .bind(&session.resource_id)
            .bind(serde_json::to_string(&session.logs)?)
            .bind(serde_json::to_string(&session.metrics)?)
            .bind(&session.genai_response)
            .bind(encode_ts(session.timestamp))
            .execute(&self.pool).await?;
        Ok(())
    }

    async fn get_debug_session(&self, session_id: &str, owner_id: &str) -> anyhow::Result<Option<DebugSession>> {
        let row = sqlx::query("SELECT * FROM debug_sessions WHERE session_id = ?1 AND owner_id = ?2")
            .bind(session_id)
            .bind(owner_id)
            .fetch_optional(&self.pool).await?;
        row.as_ref().map(debug_session_from_row).transpose()
    }

    async fn list_debug_sessions(&self, owner_id: &str) -> anyhow::Result<Vec<DebugSessionSummary>> {
        let rows = sqlx::query("SELECT session_id, resource_type, resource_id, timestamp FROM debug_sessions WHERE owner_id = ?1 ORDER BY timestamp DESC, rowid DESC")
            .bind(owner_id)
            .fetch_all(&self.pool).await?;
        rows.iter().map(|r| {
            let resource_type: String = r.get("resource_type");
            let resource_id: String = r.get("resource_id");
            let timestamp: String = r.get("timestamp");
            Ok(DebugSessionSummary::new(r.get("session_id"), &resource_type, &resource_id, decode_ts(&timestamp)?))
        }).collect()
    }
}
