use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One prompt/response turn of a chat session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub prompt: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(prompt: String, response: String) -> Self {
        Self { prompt, response, created_at: now() }
    }
}

/// An append-only thread of turns owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub session_id: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(owner_id: String, first: ChatMessage) -> Self {
        Self {
            session_id: new_session_id(),
            owner_id,
            created_at: first.created_at,
            messages: vec![first],
        }
    }
}

/// Logs, metrics and the generated analysis captured for one resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebugSession {
    pub session_id: String,
    pub owner_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub logs: Vec<String>,
    pub metrics: serde_json::Value,
    pub genai_response: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DebugSessionSummary {
    pub session_id: String,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
}

impl DebugSessionSummary {
    pub fn new(session_id: String, resource_type: &str, resource_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            session_id,
            summary: format!("Debug {} {}", resource_type, resource_id),
            timestamp,
        }
    }
}

/// Current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
