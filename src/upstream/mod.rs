use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

pub mod cloudwatch;
pub mod http;
pub mod lambda;

pub use cloudwatch::CloudWatchMonitor;
pub use http::HttpGeneration;
pub use lambda::LambdaGeneration;

/// Reply used when the generation function answers without any text.
pub const NO_SUGGESTION: &str = "No suggestion available";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    #[error("monitoring: {0}")]
    Monitoring(String),
    #[error("generation: {0}")]
    Generation(String),
}

impl UpstreamError {
    pub fn stage(&self) -> &'static str {
        match self {
            UpstreamError::Monitoring(_) => "monitoring",
            UpstreamError::Generation(_) => "generation",
        }
    }
}

/// Resource kinds the monitoring source knows how to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Lambda,
    Rds,
    Ec2,
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lambda" => Ok(ResourceKind::Lambda),
            "rds" => Ok(ResourceKind::Rds),
            "ec2" => Ok(ResourceKind::Ec2),
            other => Err(format!("Unsupported resource type: {}", other)),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Lambda => "lambda",
            ResourceKind::Rds => "rds",
            ResourceKind::Ec2 => "ec2",
        };
        f.write_str(s)
    }
}

/// Fixed look-back configuration for monitoring queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugWindow {
    pub log_limit: i32,
    pub lookback_secs: i64,
    pub metric_period_secs: i32,
}

impl Default for DebugWindow {
    fn default() -> Self {
        Self { log_limit: 5, lookback_secs: 3600, metric_period_secs: 300 }
    }
}

#[async_trait]
pub trait MonitoringSource: Send + Sync {
    async fn recent_logs(&self, kind: ResourceKind, resource_id: &str, window: DebugWindow) -> Result<Vec<String>, UpstreamError>;
    async fn recent_metrics(&self, kind: ResourceKind, resource_id: &str, window: DebugWindow) -> Result<Value, UpstreamError>;
}

#[async_trait]
pub trait GenerationFunction: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError>;
}

#[derive(Debug, Deserialize)]
struct GenerationReply {
    response: Option<String>,
    body: Option<Value>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

/// Extracts the generated text from a function reply.
///
/// The text is read from a top-level `response` field, or from `response`
/// inside a `body` that is itself a JSON document (or JSON-encoded string),
/// the shape an HTTP-style handler returns. An `errorMessage` without any
/// response is reported as a failure. A reply with no text yields
/// [`NO_SUGGESTION`].
pub fn parse_generation_reply(raw: &[u8]) -> Result<String, UpstreamError> {
    let reply: GenerationReply = serde_json::from_slice(raw)
        .map_err(|e| UpstreamError::Generation(format!("unreadable reply: {}", e)))?;
    let nested = match reply.body {
        Some(Value::String(s)) => serde_json::from_str::<GenerationReply>(&s).ok(),
        Some(v @ Value::Object(_)) => serde_json::from_value::<GenerationReply>(v).ok(),
        _ => None,
    };
    let text = reply.response.or_else(|| nested.as_ref().and_then(|n| n.response.clone()));
    if text.is_none() {
        let err = reply.error_message.or_else(|| nested.and_then(|n| n.error_message));
        if let Some(msg) = err {
            return Err(UpstreamError::Generation(msg));
        }
    }
    Ok(text.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| NO_SUGGESTION.to_string()))
}
