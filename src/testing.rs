//! Test doubles for the upstream collaborators and a throwaway database.

use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::storage::SqliteRepository;
use crate::upstream::{DebugWindow, GenerationFunction, MonitoringSource, ResourceKind, UpstreamError};

pub async fn temp_repository() -> (SqliteRepository, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("test.db").to_string_lossy());
    let repo = SqliteRepository::initialize(Some(url)).await.unwrap();
    (repo, dir)
}

pub struct FakeMonitor {
    logs: Result<Vec<String>, UpstreamError>,
    calls: Mutex<Vec<(ResourceKind, String)>>,
}

impl FakeMonitor {
    pub fn with_logs(lines: &[&str]) -> Self {
        Self { logs: Ok(lines.iter().map(|l| l.to_string()).collect()), calls: Mutex::new(Vec::new()) }
    }

    pub fn failing(msg: &str) -> Self {
        Self { logs: Err(UpstreamError::Monitoring(msg.into())), calls: Mutex::new(Vec::new()) }
    }

    pub fn calls(&self) -> Vec<(ResourceKind, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MonitoringSource for FakeMonitor {
    async fn recent_logs(&self, kind: ResourceKind, resource_id: &str, window: DebugWindow) -> Result<Vec<String>, UpstreamError> {
        self.calls.lock().unwrap().push((kind, resource_id.to_string()));
        let logs = self.logs.clone()?;
        Ok(logs.into_iter().take(window.log_limit.max(0) as usize).collect())
    }

    async fn recent_metrics(&self, _kind: ResourceKind, resource_id: &str, window: DebugWindow) -> Result<Value, UpstreamError> {
        Ok(json!({
            "label": "Invocations",
            "metricName": "Invocations",
            "dimension": resource_id,
            "period": window.metric_period_secs,
            "values": [1.0, 4.0],
        }))
    }
}

pub struct FakeGeneration {
    reply: Result<String, UpstreamError>,
    prompts: Mutex<Vec<String>>,
}

impl FakeGeneration {
    pub fn replying(text: &str) -> Self {
        Self { reply: Ok(text.into()), prompts: Mutex::new(Vec::new()) }
    }

    pub fn failing(msg: &str) -> Self {
        Self { reply: Err(UpstreamError::Generation(msg.into())), prompts: Mutex::new(Vec::new()) }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationFunction for FakeGeneration {
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone()
    }
}
