use std::sync::Arc;

use crate::error::ApiError;
use crate::session::{DebugSession, DebugSessionSummary, new_session_id, now};
use crate::storage::DebugRepository;
use crate::upstream::{DebugWindow, GenerationFunction, MonitoringSource, ResourceKind, UpstreamError};

pub fn analysis_prompt(logs: &[String]) -> String {
    format!("Analyze these logs: {}", logs.join("\n"))
}

/// Collects logs and metrics for a resource, asks the generation function to
/// analyse them, and keeps the bundle for later retrieval.
#[derive(Clone)]
pub struct DebugService {
    monitor: Arc<dyn MonitoringSource>,
    generator: Arc<dyn GenerationFunction>,
    repo: Arc<dyn DebugRepository>,
    window: DebugWindow,
}

impl DebugService {
    pub fn new(
        monitor: Arc<dyn MonitoringSource>,
        generator: Arc<dyn GenerationFunction>,
        repo: Arc<dyn DebugRepository>,
        window: DebugWindow,
    ) -> Self {
        Self { monitor, generator, repo, window }
    }

    #[tracing::instrument(skip(self))]
    pub async fn run_debug(
        &self,
        owner_id: &str,
        resource_type: Option<&str>,
        resource_id: Option<&str>,
    ) -> Result<DebugSession, ApiError> {
        let (Some(resource_type), Some(resource_id)) = (
            resource_type.map(str::trim).filter(|s| !s.is_empty()),
            resource_id.map(str::trim).filter(|s| !s.is_empty()),
        ) else {
            return Err(ApiError::Validation("Resource type and ID are required".into()));
        };
        let kind: ResourceKind = resource_type.parse().map_err(ApiError::Validation)?;

        let outcome = self.collect(kind, resource_id).await;
        let (logs, metric_bundle, genai_response) = match outcome {
            Ok(bundle) => bundle,
            Err(e) => {
                metrics::counter!("upstream_failures_total", "stage" => e.stage()).increment(1);
                return Err(e.into());
            }
        };

        let session = DebugSession {
            session_id: new_session_id(),
            owner_id: owner_id.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            logs,
            metrics: metric_bundle,
            genai_response,
            timestamp: now(),
        };
        self.repo.insert_debug_session(&session).await?;
        metrics::counter!("debug_runs_total").increment(1);
        tracing::info!(session_id = %session.session_id, log_lines = session.logs.len(), "debug session stored");
        Ok(session)
    }

    async fn collect(&self, kind: ResourceKind, resource_id: &str) -> Result<(Vec<String>, serde_json::Value, String), UpstreamError> {
        let logs = self.monitor.recent_logs(kind, resource_id, self.window).await?;
        let metrics = self.monitor.recent_metrics(kind, resource_id, self.window).await?;
        let reply = self.generator.generate(&analysis_prompt(&logs)).await?;
        Ok((logs, metrics, reply))
    }

    #[tracing::instrument(skip(self))]
    pub async fn list_sessions(&self, owner_id: &str) -> Result<Vec<DebugSessionSummary>, ApiError> {
        Ok(self.repo.list_debug_sessions(owner_id).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_session(&self, owner_id: &str, session_id: Option<&str>) -> Result<DebugSession, ApiError> {
        let session_id = session_id.map(str::trim).filter(|s| !s.is_empty())
            .ok_or_else(|| ApiError::Validation("Session ID is required".into()))?;
        self.repo.get_debug_session(session_id, owner_id).await?.ok_or(ApiError::NotFound)
    }
}
