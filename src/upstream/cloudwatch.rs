use async_trait::async_trait;
use aws_sdk_cloudwatch::error::DisplayErrorContext;
use aws_sdk_cloudwatch::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudwatch::types::{Dimension, Statistic};
use aws_sdk_cloudwatchlogs::types::OrderBy;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

use super::{DebugWindow, MonitoringSource, ResourceKind, UpstreamError};

/// CloudWatch Logs + CloudWatch metrics, built from a shared SDK config.
#[derive(Clone)]
pub struct CloudWatchMonitor {
    logs: aws_sdk_cloudwatchlogs::Client,
    metrics: aws_sdk_cloudwatch::Client,
}

impl CloudWatchMonitor {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            logs: aws_sdk_cloudwatchlogs::Client::new(config),
            metrics: aws_sdk_cloudwatch::Client::new(config),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    pub namespace: &'static str,
    pub metric_name: &'static str,
    pub dimension: &'static str,
    pub statistic: Statistic,
}

pub fn log_group_for(kind: ResourceKind, resource_id: &str) -> String {
    match kind {
        ResourceKind::Lambda => format!("/aws/lambda/{}", resource_id),
        ResourceKind::Rds => format!("/aws/rds/instance/{}/error", resource_id),
        // EC2 has no conventional group; the id names the group directly.
        ResourceKind::Ec2 => resource_id.to_string(),
    }
}

pub fn metric_query_for(kind: ResourceKind) -> MetricQuery {
    match kind {
        ResourceKind::Lambda => MetricQuery {
            namespace: "AWS/Lambda",
            metric_name: "Invocations",
            dimension: "FunctionName",
            statistic: Statistic::Sum,
        },
        ResourceKind::Rds => MetricQuery {
            namespace: "AWS/RDS",
            metric_name: "CPUUtilization",
            dimension: "DBInstanceIdentifier",
            statistic: Statistic::Average,
        },
        ResourceKind::Ec2 => MetricQuery {
            namespace: "AWS/EC2",
            metric_name: "CPUUtilization",
            dimension: "InstanceId",
            statistic: Statistic::Average,
        },
    }
}

pub fn dimension_for(query: &MetricQuery, resource_id: &str) -> Dimension {
    Dimension::builder()
        .name(query.dimension)
        .value(resource_id)
        .build()
}

fn monitoring_err<E: std::error::Error>(e: E) -> UpstreamError {
    UpstreamError::Monitoring(DisplayErrorContext(e).to_string())
}

fn to_chrono(ts: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(ts.secs(), ts.subsec_nanos())
}

#[async_trait]
impl MonitoringSource for CloudWatchMonitor {
    #[tracing::instrument(skip(self, window))]
    async fn recent_logs(&self, kind: ResourceKind, resource_id: &str, window: DebugWindow) -> Result<Vec<String>, UpstreamError> {
        let group = log_group_for(kind, resource_id);
        let streams = self.logs.describe_log_streams()
            .log_group_name(&group)
            .order_by(OrderBy::LastEventTime)
            .descending(true)
            .limit(1)
            .send()
            .await
            .map_err(monitoring_err)?;
        let Some(stream) = streams.log_streams().first().and_then(|s| s.log_stream_name()) else {
            tracing::info!(%group, "no log streams");
            return Ok(Vec::new());
        };
        let start = Utc::now().timestamp_millis() - window.lookback_secs * 1000;
        let events = self.logs.get_log_events()
            .log_group_name(&group)
            .log_stream_name(stream)
            .start_time(start)
            .start_from_head(false)
            .limit(window.log_limit)
            .send()
            .await
            .map_err(monitoring_err)?;
        Ok(events.events().iter()
            .filter_map(|e| e.message())
            .map(|m| m.trim_end().to_string())
            .collect())
    }

    #[tracing::instrument(skip(self, window))]
    async fn recent_metrics(&self, kind: ResourceKind, resource_id: &str, window: DebugWindow) -> Result<Value, UpstreamError> {
        let query = metric_query_for(kind);
        let end = Utc::now().timestamp();
        let start = end - window.lookback_secs;
        let out = self.metrics.get_metric_statistics()
            .namespace(query.namespace)
            .metric_name(query.metric_name)
            .dimensions(dimension_for(&query, resource_id))
            .start_time(AwsDateTime::from_secs(start))
            .end_time(AwsDateTime::from_secs(end))
            .period(window.metric_period_secs)
            .statistics(query.statistic.clone())
            .send()
            .await
            .map_err(monitoring_err)?;

        let mut points: Vec<(DateTime<Utc>, f64)> = out.datapoints().iter()
            .filter_map(|p| {
                let ts = p.timestamp().and_then(to_chrono)?;
                let value = match query.statistic {
                    Statistic::Sum => p.sum(),
                    _ => p.average(),
                }?;
                Some((ts, value))
            })
            .collect();
        points.sort_by_key(|(ts, _)| *ts);

        Ok(json!({
            "label": out.label().unwrap_or(query.metric_name),
            "namespace": query.namespace,
            "metricName": query.metric_name,
            "statistic": query.statistic.as_str(),
            "period": window.metric_period_secs,
            "timestamps": points.iter().map(|(ts, _)| ts.to_rfc3339()).collect::<Vec<_>>(),
            "values": points.iter().map(|(_, v)| *v).collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lambda_queries_follow_lambda_conventions() {
        assert_eq!(log_group_for(ResourceKind::Lambda, "orders"), "/aws/lambda/orders");
        let q = metric_query_for(ResourceKind::Lambda);
        assert_eq!(q.namespace, "AWS/Lambda");
        assert_eq!(q.metric_name, "Invocations");
        assert_eq!(q.dimension, "FunctionName");
        assert_eq!(q.statistic, Statistic::Sum);
    }

    #[test]
    fn rds_and_ec2_use_cpu_average() {
        assert_eq!(log_group_for(ResourceKind::Rds, "db-1"), "/aws/rds/instance/db-1/error");
        assert_eq!(log_group_for(ResourceKind::Ec2, "/custom/app"), "/custom/app");
        for kind in [ResourceKind::Rds, ResourceKind::Ec2] {
            let q = metric_query_for(kind);
            assert_eq!(q.metric_name, "CPUUtilization");
            assert_eq!(q.statistic, Statistic::Average);
        }
    }

    #[test]
    fn dimension_names_the_resource() {
        let d = dimension_for(&metric_query_for(ResourceKind::Rds), "db-1");
        assert_eq!(d.name(), Some("DBInstanceIdentifier"));
        assert_eq!(d.value(), Some("db-1"));
    }

    #[test]
    fn aws_timestamps_convert() {
        let ts = AwsDateTime::from_secs(1_700_000_000);
        assert_eq!(to_chrono(&ts).unwrap().timestamp(), 1_700_000_000);
    }
}
