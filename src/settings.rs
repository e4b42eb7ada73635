use std::net::SocketAddr;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::upstream::DebugWindow;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:5000";
pub const DEFAULT_AWS_REGION: &str = "ap-south-1";
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// One source of configuration. Every field is optional so that layers can be
/// stacked: CLI flags over environment over built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SettingsLayer {
    pub listen: Option<String>,
    pub database_url: Option<String>,
    pub jwt_secret: Option<String>,
    pub token_ttl_secs: Option<u64>,
    pub aws_region: Option<String>,
    pub lambda_function_name: Option<String>,
    pub genai_http_url: Option<String>,
    pub genai_api_key: Option<String>,
    pub log_limit: Option<i32>,
    pub metric_window_secs: Option<i64>,
    pub metric_period_secs: Option<i32>,
    pub cors_origins: Option<Vec<String>>,
    pub metrics_listen: Option<String>,
}

impl SettingsLayer {
    pub fn defaults() -> Self {
        let window = DebugWindow::default();
        Self {
            listen: Some(DEFAULT_LISTEN.into()),
            token_ttl_secs: Some(DEFAULT_TOKEN_TTL_SECS),
            aws_region: Some(DEFAULT_AWS_REGION.into()),
            log_limit: Some(window.log_limit),
            metric_window_secs: Some(window.lookback_secs),
            metric_period_secs: Some(window.metric_period_secs),
            ..Default::default()
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|k| std::env::var(k).ok())
    }

    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let num = |k: &str| -> anyhow::Result<Option<i64>> {
            var(k).map(|v| v.parse::<i64>().with_context(|| format!("{} must be an integer, got {:?}", k, v))).transpose()
        };
        let num32 = |k: &str| -> anyhow::Result<Option<i32>> {
            num(k)?.map(|v| i32::try_from(v).with_context(|| format!("{} is out of range, got {}", k, v))).transpose()
        };
        Ok(Self {
            listen: var("LISTEN_ADDR"),
            database_url: var("DATABASE_URL"),
            jwt_secret: var("JWT_SECRET"),
            token_ttl_secs: num("TOKEN_TTL_SECS")?.map(|v| v.max(0) as u64),
            aws_region: var("AWS_REGION"),
            lambda_function_name: var("AWS_LAMBDA_FUNCTION_NAME"),
            genai_http_url: var("GENAI_HTTP_URL"),
            genai_api_key: var("GENAI_API_KEY"),
            log_limit: num32("DEBUG_LOG_LIMIT")?,
            metric_window_secs: num("DEBUG_METRIC_WINDOW_SECS")?,
            metric_period_secs: num32("DEBUG_METRIC_PERIOD_SECS")?,
            cors_origins: var("CORS_ORIGINS").map(|v| {
                v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
            }),
            metrics_listen: var("METRICS_LISTEN"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationBackend {
    Lambda { function_name: String },
    Http { url: Url, api_key: Option<String> },
}

/// Fully resolved server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub listen: SocketAddr,
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub aws_region: String,
    pub generation: GenerationBackend,
    pub window: DebugWindow,
    pub cors_origins: Option<Vec<String>>,
    pub metrics_listen: Option<SocketAddr>,
}

fn pick<T: Clone>(f: impl Fn(&SettingsLayer) -> &Option<T>, layers: &[&SettingsLayer]) -> Option<T> {
    layers.iter().find_map(|&l| f(l).clone())
}

/// Merges layers in precedence order (first wins).
pub fn merge_layers(layers: &[&SettingsLayer]) -> SettingsLayer {
    SettingsLayer {
        listen: pick(|l| &l.listen, layers),
        database_url: pick(|l| &l.database_url, layers),
        jwt_secret: pick(|l| &l.jwt_secret, layers),
        token_ttl_secs: pick(|l| &l.token_ttl_secs, layers),
        aws_region: pick(|l| &l.aws_region, layers),
        lambda_function_name: pick(|l| &l.lambda_function_name, layers),
        genai_http_url: pick(|l| &l.genai_http_url, layers),
        genai_api_key: pick(|l| &l.genai_api_key, layers),
        log_limit: pick(|l| &l.log_limit, layers),
        metric_window_secs: pick(|l| &l.metric_window_secs, layers),
        metric_period_secs: pick(|l| &l.metric_period_secs, layers),
        cors_origins: pick(|l| &l.cors_origins, layers),
        metrics_listen: pick(|l| &l.metrics_listen, layers),
    }
}

/// An HTTP endpoint takes precedence over the Lambda function when both are set.
pub fn resolve_generation(merged: &SettingsLayer) -> anyhow::Result<GenerationBackend> {
    match (&merged.genai_http_url, &merged.lambda_function_name) {
        (Some(url), _) => Ok(GenerationBackend::Http {
            url: Url::parse(url).with_context(|| format!("invalid GENAI_HTTP_URL {:?}", url))?,
            api_key: merged.genai_api_key.clone(),
        }),
        (None, Some(name)) => Ok(GenerationBackend::Lambda { function_name: name.clone() }),
        (None, None) => anyhow::bail!("set AWS_LAMBDA_FUNCTION_NAME or GENAI_HTTP_URL"),
    }
}

pub fn region_of(merged: &SettingsLayer) -> String {
    merged.aws_region.clone().unwrap_or_else(|| DEFAULT_AWS_REGION.into())
}

/// Resolves `cli` over `env` over `defaults` into settings a server can run with.
pub fn resolve_settings(defaults: &SettingsLayer, env: &SettingsLayer, cli: &SettingsLayer) -> anyhow::Result<Settings> {
    let merged = merge_layers(&[cli, env, defaults]);

    let listen = merged.listen.as_deref().unwrap_or(DEFAULT_LISTEN);
    let listen: SocketAddr = listen.parse().with_context(|| format!("invalid listen address {:?}", listen))?;
    let jwt_secret = merged.jwt_secret.clone().context("JWT_SECRET is not set")?;

    let generation = resolve_generation(&merged)?;

    let fallback = DebugWindow::default();
    let window = DebugWindow {
        log_limit: merged.log_limit.unwrap_or(fallback.log_limit).max(1),
        lookback_secs: merged.metric_window_secs.unwrap_or(fallback.lookback_secs).max(60),
        metric_period_secs: merged.metric_period_secs.unwrap_or(fallback.metric_period_secs).max(60),
    };

    let metrics_listen = merged.metrics_listen.as_deref()
        .map(|m| m.parse::<SocketAddr>().with_context(|| format!("invalid metrics address {:?}", m)))
        .transpose()?;

    let aws_region = region_of(&merged);
    Ok(Settings {
        listen,
        database_url: merged.database_url,
        jwt_secret,
        aws_region,
        generation,
        window,
        cors_origins: merged.cors_origins,
        metrics_listen,
    })
}
