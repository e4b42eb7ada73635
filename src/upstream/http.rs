use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use super::{GenerationFunction, UpstreamError, parse_generation_reply};

/// Generation function reached over HTTP, e.g. a Lambda function URL or API
/// Gateway route in front of it.
#[derive(Clone)]
pub struct HttpGeneration {
    pub url: Url,
    pub api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpGeneration {
    pub fn new(url: Url, api_key: Option<String>) -> Self {
        Self { url, api_key, client: reqwest::Client::new() }
    }
}

#[derive(Debug, Serialize)]
struct PromptBody<'a> {
    prompt: &'a str,
}

#[async_trait]
impl GenerationFunction for HttpGeneration {
    #[tracing::instrument(skip(self, prompt), fields(url = %self.url, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        let mut rb = self.client.post(self.url.clone()).json(&PromptBody { prompt });
        if let Some(key) = &self.api_key {
            rb = rb.bearer_auth(key);
        }
        let resp = rb.send().await.map_err(|e| UpstreamError::Generation(e.to_string()))?;
        let status = resp.status();
        let bytes = resp.bytes().await.map_err(|e| UpstreamError::Generation(e.to_string()))?;
        if !status.is_success() {
            let detail = parse_generation_reply(&bytes).err().map(|e| match e {
                UpstreamError::Generation(m) | UpstreamError::Monitoring(m) => m,
            });
            return Err(UpstreamError::Generation(match detail {
                Some(m) => format!("{}: {}", status, m),
                None => format!("model call failed: {}", status),
            }));
        }
        parse_generation_reply(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};
    use serde_json::{Value, json};

    async fn spawn(app: Router) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Url::parse(&format!("http://{}/generate", addr)).unwrap()
    }

    #[tokio::test]
    async fn posts_prompt_and_reads_response() {
        let app = Router::new().route("/generate", post(|Json(v): Json<Value>| async move {
            Json(json!({ "response": format!("echo: {}", v["prompt"].as_str().unwrap_or_default()) }))
        }));
        let generator = HttpGeneration::new(spawn(app).await, Some("k".into()));
        let got = generator.generate("hi").await.unwrap();
        assert_eq!(got, "echo: hi");
    }

    #[tokio::test]
    async fn non_success_status_is_upstream_error() {
        let app = Router::new().route("/generate", post(|| async {
            (StatusCode::BAD_GATEWAY, Json(json!({ "errorMessage": "model overloaded" })))
        }));
        let generator = HttpGeneration::new(spawn(app).await, None);
        let err = generator.generate("hi").await.unwrap_err();
        match err {
            UpstreamError::Generation(m) => assert!(m.contains("model overloaded"), "{}", m),
            other => panic!("unexpected {:?}", other),
        }
    }
}
