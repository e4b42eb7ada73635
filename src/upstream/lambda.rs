use async_trait::async_trait;
use aws_sdk_lambda::error::DisplayErrorContext;
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::types::InvocationType;
use serde_json::json;

use super::{GenerationFunction, UpstreamError, parse_generation_reply};

/// Invokes the GenAI Lambda synchronously.
#[derive(Clone)]
pub struct LambdaGeneration {
    client: aws_sdk_lambda::Client,
    function_name: String,
}

impl LambdaGeneration {
    pub fn new(config: &aws_config::SdkConfig, function_name: String) -> Self {
        Self { client: aws_sdk_lambda::Client::new(config), function_name }
    }
}

/// The function is fronted like an HTTP handler, so the prompt travels as a
/// JSON string inside `body`.
pub fn invocation_payload(prompt: &str) -> Vec<u8> {
    let body = json!({ "prompt": prompt }).to_string();
    json!({ "body": body }).to_string().into_bytes()
}

#[async_trait]
impl GenerationFunction for LambdaGeneration {
    #[tracing::instrument(skip(self, prompt), fields(function = %self.function_name, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String, UpstreamError> {
        let out = self.client.invoke()
            .function_name(&self.function_name)
            .invocation_type(InvocationType::RequestResponse)
            .payload(Blob::new(invocation_payload(prompt)))
            .send()
            .await
            .map_err(|e| UpstreamError::Generation(DisplayErrorContext(e).to_string()))?;

        let raw: &[u8] = out.payload().map(|b| b.as_ref()).unwrap_or_default();
        if let Some(kind) = out.function_error() {
            // Execution errors still carry a JSON payload with errorMessage.
            let msg = match parse_generation_reply(raw) {
                Err(UpstreamError::Generation(m)) => m,
                _ => format!("function error: {}", kind),
            };
            return Err(UpstreamError::Generation(msg));
        }
        parse_generation_reply(raw)
    }
}
