use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

use crate::session::ChatSession;
use crate::upstream::GenerationFunction;

/// Talks to the chat routes of a running backend on behalf of one user.
#[derive(Clone)]
pub struct ChatClient {
    base: Url,
    token: String,
    http: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SaveTurn<'a> {
    prompt: &'a str,
    response: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

impl ChatClient {
    pub fn new(base: Url, token: String) -> Self {
        Self { base, token, http: reqwest::Client::new() }
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<Url> {
        Ok(self.base.join(path)?)
    }

    async fn read<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp.json().await?);
        }
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text).ok()
            .and_then(|b| b.message.or(b.error))
            .unwrap_or_else(|| format!("request failed: {}", status));
        anyhow::bail!(message)
    }

    pub async fn save_turn(&self, session_id: Option<&str>, prompt: &str, response: &str) -> anyhow::Result<ChatSession> {
        let resp = self.http.post(self.endpoint("chats")?)
            .bearer_auth(&self.token)
            .json(&SaveTurn { prompt, response, session_id })
            .send()
            .await?;
        Self::read(resp).await
    }

    pub async fn history(&self) -> anyhow::Result<Vec<ChatSession>> {
        let resp = self.http.get(self.endpoint("chats")?)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::read(resp).await
    }
}

/// Base URLs are joined with relative paths, so they need a trailing slash.
pub fn normalize_base(raw: &str) -> anyhow::Result<Url> {
    let with_slash = if raw.ends_with('/') { raw.to_string() } else { format!("{}/", raw) };
    Url::parse(&with_slash).with_context(|| format!("invalid server url {:?}", raw))
}

/// Reads prompts line by line, asks the generation function, shows the reply
/// and records the turn. Returns the session id the conversation ended on.
///
/// Errors from either side are printed and the loop carries on with the next
/// prompt, so a failed turn never ends the conversation.
pub async fn converse<R, W>(
    client: &ChatClient,
    generator: &dyn GenerationFunction,
    input: R,
    mut output: W,
    mut session_id: Option<String>,
) -> anyhow::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    loop {
        output.write_all(b"> ").await?;
        output.flush().await?;
        let Some(line) = lines.next_line().await? else { break };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "/quit" {
            break;
        }
        let reply = match generator.generate(prompt).await {
            Ok(r) => r,
            Err(e) => {
                output.write_all(format!("error: {}\n", e).as_bytes()).await?;
                continue;
            }
        };
        output.write_all(format!("{}\n", reply).as_bytes()).await?;
        match client.save_turn(session_id.as_deref(), prompt, &reply).await {
            Ok(session) => session_id = Some(session.session_id),
            Err(e) => output.write_all(format!("error: {}\n", e).as_bytes()).await?,
        }
    }
    output.flush().await?;
    Ok(session_id)
}

pub fn render_history(sessions: &[ChatSession]) -> String {
    let mut out = String::new();
    for s in sessions {
        out.push_str(&format!("== {} ({})\n", s.session_id, s.created_at.format("%Y-%m-%d %H:%M:%S")));
        for m in &s.messages {
            out.push_str(&format!("  you: {}\n  bot: {}\n", m.prompt, m.response));
        }
    }
    out
}
