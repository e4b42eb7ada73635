use std::sync::Arc;

use crate::error::ApiError;
use crate::session::{ChatMessage, ChatSession};
use crate::storage::ChatRepository;

/// Outcome of [`ChatService::create_or_append`].
#[derive(Debug, Clone, PartialEq)]
pub enum Saved {
    Created(ChatSession),
    Appended(ChatSession),
}

impl Saved {
    pub fn into_session(self) -> ChatSession {
        match self {
            Saved::Created(s) | Saved::Appended(s) => s,
        }
    }
}

#[derive(Clone)]
pub struct ChatService {
    repo: Arc<dyn ChatRepository>,
}

fn required(field: &str, value: Option<String>) -> Result<String, ApiError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ApiError::Validation(format!("{} is required", field))),
    }
}

impl ChatService {
    pub fn new(repo: Arc<dyn ChatRepository>) -> Self {
        Self { repo }
    }

    /// Starts a session when `session_id` is `None`, otherwise appends to the
    /// caller's session with that id.
    #[tracing::instrument(skip(self, prompt, response))]
    pub async fn create_or_append(
        &self,
        owner_id: &str,
        session_id: Option<&str>,
        prompt: Option<String>,
        response: Option<String>,
    ) -> Result<Saved, ApiError> {
        let prompt = required("prompt", prompt)?;
        let response = required("response", response)?;
        let msg = ChatMessage::new(prompt, response);

        match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            None => {
                let session = ChatSession::new(owner_id.to_string(), msg);
                self.repo.insert_chat(&session).await?;
                metrics::counter!("chat_sessions_created_total").increment(1);
                tracing::info!(session_id = %session.session_id, "chat session created");
                Ok(Saved::Created(session))
            }
            Some(sid) => {
                let session = self.repo.append_chat_message(sid, owner_id, &msg).await?
                    .ok_or(ApiError::NotFound)?;
                metrics::counter!("chat_messages_appended_total").increment(1);
                tracing::info!(session_id = %sid, messages = session.messages.len(), "chat message appended");
                Ok(Saved::Appended(session))
            }
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn list(&self, owner_id: &str) -> Result<Vec<ChatSession>, ApiError> {
        Ok(self.repo.list_chats(owner_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::temp_repository;
    use async_trait::async_trait;
    use std::collections::HashSet;

    async fn service() -> (ChatService, tempfile::TempDir) {
        let (repo, dir) = temp_repository().await;
        (ChatService::new(Arc::new(repo)), dir)
    }

    fn s(v: &str) -> Option<String> {
        Some(v.to_string())
    }

    #[tokio::test]
    async fn new_sessions_have_one_message_and_fresh_ids() {
        let (svc, _dir) = service().await;
        let mut seen = HashSet::new();
        for i in 0..5 {
            let saved = svc.create_or_append("alice", None, s(&format!("q{}", i)), s("a")).await.unwrap();
            let Saved::Created(session) = saved else { panic!("expected a new session") };
            assert_eq!(session.messages.len(), 1);
            assert_eq!(session.owner_id, "alice");
            assert!(seen.insert(session.session_id));
        }
    }

    #[tokio::test]
    async fn appends_grow_by_one_and_keep_prior_turns() {
        let (svc, _dir) = service().await;
        let first = svc.create_or_append("alice", None, s("hi"), s("hello")).await.unwrap().into_session();
        let mut previous = first.messages.clone();
        for i in 0..4 {
            let saved = svc.create_or_append("alice", Some(&first.session_id), s(&format!("q{}", i)), s("a")).await.unwrap();
            let Saved::Appended(session) = saved else { panic!("expected an append") };
            assert_eq!(session.messages.len(), previous.len() + 1);
            assert_eq!(&session.messages[..previous.len()], &previous[..]);
            assert_eq!(session.session_id, first.session_id);
            previous = session.messages;
        }
    }

    #[tokio::test]
    async fn other_users_session_is_not_found() {
        let (svc, _dir) = service().await;
        let a = svc.create_or_append("alice", None, s("secret"), s("data")).await.unwrap().into_session();
        let err = svc.create_or_append("bob", Some(&a.session_id), s("x"), s("y")).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound));
        let missing = svc.create_or_append("bob", Some("does-not-exist"), s("x"), s("y")).await.unwrap_err();
        assert_eq!(err.to_string(), missing.to_string());

        let alice = svc.list("alice").await.unwrap();
        assert_eq!(alice[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn list_is_owner_scoped_and_empty_for_new_users() {
        let (svc, _dir) = service().await;
        assert!(svc.list("nobody").await.unwrap().is_empty());
        svc.create_or_append("alice", None, s("a1"), s("r")).await.unwrap();
        svc.create_or_append("bob", None, s("b1"), s("r")).await.unwrap();
        svc.create_or_append("alice", None, s("a2"), s("r")).await.unwrap();
        let alice = svc.list("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|c| c.owner_id == "alice"));
    }

    #[tokio::test]
    async fn appended_text_round_trips_unchanged() {
        let (svc, _dir) = service().await;
        let prompt = "  why is my lambda \"timing out\"?\nsee: ünïcödé 🚀 ";
        let response = "Increase the timeout.\n\t- check cold starts";
        let created = svc.create_or_append("alice", None, s("first"), s("ok")).await.unwrap().into_session();
        svc.create_or_append("alice", Some(&created.session_id), s(prompt), s(response)).await.unwrap();
        let listed = svc.list("alice").await.unwrap();
        assert_eq!(listed[0].messages[1].prompt, prompt);
        assert_eq!(listed[0].messages[1].response, response);
    }

    struct UnreachableRepo;

    #[async_trait]
    impl ChatRepository for UnreachableRepo {
        async fn insert_chat(&self, _: &ChatSession) -> anyhow::Result<()> { panic!("store touched") }
        async fn append_chat_message(&self, _: &str, _: &str, _: &ChatMessage) -> anyhow::Result<Option<ChatSession>> { panic!("store touched") }
        async fn get_chat(&self, _: &str, _: &str) -> anyhow::Result<Option<ChatSession>> { panic!("store touched") }
        async fn list_chats(&self, _: &str) -> anyhow::Result<Vec<ChatSession>> { anyhow::bail!("connection refused") }
    }

    #[tokio::test]
    async fn validation_happens_before_store_access() {
        let svc = ChatService::new(Arc::new(UnreachableRepo));
        for (p, r) in [(None, s("r")), (s("p"), None), (s("   "), s("r")), (s("p"), s(""))] {
            let err = svc.create_or_append("alice", None, p, r).await.unwrap_err();
            assert!(matches!(err, ApiError::Validation(_)));
        }
    }

    #[tokio::test]
    async fn store_failure_is_internal() {
        let svc = ChatService::new(Arc::new(UnreachableRepo));
        assert!(matches!(svc.list("alice").await.unwrap_err(), ApiError::Internal(_)));
    }
}
