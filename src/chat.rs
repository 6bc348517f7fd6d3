//! Chat orchestration: history formatting and retrieval-augmented answers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::assemble;
use crate::error::Result;
use crate::generation::ChatModel;
use crate::models::{ChatMessage, RetrievalResult, Role};
use crate::retrieve::Retriever;

/// Reply used when retrieval finds nothing; the model is not called.
pub const NO_CONTEXT_REPLY: &str =
    "I couldn't find anything relevant in the indexed documents to answer that.";

/// Default instructions placed ahead of the retrieved context.
pub const RAG_INSTRUCTIONS: &str = "You are a helpful assistant. Use the CONTEXT to answer the QUESTION. \
If the answer isn't in the context, say you don't know.";

/// One turn of client-supplied history. Roles other than `user`,
/// `assistant`, and `ai` are dropped when formatting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
}

impl HistoryTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// A retrieval-augmented reply with the units it was grounded on.
#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub reply: String,
    pub sources: RetrievalResult,
}

/// Build the message list: the system prompt first (if non-empty), then
/// user and assistant turns in order.
pub fn format_history(history: &[HistoryTurn], system_prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    if !system_prompt.is_empty() {
        messages.push(ChatMessage::new(Role::System, system_prompt));
    }
    for turn in history {
        match Role::parse(&turn.role) {
            Some(role @ (Role::User | Role::Assistant)) => {
                messages.push(ChatMessage::new(role, turn.content.clone()))
            }
            _ => tracing::debug!(role = %turn.role, "dropping history turn"),
        }
    }
    messages
}

/// System prompt carrying the retrieved context after `instructions`.
pub fn rag_system_prompt(instructions: &str, context: &str) -> String {
    format!("{}\n\nCONTEXT:\n{}\n", instructions.trim_end(), context)
}

pub struct ChatService {
    retriever: Retriever,
    model: Arc<dyn ChatModel>,
    instructions: String,
}

impl ChatService {
    pub fn new(retriever: Retriever, model: Arc<dyn ChatModel>) -> Self {
        Self {
            retriever,
            model,
            instructions: RAG_INSTRUCTIONS.to_string(),
        }
    }

    /// Replace the instructions that open every RAG system prompt
    /// (`[generation] system_prompt`). Blank input keeps the default.
    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        let instructions = instructions.into();
        if !instructions.trim().is_empty() {
            self.instructions = instructions;
        }
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Plain chat over the formatted history.
    pub async fn chat(&self, history: &[HistoryTurn], system_prompt: &str) -> Result<String> {
        let messages = format_history(history, system_prompt);
        self.model.generate(&messages).await
    }

    /// Retrieve context for `question`, then answer it with `history` as
    /// prior turns. Returns [`NO_CONTEXT_REPLY`] without calling the model
    /// when nothing relevant is indexed.
    pub async fn rag_answer(&self, question: &str, history: &[HistoryTurn]) -> Result<RagAnswer> {
        let sources = self.retriever.retrieve(question).await?;
        let context = assemble(sources.iter().map(|s| &s.unit));
        if context.is_empty() {
            tracing::info!("no context found for question");
            return Ok(RagAnswer {
                reply: NO_CONTEXT_REPLY.to_string(),
                sources,
            });
        }

        let mut turns = history.to_vec();
        turns.push(HistoryTurn::user(question));
        let system_prompt = rag_system_prompt(&self.instructions, &context);
        let reply = self.chat(&turns, &system_prompt).await?;
        Ok(RagAnswer { reply, sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::embedding::HashProvider;
    use crate::error::RagError;
    use crate::index::{Backend, IndexManager};
    use crate::issue::IssueRecord;
    use crate::normalize::{Document, Normalizer};
    use crate::store::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records the messages it receives and echoes the last one.
    #[derive(Default)]
    struct EchoModel {
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(messages
                .last()
                .map(|m| m.content.clone())
                .unwrap_or_default())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
            Err(RagError::Generation("connection refused".into()))
        }
    }

    async fn service(model: Arc<dyn ChatModel>) -> ChatService {
        let manager = IndexManager::new(
            Backend::Memory(Arc::new(InMemoryStore::new("c"))),
            "c",
            Arc::new(HashProvider::new(256)),
            Normalizer::default(),
        );
        manager
            .build(&[Document::Issue(IssueRecord {
                key: "PROJ-5".into(),
                title: "Export hangs".into(),
                issue_type: "Bug".into(),
                status: "Open".into(),
                description: Some("export of large reports hangs forever".into()),
                ..Default::default()
            })])
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::new(manager), &RetrievalConfig::default());
        ChatService::new(retriever, model)
    }

    #[test]
    fn test_format_history_roles() {
        let history = vec![
            HistoryTurn::user("hi"),
            HistoryTurn {
                role: "ai".into(),
                content: "hello".into(),
            },
            HistoryTurn {
                role: "tool".into(),
                content: "ignored".into(),
            },
            HistoryTurn {
                role: "system".into(),
                content: "also ignored".into(),
            },
        ];
        let messages = format_history(&history, "be brief");
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
        assert_eq!(messages[0].content, "be brief");

        assert_eq!(format_history(&history, "").len(), 2);
    }

    #[test]
    fn test_rag_system_prompt() {
        let prompt = rag_system_prompt(RAG_INSTRUCTIONS, "[p1] text");
        assert!(prompt.starts_with("You are a helpful assistant. Use the CONTEXT"));
        assert!(prompt.ends_with("CONTEXT:\n[p1] text\n"));
    }

    #[tokio::test]
    async fn test_rag_answer_sends_context() {
        let model = Arc::new(EchoModel::default());
        let svc = service(model.clone()).await;
        let answer = svc
            .rag_answer("export large reports", &[])
            .await
            .unwrap();
        assert_eq!(answer.reply, "export large reports");
        assert!(!answer.sources.is_empty());

        let seen = model.seen.lock().unwrap();
        let system = &seen[0][0];
        assert_eq!(system.role, Role::System);
        assert!(system.content.contains("[PROJ-5 "));
    }

    #[tokio::test]
    async fn test_custom_instructions_reach_model() {
        let model = Arc::new(EchoModel::default());
        let svc = service(model.clone())
            .await
            .with_instructions("Answer in one sentence, citing issue keys.");
        svc.rag_answer("export large reports", &[]).await.unwrap();

        let seen = model.seen.lock().unwrap();
        let system = &seen[0][0].content;
        assert!(system.starts_with("Answer in one sentence, citing issue keys.\n\nCONTEXT:\n"));
        assert!(!system.contains("You are a helpful assistant"));
    }

    #[tokio::test]
    async fn test_blank_instructions_keep_default() {
        let model = Arc::new(EchoModel::default());
        let svc = service(model.clone()).await.with_instructions("   ");
        svc.rag_answer("export large reports", &[]).await.unwrap();
        assert!(model.seen.lock().unwrap()[0][0]
            .content
            .starts_with(RAG_INSTRUCTIONS));
    }

    #[tokio::test]
    async fn test_rag_answer_without_context_skips_model() {
        let model = Arc::new(EchoModel::default());
        let svc = service(model.clone()).await;
        let answer = svc.rag_answer("zebra giraffe", &[]).await.unwrap();
        assert_eq!(answer.reply, NO_CONTEXT_REPLY);
        assert!(answer.sources.is_empty());
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generation_failure_propagates() {
        let svc = service(Arc::new(FailingModel)).await;
        let err = svc
            .rag_answer("export large reports", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Generation(_)));
    }
}
