//! Shared conversation-history helpers for model-backed nodes.
//!
//! History is keyed by `main_execution_id`, so every node with a truthy
//! `identity` anywhere in an orchestration tree reads and writes the same
//! transcript. When the history is empty and the identity resolves to a
//! system prompt, that prompt is seeded as the first message.

use crate::errors::BackendError;
use crate::traits::Backends;
use crate::types::Message;

/// Handle to the shared history for one node activation. `key` is `None`
/// when the node has no identity or no history backend is configured —
/// every operation is then a no-op.
pub(crate) struct Conversation {
    key: Option<String>,
    pub history: Vec<Message>,
}

impl Conversation {
    /// Load the shared history for a node, seeding the identity's system
    /// prompt on first use.
    pub async fn load(
        backends: &Backends,
        main_execution_id: &str,
        identity: Option<&str>,
    ) -> Result<Self, BackendError> {
        let (Some(identity), Some(history_backend)) =
            (identity.filter(|i| !i.is_empty()), &backends.conversation_history)
        else {
            return Ok(Self {
                key: None,
                history: Vec::new(),
            });
        };

        let mut history = history_backend.get_history(main_execution_id).await?;

        if history.is_empty() {
            if let Some(identity_backend) = &backends.identity {
                let identities = identity_backend
                    .get_identities(main_execution_id)
                    .await?
                    .unwrap_or_default();
                if let Some(system_prompt) = identities.get(identity).filter(|p| !p.is_empty()) {
                    history.push(Message::new("system", system_prompt.clone()));
                    history_backend
                        .save_history(main_execution_id, &history)
                        .await?;
                }
            }
        }

        Ok(Self {
            key: Some(main_execution_id.to_string()),
            history,
        })
    }

    /// Whether this activation participates in shared history.
    pub fn is_active(&self) -> bool {
        self.key.is_some()
    }

    /// Append entries locally and persist them.
    pub async fn append(
        &mut self,
        backends: &Backends,
        entries: Vec<Message>,
    ) -> Result<(), BackendError> {
        let Some(key) = &self.key else {
            return Ok(());
        };
        if let Some(history_backend) = &backends.conversation_history {
            history_backend.append_turns(key, &entries).await?;
        }
        self.history.extend(entries);
        Ok(())
    }

    /// Append one user/assistant turn pair.
    pub async fn save_turn(
        &mut self,
        backends: &Backends,
        user_content: &str,
        assistant_content: &str,
    ) -> Result<(), BackendError> {
        self.append(
            backends,
            vec![
                Message::new("user", user_content),
                Message::new("assistant", assistant_content),
            ],
        )
        .await
    }
}

/// Format a transcript for inclusion in a prompt.
pub(crate) fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|m| match &m.tool_name {
            Some(tool) => format!("[{} {}]: {}", m.role, tool, m.content),
            None => format!("[{}]: {}", m.role, m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
