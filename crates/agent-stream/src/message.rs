use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::AgentEvent;
use crate::tool_call::ToolResult;

/// Author of a message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[default]
    Assistant,
    #[serde(alias = "developer")]
    System,
}

/// A conversation message, possibly still being streamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    /// Append-only while the message streams.
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// Tool invocations made from this message, in `TOOL_CALL_START` order.
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
}

impl Message {
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            created_at: Utc::now(),
            tool_results: Vec::new(),
        }
    }

    /// A user message with a fresh id.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), Role::User, content)
    }

    /// Appends `result`, or replaces the entry with the same id in place.
    pub fn upsert_tool_result(&mut self, result: ToolResult) {
        match self.tool_results.iter_mut().find(|r| r.id == result.id) {
            Some(existing) => *existing = result,
            None => self.tool_results.push(result),
        }
    }
}

/// Folds text message events into [`Message`]s.
///
/// Messages are kept in creation order and survive across runs as history.
/// The id index only covers the current run; [`MessageAccumulator::begin_run`]
/// starts a fresh one.
#[derive(Debug, Default)]
pub struct MessageAccumulator {
    messages: Vec<Message>,
    index: HashMap<String, usize>,
    last_chunk_id: Option<String>,
}

impl MessageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets the run-local id index; existing messages stay as history.
    pub fn begin_run(&mut self) {
        self.index.clear();
        self.last_chunk_id = None;
    }

    /// Drops every message.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.begin_run();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Looks up a message of the current run.
    pub fn get(&self, id: &str) -> Option<&Message> {
        self.index.get(id).map(|&idx| &self.messages[idx])
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        let idx = *self.index.get(id)?;
        Some(&mut self.messages[idx])
    }

    /// Appends a message that did not come from the stream (user input,
    /// restored history). It is not addressable by stream events.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Returns the run's message with `id`, creating it with `role` first if
    /// needed.
    pub fn get_or_create(&mut self, id: &str, role: Role) -> &mut Message {
        let idx = match self.index.get(id) {
            Some(&idx) => idx,
            None => {
                debug!(message_id = %id, role = ?role, "creating message");
                self.messages.push(Message::new(id, role, String::new()));
                let idx = self.messages.len() - 1;
                self.index.insert(id.to_string(), idx);
                idx
            }
        };
        &mut self.messages[idx]
    }

    /// Applies one event and returns the message it touched.
    ///
    /// Events that are not text message events return `None`.
    pub fn apply(&mut self, event: &AgentEvent) -> Option<&Message> {
        match event {
            AgentEvent::TextMessageStart {
                message_id, role, ..
            } => Some(&*self.get_or_create(message_id, role.unwrap_or_default())),
            AgentEvent::TextMessageContent {
                message_id, delta, ..
            } => {
                let message = self.get_or_create(message_id, Role::default());
                message.content.push_str(delta);
                Some(&*message)
            }
            AgentEvent::TextMessageChunk {
                message_id,
                role,
                delta,
                ..
            } => {
                let id = message_id
                    .clone()
                    .or_else(|| self.last_chunk_id.clone())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                self.last_chunk_id = Some(id.clone());
                let message = self.get_or_create(&id, role.unwrap_or_default());
                message.content.push_str(delta);
                Some(&*message)
            }
            AgentEvent::TextMessageEnd { message_id, .. } => {
                let message = self.get(message_id);
                if message.is_none() {
                    debug!(message_id = %message_id, "end for unknown message");
                }
                message
            }
            _ => None,
        }
    }
}
