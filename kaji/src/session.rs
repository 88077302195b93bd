//! Conversation session owned by an agent.
//!
//! The session is the ordered message list for the current agent
//! instance. Only the execution loop mutates it; observers get cloned
//! snapshots.

use uuid::Uuid;

use crate::message::{Message, Role};

/// Ordered conversation state for one agent instance.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    messages: Vec<Message>,
}

impl Session {
    /// Creates a session with a fresh id, optionally seeded with a system
    /// prompt.
    #[must_use]
    pub fn new(system_prompt: Option<&str>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), system_prompt)
    }

    /// Creates a session with a caller-provided id (rehydration).
    #[must_use]
    pub fn with_id(id: impl Into<String>, system_prompt: Option<&str>) -> Self {
        let mut messages = Vec::new();
        if let Some(prompt) = system_prompt
            && !prompt.is_empty()
        {
            messages.push(Message::system(prompt));
        }
        Self {
            id: id.into(),
            messages,
        }
    }

    /// The session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The current messages.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// An owned snapshot of the current messages.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the session holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends a message.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Removes the trailing assistant message, if the last message is one.
    ///
    /// Used by the compensation path to drop an empty assistant turn
    /// before re-asking the model.
    pub fn remove_last_assistant(&mut self) -> Option<Message> {
        if self.messages.last().is_some_and(|m| m.role == Role::Assistant) {
            self.messages.pop()
        } else {
            None
        }
    }

    /// Clears everything after the system prompt.
    pub fn reset(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
    }

    /// Checks that every tool message responds to a tool call from an
    /// earlier assistant message.
    #[must_use]
    pub fn tool_results_paired(&self) -> bool {
        let mut seen_call_ids: Vec<&str> = Vec::new();
        for message in &self.messages {
            match message.role {
                Role::Assistant => {
                    if let Some(calls) = &message.tool_calls {
                        seen_call_ids.extend(calls.iter().map(|c| c.id.as_str()));
                    }
                }
                Role::Tool => {
                    let Some(id) = message.tool_call_id.as_deref() else {
                        return false;
                    };
                    if !seen_call_ids.contains(&id) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::message::ToolCall;

    #[test]
    fn system_prompt_seeds_first_message() {
        let session = Session::new(Some("be helpful"));
        assert_eq!(session.len(), 1);
        assert_eq!(session.messages()[0].role, Role::System);
    }

    #[test]
    fn empty_system_prompt_is_skipped() {
        let session = Session::new(Some(""));
        assert!(session.is_empty());
    }

    #[test]
    fn remove_last_assistant_only_pops_assistant() {
        let mut session = Session::new(None);
        session.push(Message::user("hi"));
        assert!(session.remove_last_assistant().is_none());

        session.push(Message::assistant(""));
        assert!(session.remove_last_assistant().is_some());
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn reset_keeps_system_prompt() {
        let mut session = Session::new(Some("sys"));
        session.push(Message::user("hi"));
        session.push(Message::assistant("hello"));
        session.reset();
        assert_eq!(session.len(), 1);
        assert_eq!(session.messages()[0].role, Role::System);
    }

    #[test]
    fn tool_pairing_detects_orphans() {
        let mut session = Session::new(None);
        session.push(Message::assistant_tool_calls(vec![ToolCall::new(
            "call_1", "t", "{}",
        )]));
        session.push(Message::tool("call_1", "ok"));
        assert!(session.tool_results_paired());

        session.push(Message::tool("call_unknown", "??"));
        assert!(!session.tool_results_paired());
    }
}
