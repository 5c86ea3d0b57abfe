use cellpilot_core::{ChatMessage, DisplayType, Role};
use serde::Serialize;

const FIRST_TURN_PLACEHOLDER: &str = "Ask your personal Python expert anything!";
const FOLLOW_UP_PLACEHOLDER: &str = "Follow up on the conversation";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    #[error("message index {index} out of range (len {len}) or not a user message")]
    OutOfRange { index: usize, len: usize },
}

/// One entry of the conversation.
///
/// `content` is what the model sees. `display_content`, when present, is what
/// the user typed or triggered, and is what the chat panel shows instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_content: Option<String>,
    display_type: DisplayType,
    created_index: usize,
}

impl Message {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn display_content(&self) -> Option<&str> {
        self.display_content.as_deref()
    }

    pub fn display_type(&self) -> DisplayType {
        self.display_type
    }

    pub fn created_index(&self) -> usize {
        self.created_index
    }

    /// Text shown to the user.
    pub fn display_text(&self) -> &str {
        self.display_content.as_deref().unwrap_or(&self.content)
    }
}

/// Entry of [`ConversationLog::display_view`]; `index` addresses the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayEntry<'a> {
    pub index: usize,
    pub role: Role,
    pub text: &'a str,
    pub display_type: DisplayType,
}

/// Append-only conversation whose first entry is always a system message.
///
/// Edits truncate at the edited index and append the replacement, so indices
/// stay stable for every message before the edit point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationLog {
    messages: Vec<Message>,
}

impl ConversationLog {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let mut log = Self {
            messages: Vec::new(),
        };
        log.push(Role::System, system_prompt.into(), None, DisplayType::Normal);
        log
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false; a log holds at least its system message.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn append_system_message(&mut self, text: impl Into<String>) -> usize {
        self.push(Role::System, text.into(), None, DisplayType::Normal)
    }

    pub fn append_user_message(
        &mut self,
        text: impl Into<String>,
        display_type: DisplayType,
    ) -> usize {
        self.push(Role::User, text.into(), None, display_type)
    }

    /// Append a user message whose model-facing prompt differs from what is shown.
    pub fn append_user_turn(
        &mut self,
        content: impl Into<String>,
        display: Option<String>,
        display_type: DisplayType,
    ) -> usize {
        self.push(Role::User, content.into(), display, display_type)
    }

    /// Append raw assistant text. Error replies are shown as connection errors.
    pub fn append_assistant_message(&mut self, raw: impl Into<String>, is_error: bool) -> usize {
        let display_type = if is_error {
            DisplayType::ConnectionError
        } else {
            DisplayType::Normal
        };
        self.push(Role::Assistant, raw.into(), None, display_type)
    }

    /// Drop every message from `index` on and append `content` as a user message there.
    pub fn replace_message_at(
        &mut self,
        index: usize,
        content: impl Into<String>,
    ) -> Result<usize, LogError> {
        self.replace_user_turn_at(index, content, None, DisplayType::Normal)
    }

    pub fn replace_user_turn_at(
        &mut self,
        index: usize,
        content: impl Into<String>,
        display: Option<String>,
        display_type: DisplayType,
    ) -> Result<usize, LogError> {
        match self.messages.get(index) {
            Some(message) if message.role == Role::User => {}
            _ => {
                return Err(LogError::OutOfRange {
                    index,
                    len: self.messages.len(),
                });
            }
        }
        self.messages.truncate(index);
        Ok(self.push(Role::User, content.into(), display, display_type))
    }

    /// Every message in order, system prompt included, as sent to the backend.
    pub fn model_facing_view(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .map(|m| ChatMessage::new(m.role, m.content.clone()))
            .collect()
    }

    pub fn display_view(&self) -> Vec<DisplayEntry<'_>> {
        self.messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| DisplayEntry {
                index: m.created_index,
                role: m.role,
                text: m.display_text(),
                display_type: m.display_type,
            })
            .collect()
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub fn last_assistant_index(&self) -> Option<usize> {
        self.last_assistant_message().map(|m| m.created_index)
    }

    /// Independent copy for an in-flight request.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    pub fn input_placeholder(&self) -> &'static str {
        if self.display_view().len() < 2 {
            FIRST_TURN_PLACEHOLDER
        } else {
            FOLLOW_UP_PLACEHOLDER
        }
    }

    fn push(
        &mut self,
        role: Role,
        content: String,
        display_content: Option<String>,
        display_type: DisplayType,
    ) -> usize {
        let created_index = self.messages.len();
        self.messages.push(Message {
            role,
            content,
            display_content,
            display_type,
            created_index,
        });
        created_index
    }
}
