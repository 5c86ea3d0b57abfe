use cellpilot_chat::{BufferPort, ChatController, DiffRenderer};
use cellpilot_core::{ChatConfig, ChatMessage};
use cellpilot_diff::DiffLine;
use cellpilot_llm::{AssistantReply, CompletionClient, TransportError};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

type Script = VecDeque<Result<AssistantReply, TransportError>>;

/// Completion client that replays queued replies in order and records
/// every conversation it was sent.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<Script>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push_reply(text);
        self
    }

    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.push_error(message);
        self
    }

    pub fn push_reply(&self, text: impl Into<String>) {
        self.lock_replies().push_back(Ok(AssistantReply::new(text)));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.lock_replies().push_back(Err(TransportError::new(message)));
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn lock_replies(&self) -> MutexGuard<'_, Script> {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CompletionClient for ScriptedClient {
    fn send(&self, messages: &[ChatMessage]) -> Result<AssistantReply, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(messages.to_vec());
        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::new("scripted client has no reply queued")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferWrite {
    pub code: String,
    pub is_final: bool,
}

/// In-memory cell with a write history.
#[derive(Debug, Clone, Default)]
pub struct MemoryBuffer {
    code: Option<String>,
    writes: Vec<BufferWrite>,
}

impl MemoryBuffer {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            writes: Vec::new(),
        }
    }

    /// A buffer with no active cell.
    pub fn detached() -> Self {
        Self::default()
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Simulate the user typing into the cell; not recorded as a write.
    pub fn user_edit(&mut self, code: impl Into<String>) {
        self.code = Some(code.into());
    }

    pub fn writes(&self) -> &[BufferWrite] {
        &self.writes
    }

    pub fn final_writes(&self) -> usize {
        self.writes.iter().filter(|w| w.is_final).count()
    }
}

impl BufferPort for MemoryBuffer {
    fn read_active_code(&self) -> Option<String> {
        self.code.clone()
    }

    fn write_active_code(&mut self, code: &str, is_final: bool) {
        self.code = Some(code.to_string());
        self.writes.push(BufferWrite {
            code: code.to_string(),
            is_final,
        });
    }
}

/// Renderer that keeps every frame it was handed; `None` frames are clears.
#[derive(Debug, Clone, Default)]
pub struct RecordingRenderer {
    frames: Vec<Option<Vec<DiffLine>>>,
}

impl RecordingRenderer {
    pub fn frames(&self) -> &[Option<Vec<DiffLine>>] {
        &self.frames
    }

    pub fn last(&self) -> Option<&Option<Vec<DiffLine>>> {
        self.frames.last()
    }

    pub fn is_cleared(&self) -> bool {
        matches!(self.frames.last(), None | Some(None))
    }
}

impl DiffRenderer for RecordingRenderer {
    fn render(&mut self, diff_lines: Option<&[DiffLine]>) {
        self.frames.push(diff_lines.map(<[DiffLine]>::to_vec));
    }
}

pub type TestController = ChatController<MemoryBuffer, RecordingRenderer>;

pub fn controller_with_code(code: &str) -> TestController {
    controller_with_config(code, ChatConfig::default())
}

pub fn controller_with_config(code: &str, cfg: ChatConfig) -> TestController {
    ChatController::new(MemoryBuffer::new(code), RecordingRenderer::default(), cfg)
}

/// Assistant reply text wrapping `code` in a python fence.
pub fn fenced_reply(code: &str) -> String {
    format!("Here is the updated cell:\n\n```python\n{code}\n```\n\nThe change is shown above.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellpilot_core::Role;

    #[test]
    fn scripted_client_replays_in_order_and_records_requests() {
        let client = ScriptedClient::new().with_reply("one").with_error("down");
        let convo = vec![ChatMessage::new(Role::System, "sys")];
        assert_eq!(client.send(&convo).expect("first").text, "one");
        assert_eq!(client.send(&convo).expect_err("second").message, "down");
        assert!(client.send(&convo).is_err());
        assert_eq!(client.requests().len(), 3);
    }

    #[test]
    fn memory_buffer_tracks_writes_but_not_user_edits() {
        let mut buffer = MemoryBuffer::new("a");
        buffer.write_active_code("b", false);
        buffer.user_edit("c");
        buffer.write_active_code("d", true);
        assert_eq!(buffer.code(), Some("d"));
        assert_eq!(buffer.writes().len(), 2);
        assert_eq!(buffer.final_writes(), 1);
        assert_eq!(MemoryBuffer::detached().read_active_code(), None);
    }

    #[test]
    fn recording_renderer_reports_clears() {
        let mut renderer = RecordingRenderer::default();
        assert!(renderer.is_cleared());
        renderer.render(Some(&[][..]));
        assert!(!renderer.is_cleared());
        renderer.render(None);
        assert!(renderer.is_cleared());
        assert_eq!(renderer.frames().len(), 2);
    }
}
