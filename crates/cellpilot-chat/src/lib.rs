//! Conversation state and the diff-apply review loop for a single code cell.

pub mod buffer;
pub mod code_block;
pub mod commands;
pub mod controller;
pub mod log;
pub mod prompts;

pub use buffer::{
    BufferPort, CellDecorations, CellId, DecorationRegistry, DiffRenderer, NoopRenderer,
    NotebookRenderer, Stripe,
};
pub use code_block::extract_code_block;
pub use commands::{Command, CommandOutcome, CommandRegistry, CommandSurface};
pub use controller::{
    ChatController, CompletionIntent, ControllerState, DiffSession, PendingCompletion,
    ResolveOutcome, ReviewOutcome,
};
pub use log::{ConversationLog, DisplayEntry, LogError, Message};
pub use prompts::{Variable, basic_prompt, debug_error_prompt, explain_code_prompt};
