use crate::buffer::{BufferPort, DiffRenderer};
use crate::controller::{ChatController, ResolveOutcome, ReviewOutcome};
use cellpilot_core::KeybindingsConfig;
use cellpilot_llm::CompletionClient;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    AcceptLatest,
    RejectLatest,
    SendMessage,
    SendDebugError,
    SendExplainCode,
    ClearHistory,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::AcceptLatest,
        Command::RejectLatest,
        Command::SendMessage,
        Command::SendDebugError,
        Command::SendExplainCode,
        Command::ClearHistory,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Command::AcceptLatest => "cellpilot:accept-latest-code",
            Command::RejectLatest => "cellpilot:reject-latest-code",
            Command::SendMessage => "cellpilot:send-message",
            Command::SendDebugError => "cellpilot:send-debug-error-message",
            Command::SendExplainCode => "cellpilot:send-explain-code-message",
            Command::ClearHistory => "cellpilot:clear-history",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Command::AcceptLatest => "Accept the proposed code",
            Command::RejectLatest => "Reject the proposed code",
            Command::SendMessage => "Send a chat message",
            Command::SendDebugError => "Ask for a fix to the last error",
            Command::SendExplainCode => "Explain the active cell",
            Command::ClearHistory => "Clear the conversation",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.id() == id)
    }
}

/// Keystroke to command table built from the keybinding settings.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    bindings: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn from_config(cfg: &KeybindingsConfig) -> Self {
        let mut registry = Self::default();
        registry.bind(&cfg.accept, Command::AcceptLatest);
        registry.bind(&cfg.reject, Command::RejectLatest);
        registry
    }

    pub fn bind(&mut self, keystroke: &str, command: Command) {
        let key = normalize_keystroke(keystroke);
        if !key.is_empty() {
            self.bindings.insert(key, command);
        }
    }

    pub fn lookup(&self, keystroke: &str) -> Option<Command> {
        self.bindings.get(&normalize_keystroke(keystroke)).copied()
    }

    pub fn keystroke_for(&self, command: Command) -> Option<&str> {
        let mut keys: Vec<&str> = self
            .bindings
            .iter()
            .filter(|(_, bound)| **bound == command)
            .map(|(key, _)| key.as_str())
            .collect();
        keys.sort_unstable();
        keys.into_iter().next()
    }
}

/// `"accel  y"` and `"Accel Y"` name the same keystroke.
fn normalize_keystroke(keystroke: &str) -> String {
    keystroke
        .split_whitespace()
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Nothing warranted the command.
    Ignored,
    Reviewed(ReviewOutcome),
    Resolved(ResolveOutcome),
    Cleared,
}

/// Invokes commands against a controller, completing requests through `client`.
///
/// Every command is safe to run in any state; when nothing warrants it the
/// result is [`CommandOutcome::Ignored`].
pub struct CommandSurface<'a, B, R, C> {
    controller: &'a mut ChatController<B, R>,
    client: &'a C,
}

impl<'a, B, R, C> CommandSurface<'a, B, R, C>
where
    B: BufferPort,
    R: DiffRenderer,
    C: CompletionClient,
{
    pub fn new(controller: &'a mut ChatController<B, R>, client: &'a C) -> Self {
        Self { controller, client }
    }

    pub fn execute(&mut self, command: Command, arg: Option<&str>) -> CommandOutcome {
        let arg = arg.map(str::trim).filter(|text| !text.is_empty());
        match command {
            Command::AcceptLatest => match self.controller.accept_latest() {
                ReviewOutcome::NoPendingDiff => CommandOutcome::Ignored,
                outcome => CommandOutcome::Reviewed(outcome),
            },
            Command::RejectLatest => match self.controller.reject_latest() {
                ReviewOutcome::NoPendingDiff => CommandOutcome::Ignored,
                outcome => CommandOutcome::Reviewed(outcome),
            },
            Command::SendMessage => {
                let Some(input) = arg else {
                    return CommandOutcome::Ignored;
                };
                let pending = self.controller.send_message(input);
                CommandOutcome::Resolved(self.controller.complete_with(self.client, pending))
            }
            Command::SendDebugError => {
                let Some(error) = arg else {
                    return CommandOutcome::Ignored;
                };
                let pending = self.controller.send_debug_error(error);
                CommandOutcome::Resolved(self.controller.complete_with(self.client, pending))
            }
            Command::SendExplainCode => {
                let pending = self.controller.send_explain_code();
                CommandOutcome::Resolved(self.controller.complete_with(self.client, pending))
            }
            Command::ClearHistory => {
                self.controller.clear_history();
                CommandOutcome::Cleared
            }
        }
    }

    /// Run whatever `keystroke` is bound to, if anything.
    pub fn press(&mut self, registry: &CommandRegistry, keystroke: &str) -> CommandOutcome {
        match registry.lookup(keystroke) {
            Some(command) => self.execute(command, None),
            None => CommandOutcome::Ignored,
        }
    }
}
