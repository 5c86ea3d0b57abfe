use crate::buffer::{BufferPort, DiffRenderer};
use crate::code_block::extract_code_block;
use crate::log::{ConversationLog, LogError};
use crate::prompts::{Variable, basic_prompt, debug_error_prompt, explain_code_prompt};
use cellpilot_core::{ChatConfig, ChatMessage, DisplayType, EventKind, PreviewMode};
use cellpilot_diff::{UnifiedDiff, code_fingerprint, compute_unified_diff};
use cellpilot_llm::{AssistantReply, CompletionClient, TransportError};
use cellpilot_observe::Observer;
use serde::Serialize;

const EXPLAIN_LABEL: &str = "Explain this code";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    AwaitingResponse,
    Reviewing,
}

/// A proposal under review.
///
/// `original_code` is captured when a review chain starts and survives
/// supersession, so rejecting always restores the pre-chain buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffSession {
    pub original_code: String,
    pub proposed_code: String,
    pub diff: UnifiedDiff,
    preview_fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionIntent {
    /// Reply code becomes a reviewable diff.
    ApplyCode,
    /// Reply is only shown; code in it is never applied.
    ExplainOnly,
}

/// An issued request. The caller sends `messages()` and hands the result
/// back to [`ChatController::resolve`].
#[derive(Debug, Clone)]
pub struct PendingCompletion {
    seq: u64,
    intent: CompletionIntent,
    snapshot: ConversationLog,
}

impl PendingCompletion {
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn intent(&self) -> CompletionIntent {
        self.intent
    }

    pub fn snapshot(&self) -> &ConversationLog {
        &self.snapshot
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.snapshot.model_facing_view()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// A newer request was issued, or history was cleared; nothing changed.
    Stale { request_seq: u64, latest_seq: u64 },
    Proposed {
        superseded: bool,
        inserted: usize,
        deleted: usize,
    },
    /// Reply appended; it carried no fenced block.
    NoCodeBlock,
    /// Failure appended as a connection-error message.
    TransportFailed { message: String },
    /// Explain reply appended.
    Explained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// `drifted` is set when the buffer was edited during review.
    Accepted { drifted: bool },
    Rejected,
    NoPendingDiff,
}

pub struct ChatController<B, R> {
    log: ConversationLog,
    buffer: B,
    renderer: R,
    cfg: ChatConfig,
    variables: Vec<Variable>,
    session: Option<DiffSession>,
    latest_seq: u64,
    in_flight: Option<u64>,
    observer: Option<Observer>,
}

impl<B: BufferPort, R: DiffRenderer> ChatController<B, R> {
    pub fn new(buffer: B, mut renderer: R, cfg: ChatConfig) -> Self {
        renderer.set_preview_mode(cfg.preview);
        Self {
            log: ConversationLog::new(cfg.system_prompt.clone()),
            buffer,
            renderer,
            cfg,
            variables: Vec::new(),
            session: None,
            latest_seq: 0,
            in_flight: None,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn state(&self) -> ControllerState {
        if self.in_flight.is_some() {
            ControllerState::AwaitingResponse
        } else if self.session.is_some() {
            ControllerState::Reviewing
        } else {
            ControllerState::Idle
        }
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn session(&self) -> Option<&DiffSession> {
        self.session.as_ref()
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut B {
        &mut self.buffer
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn config(&self) -> &ChatConfig {
        &self.cfg
    }

    pub fn observer(&self) -> Option<&Observer> {
        self.observer.as_ref()
    }

    pub fn latest_seq(&self) -> u64 {
        self.latest_seq
    }

    pub fn set_variables(&mut self, variables: Vec<Variable>) {
        self.variables = variables;
    }

    pub fn input_placeholder(&self) -> &'static str {
        self.log.input_placeholder()
    }

    pub fn send_message(&mut self, input: &str) -> PendingCompletion {
        let prompt = basic_prompt(
            &self.variables,
            &self.prompt_code(),
            input,
            &self.cfg.code_language,
        );
        let index = self
            .log
            .append_user_turn(prompt, Some(input.to_string()), DisplayType::Normal);
        self.record_appended(index);
        self.issue(CompletionIntent::ApplyCode)
    }

    /// Replace the user message at `index` and re-ask from there.
    pub fn edit_message(
        &mut self,
        index: usize,
        input: &str,
    ) -> Result<PendingCompletion, LogError> {
        let prompt = basic_prompt(
            &self.variables,
            &self.prompt_code(),
            input,
            &self.cfg.code_language,
        );
        let before = self.log.len();
        self.log.replace_user_turn_at(
            index,
            prompt,
            Some(input.to_string()),
            DisplayType::Normal,
        )?;
        self.record(EventKind::MessageEdited {
            index,
            discarded: before - index,
        });
        Ok(self.issue(CompletionIntent::ApplyCode))
    }

    /// Start a fresh conversation about an error raised by the active cell.
    pub fn send_debug_error(&mut self, error: &str) -> PendingCompletion {
        let prompt = debug_error_prompt(
            &self.variables,
            &self.prompt_code(),
            error,
            &self.cfg.code_language,
        );
        self.reset_log();
        let index = self
            .log
            .append_user_turn(prompt, Some(error.to_string()), DisplayType::DebugError);
        self.record_appended(index);
        self.issue(CompletionIntent::ApplyCode)
    }

    /// Start a fresh conversation explaining the active cell.
    pub fn send_explain_code(&mut self) -> PendingCompletion {
        let prompt = explain_code_prompt(&self.prompt_code(), &self.cfg.code_language);
        self.reset_log();
        let index = self.log.append_user_turn(
            prompt,
            Some(EXPLAIN_LABEL.to_string()),
            DisplayType::ExplainCode,
        );
        self.record_appended(index);
        self.issue(CompletionIntent::ExplainOnly)
    }

    /// Reset the conversation. A diff under review stays reviewable; any
    /// request in flight becomes stale.
    pub fn clear_history(&mut self) {
        self.reset_log();
        self.in_flight = None;
        self.record(EventKind::HistoryCleared);
    }

    /// Apply the outcome of `pending`. Only the most recently issued request
    /// is applied; anything older is dropped without touching state.
    pub fn resolve(
        &mut self,
        pending: PendingCompletion,
        result: Result<AssistantReply, TransportError>,
    ) -> ResolveOutcome {
        if self.in_flight != Some(pending.seq) {
            self.record(EventKind::CompletionDiscarded {
                request_seq: pending.seq,
                latest_seq: self.latest_seq,
            });
            return ResolveOutcome::Stale {
                request_seq: pending.seq,
                latest_seq: self.latest_seq,
            };
        }
        self.in_flight = None;

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                let index = self.log.append_assistant_message(err.message.clone(), true);
                self.record_appended(index);
                self.record(EventKind::CompletionFailed {
                    request_seq: pending.seq,
                    message: err.message.clone(),
                });
                return ResolveOutcome::TransportFailed {
                    message: err.message,
                };
            }
        };

        let index = self.log.append_assistant_message(reply.text.clone(), false);
        self.record_appended(index);

        if pending.intent == CompletionIntent::ExplainOnly {
            return ResolveOutcome::Explained;
        }
        let Some(code) = extract_code_block(&reply.text) else {
            self.record(EventKind::NoCodeBlock {
                request_seq: pending.seq,
            });
            return ResolveOutcome::NoCodeBlock;
        };
        self.propose(pending.seq, code)
    }

    /// Send `pending` through `client` and resolve it.
    pub fn complete_with<C: CompletionClient>(
        &mut self,
        client: &C,
        pending: PendingCompletion,
    ) -> ResolveOutcome {
        let result = client.send(&pending.messages());
        self.resolve(pending, result)
    }

    /// Keep the proposed code and end the review.
    pub fn accept_latest(&mut self) -> ReviewOutcome {
        let Some(session) = self.session.take() else {
            return ReviewOutcome::NoPendingDiff;
        };
        let drifted = self
            .buffer
            .read_active_code()
            .is_none_or(|code| code_fingerprint(&code) != session.preview_fingerprint);
        if drifted {
            self.warn("active cell changed during review; accepting the proposal over it");
        }
        self.buffer.write_active_code(&session.proposed_code, true);
        self.renderer.render(None);
        self.record(EventKind::DiffAccepted { drifted });
        ReviewOutcome::Accepted { drifted }
    }

    /// Restore the code the review chain started from.
    pub fn reject_latest(&mut self) -> ReviewOutcome {
        let Some(session) = self.session.take() else {
            return ReviewOutcome::NoPendingDiff;
        };
        self.buffer.write_active_code(&session.original_code, true);
        self.renderer.render(None);
        self.record(EventKind::DiffRejected);
        ReviewOutcome::Rejected
    }

    /// Write the code block of the assistant message at `index` as final.
    ///
    /// Returns false, changing nothing, when there is no such code.
    pub fn apply_code_from_message(&mut self, index: usize) -> bool {
        let code = self
            .log
            .get(index)
            .filter(|m| m.role() == cellpilot_core::Role::Assistant)
            .and_then(|m| extract_code_block(m.content()));
        let Some(code) = code else {
            return false;
        };
        self.session = None;
        self.buffer.write_active_code(&code, true);
        self.renderer.render(None);
        true
    }

    fn propose(&mut self, request_seq: u64, proposed_code: String) -> ResolveOutcome {
        let (original_code, superseded) = match self.session.take() {
            Some(previous) => (previous.original_code, true),
            None => (self.active_code(), false),
        };
        let diff = compute_unified_diff(&original_code, &proposed_code);
        let preview = match self.cfg.preview {
            PreviewMode::Proposed => proposed_code.clone(),
            PreviewMode::Unified => diff.unified_text.clone(),
        };
        self.buffer.write_active_code(&preview, false);
        self.renderer.render(Some(&diff.lines));

        let (inserted, deleted) = (diff.inserted_count(), diff.deleted_count());
        self.session = Some(DiffSession {
            original_code,
            proposed_code,
            diff,
            preview_fingerprint: code_fingerprint(&preview),
        });
        self.record(EventKind::DiffProposed {
            request_seq,
            inserted,
            deleted,
            superseded,
        });
        ResolveOutcome::Proposed {
            superseded,
            inserted,
            deleted,
        }
    }

    fn issue(&mut self, intent: CompletionIntent) -> PendingCompletion {
        self.latest_seq += 1;
        self.in_flight = Some(self.latest_seq);
        let snapshot = self.log.duplicate();
        self.record(EventKind::CompletionRequested {
            request_seq: self.latest_seq,
            message_count: snapshot.len(),
        });
        PendingCompletion {
            seq: self.latest_seq,
            intent,
            snapshot,
        }
    }

    fn reset_log(&mut self) {
        self.log = ConversationLog::new(self.cfg.system_prompt.clone());
    }

    fn active_code(&self) -> String {
        self.buffer.read_active_code().unwrap_or_default()
    }

    /// Cell code as the model should see it. An untouched unified preview
    /// is replaced by the proposal it stands for.
    fn prompt_code(&self) -> String {
        let code = self.active_code();
        match &self.session {
            Some(session) if code_fingerprint(&code) == session.preview_fingerprint => {
                session.proposed_code.clone()
            }
            _ => code,
        }
    }

    fn record_appended(&self, index: usize) {
        if let Some(message) = self.log.get(index) {
            self.record(EventKind::MessageAppended {
                index,
                role: message.role(),
                display_type: message.display_type(),
            });
        }
    }

    fn record(&self, kind: EventKind) {
        if let Some(observer) = &self.observer
            && let Err(err) = observer.record(kind)
        {
            observer.verbose_log(&format!("failed to record event: {err}"));
        }
    }

    fn warn(&self, msg: &str) {
        if let Some(observer) = &self.observer {
            observer.warn_log(msg);
        }
    }
}
