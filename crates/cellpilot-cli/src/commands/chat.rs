use anyhow::Result;
use cellpilot_chat::{
    CellId, ChatController, Command, CommandOutcome, CommandRegistry, CommandSurface, LogError,
    NotebookRenderer, ResolveOutcome, ReviewOutcome,
};
use cellpilot_core::AppConfig;
use cellpilot_errors::errors;
use cellpilot_llm::ChatCompletionsClient;
use cellpilot_observe::Observer;
use serde_json::json;
use std::io::{self, BufRead};
use std::path::Path;

use crate::cell::FileCell;
use crate::output::{print_json, render_marked_lines};

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplInput {
    Empty,
    Run(Command, Option<String>),
    Edit { index: usize, text: String },
    Apply(usize),
    Key(String),
    History,
    Help,
    Quit,
    Invalid(String),
}

const HELP: &str = "\
/accept              keep the proposed code
/reject              restore the code from before the review
/debug <error>       ask for a fix to an error (starts a new conversation)
/explain             explain the cell (starts a new conversation)
/edit <i> <text>     rewrite user message i and ask again
/apply <i>           write the code of assistant message i into the cell
/key <keystroke>     run the command bound to a keystroke
/history             show the conversation
/clear               start a new conversation
/quit                exit";

fn parse_input(line: &str) -> ReplInput {
    let line = line.trim();
    if line.is_empty() {
        return ReplInput::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return ReplInput::Run(Command::SendMessage, Some(line.to_string()));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let arg_opt = (!arg.is_empty()).then(|| arg.to_string());
    match name {
        "accept" => ReplInput::Run(Command::AcceptLatest, None),
        "reject" => ReplInput::Run(Command::RejectLatest, None),
        "debug" => ReplInput::Run(Command::SendDebugError, arg_opt),
        "explain" => ReplInput::Run(Command::SendExplainCode, None),
        "clear" => ReplInput::Run(Command::ClearHistory, None),
        "history" => ReplInput::History,
        "help" => ReplInput::Help,
        "quit" | "exit" => ReplInput::Quit,
        "key" => ReplInput::Key(arg.to_string()),
        "apply" => match arg.parse::<usize>() {
            Ok(index) => ReplInput::Apply(index),
            Err(_) => ReplInput::Invalid("usage: /apply <message index>".to_string()),
        },
        "edit" => {
            let parsed = arg
                .split_once(char::is_whitespace)
                .and_then(|(index, text)| Some((index.parse::<usize>().ok()?, text.trim())))
                .filter(|(_, text)| !text.is_empty());
            match parsed {
                Some((index, text)) => ReplInput::Edit {
                    index,
                    text: text.to_string(),
                },
                None => ReplInput::Invalid("usage: /edit <message index> <text>".to_string()),
            }
        }
        other => ReplInput::Invalid(format!("unknown command /{other}; try /help")),
    }
}

type CliController = ChatController<FileCell, NotebookRenderer>;

struct Repl {
    controller: CliController,
    client: ChatCompletionsClient,
    registry: CommandRegistry,
    json_mode: bool,
}

pub(crate) fn run_chat(
    workspace: &Path,
    cell: &Path,
    json_mode: bool,
    verbose: bool,
) -> Result<()> {
    let cfg = AppConfig::load(workspace)?;
    if !cell.exists() {
        return Err(errors::cell_file_not_found(&cell.display().to_string()).into_error());
    }
    if cfg.chat.code_language.trim().is_empty() {
        return Err(
            errors::invalid_configuration("chat.code_language", &cfg.chat.code_language)
                .into_error(),
        );
    }
    if cfg.llm.resolve_api_key().is_none() {
        return Err(errors::missing_api_key(&cfg.llm.api_key_env).into_error());
    }

    let mut observer = Observer::new(workspace, &cfg.telemetry)?;
    observer.set_verbose(verbose);
    observer.verbose_log(&format!(
        "chat model={} endpoint={} cell={}",
        cfg.llm.model,
        cfg.llm.endpoint,
        cell.display()
    ));

    let cell_id = CellId::new(cell.display().to_string());
    let renderer = NotebookRenderer::new(cell_id.clone(), vec![cell_id]);
    let controller = ChatController::new(FileCell::new(cell), renderer, cfg.chat.clone())
        .with_observer(observer);
    let mut repl = Repl {
        controller,
        client: ChatCompletionsClient::new(cfg.llm.clone())?,
        registry: CommandRegistry::from_config(&cfg.keybindings),
        json_mode,
    };

    eprintln!("{} (/help for commands)", repl.controller.input_placeholder());
    for line in io::stdin().lock().lines() {
        let line = line?;
        if !repl.handle(parse_input(&line))? {
            break;
        }
    }
    Ok(())
}

impl Repl {
    /// Returns false once the user asked to quit.
    fn handle(&mut self, input: ReplInput) -> Result<bool> {
        match input {
            ReplInput::Empty => {}
            ReplInput::Quit => return Ok(false),
            ReplInput::Help => eprintln!("{HELP}"),
            ReplInput::Invalid(message) => eprintln!("{message}"),
            ReplInput::History => self.print_history()?,
            ReplInput::Run(command, arg) => {
                let outcome = CommandSurface::new(&mut self.controller, &self.client)
                    .execute(command, arg.as_deref());
                self.report(outcome)?;
            }
            ReplInput::Key(keystroke) => {
                let outcome = CommandSurface::new(&mut self.controller, &self.client)
                    .press(&self.registry, &keystroke);
                self.report(outcome)?;
            }
            ReplInput::Edit { index, text } => match self.controller.edit_message(index, &text) {
                Ok(pending) => {
                    let outcome = self.controller.complete_with(&self.client, pending);
                    self.report(CommandOutcome::Resolved(outcome))?;
                }
                Err(LogError::OutOfRange { index, len }) => {
                    let err = errors::message_out_of_range(index, len);
                    if self.json_mode {
                        print_json(&err.to_json())?;
                    } else {
                        eprint!("{}", err.format(false));
                    }
                }
            },
            ReplInput::Apply(index) => {
                let applied = self.controller.apply_code_from_message(index);
                if self.json_mode {
                    print_json(&json!({"event": "applied", "index": index, "applied": applied}))?;
                } else if applied {
                    println!("Applied code from message {index}.");
                } else {
                    println!("Message {index} has no code to apply.");
                }
            }
        }
        Ok(true)
    }

    fn report(&self, outcome: CommandOutcome) -> Result<()> {
        match outcome {
            CommandOutcome::Ignored => {
                if self.json_mode {
                    print_json(&json!({"event": "ignored"}))?;
                }
            }
            CommandOutcome::Cleared => {
                if self.json_mode {
                    print_json(&json!({"event": "cleared"}))?;
                } else {
                    println!("Conversation cleared.");
                }
            }
            CommandOutcome::Reviewed(review) => self.report_review(review)?,
            CommandOutcome::Resolved(resolved) => self.report_resolve(resolved)?,
        }
        Ok(())
    }

    fn report_review(&self, review: ReviewOutcome) -> Result<()> {
        match (review, self.json_mode) {
            (ReviewOutcome::Accepted { drifted }, true) => {
                print_json(&json!({"event": "accepted", "drifted": drifted}))?
            }
            (ReviewOutcome::Accepted { .. }, false) => println!("Accepted."),
            (ReviewOutcome::Rejected, true) => print_json(&json!({"event": "rejected"}))?,
            (ReviewOutcome::Rejected, false) => println!("Rejected; cell restored."),
            (ReviewOutcome::NoPendingDiff, true) => print_json(&json!({"event": "ignored"}))?,
            (ReviewOutcome::NoPendingDiff, false) => {}
        }
        Ok(())
    }

    fn report_resolve(&self, resolved: ResolveOutcome) -> Result<()> {
        let reply = self
            .controller
            .log()
            .last_assistant_message()
            .map(|m| m.content().to_string())
            .unwrap_or_default();
        match resolved {
            ResolveOutcome::Stale { .. } => {}
            ResolveOutcome::TransportFailed { message } => {
                if self.json_mode {
                    print_json(&json!({"event": "transport_failed", "message": message}))?;
                } else {
                    println!("error: {message}");
                }
            }
            ResolveOutcome::NoCodeBlock | ResolveOutcome::Explained => {
                if self.json_mode {
                    let event = if resolved == ResolveOutcome::Explained {
                        "explained"
                    } else {
                        "no_code_block"
                    };
                    print_json(&json!({"event": event, "reply": reply}))?;
                } else {
                    println!("{reply}");
                }
            }
            ResolveOutcome::Proposed {
                superseded,
                inserted,
                deleted,
            } => {
                let lines = self
                    .controller
                    .session()
                    .map(|s| s.diff.lines.clone())
                    .unwrap_or_default();
                if self.json_mode {
                    print_json(&json!({
                        "event": "proposed",
                        "superseded": superseded,
                        "inserted": inserted,
                        "deleted": deleted,
                        "reply": reply,
                        "lines": lines,
                    }))?;
                } else {
                    println!("{reply}\n");
                    println!("{}", render_marked_lines(&lines));
                    println!(
                        "\n+{inserted} -{deleted} lines. /accept ({}) or /reject ({})",
                        self.keystroke(Command::AcceptLatest),
                        self.keystroke(Command::RejectLatest),
                    );
                }
            }
        }
        Ok(())
    }

    fn keystroke(&self, command: Command) -> &str {
        self.registry.keystroke_for(command).unwrap_or("unbound")
    }

    fn print_history(&self) -> Result<()> {
        let entries = self.controller.log().display_view();
        if self.json_mode {
            return print_json(&json!({"event": "history", "entries": entries}));
        }
        let last_ai = self.controller.log().last_assistant_index();
        for entry in entries {
            let marker = if Some(entry.index) == last_ai { "*" } else { " " };
            println!(
                "{marker}[{}] {} ({}): {}",
                entry.index,
                entry.role,
                entry.display_type.as_str(),
                entry.text
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_chat_messages() {
        assert_eq!(
            parse_input("  write a loop "),
            ReplInput::Run(Command::SendMessage, Some("write a loop".to_string()))
        );
        assert_eq!(parse_input("   "), ReplInput::Empty);
    }

    #[test]
    fn slash_commands_map_to_commands() {
        assert_eq!(parse_input("/accept"), ReplInput::Run(Command::AcceptLatest, None));
        assert_eq!(parse_input("/reject"), ReplInput::Run(Command::RejectLatest, None));
        assert_eq!(parse_input("/debug"), ReplInput::Run(Command::SendDebugError, None));
        assert_eq!(
            parse_input("/debug NameError: y"),
            ReplInput::Run(Command::SendDebugError, Some("NameError: y".to_string()))
        );
        assert_eq!(parse_input("/key Accel Y"), ReplInput::Key("Accel Y".to_string()));
        assert_eq!(parse_input("/quit"), ReplInput::Quit);
    }

    #[test]
    fn edit_and_apply_parse_indices() {
        assert_eq!(
            parse_input("/edit 3 use a while loop"),
            ReplInput::Edit {
                index: 3,
                text: "use a while loop".to_string()
            }
        );
        assert!(matches!(parse_input("/edit x text"), ReplInput::Invalid(_)));
        assert!(matches!(parse_input("/edit 3"), ReplInput::Invalid(_)));
        assert_eq!(parse_input("/apply 2"), ReplInput::Apply(2));
        assert!(matches!(parse_input("/apply"), ReplInput::Invalid(_)));
        assert!(matches!(parse_input("/bogus"), ReplInput::Invalid(_)));
    }
}
