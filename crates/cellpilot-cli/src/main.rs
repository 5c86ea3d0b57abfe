use anyhow::Result;
use cellpilot_errors::ErrorHandler;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::process::ExitCode;

mod cell;
mod commands;
mod output;

use commands::chat::run_chat;
use commands::config::{run_completions, run_config};
use commands::diff::run_diff;

#[derive(Parser)]
#[command(name = "cellpilot")]
#[command(about = "Chat with a model about a code cell and review its edits", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Workspace holding `.cellpilot/` (defaults to the current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat against a file-backed cell.
    Chat(ChatArgs),
    /// Line diff between two files.
    Diff(DiffArgs),
    /// Print the effective configuration.
    Config,
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Args)]
struct ChatArgs {
    /// File holding the cell's code.
    #[arg(long)]
    cell: PathBuf,
}

#[derive(Args)]
struct DiffArgs {
    before: PathBuf,
    after: PathBuf,
    /// Print a git-style unified patch instead of marked lines.
    #[arg(long)]
    patch: bool,
}

#[derive(Args)]
struct CompletionsArgs {
    #[arg(value_enum)]
    shell: Shell,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = cli.json;
    let handler = ErrorHandler::new().verbose(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let enhanced = handler.enhance(&err);
            if json_mode {
                println!("{}", enhanced.to_json());
            } else {
                eprint!("{}", handler.handle(&err));
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = match cli.workspace {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    match cli.command {
        Commands::Chat(args) => run_chat(&workspace, &args.cell, cli.json, cli.verbose),
        Commands::Diff(args) => run_diff(&args.before, &args.after, args.patch, cli.json),
        Commands::Config => run_config(&workspace, cli.json),
        Commands::Completions(args) => run_completions(args.shell),
    }
}
