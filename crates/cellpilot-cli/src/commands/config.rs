use anyhow::Result;
use cellpilot_core::AppConfig;
use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io;
use std::path::Path;

use crate::Cli;
use crate::output::{print_json, redact_config_for_display};

pub(crate) fn run_config(workspace: &Path, json_mode: bool) -> Result<()> {
    let cfg = AppConfig::load(workspace)?;
    let display_cfg = redact_config_for_display(&cfg)?;
    if json_mode {
        print_json(&display_cfg)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&display_cfg)?);
    }
    Ok(())
}

pub(crate) fn run_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "cellpilot", &mut io::stdout());
    Ok(())
}
