use anyhow::Result;
use cellpilot_diff::{compute_unified_diff, unified_patch};
use cellpilot_errors::errors;
use serde_json::json;
use std::fs;
use std::path::Path;

use crate::output::{print_json, render_marked_lines};

pub(crate) fn run_diff(before: &Path, after: &Path, patch: bool, json_mode: bool) -> Result<()> {
    let old = read_cell(before)?;
    let new = read_cell(after)?;

    if patch {
        let old_header = format!("a/{}", before.display());
        let new_header = format!("b/{}", after.display());
        let rendered = unified_patch(&old, &new, &old_header, &new_header);
        if json_mode {
            print_json(&json!({ "patch": rendered }))?;
        } else if let Some(text) = rendered {
            print!("{text}");
        }
        return Ok(());
    }

    let diff = compute_unified_diff(&old, &new);
    if json_mode {
        print_json(&json!({
            "inserted": diff.inserted_count(),
            "deleted": diff.deleted_count(),
            "lines": diff.lines,
        }))?;
    } else if !diff.lines.is_empty() {
        println!("{}", render_marked_lines(&diff.lines));
    }
    Ok(())
}

fn read_cell(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(errors::cell_file_not_found(&path.display().to_string()).into_error());
    }
    Ok(fs::read_to_string(path)?)
}
