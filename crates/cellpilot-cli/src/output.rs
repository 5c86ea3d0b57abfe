use anyhow::Result;
use cellpilot_core::AppConfig;
use cellpilot_diff::DiffLine;
use serde::Serialize;
use serde_json::json;

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub(crate) fn redact_config_for_display(cfg: &AppConfig) -> Result<serde_json::Value> {
    let mut value = serde_json::to_value(cfg)?;
    if let Some(llm) = value.get_mut("llm").and_then(|entry| entry.as_object_mut())
        && llm.get("api_key").is_some_and(|key| !key.is_null())
    {
        llm.insert("api_key".to_string(), json!("***REDACTED***"));
    }
    Ok(value)
}

/// One line per diff entry, prefixed with its ` `/`+`/`-` marker.
pub(crate) fn render_marked_lines(lines: &[DiffLine]) -> String {
    lines
        .iter()
        .map(|line| format!("{}{}", line.kind.marker(), line.line_content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellpilot_diff::compute_unified_diff;

    #[test]
    fn api_key_is_redacted_only_when_set() {
        let mut cfg = AppConfig::default();
        let shown = redact_config_for_display(&cfg).expect("redact");
        assert!(shown["llm"]["api_key"].is_null());

        cfg.llm.api_key = Some("sk-secret".to_string());
        let shown = redact_config_for_display(&cfg).expect("redact");
        assert_eq!(shown["llm"]["api_key"], "***REDACTED***");
        assert!(!shown.to_string().contains("sk-secret"));
    }

    #[test]
    fn marked_lines_use_diff_markers() {
        let diff = compute_unified_diff("a\nb", "a\nc");
        assert_eq!(render_marked_lines(&diff.lines), " a\n-b\n+c");
    }
}
