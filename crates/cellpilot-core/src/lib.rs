use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

pub const CELLPILOT_DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const CELLPILOT_DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const CELLPILOT_DEFAULT_SYSTEM_PROMPT: &str = "You are an expert Python programmer.";

/// Maximum output tokens requested per completion.
pub const CELLPILOT_MAX_OUTPUT_TOKENS: u32 = 4096;

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".cellpilot")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a message is presented in the chat panel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayType {
    #[default]
    Normal,
    ConnectionError,
    DebugError,
    ExplainCode,
}

impl DisplayType {
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayType::Normal => "normal",
            DisplayType::ConnectionError => "connection-error",
            DisplayType::DebugError => "debug-error",
            DisplayType::ExplainCode => "explain-code",
        }
    }
}

/// A message as sent to the completion backend.
///
/// Serializes to the `{"role": ..., "content": ...}` shape expected by
/// OpenAI-compatible chat endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum ChatMessage {
    #[serde(rename = "system")]
    System { content: String },
    #[serde(rename = "user")]
    User { content: String },
    #[serde(rename = "assistant")]
    Assistant { content: String },
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        match role {
            Role::System => ChatMessage::System { content },
            Role::User => ChatMessage::User { content },
            Role::Assistant => ChatMessage::Assistant { content },
        }
    }

    pub fn role(&self) -> Role {
        match self {
            ChatMessage::System { .. } => Role::System,
            ChatMessage::User { .. } => Role::User,
            ChatMessage::Assistant { .. } => Role::Assistant,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            ChatMessage::System { content }
            | ChatMessage::User { content }
            | ChatMessage::Assistant { content } => content,
        }
    }
}

// ── Observer events ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub seq_no: u64,
    pub at: DateTime<Utc>,
    pub session_id: Uuid,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventKind {
    MessageAppended {
        index: usize,
        role: Role,
        display_type: DisplayType,
    },
    MessageEdited {
        index: usize,
        discarded: usize,
    },
    HistoryCleared,
    CompletionRequested {
        request_seq: u64,
        message_count: usize,
    },
    CompletionDiscarded {
        request_seq: u64,
        latest_seq: u64,
    },
    CompletionFailed {
        request_seq: u64,
        message: String,
    },
    DiffProposed {
        request_seq: u64,
        inserted: usize,
        deleted: usize,
        superseded: bool,
    },
    DiffAccepted {
        drifted: bool,
    },
    DiffRejected,
    NoCodeBlock {
        request_seq: u64,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::MessageAppended { .. } => "message_appended",
            EventKind::MessageEdited { .. } => "message_edited",
            EventKind::HistoryCleared => "history_cleared",
            EventKind::CompletionRequested { .. } => "completion_requested",
            EventKind::CompletionDiscarded { .. } => "completion_discarded",
            EventKind::CompletionFailed { .. } => "completion_failed",
            EventKind::DiffProposed { .. } => "diff_proposed",
            EventKind::DiffAccepted { .. } => "diff_accepted",
            EventKind::DiffRejected => "diff_rejected",
            EventKind::NoCodeBlock { .. } => "no_code_block",
        }
    }
}

// ── Configuration ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub chat: ChatConfig,
    pub keybindings: KeybindingsConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".cellpilot/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn legacy_toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    pub fn load(workspace: &Path) -> Result<Self> {
        Self::load_layers(workspace, Self::user_settings_path().as_deref())
    }

    /// Merge defaults, the legacy TOML file and the JSON settings layers.
    /// Later layers win key by key.
    pub fn load_layers(workspace: &Path, user_settings: Option<&Path>) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        let legacy = Self::legacy_toml_path(workspace);
        if legacy.exists() {
            let raw = fs::read_to_string(legacy)?;
            let legacy_value: toml::Table = toml::from_str(&raw)?;
            merge_json_value(&mut merged, &serde_json::to_value(legacy_value)?);
        }

        let mut paths = Vec::new();
        if let Some(user) = user_settings {
            paths.push(user.to_path_buf());
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        for path in paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn ensure(workspace: &Path) -> Result<Self> {
        let path = Self::project_settings_path(workspace);
        if path.exists()
            || Self::project_local_settings_path(workspace).exists()
            || Self::legacy_toml_path(workspace).exists()
            || Self::user_settings_path().is_some_and(|p| p.exists())
        {
            return Self::load(workspace);
        }
        let cfg = Self::default();
        cfg.save(workspace)?;
        Ok(cfg)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
}

impl LlmConfig {
    /// `api_key` wins when non-empty, otherwise the `api_key_env` variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_deref().map(str::trim)
            && !key.is_empty()
        {
            return Some(key.to_string());
        }
        std::env::var(&self.api_key_env)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: CELLPILOT_DEFAULT_MODEL.to_string(),
            endpoint: CELLPILOT_DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            max_tokens: CELLPILOT_MAX_OUTPUT_TOKENS,
            timeout_seconds: 120,
        }
    }
}

/// What the buffer shows while a diff is under review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreviewMode {
    /// Write the proposed code; deletions exist only as decorations.
    #[default]
    Proposed,
    /// Write the unified text, deleted lines included.
    Unified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub system_prompt: String,
    pub code_language: String,
    pub preview: PreviewMode,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: CELLPILOT_DEFAULT_SYSTEM_PROMPT.to_string(),
            code_language: "python".to_string(),
            preview: PreviewMode::Proposed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeybindingsConfig {
    pub accept: String,
    pub reject: String,
}

impl Default for KeybindingsConfig {
    fn default() -> Self {
        Self {
            accept: "Accel Y".to_string(),
            reject: "Accel D".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn chat_message_serializes_role_content_pairs() {
        let msg = ChatMessage::new(Role::User, "hello");
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value, json!({"role": "user", "content": "hello"}));

        let back: ChatMessage =
            serde_json::from_value(json!({"role": "assistant", "content": "hi"})).expect("parse");
        assert_eq!(back.role(), Role::Assistant);
        assert_eq!(back.content(), "hi");
    }

    #[test]
    fn display_type_uses_kebab_case() {
        assert_eq!(
            serde_json::to_value(DisplayType::ConnectionError).expect("serialize"),
            json!("connection-error")
        );
        assert_eq!(DisplayType::ExplainCode.as_str(), "explain-code");
        assert_eq!(DisplayType::default(), DisplayType::Normal);
    }

    #[test]
    fn load_without_files_yields_defaults() {
        let ws = TempDir::new().expect("workspace");
        let cfg = AppConfig::load_layers(ws.path(), None).expect("load");
        assert_eq!(cfg.chat.system_prompt, CELLPILOT_DEFAULT_SYSTEM_PROMPT);
        assert_eq!(cfg.chat.preview, PreviewMode::Proposed);
        assert_eq!(cfg.keybindings.accept, "Accel Y");
        assert_eq!(cfg.keybindings.reject, "Accel D");
        assert!(!cfg.telemetry.enabled);
    }

    #[test]
    fn later_layers_override_earlier_ones() {
        let ws = TempDir::new().expect("workspace");
        let user = ws.path().join("user-settings.json");
        fs::write(
            &user,
            r#"{"llm":{"model":"user-model","temperature":0.5},"chat":{"code_language":"r"}}"#,
        )
        .expect("user settings");
        fs::create_dir_all(runtime_dir(ws.path())).expect("runtime dir");
        fs::write(
            AppConfig::project_settings_path(ws.path()),
            r#"{"llm":{"model":"project-model"},"unknown_section":{"x":1}}"#,
        )
        .expect("project settings");
        fs::write(
            AppConfig::project_local_settings_path(ws.path()),
            r#"{"chat":{"preview":"unified"}}"#,
        )
        .expect("local settings");

        let cfg = AppConfig::load_layers(ws.path(), Some(&user)).expect("load");
        assert_eq!(cfg.llm.model, "project-model");
        assert!((cfg.llm.temperature - 0.5).abs() < f32::EPSILON);
        assert_eq!(cfg.chat.code_language, "r");
        assert_eq!(cfg.chat.preview, PreviewMode::Unified);
    }

    #[test]
    fn legacy_toml_is_lowest_file_layer() {
        let ws = TempDir::new().expect("workspace");
        fs::create_dir_all(runtime_dir(ws.path())).expect("runtime dir");
        fs::write(
            AppConfig::legacy_toml_path(ws.path()),
            "[llm]\nmodel = \"legacy-model\"\ntimeout_seconds = 5\n",
        )
        .expect("legacy toml");
        fs::write(
            AppConfig::project_settings_path(ws.path()),
            r#"{"llm":{"model":"json-model"}}"#,
        )
        .expect("project settings");

        let cfg = AppConfig::load_layers(ws.path(), None).expect("load");
        assert_eq!(cfg.llm.model, "json-model");
        assert_eq!(cfg.llm.timeout_seconds, 5);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let ws = TempDir::new().expect("workspace");
        let mut cfg = AppConfig::default();
        cfg.keybindings.accept = "Ctrl Enter".to_string();
        cfg.save(ws.path()).expect("save");
        let loaded = AppConfig::load_layers(ws.path(), None).expect("load");
        assert_eq!(loaded.keybindings.accept, "Ctrl Enter");
    }

    #[test]
    fn explicit_api_key_wins_over_env() {
        let cfg = LlmConfig {
            api_key: Some("  sk-inline  ".to_string()),
            api_key_env: "CELLPILOT_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..LlmConfig::default()
        };
        assert_eq!(cfg.resolve_api_key().as_deref(), Some("sk-inline"));

        let missing = LlmConfig {
            api_key: Some("   ".to_string()),
            api_key_env: "CELLPILOT_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..LlmConfig::default()
        };
        assert_eq!(missing.resolve_api_key(), None);
    }
}
