//! User-facing error classification for cellpilot.
//!
//! Errors that reach the command line are turned into a titled message with
//! recovery hints. Typed errors can be built up front with the constructors in
//! [`errors`]; anything else is classified by its message.

use anyhow::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error with a title, a plain message and recovery suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedError {
    pub title: String,
    pub message: String,
    pub suggestions: Vec<String>,
    pub error_type: ErrorType,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Missing API key, unreadable settings.
    Configuration,
    /// Timeouts, refused connections, HTTP failures from the backend.
    Network,
    /// Message indices out of range, unreadable cell files.
    Validation,
    Unknown,
}

impl ErrorType {
    pub fn label(self) -> &'static str {
        match self {
            ErrorType::Configuration => "config",
            ErrorType::Network => "network",
            ErrorType::Validation => "input",
            ErrorType::Unknown => "error",
        }
    }
}

impl EnhancedError {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        error_type: ErrorType,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            suggestions: Vec::new(),
            error_type,
            context: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions<I, S>(mut self, suggestions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.suggestions.extend(suggestions.into_iter().map(Into::into));
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn into_error(self) -> Error {
        Error::new(self)
    }

    /// Render for a terminal. Context is only shown when `verbose` is set.
    pub fn format(&self, verbose: bool) -> String {
        let mut output = format!(
            "[{}] {}\n  {}\n",
            self.error_type.label(),
            self.title,
            self.message
        );
        if verbose && let Some(context) = &self.context {
            output.push_str(&format!("\n  Context: {context}\n"));
        }
        if !self.suggestions.is_empty() {
            output.push_str("\n  Suggestions:\n");
            for (i, suggestion) in self.suggestions.iter().enumerate() {
                output.push_str(&format!("    {}. {}\n", i + 1, suggestion));
            }
        }
        output
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "type": self.error_type,
                "title": self.title,
                "message": self.message,
                "suggestions": self.suggestions,
            }
        })
    }
}

impl fmt::Display for EnhancedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.message)
    }
}

impl std::error::Error for EnhancedError {}

#[derive(Debug, Default)]
pub struct ErrorHandler {
    verbose: bool,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Resolve an error to its enhanced form, classifying plain errors by message.
    pub fn enhance(&self, error: &Error) -> EnhancedError {
        if let Some(enhanced) = error.downcast_ref::<EnhancedError>() {
            return enhanced.clone();
        }
        let chain = format!("{error:#}");
        classify(&chain)
    }

    pub fn handle(&self, error: &Error) -> String {
        self.enhance(error).format(self.verbose)
    }
}

fn classify(message: &str) -> EnhancedError {
    let lower = message.to_ascii_lowercase();

    if lower.contains("api key") || lower.contains("api_key") || lower.contains("settings") {
        return EnhancedError::new("Configuration Error", message, ErrorType::Configuration)
            .with_suggestions([
                "Check .cellpilot/settings.json and ~/.cellpilot/settings.json",
                "Set the OPENAI_API_KEY environment variable",
                "Run `cellpilot config` to see the effective configuration",
            ]);
    }

    if lower.contains("timed out")
        || lower.contains("timeout")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("http ")
    {
        return EnhancedError::new("Network Error", message, ErrorType::Network).with_suggestions([
            "Verify llm.endpoint is reachable",
            "Try again in a few moments",
        ]);
    }

    if lower.contains("out of range") || lower.contains("no such file") {
        return EnhancedError::new("Invalid Input", message, ErrorType::Validation)
            .with_suggestion("Use /history to list message indices");
    }

    EnhancedError::new("Error", message, ErrorType::Unknown)
}

pub mod errors {
    use super::*;

    pub fn missing_api_key(env_var: &str) -> EnhancedError {
        EnhancedError::new(
            "Missing API Key",
            "An API key is required to request completions.",
            ErrorType::Configuration,
        )
        .with_suggestions([
            format!("Set the {env_var} environment variable"),
            "Add llm.api_key to .cellpilot/settings.local.json".to_string(),
        ])
    }

    pub fn network_timeout(timeout_seconds: u64) -> EnhancedError {
        EnhancedError::new(
            "Network Timeout",
            format!("The completion API did not answer within {timeout_seconds}s."),
            ErrorType::Network,
        )
        .with_suggestions(["Raise llm.timeout_seconds", "Try again later"])
    }

    pub fn cell_file_not_found(path: &str) -> EnhancedError {
        EnhancedError::new(
            "Cell File Not Found",
            format!("The file '{path}' does not exist."),
            ErrorType::Validation,
        )
        .with_suggestion("Pass an existing file with --cell")
    }

    pub fn invalid_configuration(field: &str, value: &str) -> EnhancedError {
        EnhancedError::new(
            "Invalid Configuration",
            format!("Invalid value '{value}' for field '{field}'."),
            ErrorType::Configuration,
        )
        .with_suggestions([
            "Check .cellpilot/settings.json",
            "Remove the invalid setting and retry",
        ])
    }

    pub fn message_out_of_range(index: usize, len: usize) -> EnhancedError {
        EnhancedError::new(
            "Message Not Editable",
            format!("Message {index} is not a user message (log has {len} messages)."),
            ErrorType::Validation,
        )
        .with_suggestion("Use /history to list message indices")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn enhanced_errors_survive_anyhow_roundtrip() {
        let err = errors::missing_api_key("OPENAI_API_KEY").into_error();
        let enhanced = ErrorHandler::new().enhance(&err);
        assert_eq!(enhanced.error_type, ErrorType::Configuration);
        assert_eq!(enhanced.title, "Missing API Key");
        assert!(enhanced.suggestions[0].contains("OPENAI_API_KEY"));
    }

    #[test]
    fn classifies_plain_errors_by_message() {
        let handler = ErrorHandler::new();
        let cases = [
            ("request timed out", ErrorType::Network),
            ("Connection refused", ErrorType::Network),
            ("OPENAI_API_KEY not set and llm.api_key is empty", ErrorType::Configuration),
            ("message index 9 out of range (len 3)", ErrorType::Validation),
            ("something odd", ErrorType::Unknown),
        ];
        for (message, expected) in cases {
            assert_eq!(
                handler.enhance(&anyhow!(message)).error_type,
                expected,
                "{message}"
            );
        }
    }

    #[test]
    fn context_only_shown_when_verbose() {
        let err = errors::network_timeout(30).with_context("POST /v1/chat/completions");
        assert!(!err.format(false).contains("Context"));
        let verbose = err.format(true);
        assert!(verbose.contains("Context: POST /v1/chat/completions"));
        assert!(verbose.contains("1. Raise llm.timeout_seconds"));
        assert!(verbose.starts_with("[network] Network Timeout"));
    }

    #[test]
    fn json_shape_is_stable() {
        let value = errors::message_out_of_range(4, 2).to_json();
        assert_eq!(value["error"]["type"], "validation");
        assert_eq!(value["error"]["title"], "Message Not Editable");
    }
}
