use anyhow::Result;
use cellpilot_core::{ChatMessage, LlmConfig};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::error::Error as StdError;
use std::time::Duration;

/// Raw assistant text as returned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub text: String,
    #[serde(default = "default_finish_reason")]
    pub finish_reason: String,
}

impl AssistantReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: default_finish_reason(),
        }
    }
}

fn default_finish_reason() -> String {
    "stop".to_string()
}

/// Network or backend failure, carrying a message fit for the chat panel.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Boundary to the completion backend.
///
/// Implementations send the conversation exactly once; retrying is the
/// caller's decision.
pub trait CompletionClient {
    fn send(&self, messages: &[ChatMessage]) -> Result<AssistantReply, TransportError>;
}

impl<T: CompletionClient + ?Sized> CompletionClient for &T {
    fn send(&self, messages: &[ChatMessage]) -> Result<AssistantReply, TransportError> {
        (**self).send(messages)
    }
}

impl<T: CompletionClient + ?Sized> CompletionClient for Box<T> {
    fn send(&self, messages: &[ChatMessage]) -> Result<AssistantReply, TransportError> {
        (**self).send(messages)
    }
}

/// Blocking client for OpenAI-compatible `chat/completions` endpoints.
#[derive(Debug, Clone)]
pub struct ChatCompletionsClient {
    cfg: LlmConfig,
    client: Client,
}

impl ChatCompletionsClient {
    pub fn new(cfg: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self { cfg, client })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.cfg
    }

    fn build_payload(&self, messages: &[ChatMessage]) -> Value {
        json!({
            "model": self.cfg.model,
            "messages": messages,
            "temperature": self.cfg.temperature,
            "max_tokens": self.cfg.max_tokens,
            "stream": false,
        })
    }
}

impl CompletionClient for ChatCompletionsClient {
    fn send(&self, messages: &[ChatMessage]) -> Result<AssistantReply, TransportError> {
        let key = self.cfg.resolve_api_key().ok_or_else(|| {
            TransportError::new(format!(
                "{} not set and llm.api_key is empty",
                self.cfg.api_key_env
            ))
        })?;

        let response = self
            .client
            .post(&self.cfg.endpoint)
            .bearer_auth(key)
            .json(&self.build_payload(messages))
            .send()
            .map_err(|e| format_transport_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| format_transport_error(&e))?;
        if !status.is_success() {
            return Err(format_api_error(status, &body));
        }
        parse_completion_payload(&body)
    }
}

fn format_api_error(status: StatusCode, body: &str) -> TransportError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(ToString::to_string))
        })
        .unwrap_or_else(|| body.chars().take(200).collect());

    let message = match status {
        StatusCode::UNAUTHORIZED => {
            "Invalid or missing API key (HTTP 401). Set the API key environment variable or \
             llm.api_key in settings."
                .to_string()
        }
        StatusCode::TOO_MANY_REQUESTS => {
            format!("Rate limited (HTTP 429). Try again shortly. Detail: {detail}")
        }
        StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE => format!(
            "Completion server error (HTTP {}). The service may be temporarily unavailable. \
             Detail: {detail}",
            status.as_u16()
        ),
        _ => format!("Completion API error (HTTP {}): {detail}", status.as_u16()),
    };
    TransportError::new(message)
}

fn format_transport_error(err: &reqwest::Error) -> TransportError {
    let inner_msg = err
        .source()
        .map(|e| e.to_string())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let is_dns = inner_msg.contains("dns")
        || inner_msg.contains("resolve")
        || inner_msg.contains("name or service not known")
        || inner_msg.contains("no such host");

    let message = if err.is_timeout() {
        "Request timed out. The completion API did not respond in time; consider raising \
         llm.timeout_seconds."
            .to_string()
    } else if is_dns {
        "DNS resolution failed. Could not resolve the completion API hostname.".to_string()
    } else if err.is_connect() {
        "Connection refused. Could not reach the completion API at the configured endpoint."
            .to_string()
    } else {
        format!("Network error: {err}")
    };
    TransportError::new(message)
}

fn parse_completion_payload(body: &str) -> Result<AssistantReply, TransportError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TransportError::new(format!("unparseable completion payload: {e}")))?;
    let Some(choice) = value
        .get("choices")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
    else {
        return Err(TransportError::new(
            "unexpected completion payload: missing choices[0]",
        ));
    };
    let finish_reason = choice
        .get("finish_reason")
        .and_then(|v| v.as_str())
        .unwrap_or("stop")
        .to_string();
    let Some(text) = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    else {
        return Err(TransportError::new(
            "unexpected completion payload: missing message.content",
        ));
    };
    Ok(AssistantReply {
        text: text.to_string(),
        finish_reason,
    })
}
