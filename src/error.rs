use thiserror::Error;

/// Errors surfaced by the streaming core.
///
/// Malformed individual frames never become a `ChatError`; decoders log and
/// skip them.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Network or HTTP failure reaching the provider or the proxy.
    #[error("{message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// No text was produced and the provider reported a content-safety stop.
    #[error("the response was blocked by the provider's safety filter")]
    SafetyBlocked,

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("cancelled by user")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ChatError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Cancellation is not a failure; callers should render it silently.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Build a transport error from a non-success HTTP response body.
    ///
    /// Prefers the provider's own message (`error.message`, `error`, `message`),
    /// then the raw body, then a generic line naming the status.
    pub fn from_http(status: reqwest::StatusCode, body: &str) -> Self {
        let message = provider_message(body)
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| format!("request failed with HTTP {status}"));

        Self::Transport {
            message,
            status: Some(status.as_u16()),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport {
            message: e.to_string(),
            status: e.status().map(|s| s.as_u16()),
        }
    }
}

fn provider_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let msg = v
        .pointer("/error/message")
        .or_else(|| v.get("error").filter(|e| e.is_string()))
        .or_else(|| v.get("message"))?
        .as_str()?;
    Some(msg.to_string())
}

pub type Result<T> = std::result::Result<T, ChatError>;
