use crate::error::{ChatError, Result};
use async_trait::async_trait;
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Progress sentinel telling the consumer to drop accumulated progress text.
pub const CLEAR_PROGRESS: &str = "[CLEAR]";

/// Model ids starting with this prefix are served by the Gemini-shaped provider.
const GEMINI_PREFIX: &str = "gemini";

/// A grounding source attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

/// The normalized unit of streamed output.
///
/// `citations`, when set, replaces the whole set the consumer holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

impl StreamChunk {
    /// Text delta; empty input yields a chunk without text.
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            text: (!text.is_empty()).then_some(text),
            ..Self::default()
        }
    }

    pub fn progress(line: impl Into<String>) -> Self {
        Self {
            progress: Some(line.into()),
            ..Self::default()
        }
    }

    pub fn clear_progress() -> Self {
        Self::progress(CLEAR_PROGRESS)
    }

    pub fn is_clear(&self) -> bool {
        self.progress.as_deref() == Some(CLEAR_PROGRESS)
    }

    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Nothing worth forwarding.
    pub fn is_empty(&self) -> bool {
        !self.has_text() && self.progress.is_none() && self.citations.is_empty()
    }
}

pub type ChunkStream = BoxStream<'static, Result<StreamChunk>>;

/// The two supported backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Gemini,
    Perplexity,
}

impl ProviderKind {
    pub fn for_model(model_id: &str) -> Self {
        if model_id.starts_with(GEMINI_PREFIX) {
            Self::Gemini
        } else {
            Self::Perplexity
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Perplexity => "perplexity",
        }
    }
}

/// A model id with its provider resolved once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    id: String,
    provider: ProviderKind,
}

impl Model {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let provider = ProviderKind::for_model(&id);
        Self { id, provider }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: Model,

    /// Prior turns, oldest first. Forwarded as-is.
    pub history: Vec<Message>,
    pub new_message: String,
    pub system_prompt: String,
    pub use_grounded_search: bool,

    /// Structured output type such as `application/json`.
    pub response_mime_type: Option<String>,
    pub cancel: CancellationToken,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, new_message: impl Into<String>) -> Self {
        Self {
            model: Model::new(model),
            history: Vec::new(),
            new_message: new_message.into(),
            system_prompt: String::new(),
            use_grounded_search: false,
            response_mime_type: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_grounded_search(mut self, on: bool) -> Self {
        self.use_grounded_search = on;
        self
    }

    pub fn with_response_mime_type(mut self, mime: Option<String>) -> Self {
        self.response_mime_type = mime;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn provider(&self) -> ProviderKind {
        self.model.provider()
    }
}

/// Streaming chat capability.
///
/// Implemented by the provider router and by test doubles; the chunked
/// summarizer is written against this trait only.
#[async_trait]
pub trait StreamChat: Send + Sync {
    /// Start streaming a response.
    async fn stream_chat(&self, req: ChatRequest) -> Result<ChunkStream>;

    /// Single-shot call returning only the answer text.
    async fn generate_once(&self, req: ChatRequest) -> Result<String> {
        let cancel = req.cancel.clone();
        let mut stream = self.stream_chat(req).await?;
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            if let Some(text) = chunk?.text {
                out.push_str(&text);
            }
        }
        if cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_prefix_selects_gemini() {
        assert_eq!(ProviderKind::for_model("gemini-2.5-flash"), ProviderKind::Gemini);
        assert_eq!(ProviderKind::for_model("gemini"), ProviderKind::Gemini);
        assert_eq!(ProviderKind::for_model("sonar-pro"), ProviderKind::Perplexity);
        assert_eq!(ProviderKind::for_model("Gemini-pro"), ProviderKind::Perplexity);
    }

    #[test]
    fn empty_text_is_no_text() {
        let c = StreamChunk::text("");
        assert_eq!(c.text, None);
        assert!(c.is_empty());
        assert!(StreamChunk::text("a").has_text());
    }

    #[test]
    fn clear_sentinel() {
        assert!(StreamChunk::clear_progress().is_clear());
        assert!(!StreamChunk::progress("Working").is_clear());
    }

    #[test]
    fn chunk_serializes_sparse() {
        let json = serde_json::to_string(&StreamChunk::text("hi")).unwrap();
        assert_eq!(json, r#"{"text":"hi"}"#);
    }
}
