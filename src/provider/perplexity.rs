//! Perplexity (OpenAI-compatible chat completions) requests and responses.

use super::{ChatRequest, Role, StreamChunk};
use serde::{Deserialize, Serialize};

const CONTENT_FILTER: &str = "content_filter";

#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl ChatCompletionRequest {
    pub fn from_chat(req: &ChatRequest, stream: bool) -> Self {
        if let Some(mime) = &req.response_mime_type {
            tracing::debug!(%mime, "perplexity has no structured output mode; ignoring mime type");
        }

        let mut messages = Vec::with_capacity(req.history.len() + 2);
        if !req.system_prompt.is_empty() {
            messages.push(WireMessage {
                role: "system",
                content: req.system_prompt.clone(),
            });
        }
        messages.extend(req.history.iter().map(|m| WireMessage {
            role: match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: m.content.clone(),
        }));
        messages.push(WireMessage {
            role: "user",
            content: req.new_message.clone(),
        });

        Self {
            model: req.model.id().to_string(),
            messages,
            stream,
        }
    }
}

/// A streamed `chat.completion.chunk` or a whole `chat.completion`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Option<Delta>,
    #[serde(default)]
    pub message: Option<Delta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatCompletionResponse {
    /// Perplexity carries no grounding metadata, so citations stay empty.
    pub fn to_chunk(&self) -> StreamChunk {
        let text = self
            .choices
            .first()
            .and_then(|c| c.delta.as_ref().or(c.message.as_ref()))
            .and_then(|d| d.content.clone())
            .unwrap_or_default();
        StreamChunk::text(text)
    }

    pub fn safety_blocked(&self) -> bool {
        self.choices
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            == Some(CONTENT_FILTER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Message;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> ChatCompletionResponse {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn delta_content_is_text() {
        let r = parse(json!({"id": "x", "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hi"}}]}));
        assert_eq!(r.to_chunk(), StreamChunk::text("Hi"));
    }

    #[test]
    fn whole_message_is_text() {
        let r = parse(json!({"choices": [{"message": {"content": "done"}, "finish_reason": "stop"}]}));
        assert_eq!(r.to_chunk().text.as_deref(), Some("done"));
    }

    #[test]
    fn never_carries_citations() {
        // Top-level citations exist on the wire but are not grounding metadata.
        let r = parse(json!({
            "citations": ["https://a.example"],
            "choices": [{"delta": {"content": "x"}}]
        }));
        assert!(r.to_chunk().citations.is_empty());
        assert!(parse(json!({})).to_chunk().is_empty());
    }

    #[test]
    fn content_filter_is_blocked() {
        assert!(parse(json!({"choices": [{"delta": {}, "finish_reason": "content_filter"}]})).safety_blocked());
        assert!(!parse(json!({"choices": [{"delta": {}, "finish_reason": "stop"}]})).safety_blocked());
    }

    #[test]
    fn request_has_system_then_history() {
        let req = ChatRequest::new("sonar-pro", "go")
            .with_history(vec![Message::user("q"), Message::assistant("a")])
            .with_system_prompt("sys")
            .with_response_mime_type(Some("application/json".into()));
        let body = serde_json::to_value(ChatCompletionRequest::from_chat(&req, true)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "sonar-pro",
                "messages": [
                    {"role": "system", "content": "sys"},
                    {"role": "user", "content": "q"},
                    {"role": "assistant", "content": "a"},
                    {"role": "user", "content": "go"}
                ],
                "stream": true
            })
        );
    }
}
