use super::framing;
use super::gemini::{GenerateContentRequest, GenerateContentResponse};
use super::perplexity::{ChatCompletionRequest, ChatCompletionResponse};
use super::{
    ChatRequest, ChunkStream, NativeResponse, ProviderKind, StreamChat, TransportStrategy,
    WireRequest,
};
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Routes a request to its provider, opens the transport, and normalizes the
/// provider-native frames into [`super::StreamChunk`]s.
///
/// No size guard is applied here; see [`crate::chat::UnifiedChatStream`].
#[derive(Clone)]
pub struct ProviderRouter {
    transport: Arc<dyn TransportStrategy>,
}

impl ProviderRouter {
    pub fn new(transport: Arc<dyn TransportStrategy>) -> Self {
        Self { transport }
    }

    fn wire_request(req: &ChatRequest, stream: bool) -> Result<WireRequest> {
        let payload = match req.provider() {
            ProviderKind::Gemini => serde_json::to_value(GenerateContentRequest::from_chat(req)),
            ProviderKind::Perplexity => {
                serde_json::to_value(ChatCompletionRequest::from_chat(req, stream))
            }
        }
        .map_err(|e| ChatError::InvalidRequest(e.to_string()))?;

        Ok(WireRequest {
            provider: req.provider(),
            model: req.model.id().to_string(),
            payload,
        })
    }
}

/// Turn decoded frames into chunks, tracking what the safety check needs.
fn normalize<T: NativeResponse>(
    frames: futures_core::stream::BoxStream<'static, Result<T>>,
    cancel: CancellationToken,
) -> ChunkStream {
    let out = async_stream::stream! {
        let mut frames = frames;
        let mut saw_text = false;
        let mut last_blocked = false;

        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            if cancel.is_cancelled() {
                break;
            }
            last_blocked = frame.safety_blocked();
            let chunk = frame.to_chunk();
            saw_text |= chunk.has_text();
            if !chunk.is_empty() {
                yield Ok(chunk);
            }
        }

        if !saw_text && !cancel.is_cancelled() {
            if last_blocked {
                yield Err(ChatError::SafetyBlocked);
            } else {
                tracing::debug!("stream completed without text");
            }
        }
    };
    Box::pin(out)
}

fn once_text<T: NativeResponse>(value: serde_json::Value) -> Result<String> {
    let resp: T = serde_json::from_value(value)
        .map_err(|e| ChatError::transport(format!("unexpected response shape: {e}")))?;
    let chunk = resp.to_chunk();
    if !chunk.has_text() && resp.safety_blocked() {
        return Err(ChatError::SafetyBlocked);
    }
    Ok(chunk.text.unwrap_or_default())
}

#[async_trait]
impl StreamChat for ProviderRouter {
    async fn stream_chat(&self, req: ChatRequest) -> Result<ChunkStream> {
        if req.cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let provider = req.provider();
        tracing::debug!(
            provider = provider.name(),
            transport = self.transport.name(),
            model = req.model.id(),
            "routing chat request"
        );

        let wire = Self::wire_request(&req, true)?;
        let cancel = req.cancel.clone();
        let opened = self.transport.open_stream(wire, &cancel).await?;

        let chunks = match provider {
            ProviderKind::Gemini => normalize(
                framing::decode::<GenerateContentResponse>(
                    opened.framing,
                    opened.bytes,
                    cancel.clone(),
                ),
                cancel,
            ),
            ProviderKind::Perplexity => normalize(
                framing::decode::<ChatCompletionResponse>(
                    opened.framing,
                    opened.bytes,
                    cancel.clone(),
                ),
                cancel,
            ),
        };
        Ok(chunks)
    }

    async fn generate_once(&self, req: ChatRequest) -> Result<String> {
        if req.cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        let wire = Self::wire_request(&req, false)?;
        let value = self.transport.call_once(wire, &req.cancel).await?;
        match req.provider() {
            ProviderKind::Gemini => once_text::<GenerateContentResponse>(value),
            ProviderKind::Perplexity => once_text::<ChatCompletionResponse>(value),
        }
    }
}
