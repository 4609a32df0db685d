use crate::chunking::{ChunkedSummarizer, ChunkingConfig};
use crate::error::{ChatError, Result};
use crate::provider::{
    ChatRequest, ChunkStream, ProviderKind, ProviderRouter, StreamChat, TransportStrategy,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context-window sizes, in tokens, used for the size guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenLimits {
    pub gemini_tokens: u64,
    pub perplexity_tokens: u64,
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self {
            gemini_tokens: 1_000_000,
            perplexity_tokens: 131_072,
        }
    }
}

impl TokenLimits {
    pub fn for_provider(&self, provider: ProviderKind) -> u64 {
        match provider {
            ProviderKind::Gemini => self.gemini_tokens,
            ProviderKind::Perplexity => self.perplexity_tokens,
        }
    }
}

/// The single entry point for UI collaborators.
///
/// Oversized single-shot requests are diverted to the [`ChunkedSummarizer`];
/// everything else goes straight to the provider backend.
pub struct UnifiedChatStream {
    backend: Arc<dyn StreamChat>,
    limits: TokenLimits,
    chunking: ChunkingConfig,
}

impl UnifiedChatStream {
    pub fn new(transport: Arc<dyn TransportStrategy>) -> Self {
        Self::with_backend(Arc::new(ProviderRouter::new(transport)))
    }

    /// Use any [`StreamChat`] as the provider backend.
    pub fn with_backend(backend: Arc<dyn StreamChat>) -> Self {
        Self {
            backend,
            limits: TokenLimits::default(),
            chunking: ChunkingConfig::default(),
        }
    }

    pub fn with_limits(mut self, limits: TokenLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.chunking = chunking;
        self
    }

    /// One-shot call for auxiliary features such as title generation.
    pub async fn generate_text(
        &self,
        prompt: &str,
        model: &str,
        cancel: CancellationToken,
    ) -> Result<String> {
        self.generate_once(ChatRequest::new(model, prompt).with_cancel(cancel))
            .await
    }

    fn needs_chunking(&self, req: &ChatRequest) -> Option<u64> {
        if !req.history.is_empty() {
            return None;
        }
        let limit = self.limits.for_provider(req.provider());
        self.chunking.exceeds(&req.new_message, limit).then_some(limit)
    }
}

#[async_trait]
impl StreamChat for UnifiedChatStream {
    async fn stream_chat(&self, req: ChatRequest) -> Result<ChunkStream> {
        if req.cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }

        if let Some(limit) = self.needs_chunking(&req) {
            let summarizer = ChunkedSummarizer::new(self.backend.clone(), self.chunking);
            return Ok(summarizer.summarize(req, limit));
        }
        self.backend.stream_chat(req).await
    }

    async fn generate_once(&self, req: ChatRequest) -> Result<String> {
        if req.cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        self.backend.generate_once(req).await
    }
}
