//! Streaming summarization core.
//!
//! Two incompatible streaming chat providers (Gemini over NDJSON or SSE,
//! Perplexity over SSE) are normalized into one [`provider::StreamChunk`]
//! sequence. Inputs too large for one call are summarized map-reduce style by
//! [`chunking::ChunkedSummarizer`]. A single [`tokio_util::sync::CancellationToken`]
//! is threaded through every stage.

pub mod chat;
pub mod chunking;
pub mod credentials;
pub mod error;
pub mod provider;

pub use chat::{TokenLimits, UnifiedChatStream};
pub use chunking::{ChunkedSummarizer, ChunkingConfig};
pub use error::ChatError;
pub use provider::{ChatRequest, StreamChat, StreamChunk};
