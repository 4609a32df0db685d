pub mod framing;
pub mod gemini;
pub mod perplexity;
pub mod router;
pub mod stub;
pub mod transport;
mod types;

pub use router::ProviderRouter;
pub use transport::{ProxyTransport, TransportStrategy, WireRequest, WireStream};
pub use types::*;

#[cfg(feature = "direct")]
pub use transport::DirectTransport;

/// A provider-native response object that maps onto [`StreamChunk`].
pub trait NativeResponse: serde::de::DeserializeOwned + Send + 'static {
    fn to_chunk(&self) -> StreamChunk;

    /// Whether this message reports a content-safety stop.
    fn safety_blocked(&self) -> bool;
}

impl NativeResponse for gemini::GenerateContentResponse {
    fn to_chunk(&self) -> StreamChunk {
        gemini::GenerateContentResponse::to_chunk(self)
    }

    fn safety_blocked(&self) -> bool {
        gemini::GenerateContentResponse::safety_blocked(self)
    }
}

impl NativeResponse for perplexity::ChatCompletionResponse {
    fn to_chunk(&self) -> StreamChunk {
        perplexity::ChatCompletionResponse::to_chunk(self)
    }

    fn safety_blocked(&self) -> bool {
        perplexity::ChatCompletionResponse::safety_blocked(self)
    }
}
