//! Network transports.
//!
//! A [`TransportStrategy`] is chosen once at startup: the proxied strategy talks
//! to an HTTP proxy that holds server-side credentials, the direct strategy
//! calls the Generative Language API with a local key. The router never
//! branches on deployment mode itself.

use super::framing::{self, ByteStream, Framing};
use super::ProviderKind;
use crate::credentials::CredentialSource;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A provider payload addressed to one model.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub provider: ProviderKind,
    pub model: String,
    pub payload: serde_json::Value,
}

/// An open response body and the framing it uses.
pub struct WireStream {
    pub framing: Framing,
    pub bytes: ByteStream,
}

#[async_trait]
pub trait TransportStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start a streaming call.
    async fn open_stream(&self, req: WireRequest, cancel: &CancellationToken) -> Result<WireStream>;

    /// Non-streaming call returning one provider-native JSON object.
    async fn call_once(
        &self,
        req: WireRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value>;
}

/// Send a request, racing it against `cancel`, and reject non-success statuses.
///
/// Dropping the in-flight future on cancellation aborts the HTTP request.
async fn send_checked(
    rb: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> Result<reqwest::Response> {
    let resp = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ChatError::Cancelled),
        resp = rb.send() => resp?,
    };

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        return Err(ChatError::from_http(status, &text));
    }
    Ok(resp)
}

async fn read_json(resp: reqwest::Response, cancel: &CancellationToken) -> Result<serde_json::Value> {
    let body = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ChatError::Cancelled),
        body = resp.bytes() => body?,
    };
    serde_json::from_slice(&body)
        .map_err(|e| ChatError::transport(format!("failed to parse response JSON: {e}")))
}

fn json_headers(accept: &'static str) -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    h.insert(ACCEPT, HeaderValue::from_static(accept));
    h
}

/// Calls the deployment's proxy, which injects server-held credentials.
///
/// Gemini streams come back as NDJSON, Perplexity streams as SSE.
pub struct ProxyTransport {
    http: reqwest::Client,
    base: Url,
    credentials: Arc<dyn CredentialSource>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxyBody<'a> {
    model: &'a str,
    payload: &'a serde_json::Value,
    fallback_keys: Vec<String>,
}

impl ProxyTransport {
    pub fn new(
        http: reqwest::Client,
        base: &str,
        credentials: Arc<dyn CredentialSource>,
    ) -> Result<Self> {
        // Url::join drops the last path segment unless it ends with '/'.
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let base = Url::parse(&base)
            .map_err(|e| ChatError::InvalidRequest(format!("bad proxy url {base}: {e}")))?;
        Ok(Self {
            http,
            base,
            credentials,
        })
    }

    fn url(&self, provider: ProviderKind, action: &str) -> Result<Url> {
        self.base
            .join(&format!("api/{}/{action}", provider.name()))
            .map_err(|e| ChatError::InvalidRequest(e.to_string()))
    }

    fn request(&self, url: Url, req: &WireRequest, accept: &'static str) -> reqwest::RequestBuilder {
        let body = ProxyBody {
            model: &req.model,
            payload: &req.payload,
            fallback_keys: self.credentials.fallback_keys(),
        };
        self.http.post(url).headers(json_headers(accept)).json(&body)
    }
}

#[async_trait]
impl TransportStrategy for ProxyTransport {
    fn name(&self) -> &'static str {
        "proxy"
    }

    async fn open_stream(&self, req: WireRequest, cancel: &CancellationToken) -> Result<WireStream> {
        let (framing, accept) = match req.provider {
            ProviderKind::Gemini => (Framing::Ndjson, "application/x-ndjson"),
            ProviderKind::Perplexity => (Framing::Sse, "text/event-stream"),
        };
        let url = self.url(req.provider, "stream")?;
        tracing::debug!(%url, model = %req.model, "opening proxied stream");

        let resp = send_checked(self.request(url, &req, accept), cancel).await?;
        Ok(WireStream {
            framing,
            bytes: framing::from_response(resp),
        })
    }

    async fn call_once(
        &self,
        req: WireRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        let url = self.url(req.provider, "generate")?;
        tracing::debug!(%url, model = %req.model, "proxied one-shot call");

        let resp = send_checked(self.request(url, &req, "application/json"), cancel).await?;
        read_json(resp, cancel).await
    }
}

/// Calls the Generative Language API directly with a locally held key.
///
/// Used inside embedded/studio hosts, where no proxy is available. Only the
/// Gemini family can be served this way.
#[cfg(feature = "direct")]
pub struct DirectTransport {
    http: reqwest::Client,
    api_key: String,
    api_base: Url,
}

#[cfg(feature = "direct")]
impl DirectTransport {
    pub const DEFAULT_API_BASE: &'static str = "https://generativelanguage.googleapis.com/";

    pub fn new(http: reqwest::Client, api_key: String) -> Result<Self> {
        Self::with_api_base(http, api_key, Self::DEFAULT_API_BASE)
    }

    pub fn with_api_base(http: reqwest::Client, api_key: String, api_base: &str) -> Result<Self> {
        let api_base = Url::parse(api_base)
            .map_err(|e| ChatError::InvalidRequest(format!("bad api base {api_base}: {e}")))?;
        Ok(Self {
            http,
            api_key,
            api_base,
        })
    }

    fn build_url(&self, model: &str, method: &str, sse: bool) -> Result<Url> {
        // Docs: https://ai.google.dev/api/rest/v1beta/models/streamGenerateContent
        let mut url = self
            .api_base
            .join(&format!("v1beta/models/{model}:{method}"))
            .map_err(|e| ChatError::InvalidRequest(e.to_string()))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        if sse {
            url.query_pairs_mut().append_pair("alt", "sse");
        }
        Ok(url)
    }

    fn gemini_only(req: &WireRequest) -> Result<()> {
        match req.provider {
            ProviderKind::Gemini => Ok(()),
            ProviderKind::Perplexity => Err(ChatError::Unsupported(format!(
                "model {} is not available in the embedded host; only Gemini models are",
                req.model
            ))),
        }
    }
}

#[cfg(feature = "direct")]
#[async_trait]
impl TransportStrategy for DirectTransport {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn open_stream(&self, req: WireRequest, cancel: &CancellationToken) -> Result<WireStream> {
        Self::gemini_only(&req)?;
        let url = self.build_url(&req.model, "streamGenerateContent", true)?;
        tracing::debug!(model = %req.model, "opening direct stream");

        let rb = self
            .http
            .post(url)
            .headers(json_headers("text/event-stream"))
            .json(&req.payload);
        let resp = send_checked(rb, cancel).await?;
        Ok(WireStream {
            framing: Framing::Sse,
            bytes: framing::from_response(resp),
        })
    }

    async fn call_once(
        &self,
        req: WireRequest,
        cancel: &CancellationToken,
    ) -> Result<serde_json::Value> {
        Self::gemini_only(&req)?;
        let url = self.build_url(&req.model, "generateContent", false)?;
        tracing::debug!(model = %req.model, "direct one-shot call");

        let rb = self
            .http
            .post(url)
            .headers(json_headers("application/json"))
            .json(&req.payload);
        let resp = send_checked(rb, cancel).await?;
        read_json(resp, cancel).await
    }
}
