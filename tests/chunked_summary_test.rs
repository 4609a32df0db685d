//! Map-reduce behavior of the size guard and chunked summarizer, driven by a
//! scripted backend or by a transport fed from a channel.

use async_trait::async_trait;
use bytes::Bytes;
use digest::chunking::{MAP_INSTRUCTION, SUMMARY_SEPARATOR};
use digest::provider::framing::Framing;
use digest::provider::stub::{CallKind, ScriptedChat};
use digest::provider::{TransportStrategy, WireRequest, WireStream};
use digest::{ChatError, ChatRequest, StreamChat, StreamChunk, TokenLimits, UnifiedChatStream};
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// Gemini windows of 8 characters, Perplexity windows of 4.
fn tiny_limits() -> TokenLimits {
    TokenLimits {
        gemini_tokens: 4,
        perplexity_tokens: 2,
    }
}

async fn drain(chat: &UnifiedChatStream, req: ChatRequest) -> (Vec<StreamChunk>, Option<ChatError>) {
    let mut stream = match chat.stream_chat(req).await {
        Ok(s) => s,
        Err(e) => return (Vec::new(), Some(e)),
    };
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(c) => out.push(c),
            Err(e) => return (out, Some(e)),
        }
    }
    (out, None)
}

#[tokio::test]
async fn three_windows_map_then_reduce() {
    let backend = Arc::new(
        ScriptedChat::new()
            .with_once_replies([Ok("S1".to_string()), Ok("S2".to_string()), Ok("S3".to_string())])
            .with_stream_reply(vec![StreamChunk::text("Final "), StreamChunk::text("answer")]),
    );
    let chat = UnifiedChatStream::with_backend(backend.clone()).with_limits(tiny_limits());

    let input = "aaaaaaaabbbbbbbbcccc";
    let req = ChatRequest::new("gemini-2.5-flash", input).with_system_prompt("Use bullets.");
    let (chunks, err) = drain(&chat, req).await;
    assert!(err.is_none(), "unexpected error: {err:?}");

    let calls = backend.calls();
    let map: Vec<_> = calls.iter().filter(|c| c.kind == CallKind::Once).collect();
    assert_eq!(map.len(), 3);
    assert_eq!(map[0].message, "aaaaaaaa");
    assert_eq!(map[2].message, "cccc");
    assert!(map.iter().all(|c| c.system_prompt == MAP_INSTRUCTION));

    let reduce: Vec<_> = calls.iter().filter(|c| c.kind == CallKind::Stream).collect();
    assert_eq!(reduce.len(), 1);
    assert_eq!(
        reduce[0].message,
        ["S1", "S2", "S3"].join(SUMMARY_SEPARATOR)
    );
    assert!(reduce[0].system_prompt.ends_with("Use bullets."));
    assert_eq!(reduce[0].model, "gemini-2.5-flash");

    let clears: Vec<usize> = chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_clear())
        .map(|(i, _)| i)
        .collect();
    let first_text = chunks.iter().position(|c| c.has_text()).unwrap();
    assert_eq!(clears.len(), 1);
    assert!(clears[0] < first_text);

    // Progress never leaks into the answer, and all of it precedes the answer.
    assert!(chunks[..first_text].iter().all(|c| c.progress.is_some() && !c.has_text()));
    let answer: String = chunks.iter().filter_map(|c| c.text.as_deref()).collect();
    assert_eq!(answer, "Final answer");
}

#[tokio::test]
async fn progress_names_each_window_in_order() {
    let backend = Arc::new(ScriptedChat::new());
    let chat = UnifiedChatStream::with_backend(backend).with_limits(tiny_limits());

    let (chunks, err) = drain(&chat, ChatRequest::new("gemini-x", "x".repeat(20))).await;
    assert!(err.is_none());

    let progress: Vec<&str> = chunks.iter().filter_map(|c| c.progress.as_deref()).collect();
    assert!(progress[0].contains("3 parts"));
    assert_eq!(progress[1], "Summarizing part 1 of 3...");
    assert_eq!(progress[2], "Part 1 of 3 done.");
    assert_eq!(progress[5], "Summarizing part 3 of 3...");
    assert!(progress[7].starts_with("Combining"));
    assert_eq!(progress[8], "[CLEAR]");
}

#[tokio::test]
async fn cancel_after_first_window_stops_the_map_phase() {
    let cancel = CancellationToken::new();
    let backend = Arc::new(ScriptedChat::new().cancel_after_once_calls(1, cancel.clone()));
    let chat = UnifiedChatStream::with_backend(backend.clone()).with_limits(tiny_limits());

    let req = ChatRequest::new("gemini-x", "y".repeat(24)).with_cancel(cancel);
    let (chunks, err) = drain(&chat, req).await;

    assert!(matches!(err, Some(ChatError::Cancelled)));
    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, CallKind::Once);
    assert!(!chunks.iter().any(|c| c.is_clear() || c.has_text()));
}

#[tokio::test]
async fn failed_window_aborts_without_reduce() {
    let backend = Arc::new(ScriptedChat::new().with_once_replies([
        Ok("S1".to_string()),
        Err(ChatError::transport("upstream 500")),
    ]));
    let chat = UnifiedChatStream::with_backend(backend.clone()).with_limits(tiny_limits());

    let (_, err) = drain(&chat, ChatRequest::new("gemini-x", "z".repeat(24))).await;
    assert!(matches!(err, Some(ChatError::Transport { .. })));

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.kind == CallKind::Once));
}

#[tokio::test]
async fn perplexity_uses_its_own_threshold_and_stays_on_provider() {
    let backend = Arc::new(ScriptedChat::new());
    let chat = UnifiedChatStream::with_backend(backend.clone()).with_limits(tiny_limits());

    // 8 characters is fine for Gemini but two windows for Perplexity.
    let (_, err) = drain(&chat, ChatRequest::new("sonar", "12345678")).await;
    assert!(err.is_none());

    let calls = backend.calls();
    assert_eq!(calls.iter().filter(|c| c.kind == CallKind::Once).count(), 2);
    assert!(calls.iter().all(|c| c.model == "sonar"));
}

#[tokio::test]
async fn default_thresholds_are_exact() {
    let backend = Arc::new(ScriptedChat::new());
    let chat = UnifiedChatStream::with_backend(backend.clone());

    let (_, err) = drain(&chat, ChatRequest::new("sonar", "p".repeat(262_144))).await;
    assert!(err.is_none());
    assert_eq!(backend.calls().last().unwrap().kind, CallKind::Stream);
    assert_eq!(backend.calls().len(), 1);

    let (chunks, err) = drain(&chat, ChatRequest::new("sonar", "p".repeat(262_145))).await;
    assert!(err.is_none());
    assert!(chunks[0].progress.as_deref().unwrap().contains("2 parts"));

    let before = backend.calls().len();
    let (_, err) = drain(&chat, ChatRequest::new("gemini-x", "g".repeat(2_000_000))).await;
    assert!(err.is_none());
    assert_eq!(backend.calls().len(), before + 1);

    let (chunks, _) = drain(&chat, ChatRequest::new("gemini-x", "g".repeat(2_000_001))).await;
    assert!(chunks[0].progress.is_some());
}

#[tokio::test]
async fn history_bypasses_the_size_guard() {
    let backend = Arc::new(ScriptedChat::new());
    let chat = UnifiedChatStream::with_backend(backend.clone()).with_limits(tiny_limits());

    let req = ChatRequest::new("gemini-x", "w".repeat(50))
        .with_history(vec![digest::provider::Message::user("earlier")]);
    let (_, err) = drain(&chat, req).await;
    assert!(err.is_none());
    assert_eq!(backend.calls().len(), 1);
    assert_eq!(backend.calls()[0].kind, CallKind::Stream);
}

#[tokio::test]
async fn already_cancelled_request_is_rejected() {
    let backend = Arc::new(ScriptedChat::new());
    let chat = UnifiedChatStream::with_backend(backend.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let (_, err) = drain(&chat, ChatRequest::new("gemini-x", "hi").with_cancel(cancel)).await;
    assert!(err.unwrap().is_cancelled());
    assert!(backend.calls().is_empty());
}

/// Answers map calls with a fixed summary and streams the reduce answer from
/// a channel the test writes into.
struct LiveReduceTransport {
    body: Mutex<Option<mpsc::UnboundedReceiver<digest::error::Result<Bytes>>>>,
    once_calls: Mutex<usize>,
}

#[async_trait]
impl TransportStrategy for LiveReduceTransport {
    fn name(&self) -> &'static str {
        "live-reduce"
    }

    async fn open_stream(
        &self,
        _req: WireRequest,
        _cancel: &CancellationToken,
    ) -> digest::error::Result<WireStream> {
        let rx = self
            .body
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ChatError::transport("body already taken"))?;
        Ok(WireStream {
            framing: Framing::Ndjson,
            bytes: Box::pin(UnboundedReceiverStream::new(rx)),
        })
    }

    async fn call_once(
        &self,
        _req: WireRequest,
        _cancel: &CancellationToken,
    ) -> digest::error::Result<serde_json::Value> {
        *self.once_calls.lock().unwrap() += 1;
        Ok(serde_json::json!({
            "candidates": [{"content": {"role": "model", "parts": [{"text": "S"}]}}]
        }))
    }
}

#[tokio::test]
async fn cancel_during_reduce_stream_ends_quietly() {
    let (tx, rx) = mpsc::unbounded_channel();
    let transport = Arc::new(LiveReduceTransport {
        body: Mutex::new(Some(rx)),
        once_calls: Mutex::new(0),
    });
    let chat = UnifiedChatStream::new(transport.clone()).with_limits(tiny_limits());

    let cancel = CancellationToken::new();
    let req = ChatRequest::new("gemini-x", "q".repeat(20)).with_cancel(cancel.clone());
    let mut stream = chat.stream_chat(req).await.unwrap();

    tx.send(Ok(Bytes::from_static(b"{\"text\":\"first\"}\n"))).unwrap();
    let mut before_cancel = Vec::new();
    while let Some(item) = stream.next().await {
        let chunk = item.unwrap();
        let done = chunk.has_text();
        before_cancel.push(chunk);
        if done {
            break;
        }
    }
    assert_eq!(*transport.once_calls.lock().unwrap(), 3);
    assert!(before_cancel.iter().any(|c| c.is_clear()));
    assert_eq!(before_cancel.last().unwrap().text.as_deref(), Some("first"));

    cancel.cancel();
    tx.send(Ok(Bytes::from_static(b"{\"text\":\"second\"}\n"))).unwrap();
    assert!(stream.next().await.is_none());
}
