use super::{ChatRequest, ChunkStream, StreamChat, StreamChunk};
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Which capability a recorded call went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Stream,
    Once,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub model: String,
    pub system_prompt: String,
    pub message: String,
    pub response_mime_type: Option<String>,
}

/// Offline backend with scripted answers.
///
/// Without a script it echoes: one-shot calls return a short synthetic summary
/// and streams drip the message back in a few pieces. Every call is recorded.
#[derive(Default)]
pub struct ScriptedChat {
    once_replies: Mutex<VecDeque<Result<String>>>,
    stream_reply: Mutex<Option<Vec<StreamChunk>>>,
    cancel_after: Mutex<Option<(usize, CancellationToken)>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers for successive one-shot calls.
    pub fn with_once_replies<I>(self, replies: I) -> Self
    where
        I: IntoIterator<Item = Result<String>>,
    {
        lock(&self.once_replies).extend(replies);
        self
    }

    /// Chunks every streaming call yields.
    pub fn with_stream_reply(self, chunks: Vec<StreamChunk>) -> Self {
        *lock(&self.stream_reply) = Some(chunks);
        self
    }

    /// Fire `token` once `n` one-shot calls have completed.
    pub fn cancel_after_once_calls(self, n: usize, token: CancellationToken) -> Self {
        *lock(&self.cancel_after) = Some((n, token));
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, kind: CallKind, req: &ChatRequest) -> usize {
        let mut calls = lock(&self.calls);
        calls.push(RecordedCall {
            kind,
            model: req.model.id().to_string(),
            system_prompt: req.system_prompt.clone(),
            message: req.new_message.clone(),
            response_mime_type: req.response_mime_type.clone(),
        });
        calls.iter().filter(|c| c.kind == kind).count()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn echo_pieces(message: &str) -> Vec<StreamChunk> {
    let preview: String = message.chars().take(200).collect();
    ["You said: ", preview.as_str(), "\n"]
        .into_iter()
        .map(StreamChunk::text)
        .collect()
}

#[async_trait]
impl StreamChat for ScriptedChat {
    async fn stream_chat(&self, req: ChatRequest) -> Result<ChunkStream> {
        if req.cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        self.record(CallKind::Stream, &req);

        let chunks = lock(&self.stream_reply)
            .clone()
            .unwrap_or_else(|| echo_pieces(&req.new_message));
        let cancel = req.cancel.clone();

        let out = async_stream::stream! {
            for chunk in chunks {
                tokio::task::yield_now().await;
                if cancel.is_cancelled() {
                    break;
                }
                yield Ok(chunk);
            }
        };
        Ok(Box::pin(out))
    }

    async fn generate_once(&self, req: ChatRequest) -> Result<String> {
        if req.cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        let n = self.record(CallKind::Once, &req);

        let reply = lock(&self.once_replies)
            .pop_front()
            .unwrap_or_else(|| Ok(format!("[summary of {} chars]", req.new_message.chars().count())));

        if let Some((after, token)) = lock(&self.cancel_after).as_ref() {
            if n >= *after {
                token.cancel();
            }
        }
        reply
    }
}
