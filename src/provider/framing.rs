//! Byte-stream framing for the two wire formats.
//!
//! Both formats share one line discipline: bytes are buffered, complete
//! `\n`-terminated lines are cut off the front, and the incomplete tail stays
//! in the buffer until the next read. Splitting happens on raw bytes, so a
//! multi-byte character cut by a read boundary is reassembled before any UTF-8
//! decoding takes place.

use crate::error::{ChatError, Result};
use bytes::Bytes;
use futures_core::stream::BoxStream;
use serde::de::DeserializeOwned;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

/// Raw response body as delivered by a transport.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

const SSE_DONE: &str = "[DONE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON object per line.
    Ndjson,
    /// `data: <json>` events, terminated by `data: [DONE]`.
    Sse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Payload(String),
    Done,
}

#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line = self.buf.drain(..=pos).collect::<Vec<u8>>();
        line.pop();
        if line.ends_with(b"\r") {
            line.pop();
        }
        Some(line)
    }

    fn take_rest(&mut self) -> Option<Vec<u8>> {
        if self.buf.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

/// Incremental frame decoder; feed it reads, collect frames.
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    lines: LineBuffer,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            lines: LineBuffer::default(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.lines.push(chunk);
        let mut out = Vec::new();
        while let Some(line) = self.lines.next_line() {
            if let Some(frame) = self.frame_line(&line) {
                out.push(frame);
            }
        }
        out
    }

    /// Flush an unterminated final line once the transport closes.
    pub fn finish(&mut self) -> Option<Frame> {
        let mut rest = self.lines.take_rest()?;
        if rest.ends_with(b"\r") {
            rest.pop();
        }
        self.frame_line(&rest)
    }

    fn frame_line(&self, line: &[u8]) -> Option<Frame> {
        let s = match std::str::from_utf8(line) {
            Ok(s) => s.trim(),
            Err(e) => {
                tracing::warn!(error = %e, "skipping line that is not valid UTF-8");
                return None;
            }
        };
        if s.is_empty() {
            return None;
        }

        match self.framing {
            Framing::Ndjson => Some(Frame::Payload(s.to_string())),
            Framing::Sse => {
                // Ignore other fields: event:, id:, retry:, comments
                let rest = s.strip_prefix("data:")?;
                let data = rest.strip_prefix(' ').unwrap_or(rest);
                if data == SSE_DONE {
                    Some(Frame::Done)
                } else if data.is_empty() {
                    None
                } else {
                    Some(Frame::Payload(data.to_string()))
                }
            }
        }
    }
}

/// Decode a byte stream into provider-native objects.
///
/// Malformed frames are logged and skipped. The sequence ends when the
/// transport closes, on an SSE `[DONE]`, or as soon as `cancel` fires; none of
/// these is an error. A transport failure mid-body is yielded once and ends
/// the sequence.
pub fn decode<T>(
    framing: Framing,
    mut bytes: ByteStream,
    cancel: CancellationToken,
) -> BoxStream<'static, Result<T>>
where
    T: DeserializeOwned + Send + 'static,
{
    let out = async_stream::stream! {
        let mut decoder = FrameDecoder::new(framing);
        let mut pending = Vec::new();
        let mut eof = false;

        'read: while !eof {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'read,
                item = bytes.next() => item,
            };

            match item {
                Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                Some(Err(e)) => {
                    yield Err(e);
                    break 'read;
                }
                None => {
                    pending.extend(decoder.finish());
                    eof = true;
                }
            }

            for frame in pending.drain(..) {
                if cancel.is_cancelled() {
                    break 'read;
                }
                match frame {
                    Frame::Done => break 'read,
                    Frame::Payload(data) => match serde_json::from_str::<T>(&data) {
                        Ok(v) => yield Ok(v),
                        Err(e) => {
                            tracing::warn!(error = %e, ?framing, "skipping malformed frame");
                        }
                    },
                }
            }
        }
    };
    Box::pin(out)
}

/// Wrap a reqwest body as a [`ByteStream`].
pub fn from_response(resp: reqwest::Response) -> ByteStream {
    Box::pin(
        resp.bytes_stream()
            .map(|r| r.map_err(|e| ChatError::transport(format!("network stream error: {e}")))),
    )
}
