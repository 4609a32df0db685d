use crate::config;
use anyhow::Context;
use digest::credentials::StaticKeys;
use digest::provider::stub::ScriptedChat;
use digest::provider::{ProxyTransport, StreamChunk, TransportStrategy};
use digest::{ChatRequest, StreamChat, UnifiedChatStream};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const DEFAULT_PROXY_URL: &str = "http://127.0.0.1:8787";

pub const DEFAULT_SYSTEM_PROMPT: &str = "Summarize the user's content in well-structured Markdown. \
Start with a one-paragraph overview, then list the key points. Keep facts, figures, and names accurate.";

/// How much of a document the title prompt sees.
const TITLE_EXCERPT_CHARS: usize = 4_000;

/// How much of a document the flashcard prompt sees.
const FLASHCARD_EXCERPT_CHARS: usize = 60_000;

/// Whether we run inside an embedded/studio host with no proxy available.
pub fn studio_host() -> bool {
    let flag = std::env::var("DIGEST_STUDIO")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);
    flag || std::env::var_os("DIGEST_STUDIO_HOST").is_some()
}

/// Fallback keys from config plus `DIGEST_FALLBACK_KEYS` (comma separated).
pub fn fallback_keys(cfg: Option<&config::Config>) -> StaticKeys {
    let from_env = std::env::var("DIGEST_FALLBACK_KEYS").unwrap_or_default();
    let configured = cfg.map(|c| c.fallback_keys.clone()).unwrap_or_default();
    StaticKeys::new(
        configured
            .iter()
            .map(String::as_str)
            .chain(from_env.split(',')),
    )
}

pub fn build_transport(
    http: &reqwest::Client,
    cfg: Option<&config::Config>,
    proxy_override: Option<String>,
) -> anyhow::Result<Arc<dyn TransportStrategy>> {
    if studio_host() {
        #[cfg(feature = "direct")]
        {
            let api_key = std::env::var("GEMINI_API_KEY")
                .context("GEMINI_API_KEY must be set when running in a studio host")?;
            let api_base = cfg
                .and_then(|c| c.direct.api_base.clone())
                .unwrap_or_else(|| digest::provider::DirectTransport::DEFAULT_API_BASE.to_string());
            tracing::debug!(%api_base, "using direct transport");
            let t = digest::provider::DirectTransport::with_api_base(http.clone(), api_key, &api_base)?;
            return Ok(Arc::new(t));
        }
        #[cfg(not(feature = "direct"))]
        {
            anyhow::bail!("studio host detected but the direct transport is not enabled in this build")
        }
    }

    let proxy_url = proxy_override
        .or_else(|| cfg.and_then(|c| c.proxy_url.clone()))
        .unwrap_or_else(|| DEFAULT_PROXY_URL.to_string());
    tracing::debug!(%proxy_url, "using proxy transport");

    let keys = fallback_keys(cfg);
    let t = ProxyTransport::new(http.clone(), &proxy_url, Arc::new(keys))?;
    Ok(Arc::new(t))
}

pub fn build_chat(
    http: &reqwest::Client,
    cfg: Option<&config::Config>,
    proxy_override: Option<String>,
    stub: bool,
) -> anyhow::Result<UnifiedChatStream> {
    let chat = if stub {
        UnifiedChatStream::with_backend(Arc::new(ScriptedChat::new()))
    } else {
        UnifiedChatStream::new(build_transport(http, cfg, proxy_override)?)
    };

    let (limits, chunking) = cfg
        .map(|c| (c.limits, c.chunking))
        .unwrap_or_default();
    Ok(chat.with_limits(limits).with_chunking(chunking))
}

pub fn read_document(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read document: {}", path.display()))
}

pub async fn cmd_title(
    chat: &UnifiedChatStream,
    model: &str,
    path: &Path,
    cancel: CancellationToken,
) -> anyhow::Result<String> {
    let doc = read_document(path)?;
    let excerpt: String = doc.chars().take(TITLE_EXCERPT_CHARS).collect();
    let prompt = format!(
        "Write a short, descriptive title (at most eight words) for the document below. \
Reply with the title only, without quotes.\n\n{excerpt}"
    );
    let title = chat.generate_text(&prompt, model, cancel).await?;
    Ok(title.trim().trim_matches('"').to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

/// Models sometimes wrap JSON in a Markdown fence even when asked not to.
fn strip_code_fence(reply: &str) -> &str {
    let s = reply.trim();
    let Some(inner) = s.strip_prefix("```") else {
        return s;
    };
    let inner = inner.strip_suffix("```").unwrap_or(inner);
    match inner.split_once('\n') {
        Some((lang, body)) if !lang.contains('[') => body.trim(),
        _ => inner.trim(),
    }
}

pub fn parse_flashcards(reply: &str) -> anyhow::Result<Vec<Flashcard>> {
    let cards: Vec<Flashcard> = serde_json::from_str(strip_code_fence(reply))
        .context("model reply is not a JSON array of {front, back} cards")?;
    Ok(cards
        .into_iter()
        .filter(|c| !c.front.trim().is_empty() && !c.back.trim().is_empty())
        .collect())
}

pub async fn cmd_flashcards(
    chat: &UnifiedChatStream,
    model: &str,
    path: &Path,
    count: usize,
    cancel: CancellationToken,
) -> anyhow::Result<Vec<Flashcard>> {
    let doc = read_document(path)?;
    let excerpt: String = doc.chars().take(FLASHCARD_EXCERPT_CHARS).collect();
    let prompt = format!(
        "Create {count} study flashcards from the document below. Reply with a JSON array \
of objects with string fields \"front\" (a question) and \"back\" (its answer), nothing else.\n\n{excerpt}"
    );
    let req = ChatRequest::new(model, prompt)
        .with_response_mime_type(Some("application/json".to_string()))
        .with_cancel(cancel);
    let reply = chat.generate_once(req).await?;
    let cards = parse_flashcards(&reply)?;
    tracing::debug!(requested = count, received = cards.len(), "generated flashcards");
    Ok(cards)
}

/// Writes chunks for a terminal: answer text to `out`, progress to `log`.
pub struct Printer<O: Write, L: Write> {
    out: O,
    log: L,
    ndjson: bool,
    citations: Vec<digest::provider::Citation>,
}

impl<O: Write, L: Write> Printer<O, L> {
    pub fn new(out: O, log: L, ndjson: bool) -> Self {
        Self {
            out,
            log,
            ndjson,
            citations: Vec::new(),
        }
    }

    pub fn chunk(&mut self, chunk: &StreamChunk) -> std::io::Result<()> {
        if self.ndjson {
            let line = serde_json::to_string(chunk)?;
            writeln!(self.out, "{line}")?;
            return self.out.flush();
        }

        if chunk.is_clear() {
            writeln!(self.log)?;
        } else if let Some(p) = &chunk.progress {
            writeln!(self.log, "{p}")?;
        }
        if !chunk.citations.is_empty() {
            self.citations = chunk.citations.clone();
        }
        if let Some(text) = &chunk.text {
            write!(self.out, "{text}")?;
            self.out.flush()?;
        }
        Ok(())
    }

    pub fn finish(&mut self) -> std::io::Result<()> {
        if self.ndjson {
            return Ok(());
        }
        writeln!(self.out)?;
        if !self.citations.is_empty() {
            writeln!(self.out, "\nSources:")?;
            for (i, c) in self.citations.iter().enumerate() {
                writeln!(self.out, "  [{}] {} <{}>", i + 1, c.title, c.uri)?;
            }
        }
        self.out.flush()
    }
}

pub async fn cmd_summarize<O: Write, L: Write>(
    chat: &UnifiedChatStream,
    req: ChatRequest,
    printer: &mut Printer<O, L>,
) -> anyhow::Result<()> {
    let mut stream = chat.stream_chat(req).await?;
    while let Some(item) = stream.next().await {
        printer.chunk(&item?).context("failed to write output")?;
    }
    printer.finish().context("failed to write output")
}
