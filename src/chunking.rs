//! Map-reduce summarization for inputs too large for one model call.
//!
//! The input is cut into fixed-size character windows, each window is
//! summarized on its own with a one-shot call (map), and the joined partial
//! summaries are streamed through the model once more under the caller's
//! original instructions (reduce). Windows run strictly one after another so
//! at most one request is outstanding and progress lines arrive in order.

use crate::error::ChatError;
use crate::provider::{ChatRequest, ChunkStream, StreamChat, StreamChunk};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_stream::StreamExt;

/// Instruction used for every map-phase call.
pub const MAP_INSTRUCTION: &str = "You are summarizing one excerpt of a larger document. \
Summarize this excerpt concisely. Preserve key facts, figures, names, and conclusions. \
Do not add an introduction or refer to the excerpt itself.";

/// Placed between partial summaries in the reduce-phase message.
pub const SUMMARY_SEPARATOR: &str = "\n\n---\n\n";

/// Heuristics turning a token limit into a character budget.
///
/// These are deliberately conservative approximations, not tokenizer counts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Fraction of the context window the input may use.
    pub safety_factor: f64,
    /// Average characters per token.
    pub chars_per_token: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            safety_factor: 0.8,
            chars_per_token: 2.5,
        }
    }
}

impl ChunkingConfig {
    /// Largest input, in characters, sent as a single request.
    pub fn window_chars(&self, token_limit: u64) -> usize {
        let chars = (token_limit as f64 * self.safety_factor * self.chars_per_token).floor();
        if chars < 1.0 {
            1
        } else {
            chars as usize
        }
    }

    pub fn exceeds(&self, input: &str, token_limit: u64) -> bool {
        input.chars().count() > self.window_chars(token_limit)
    }
}

/// Windows of one oversized input and their summaries, filled in order.
#[derive(Debug, Default)]
pub struct ChunkingPlan {
    pub windows: Vec<String>,
    pub summaries: Vec<String>,
}

impl ChunkingPlan {
    /// Cut `input` into contiguous windows of `window_chars` characters.
    ///
    /// The last window may be shorter. Boundaries ignore sentences and words.
    pub fn split(input: &str, window_chars: usize) -> Self {
        let window_chars = window_chars.max(1);
        let mut windows = Vec::new();
        let mut start = 0;
        let mut count = 0;
        for (idx, _) in input.char_indices() {
            if count == window_chars {
                windows.push(input[start..idx].to_string());
                start = idx;
                count = 0;
            }
            count += 1;
        }
        if start < input.len() {
            windows.push(input[start..].to_string());
        }

        Self {
            summaries: Vec::with_capacity(windows.len()),
            windows,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.summaries.len() == self.windows.len()
    }

    pub fn combined(&self) -> String {
        self.summaries.join(SUMMARY_SEPARATOR)
    }
}

/// System prompt for the reduce phase, wrapping the caller's instructions.
pub fn reduce_prompt(original: &str) -> String {
    format!(
        "The user message contains summaries of consecutive excerpts of one larger document, \
separated by \"---\". Merge them into a single coherent summary of the whole document, \
without repeating content and without mentioning excerpts. Follow these instructions \
for the final result:\n\n{original}"
    )
}

pub struct ChunkedSummarizer<S: ?Sized> {
    chat: Arc<S>,
    config: ChunkingConfig,
}

impl<S> ChunkedSummarizer<S>
where
    S: StreamChat + ?Sized + 'static,
{
    pub fn new(chat: Arc<S>, config: ChunkingConfig) -> Self {
        Self { chat, config }
    }

    /// Summarize `req.new_message` in windows sized for `token_limit`.
    ///
    /// Yields progress lines for every phase, then `[CLEAR]`, then the
    /// reduce-phase chunks unchanged. Any failure ends the stream; nothing is
    /// retried.
    pub fn summarize(&self, req: ChatRequest, token_limit: u64) -> ChunkStream {
        let chat = self.chat.clone();
        let window_chars = self.config.window_chars(token_limit);

        let out = async_stream::stream! {
            let mut plan = ChunkingPlan::split(&req.new_message, window_chars);
            let total = plan.windows.len();
            tracing::info!(
                model = req.model.id(),
                total,
                window_chars,
                "input exceeds single-request budget; summarizing in parts"
            );
            yield Ok(StreamChunk::progress(format!(
                "Input is too large for one request; splitting it into {total} parts."
            )));

            for (i, window) in plan.windows.iter().enumerate() {
                if req.cancel.is_cancelled() {
                    yield Err(ChatError::Cancelled);
                    return;
                }
                let n = i + 1;
                yield Ok(StreamChunk::progress(format!("Summarizing part {n} of {total}...")));

                let part = ChatRequest::new(req.model.id(), window.clone())
                    .with_system_prompt(MAP_INSTRUCTION)
                    .with_cancel(req.cancel.clone());
                match chat.generate_once(part).await {
                    Ok(summary) => plan.summaries.push(summary),
                    Err(e) => {
                        tracing::debug!(part = n, error = %e, "map phase failed");
                        yield Err(e);
                        return;
                    }
                }
                yield Ok(StreamChunk::progress(format!("Part {n} of {total} done.")));
            }
            debug_assert!(plan.is_complete());

            yield Ok(StreamChunk::progress(format!(
                "Combining {total} part summaries into the final answer..."
            )));
            let final_req = ChatRequest::new(req.model.id(), plan.combined())
                .with_system_prompt(reduce_prompt(&req.system_prompt))
                .with_grounded_search(req.use_grounded_search)
                .with_response_mime_type(req.response_mime_type.clone())
                .with_cancel(req.cancel.clone());

            yield Ok(StreamChunk::clear_progress());

            let mut answer = match chat.stream_chat(final_req).await {
                Ok(s) => s,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            while let Some(item) = answer.next().await {
                let failed = item.is_err();
                yield item;
                if failed {
                    return;
                }
            }
        };
        Box::pin(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_match_documented_limits() {
        let cfg = ChunkingConfig::default();
        assert_eq!(cfg.window_chars(1_000_000), 2_000_000);
        assert_eq!(cfg.window_chars(131_072), 262_144);
    }

    #[test]
    fn exceeds_is_strictly_greater() {
        let cfg = ChunkingConfig::default();
        // 4 tokens -> 8 characters
        assert!(!cfg.exceeds("12345678", 4));
        assert!(cfg.exceeds("123456789", 4));
    }

    #[test]
    fn exceeds_counts_characters_not_bytes() {
        let cfg = ChunkingConfig::default();
        assert!(!cfg.exceeds(&"\u{e9}".repeat(8), 4));
    }

    #[test]
    fn heuristics_are_configurable() {
        let cfg = ChunkingConfig {
            safety_factor: 0.5,
            chars_per_token: 4.0,
        };
        assert_eq!(cfg.window_chars(1000), 2000);
    }

    #[test]
    fn split_is_contiguous_and_bounded() {
        let input = "abcdefghij";
        let plan = ChunkingPlan::split(input, 4);
        assert_eq!(plan.windows, vec!["abcd", "efgh", "ij"]);
        assert_eq!(plan.windows.concat(), input);
    }

    #[test]
    fn split_respects_char_boundaries() {
        let input = "\u{e4}\u{f6}\u{fc}\u{df}\u{e9}";
        let plan = ChunkingPlan::split(input, 2);
        assert_eq!(plan.windows.len(), 3);
        assert_eq!(plan.windows[2], "\u{e9}");
        assert_eq!(plan.windows.concat(), input);
    }

    #[test]
    fn split_exact_multiple_has_no_empty_tail() {
        assert_eq!(ChunkingPlan::split("abcdef", 3).windows, vec!["abc", "def"]);
        assert!(ChunkingPlan::split("", 3).windows.is_empty());
    }

    #[test]
    fn reduce_prompt_keeps_original_instructions() {
        let p = reduce_prompt("Use bullet points.");
        assert!(p.ends_with("Use bullet points."));
    }

    #[test]
    fn combined_joins_with_separator() {
        let plan = ChunkingPlan {
            windows: vec!["a".into(), "b".into()],
            summaries: vec!["S1".into(), "S2".into()],
        };
        assert!(plan.is_complete());
        assert_eq!(plan.combined(), "S1\n\n---\n\nS2");
    }
}
