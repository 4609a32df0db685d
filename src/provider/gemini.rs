//! Gemini-shaped requests and responses.

use super::{ChatRequest, Citation, Role, StreamChunk};
use serde::{Deserialize, Serialize};

/// Finish reasons that mean the provider withheld the answer.
const BLOCKING_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
    "RECITATION",
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

impl GenerateContentRequest {
    pub fn from_chat(req: &ChatRequest) -> Self {
        let mut contents: Vec<Content> = req
            .history
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                };
                Content::text(Some(role), &m.content)
            })
            .collect();
        contents.push(Content::text(Some("user"), &req.new_message));

        let system_instruction =
            (!req.system_prompt.is_empty()).then(|| Content::text(None, &req.system_prompt));

        let tools = if req.use_grounded_search {
            vec![Tool {
                google_search: GoogleSearch {},
            }]
        } else {
            Vec::new()
        };

        let generation_config = req
            .response_mime_type
            .clone()
            .map(|mime| GenerationConfig {
                response_mime_type: Some(mime),
            });

        Self {
            contents,
            system_instruction,
            tools,
            generation_config,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    google_search: GoogleSearch,
}

#[derive(Debug, Clone, Serialize)]
struct GoogleSearch {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
}

/// One provider-native response object.
///
/// The proxy flattens the answer text into a top-level `text` field; the raw
/// API only carries it inside `candidates[0].content.parts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    fn text(role: Option<&str>, text: &str) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.to_string()),
            }],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroundingChunk {
    #[serde(default)]
    pub web: Option<WebSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSource {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

impl GenerateContentResponse {
    pub fn to_chunk(&self) -> StreamChunk {
        let text = self.text.clone().unwrap_or_else(|| self.candidate_text());
        StreamChunk {
            citations: self.citations(),
            ..StreamChunk::text(text)
        }
    }

    pub fn safety_blocked(&self) -> bool {
        if self
            .prompt_feedback
            .as_ref()
            .is_some_and(|f| f.block_reason.is_some())
        {
            return true;
        }
        self.candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .is_some_and(|r| BLOCKING_FINISH_REASONS.contains(&r))
    }

    fn candidate_text(&self) -> String {
        // Concatenate all text parts of the first candidate.
        let Some(content) = self.candidates.first().and_then(|c| c.content.as_ref()) else {
            return String::new();
        };
        content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect()
    }

    fn citations(&self) -> Vec<Citation> {
        let Some(meta) = self
            .candidates
            .first()
            .and_then(|c| c.grounding_metadata.as_ref())
        else {
            return Vec::new();
        };

        let mut out: Vec<Citation> = Vec::new();
        for web in meta.grounding_chunks.iter().filter_map(|c| c.web.as_ref()) {
            let Some(uri) = web.uri.clone().filter(|u| !u.is_empty()) else {
                continue;
            };
            if out.iter().any(|c| c.uri == uri) {
                continue;
            }
            let title = web.title.clone().unwrap_or_else(|| uri.clone());
            out.push(Citation { title, uri });
        }
        out
    }
}
