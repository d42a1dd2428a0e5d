//! Decoding of the model's structured `{snippets: [{id, topics}]}` output.

use serde::Deserialize;
use tracing::{debug, warn};

use linksort_shared::{ItemId, LinksortError, Result};

use crate::{ClassificationResult, TopicAssignment};

/// Upper bound of topics kept per item.
pub const MAX_TOPICS_PER_ITEM: usize = 3;

#[derive(Debug, Deserialize)]
struct RawCategorization {
    snippets: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawSnippet {
    id: ItemId,
    topics: Vec<String>,
}

/// JSON schema handed to the model as its response format.
pub fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "snippets": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "integer" },
                        "topics": {
                            "type": "array",
                            "items": { "type": "string" }
                        }
                    },
                    "required": ["id", "topics"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["snippets"],
        "additionalProperties": false
    })
}

/// Decode model output into a [`ClassificationResult`].
///
/// The envelope must be an object with a `snippets` array, otherwise this
/// returns a parse error. Inside the array, entries that don't match
/// `{id: integer, topics: [string]}` or that have no non-blank topic are
/// counted in `rejected`. Topics are trimmed, de-duplicated, and capped at
/// [`MAX_TOPICS_PER_ITEM`].
pub fn parse_categorization(content: &str) -> Result<ClassificationResult> {
    let body = strip_code_fence(content);

    let raw: RawCategorization = serde_json::from_str(body).map_err(|e| {
        LinksortError::parse(format!(
            "classifier output is not a categorization: {e} (got: {})",
            body.chars().take(200).collect::<String>()
        ))
    })?;

    let mut result = ClassificationResult::default();

    for entry in raw.snippets {
        let snippet: RawSnippet = match serde_json::from_value(entry) {
            Ok(snippet) => snippet,
            Err(e) => {
                warn!(error = %e, "rejecting malformed classifier entry");
                result.rejected += 1;
                continue;
            }
        };

        let topics = normalize_topics(snippet.topics);
        if topics.is_empty() {
            warn!(id = snippet.id, "rejecting classifier entry without topics");
            result.rejected += 1;
            continue;
        }

        result.assignments.push(TopicAssignment {
            id: snippet.id,
            topics,
        });
    }

    debug!(
        assignments = result.assignments.len(),
        rejected = result.rejected,
        "decoded classifier output"
    );

    Ok(result)
}

fn normalize_topics(topics: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(MAX_TOPICS_PER_ITEM);
    for topic in topics {
        let topic = topic.trim();
        if topic.is_empty() || out.iter().any(|t| t == topic) {
            continue;
        }
        if out.len() == MAX_TOPICS_PER_ITEM {
            debug!(dropped = topic, "too many topics, truncating");
            break;
        }
        out.push(topic.to_string());
    }
    out
}

/// Some compatible endpoints wrap JSON in a Markdown code fence.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
