//! Prompt construction for topic classification.

use serde::Serialize;

use linksort_shared::{Item, LinksortError, Result};

/// Instructions sent as the system message of every classifier call.
pub const SYSTEM_PROMPT: &str = r#"You sort saved web links into topics.

For every snippet you receive, assign between 1 and 3 short topic labels based on its url, title, and snippet.

Rules:
- Reuse labels from the provided topic list whenever one fits. Near-duplicates of existing labels are not allowed.
- Only introduce a new label when none of the existing ones fit.
- If a snippet already has topics, keep them unless they are clearly wrong.
- Every snippet you return MUST have at least 1 and at most 3 topics.
- Use the exact snippet id you were given. Do not invent ids.

Respond with JSON of the form {"snippets": [{"id": <id>, "topics": ["<topic>", ...]}]}."#;

#[derive(Serialize)]
struct UserPayload<'a> {
    topics: &'a [String],
    snippets: &'a [Item],
}

/// Build the user message for one batch.
///
/// The batch is sent as JSON so ids survive verbatim.
pub fn build_user_message(batch: &[Item], vocabulary: &[String]) -> Result<String> {
    let payload = UserPayload {
        topics: vocabulary,
        snippets: batch,
    };
    let json = serde_json::to_string_pretty(&payload)
        .map_err(|e| LinksortError::Classifier(format!("failed to serialize batch: {e}")))?;

    Ok(format!(
        "Existing topics and the snippets to categorize:\n\n{json}"
    ))
}
