//! Summarizer capability and deterministic fallbacks.
//!
//! A [`Summarizer`] may return nothing for any reason (disabled, timeout,
//! quota, unparseable reply). Callers always hold a fallback computed by
//! [`preview_words`] and use it when the summarizer yields `None`.
//!
//! Concrete providers (OpenAI) live in the `kb-ingest` app crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Structured synopsis produced by a summarizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub summary: String,
    pub key_points: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
}

/// Optional summarization collaborator.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `text` about `topic`. `previous_summary` is the article's
    /// current summary when re-summarizing replaced content.
    ///
    /// Returns `None` on any failure; never errors.
    async fn summarize(
        &self,
        topic: &str,
        text: &str,
        previous_summary: Option<&str>,
    ) -> Option<Summary>;
}

/// A summarizer that never produces anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _: &str, _: &str, _: Option<&str>) -> Option<Summary> {
        None
    }
}

/// First `max_words` whitespace-delimited words of `text` followed by
/// `...`. Empty text yields an empty string.
pub fn preview_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().take(max_words).collect();
    if words.is_empty() {
        String::new()
    } else {
        format!("{}...", words.join(" "))
    }
}

/// Render a summary as the markdown stored in an article's `summary`.
///
/// Empty sections are omitted; list items are numbered.
pub fn to_markdown(summary: &Summary) -> String {
    let mut parts = vec!["## Summary".to_string(), summary.summary.clone(), String::new()];
    for (heading, items) in [
        ("## Key Points", &summary.key_points),
        ("## Decisions", &summary.decisions),
        ("## Action Items", &summary.action_items),
    ] {
        if items.is_empty() {
            continue;
        }
        parts.push(heading.to_string());
        parts.extend(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| format!("{}. {}", i + 1, item)),
        );
        parts.push(String::new());
    }
    parts.join("\n").trim_end().to_string()
}

/// Parse a model reply into a [`Summary`].
///
/// Markdown code fences around the JSON are tolerated. Replies without a
/// non-empty `summary` or without `key_points` yield `None`.
pub fn parse_summary_json(content: &str) -> Option<Summary> {
    let mut body = content.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.strip_prefix("json").unwrap_or(rest);
        body = body.strip_suffix("```").unwrap_or(body);
        body = body.trim();
    }
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    if !value.get("key_points")?.is_array() {
        return None;
    }
    let summary: Summary = serde_json::from_value(value).ok()?;
    if summary.summary.trim().is_empty() {
        None
    } else {
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_takes_first_words() {
        assert_eq!(preview_words("  the deploy  failed again ", 3), "the deploy failed...");
        assert_eq!(preview_words("short", 3), "short...");
        assert_eq!(preview_words("   ", 3), "");
    }

    #[test]
    fn markdown_sections() {
        let md = to_markdown(&Summary {
            summary: "Deploy was blocked.".to_string(),
            key_points: vec!["CI red".to_string(), "Fix merged".to_string()],
            decisions: vec![],
            action_items: vec!["Action: rerun - Assigned to: Ann".to_string()],
        });
        assert_eq!(
            md,
            "## Summary\nDeploy was blocked.\n\n## Key Points\n1. CI red\n2. Fix merged\n\n## Action Items\n1. Action: rerun - Assigned to: Ann"
        );
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "```json\n{\"summary\": \"S\", \"key_points\": [\"a\"], \"decisions\": [\"d\"]}\n```";
        let s = parse_summary_json(reply).unwrap();
        assert_eq!(s.summary, "S");
        assert_eq!(s.key_points, vec!["a"]);
        assert_eq!(s.decisions, vec!["d"]);
        assert!(s.action_items.is_empty());
    }

    #[test]
    fn rejects_incomplete_replies() {
        assert!(parse_summary_json("not json").is_none());
        assert!(parse_summary_json("{\"summary\": \"S\"}").is_none());
        assert!(parse_summary_json("{\"summary\": \"\", \"key_points\": []}").is_none());
    }

    #[tokio::test]
    async fn disabled_returns_none() {
        assert!(DisabledSummarizer.summarize("t", "text", None).await.is_none());
    }
}
