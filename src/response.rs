//! Structured `{title, body, summary}` recovery from free-form model output.
//!
//! Models are asked for JSON but not trusted to produce it. Parsing tries the
//! strict route first (fences stripped, outermost `{...}` span parsed) and
//! degrades to Markdown heuristics. The only hard failure is missing content.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::GenerationResult;
use crate::error::PrDraftError;

pub const DEFAULT_TITLE: &str = "Pull Request";
pub const DEFAULT_SUMMARY: &str = "Pull request changes";

const SUMMARY_MAX_CHARS: usize = 300;

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static regex is valid")
}

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| re(r"```(?:json)?"));
static JSON_SPAN: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)\{.*\}"));

static TITLE_PATTERNS: LazyLock<[Regex; 4]> = LazyLock::new(|| {
    [
        re(r"(?m)^#[ \t]+(.+)$"),
        re(r"(?mi)^title:[ \t]*(.+)$"),
        re(r"(?m)^##[ \t]+(.+)$"),
        re(r"(?m)^###[ \t]+(.+)$"),
    ]
});

static SUMMARY_PATTERNS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        re(r"(?mi)^summary:[ \t]*(.+)$"),
        re(r"(?mi)^#{2,3}[ \t]*summary[ \t]*\r?\n+((?:.+\r?\n?)+)"),
    ]
});

static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| re(r"\r?\n[ \t]*\r?\n"));
static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| re(r"(?s)```.*?```"));
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| re(r"`([^`\n]*)`"));
static BOLD: LazyLock<Regex> = LazyLock::new(|| re(r"\*\*([^*]+)\*\*|__([^_]+)__"));
static ITALIC: LazyLock<Regex> = LazyLock::new(|| re(r"\*([^*\n]+)\*"));
static HEADING_MARK: LazyLock<Regex> = LazyLock::new(|| re(r"(?m)^#{1,6}[ \t]*"));
static LINK: LazyLock<Regex> = LazyLock::new(|| re(r"\[([^\]]*)\]\([^)]*\)"));
static SENTENCE: LazyLock<Regex> = LazyLock::new(|| re(r"[^.!?]+[.!?]+"));

/// A model response as handed over by the caller. `content` may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AiResponse {
    #[serde(default)]
    pub content: Option<String>,
}

impl AiResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
        }
    }
}

impl From<GenerationResult> for AiResponse {
    fn from(result: GenerationResult) -> Self {
        Self {
            content: Some(result.content),
        }
    }
}

/// Pull request text recovered from a response. All fields are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedContent {
    pub title: String,
    pub body: String,
    pub summary: String,
}

/// Parse a model response into title/body/summary.
///
/// Missing and empty content are both rejected with [`PrDraftError::NoContent`];
/// any non-empty text yields a result.
pub fn parse_ai_response(response: &AiResponse) -> Result<ParsedContent, PrDraftError> {
    let content = response
        .content
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or(PrDraftError::NoContent)?;

    let cleaned = clean_json_candidate(content);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(Value::Object(map)) => {
            let field = |name: &str| {
                map.get(name)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            let title = field("title")
                .or_else(|| extract_title(&outside_json_span(content)))
                .unwrap_or_else(|| DEFAULT_TITLE.to_string());
            let body = field("description")
                .or_else(|| field("body"))
                .unwrap_or_else(|| content.to_string());
            let summary = field("summary").unwrap_or_else(|| fallback_summary(&body));
            tracing::debug!("parsed structured AI response");
            Ok(ParsedContent {
                title,
                body,
                summary,
            })
        }
        _ => {
            tracing::debug!("AI response is not a JSON object, using heuristic extraction");
            Ok(ParsedContent {
                title: extract_title(content).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
                body: content.to_string(),
                summary: extract_summary(content),
            })
        }
    }
}

/// Strip code fences, trim, and keep only the outermost `{...}` span if one
/// exists (first `{` through last `}`; braces are not balanced).
pub fn clean_json_candidate(content: &str) -> String {
    let unfenced = CODE_FENCE.replace_all(content, "");
    let trimmed = unfenced.trim();
    JSON_SPAN
        .find(trimmed)
        .map_or_else(|| trimmed.to_string(), |m| m.as_str().to_string())
}

/// The unfenced text around the JSON span, so heuristics do not pick up the
/// JSON itself.
fn outside_json_span(content: &str) -> String {
    let unfenced = CODE_FENCE.replace_all(content, "");
    JSON_SPAN.replace(&unfenced, "\n").into_owned()
}

/// First of: `# H1`, `Title:` line, `## H2`, `### H3`; else the first line
/// whose trimmed length is strictly between 10 and 100 characters.
pub fn extract_title(content: &str) -> Option<String> {
    for pattern in TITLE_PATTERNS.iter() {
        if let Some(title) = pattern
            .captures(content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|t| !t.is_empty())
        {
            return Some(title.to_string());
        }
    }
    content
        .lines()
        .map(str::trim)
        .find(|l| (11..100).contains(&l.chars().count()))
        .map(str::to_string)
}

/// Summary from a `Summary:` line or a `## Summary` section, else the first
/// paragraph of 21..=499 characters, else [`fallback_summary`].
pub fn extract_summary(content: &str) -> String {
    for pattern in SUMMARY_PATTERNS.iter() {
        if let Some(summary) = pattern
            .captures(content)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
        {
            return summary.to_string();
        }
    }
    PARAGRAPH_BREAK
        .split(content)
        .map(str::trim)
        .find(|p| (21..500).contains(&p.chars().count()))
        .map_or_else(|| fallback_summary(content), str::to_string)
}

/// Plain-text summary of Markdown: first substantial paragraph, shortened to
/// its first sentence and hard-capped at 300 characters. Never empty.
pub fn fallback_summary(text: &str) -> String {
    let plain = FENCED_BLOCK.replace_all(text, "");
    let plain = INLINE_CODE.replace_all(&plain, "$1");
    let plain = BOLD.replace_all(&plain, "$1$2");
    let plain = ITALIC.replace_all(&plain, "$1");
    let plain = HEADING_MARK.replace_all(&plain, "");
    let plain = LINK.replace_all(&plain, "$1");
    let plain = plain.trim();

    let mut summary = PARAGRAPH_BREAK
        .split(plain)
        .map(str::trim)
        .find(|p| p.chars().count() > 20)
        .unwrap_or(plain)
        .to_string();

    if summary.chars().count() > SUMMARY_MAX_CHARS {
        let sentence = SENTENCE
            .find_iter(&summary)
            .map(|m| m.as_str().trim())
            .find(|s| s.chars().count() > 20)
            .map(str::to_string);
        if let Some(sentence) = sentence {
            summary = sentence;
        }
    }

    if summary.chars().count() > SUMMARY_MAX_CHARS {
        let cut: String = summary.chars().take(SUMMARY_MAX_CHARS - 3).collect();
        summary = format!("{cut}...");
    }

    if summary.trim().is_empty() {
        DEFAULT_SUMMARY.to_string()
    } else {
        summary
    }
}
