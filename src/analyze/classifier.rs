// src/analyze/classifier.rs
use async_trait::async_trait;

use crate::error::{PipelineError, Result};

/// Outcome of classifying one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A new project was found; `summary` is one or two sentences.
    Entity { name: String, summary: String },
    NoEntity,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Configuration probe; no network call.
    fn check_ready(&self) -> Result<()>;
    async fn classify(&self, text: &str) -> Result<Classification>;
    fn name(&self) -> &'static str;
}

const MAX_SUMMARY_CHARS: usize = 280;

/// Single line, collapsed whitespace, no control characters, bounded length.
pub fn sanitize_summary(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_SUMMARY_CHARS));
    let mut prev_space = false;
    let mut n = 0usize;
    for ch in input.chars() {
        let c = if ch.is_whitespace() || ch.is_control() { ' ' } else { ch };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
                n += 1;
            }
            prev_space = true;
        } else {
            out.push(c);
            n += 1;
            prev_space = false;
        }
        if n >= MAX_SUMMARY_CHARS {
            break;
        }
    }
    out.trim().to_string()
}

/// Entity handles are stored without the leading `@`.
fn clean_handle(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('@')
        .trim_matches(|c: char| c == '*' || c == '`' || c.is_whitespace())
        .to_string()
}

/// Parse a `PROJECT: @handle` / `SUMMARY: ...` reply.
pub fn parse_reply(reply: &str) -> Result<Classification> {
    let mut project: Option<String> = None;
    let mut summary: Option<String> = None;
    for line in reply.lines() {
        let line = line.trim().trim_start_matches(['*', '-', ' ']);
        let upper = line.to_ascii_uppercase();
        if upper.starts_with("PROJECT:") {
            project = Some(line["PROJECT:".len()..].trim().to_string());
        } else if upper.starts_with("SUMMARY:") {
            summary = Some(line["SUMMARY:".len()..].trim().to_string());
        }
    }

    let project = project.ok_or_else(|| {
        PipelineError::DataIntegrity(format!("classifier reply lacks PROJECT line: {:?}", truncate(reply, 80)))
    })?;
    let name = clean_handle(&project);
    if name.is_empty() || name.eq_ignore_ascii_case("none") || name.eq_ignore_ascii_case("unknown") {
        return Ok(Classification::NoEntity);
    }
    let summary = summary.map(|s| sanitize_summary(&s)).unwrap_or_default();
    if summary.is_empty() {
        return Err(PipelineError::DataIntegrity(format!(
            "classifier named @{name} without a summary"
        )));
    }
    Ok(Classification::Entity { name, summary })
}

fn truncate(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entity_reply() {
        let reply = "PROJECT: @AcmeFi\nSUMMARY: Acme is a new\n lending protocol on Base.";
        // the summary is taken from its own line only
        assert_eq!(
            parse_reply(reply).unwrap(),
            Classification::Entity {
                name: "AcmeFi".into(),
                summary: "Acme is a new".into()
            }
        );
    }

    #[test]
    fn none_means_no_entity() {
        assert_eq!(parse_reply("**PROJECT:** NONE").unwrap(), Classification::NoEntity);
        assert_eq!(parse_reply("project: none").unwrap(), Classification::NoEntity);
    }

    #[test]
    fn garbage_is_data_integrity() {
        assert!(matches!(parse_reply("YES"), Err(PipelineError::DataIntegrity(_))));
        assert!(matches!(parse_reply("PROJECT: @x"), Err(PipelineError::DataIntegrity(_))));
    }

    #[test]
    fn sanitize_collapses_and_caps() {
        assert_eq!(sanitize_summary("  a\n\tb   c "), "a b c");
        assert_eq!(sanitize_summary(&"x".repeat(500)).chars().count(), MAX_SUMMARY_CHARS);
    }
}
