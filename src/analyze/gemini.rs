// src/analyze/gemini.rs
//! Gemini `generateContent` classifier.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::classifier::{parse_reply, Classification, Classifier};
use crate::error::{retry_after_header, PipelineError, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Longer posts are cut before prompting to save tokens.
const MAX_PROMPT_CONTENT: usize = 1000;

const PROMPT: &str = "Analyze this Discord post that shares a Twitter/X link.\n\
Decide whether it announces or discusses a NEW crypto/Web3 project \
(token launch, IDO or TGE, new protocol or dApp, NFT collection, DeFi tool, chain or L2).\n\
General market talk, price talk and news about established projects do not count.\n\n\
If it is a new project, reply with exactly two lines:\n\
PROJECT: @<the project's X handle>\n\
SUMMARY: <one or two sentences, under 30 words, on what it does>\n\n\
Otherwise reply with exactly one line:\n\
PROJECT: NONE\n\n\
Post:\n";

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}
#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}
#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}
#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ReplyPart>,
}
#[derive(Deserialize)]
struct ReplyPart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect::<Vec<_>>().join(""))
            .unwrap_or_default()
    }
}

/// Gemini reports a bad key as 400 `API_KEY_INVALID` and quota as 429 `RESOURCE_EXHAUSTED`.
fn map_error(status: reqwest::StatusCode, retry_after: Option<Duration>, body: &str) -> PipelineError {
    if status == reqwest::StatusCode::BAD_REQUEST && body.contains("API_KEY_INVALID") {
        return PipelineError::AuthFailure("gemini rejected the API key".into());
    }
    if body.contains("RESOURCE_EXHAUSTED") {
        return PipelineError::RateLimited {
            message: "gemini quota exhausted".into(),
            retry_after,
        };
    }
    PipelineError::from_status(status, retry_after, body)
}

pub struct GeminiClassifier {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiClassifier {
    pub fn new(api_key: String, model: String, call_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("channel-digest/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(call_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("building http client: {e}")))?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    fn check_ready(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(PipelineError::Config("GEMINI_API_KEY is not set".into()));
        }
        if self.model.trim().is_empty() {
            return Err(PipelineError::Config("gemini model is not set".into()));
        }
        Ok(())
    }

    async fn classify(&self, text: &str) -> Result<Classification> {
        let content: String = text.chars().take(MAX_PROMPT_CONTENT).collect();
        if content.trim().chars().count() < 10 {
            return Ok(Classification::NoEntity);
        }
        let prompt = format!("{PROMPT}{content}");
        let req = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                max_output_tokens: 256,
            },
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let resp = self
            .http
            .post(url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = retry_after_header(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(map_error(status, retry_after, &body));
        }
        let body: GenerateResponse = resp.json().await?;
        let reply = body.text();
        tracing::debug!(model = %self.model, reply_len = reply.len(), "gemini replied");
        parse_reply(&reply)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn error_bodies_map_to_taxonomy() {
        let e = map_error(StatusCode::BAD_REQUEST, None, r#"{"error":{"status":"INVALID_ARGUMENT","details":[{"reason":"API_KEY_INVALID"}]}}"#);
        assert!(matches!(e, PipelineError::AuthFailure(_)));
        let e = map_error(StatusCode::TOO_MANY_REQUESTS, None, r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#);
        assert!(matches!(e, PipelineError::RateLimited { .. }));
        let e = map_error(StatusCode::BAD_REQUEST, None, "bad prompt");
        assert!(matches!(e, PipelineError::Provider(_)));
    }

    #[test]
    fn reply_text_joins_parts() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"PROJECT: @a\n"},{"text":"SUMMARY: b"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(body.text(), "PROJECT: @a\nSUMMARY: b");
        let empty: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.text(), "");
    }

    #[test]
    fn missing_key_is_not_ready() {
        let c = GeminiClassifier::new(String::new(), "gemini-1.5-flash".into(), Duration::from_secs(5)).unwrap();
        assert!(matches!(c.check_ready(), Err(PipelineError::Config(_))));
    }
}
