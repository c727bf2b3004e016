// src/publish/typefully.rs
//! Typefully drafts API. Posts land as scheduled drafts, not live tweets.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::Publisher;
use crate::error::{check_response, PipelineError, Result};
use crate::model::Receipt;

const DEFAULT_BASE_URL: &str = "https://api.typefully.com/v1";

#[derive(Serialize)]
struct DraftRequest<'a> {
    content: &'a str,
    #[serde(rename = "schedule-date")]
    schedule_date: &'a str,
}

/// Typefully returns the id as a number; older responses used a string.
fn receipt_from(body: &serde_json::Value) -> Result<Receipt> {
    let id = match body.get("id") {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        _ => {
            return Err(PipelineError::DataIntegrity(
                "typefully response has no draft id".into(),
            ))
        }
    };
    let url = body
        .get("share_url")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("https://typefully.com/drafts/{id}"));
    Ok(Receipt { id, url: Some(url) })
}

pub struct TypefullyPublisher {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    schedule: String,
}

impl TypefullyPublisher {
    pub fn new(api_key: String, schedule: String, call_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent("channel-digest/0.1")
            .timeout(call_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("building http client: {e}")))?;
        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            schedule,
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[async_trait]
impl Publisher for TypefullyPublisher {
    fn check_ready(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(PipelineError::Config("TYPEFULLY_API_KEY is not set".into()));
        }
        Ok(())
    }

    async fn publish(&self, text: &str) -> Result<Receipt> {
        let req = DraftRequest {
            content: text.trim(),
            schedule_date: &self.schedule,
        };
        let resp = self
            .http
            .post(format!("{}/drafts/", self.base_url))
            .header("X-API-KEY", self.auth_header())
            .json(&req)
            .send()
            .await?;
        let body: serde_json::Value = check_response(resp).await?.json().await?;
        receipt_from(&body)
    }

    async fn probe(&self) -> Result<()> {
        self.check_ready()?;
        let resp = self
            .http
            .get(format!("{}/profiles/", self.base_url))
            .header("X-API-KEY", self.auth_header())
            .send()
            .await?;
        check_response(resp).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "typefully"
    }
}
